//! Shared position segment.
//!
//! A tiny memory-mapped file holding one atomically updated `i64`. The host
//! creates it, the provider maps it read-write and stores position ticks
//! without touching the control channel.

use crate::transport::SegmentDescriptor;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};

pub const SEGMENT_MAGIC: u32 = 0x4c59504f; // "LYPO"
pub const SEGMENT_VERSION: u32 = 1;
/// Byte offset of the position value inside the segment.
pub const POSITION_OFFSET: usize = 8;

#[repr(C)]
struct PositionHeader {
    magic: u32,
    version: u32,
    position: AtomicI64,
}

/// Total size of a position segment in bytes.
pub const SEGMENT_SIZE: usize = mem::size_of::<PositionHeader>();

pub struct PositionSegment {
    map: MmapMut,
    path: PathBuf,
}

impl PositionSegment {
    /// Creates and initialises a new segment at `path`. Fails if the file exists.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(SEGMENT_SIZE as u64)?;

        let mut map = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file)? };
        unsafe {
            ptr::write(
                map.as_mut_ptr() as *mut PositionHeader,
                PositionHeader {
                    magic: SEGMENT_MAGIC,
                    version: SEGMENT_VERSION,
                    position: AtomicI64::new(0),
                },
            );
        }
        map.flush()?;

        Ok(Self {
            map,
            path: path.to_path_buf(),
        })
    }

    /// Maps an existing segment described by the host.
    pub fn open(descriptor: &SegmentDescriptor) -> io::Result<Self> {
        if descriptor.size != SEGMENT_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "segment size mismatch: expected {SEGMENT_SIZE}, got {}",
                    descriptor.size
                ),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&descriptor.path)?;
        if file.metadata()?.len() != SEGMENT_SIZE as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment file has unexpected length",
            ));
        }
        let map = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file)? };
        let segment = Self {
            map,
            path: descriptor.path.clone(),
        };
        let header = segment.header();
        if header.magic != SEGMENT_MAGIC || header.version != SEGMENT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment header mismatch",
            ));
        }
        Ok(segment)
    }

    fn header(&self) -> &PositionHeader {
        unsafe { &*(self.map.as_ptr() as *const PositionHeader) }
    }

    pub fn write_position(&self, position_ms: i64) {
        self.header().position.store(position_ms, Ordering::Release);
    }

    pub fn read_position(&self) -> i64 {
        self.header().position.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> SegmentDescriptor {
        SegmentDescriptor {
            path: self.path.clone(),
            size: SEGMENT_SIZE,
        }
    }

    /// Unmaps the segment and deletes its backing file.
    pub fn unlink(self) -> io::Result<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for PositionSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionSegment")
            .field("path", &self.path)
            .finish()
    }
}
