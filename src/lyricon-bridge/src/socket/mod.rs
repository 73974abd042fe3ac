//! Unix domain socket transport.
//!
//! Everything lives under one runtime directory:
//!
//! ```text
//! <runtime>/<host_id>.discovery.sock      host: receives Handoff lines
//! <runtime>/<host_id>.service.sock        host: one connection per registered provider
//! <runtime>/providers/<id>-<pid>-<n>.sock provider: callback endpoint
//! <runtime>/boot/<pid>-<n>.sock           provider process: HostReady receiver
//! <runtime>/segments/<id>-<pid>-<n>.pos   shared position segments
//! ```

mod boot;
mod client;
mod host;

pub use boot::{announce_host_ready, BootSignalListener};
pub use client::{SocketDiscovery, SocketPlayerHandle, SocketRemoteService};
pub use host::{BridgeHost, HostOptions, RegisteredProvider};

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique suffix for sockets several instances may bind at once.
fn next_local_id() -> u64 {
    NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    root: PathBuf,
    host_id: String,
}

impl RuntimeLayout {
    pub fn new(root: impl Into<PathBuf>, host_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            host_id: host_id.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn discovery_socket(&self) -> PathBuf {
        self.root
            .join(format!("{}.discovery.sock", file_safe(&self.host_id)))
    }

    pub fn service_socket(&self) -> PathBuf {
        self.root
            .join(format!("{}.service.sock", file_safe(&self.host_id)))
    }

    pub fn providers_dir(&self) -> PathBuf {
        self.root.join("providers")
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.root.join("boot")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join("segments")
    }

    /// A fresh callback endpoint path for `provider_id` in this process.
    pub fn provider_socket(&self, provider_id: &str) -> PathBuf {
        self.providers_dir().join(format!(
            "{}-{}-{}.sock",
            file_safe(provider_id),
            std::process::id(),
            next_local_id()
        ))
    }

    /// A fresh boot-signal socket path for this process.
    pub fn boot_socket(&self) -> PathBuf {
        self.boot_dir()
            .join(format!("{}-{}.sock", std::process::id(), next_local_id()))
    }

    /// A fresh segment path for `provider_id`, unique across host instances.
    pub fn segment_path(&self, provider_id: &str) -> PathBuf {
        self.segments_dir().join(format!(
            "{}-{}-{}.pos",
            file_safe(provider_id),
            std::process::id(),
            next_local_id()
        ))
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            self.root.clone(),
            self.providers_dir(),
            self.boot_dir(),
            self.segments_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Replaces anything but `[A-Za-z0-9._-]` so ids can be used as file names.
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Binds `path`, replacing a stale socket file nobody listens on.
fn bind_listener(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is already being served", path.display()),
            ));
        }
        tracing::debug!(path = %path.display(), "Removing stale socket");
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

fn remove_socket(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %err, "Failed to remove socket file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_live_under_root() {
        let layout = RuntimeLayout::new("/run/lyricon", "io.github.proify.lyricon");
        assert_eq!(
            layout.discovery_socket(),
            PathBuf::from("/run/lyricon/io.github.proify.lyricon.discovery.sock")
        );
        let segment = layout.segment_path("com.example/music");
        assert!(segment.starts_with("/run/lyricon/segments"));
        assert!(segment
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("com.example_music-") && n.ends_with(".pos")));
        assert!(layout.boot_socket().starts_with("/run/lyricon/boot"));
    }

    #[test]
    fn provider_sockets_are_unique_per_call() {
        let layout = RuntimeLayout::new("/tmp/x", "h");
        assert_ne!(layout.provider_socket("p"), layout.provider_socket("p"));
    }

    #[test]
    fn stale_socket_is_replaced_but_live_one_is_not() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let live = bind_listener(&path).unwrap();
        let err = bind_listener(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
        drop(live);
    }
}
