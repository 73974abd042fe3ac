//! Host-ready broadcast over the `boot/` directory.

use super::{bind_listener, remove_socket, RuntimeLayout};
use crate::boot::{BootSource, HostRestartSignal};
use crate::protocol::{read_message, write_message, HostReady, PROTOCOL_VERSION};
use std::io::{self, BufReader};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

const BOOT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Receives `HostReady` lines for this process and forwards them to a
/// [`HostRestartSignal`].
#[derive(Debug)]
pub struct BootSignalListener {
    path: PathBuf,
    stopping: Arc<AtomicBool>,
}

impl BootSignalListener {
    pub fn start(layout: &RuntimeLayout, signal: &Arc<HostRestartSignal>) -> io::Result<Self> {
        std::fs::create_dir_all(layout.boot_dir())?;
        let path = layout.boot_socket();
        let listener = bind_listener(&path)?;
        let stopping = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopping);
        let signal = Arc::downgrade(signal);
        thread::Builder::new()
            .name("lyricon-boot".into())
            .spawn(move || receive_loop(listener, flag, signal))?;

        tracing::debug!(path = %path.display(), "Listening for host restarts");
        Ok(Self { path, stopping })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BootSource for BootSignalListener {
    fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = UnixStream::connect(&self.path);
        remove_socket(&self.path);
    }
}

fn receive_loop(listener: UnixListener, stopping: Arc<AtomicBool>, signal: Weak<HostRestartSignal>) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "Boot signal accept failed");
                continue;
            }
        };
        let ready = stream
            .set_read_timeout(Some(BOOT_IO_TIMEOUT))
            .map_err(Into::into)
            .and_then(|_| read_message::<_, HostReady>(&mut BufReader::new(stream)));
        match ready {
            Ok(Some(ready)) if ready.protocol_version == PROTOCOL_VERSION => {
                let Some(signal) = signal.upgrade() else {
                    break;
                };
                signal.notify_host_ready(&ready.host_id);
            }
            Ok(Some(ready)) => tracing::warn!(
                host_id = %ready.host_id,
                version = ready.protocol_version,
                "Ignoring host with incompatible protocol"
            ),
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "Malformed boot signal"),
        }
    }
}

/// Tells every provider process under `layout` that its host is ready.
/// Sockets nobody listens on any more are removed. Returns how many
/// processes were reached.
pub fn announce_host_ready(layout: &RuntimeLayout) -> io::Result<usize> {
    let entries = match std::fs::read_dir(layout.boot_dir()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    let ready = HostReady {
        host_id: layout.host_id().to_string(),
        protocol_version: PROTOCOL_VERSION,
    };

    let mut notified = 0;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sock") {
            continue;
        }
        match UnixStream::connect(&path) {
            Ok(mut stream) => {
                let sent = stream
                    .set_write_timeout(Some(BOOT_IO_TIMEOUT))
                    .map_err(Into::into)
                    .and_then(|_| write_message(&mut stream, &ready));
                match sent {
                    Ok(()) => notified += 1,
                    Err(err) => {
                        tracing::debug!(path = %path.display(), error = %err, "Failed to signal provider")
                    }
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                tracing::debug!(path = %path.display(), "Removing stale boot socket");
                remove_socket(&path);
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "Failed to reach provider")
            }
        }
    }
    Ok(notified)
}
