//! Provider side of the socket transport.

use super::{bind_listener, remove_socket, RuntimeLayout};
use crate::endpoint::ProviderEndpoint;
use crate::protocol::{
    read_message, write_message, EndpointRequest, EndpointResponse, Handoff, ServiceCall,
    ServiceRequest, ServiceResponse, ServiceResult, WireError, PROTOCOL_VERSION,
};
use crate::transport::{
    DeathCallback, DiscoveryChannel, DiscoveryError, RemotePlayerHandle, RemoteService,
    SegmentDescriptor, TransportError, TransportResult,
};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::BufReader;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Announces providers by writing a handoff line to the host's discovery
/// socket, and serves the provider's callback endpoint.
pub struct SocketDiscovery {
    layout: RuntimeLayout,
    call_timeout: Duration,
    server: Mutex<Option<EndpointServer>>,
    closed: AtomicBool,
}

impl SocketDiscovery {
    pub fn new(layout: RuntimeLayout, call_timeout: Duration) -> Self {
        Self {
            layout,
            call_timeout,
            server: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Address of the callback endpoint, once it's being served.
    pub fn endpoint_path(&self) -> Option<PathBuf> {
        self.server.lock().as_ref().map(|s| s.path.clone())
    }

    fn ensure_server(&self, endpoint: &Arc<ProviderEndpoint>) -> Result<PathBuf, DiscoveryError> {
        let mut server = self.server.lock();
        if let Some(server) = server.as_ref() {
            return Ok(server.path.clone());
        }
        let path = self
            .layout
            .provider_socket(&endpoint.provider_info().provider_id);
        let started = EndpointServer::start(path, Arc::clone(endpoint), self.call_timeout)
            .map_err(DiscoveryError::Endpoint)?;
        let path = started.path.clone();
        *server = Some(started);
        Ok(path)
    }
}

impl DiscoveryChannel for SocketDiscovery {
    fn announce(&self, endpoint: &Arc<ProviderEndpoint>) -> Result<(), DiscoveryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Closed);
        }
        let endpoint_path = self.ensure_server(endpoint)?;

        let unreachable = |source| DiscoveryError::Unreachable {
            host_id: self.layout.host_id().to_string(),
            source,
        };
        let mut stream =
            UnixStream::connect(self.layout.discovery_socket()).map_err(unreachable)?;
        stream
            .set_write_timeout(Some(self.call_timeout))
            .map_err(unreachable)?;
        write_message(
            &mut stream,
            &Handoff {
                protocol_version: PROTOCOL_VERSION,
                endpoint: endpoint_path,
            },
        )?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let server = self.server.lock().take();
        if let Some(server) = server {
            server.stop();
        }
    }
}

impl Drop for SocketDiscovery {
    fn drop(&mut self) {
        self.close();
    }
}

struct EndpointServer {
    path: PathBuf,
    stopping: Arc<AtomicBool>,
}

impl EndpointServer {
    fn start(
        path: PathBuf,
        endpoint: Arc<ProviderEndpoint>,
        call_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = bind_listener(&path)?;
        let stopping = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopping);
        thread::Builder::new()
            .name("lyricon-endpoint".into())
            .spawn(move || accept_loop(listener, flag, endpoint, call_timeout))?;
        tracing::debug!(path = %path.display(), "Serving provider endpoint");
        Ok(Self { path, stopping })
    }

    fn stop(self) {
        self.stopping.store(true, Ordering::SeqCst);
        // wake the accept loop
        let _ = UnixStream::connect(&self.path);
        remove_socket(&self.path);
    }
}

fn accept_loop(
    listener: UnixListener,
    stopping: Arc<AtomicBool>,
    endpoint: Arc<ProviderEndpoint>,
    call_timeout: Duration,
) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let endpoint = Arc::clone(&endpoint);
                let spawned = thread::Builder::new()
                    .name("lyricon-endpoint-conn".into())
                    .spawn(move || serve_endpoint(stream, endpoint, call_timeout));
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "Failed to spawn endpoint handler");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Endpoint accept failed"),
        }
    }
}

fn serve_endpoint(stream: UnixStream, endpoint: Arc<ProviderEndpoint>, call_timeout: Duration) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to clone endpoint stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    loop {
        let request = match read_message::<_, EndpointRequest>(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "Endpoint connection closed");
                break;
            }
        };
        let response = handle_endpoint_request(&endpoint, request, call_timeout);
        if let Err(err) = write_message(&mut writer, &response) {
            tracing::debug!(error = %err, "Failed to answer host");
            break;
        }
    }
}

fn handle_endpoint_request(
    endpoint: &ProviderEndpoint,
    request: EndpointRequest,
    call_timeout: Duration,
) -> EndpointResponse {
    match request {
        EndpointRequest::GetProviderInfo => EndpointResponse::ProviderInfo {
            info: endpoint.provider_info_bytes().to_vec(),
        },
        EndpointRequest::RunCommand { command } => {
            tracing::debug!(command = %command.name, "Host command");
            EndpointResponse::CommandResult {
                reply: endpoint.command_handler().on_command(&command),
            }
        }
        EndpointRequest::Registered { service } => {
            let provider_id = &endpoint.provider_info().provider_id;
            match SocketRemoteService::connect(&service, provider_id, call_timeout) {
                Ok(service) => {
                    endpoint.on_registered(Arc::new(service));
                    EndpointResponse::Ack
                }
                Err(err) => {
                    tracing::warn!(
                        service = %service.display(),
                        error = %err,
                        "Failed to connect to host service"
                    );
                    EndpointResponse::Error(WireError::new(err.to_string()))
                }
            }
        }
    }
}

/// One service connection. Shared by the service and player handles; the
/// reader thread owns the read half.
struct ServiceConnection {
    writer: Mutex<UnixStream>,
    pending: Mutex<HashMap<u64, Sender<ServiceResult>>>,
    next_id: AtomicU64,
    alive: AtomicBool,
    death: Mutex<Option<DeathCallback>>,
    call_timeout: Duration,
}

impl ServiceConnection {
    fn request(&self, call: ServiceCall) -> TransportResult<ServiceResult> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let name = call.name();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(id, tx);
        if !self.alive.load(Ordering::SeqCst) {
            self.pending.lock().remove(&id);
            return Err(TransportError::Disconnected);
        }

        tracing::trace!(id, call = name, "Service call");
        let written = {
            let mut writer = self.writer.lock();
            write_message(&mut *writer, &ServiceRequest { id, call })
        };
        if let Err(err) = written {
            self.pending.lock().remove(&id);
            return Err(err.into());
        }

        match rx.recv_timeout(self.call_timeout) {
            Ok(ServiceResult::Error(err)) => Err(TransportError::Remote(err.message)),
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout { call: name })
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn accepted(&self, call: ServiceCall) -> TransportResult<bool> {
        let name = call.name();
        match self.request(call)? {
            ServiceResult::Accepted { accepted } => Ok(accepted),
            _ => Err(TransportError::UnexpectedResponse { call: name }),
        }
    }

    fn read_responses(&self, mut reader: BufReader<UnixStream>) {
        loop {
            match read_message::<_, ServiceResponse>(&mut reader) {
                Ok(Some(response)) => {
                    let waiter = self.pending.lock().remove(&response.id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(response.result);
                        }
                        None => tracing::debug!(id = response.id, "Dropping late response"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(error = %err, "Service connection failed");
                    break;
                }
            }
        }
        self.mark_dead();
    }

    /// Fails outstanding calls and fires the death callback. Only the first
    /// call has any effect.
    fn mark_dead(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.pending.lock().clear();
        let callback = self.death.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn close(&self) {
        let _ = self.writer.lock().shutdown(Shutdown::Both);
    }
}

/// Service handle backed by a connection to `<host_id>.service.sock`.
pub struct SocketRemoteService {
    connection: Arc<ServiceConnection>,
}

impl SocketRemoteService {
    /// Connects and performs the `Hello` exchange.
    pub fn connect(path: &Path, provider_id: &str, call_timeout: Duration) -> TransportResult<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_write_timeout(Some(call_timeout))?;
        let reader = BufReader::new(stream.try_clone()?);

        let connection = Arc::new(ServiceConnection {
            writer: Mutex::new(stream),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            death: Mutex::new(None),
            call_timeout,
        });
        let reading = Arc::clone(&connection);
        thread::Builder::new()
            .name("lyricon-service-reader".into())
            .spawn(move || reading.read_responses(reader))?;

        let service = Self { connection };
        match service.connection.request(ServiceCall::Hello {
            protocol_version: PROTOCOL_VERSION,
            provider_id: provider_id.to_string(),
        })? {
            ServiceResult::Welcome => Ok(service),
            _ => Err(TransportError::UnexpectedResponse { call: "hello" }),
        }
    }
}

impl RemoteService for SocketRemoteService {
    fn player(&self) -> TransportResult<Arc<dyn RemotePlayerHandle>> {
        match self.connection.request(ServiceCall::GetPlayer)? {
            ServiceResult::Player { segment } => Ok(Arc::new(SocketPlayerHandle {
                connection: Arc::clone(&self.connection),
                segment,
            })),
            _ => Err(TransportError::UnexpectedResponse { call: "get_player" }),
        }
    }

    fn disconnect(&self) -> TransportResult<()> {
        self.connection.accepted(ServiceCall::Disconnect).map(|_| ())
    }

    fn is_alive(&self) -> bool {
        self.connection.alive.load(Ordering::SeqCst)
    }

    fn link_to_death(&self, callback: DeathCallback) -> TransportResult<()> {
        if !self.is_alive() {
            return Err(TransportError::Disconnected);
        }
        *self.connection.death.lock() = Some(callback);
        // the reader may have died in between and missed the callback
        if !self.is_alive() && self.connection.death.lock().take().is_some() {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }

    fn unlink_to_death(&self) {
        self.connection.death.lock().take();
    }
}

impl Drop for SocketRemoteService {
    fn drop(&mut self) {
        self.connection.close();
    }
}

pub struct SocketPlayerHandle {
    connection: Arc<ServiceConnection>,
    segment: Option<SegmentDescriptor>,
}

impl RemotePlayerHandle for SocketPlayerHandle {
    fn set_song(&self, payload: Option<&[u8]>) -> TransportResult<bool> {
        self.connection.accepted(ServiceCall::SetSong {
            payload: payload.map(<[u8]>::to_vec),
        })
    }

    fn set_playback_state(&self, playing: bool) -> TransportResult<bool> {
        self.connection
            .accepted(ServiceCall::SetPlaybackState { playing })
    }

    fn seek_to(&self, position_ms: i64) -> TransportResult<bool> {
        self.connection.accepted(ServiceCall::SeekTo { position_ms })
    }

    fn set_position_update_interval(&self, interval_ms: i32) -> TransportResult<bool> {
        self.connection
            .accepted(ServiceCall::SetPositionUpdateInterval { interval_ms })
    }

    fn send_text(&self, text: Option<&str>) -> TransportResult<bool> {
        self.connection.accepted(ServiceCall::SendText {
            text: text.map(str::to_string),
        })
    }

    fn set_display_translation(&self, visible: bool) -> TransportResult<bool> {
        self.connection
            .accepted(ServiceCall::SetDisplayTranslation { visible })
    }

    fn set_display_roma(&self, visible: bool) -> TransportResult<bool> {
        self.connection
            .accepted(ServiceCall::SetDisplayRoma { visible })
    }

    fn position_segment(&self) -> Option<SegmentDescriptor> {
        self.segment.clone()
    }
}

impl std::fmt::Debug for SocketPlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPlayerHandle")
            .field("segment", &self.segment)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    /// Accepts one service connection and answers Hello, then runs `script`.
    fn fake_host<F>(path: &Path, script: F) -> thread::JoinHandle<()>
    where
        F: FnOnce(BufReader<UnixStream>, UnixStream) + Send + 'static,
    {
        let listener = UnixListener::bind(path).unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let hello: ServiceRequest = read_message(&mut reader).unwrap().unwrap();
            write_message(
                &mut writer,
                &ServiceResponse {
                    id: hello.id,
                    result: ServiceResult::Welcome,
                },
            )
            .unwrap();
            script(reader, writer);
        })
    }

    #[test]
    fn calls_are_correlated_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("svc.sock");
        let host = fake_host(&path, |mut reader, mut writer| {
            let request: ServiceRequest = read_message(&mut reader).unwrap().unwrap();
            assert_eq!(request.call, ServiceCall::SetPlaybackState { playing: true });
            write_message(
                &mut writer,
                &ServiceResponse {
                    id: request.id,
                    result: ServiceResult::Accepted { accepted: true },
                },
            )
            .unwrap();
            writer.flush().unwrap();
        });

        let service = SocketRemoteService::connect(&path, "p", Duration::from_secs(2)).unwrap();
        let handle = SocketPlayerHandle {
            connection: Arc::clone(&service.connection),
            segment: None,
        };
        assert!(handle.set_playback_state(true).unwrap());
        host.join().unwrap();
    }

    #[test]
    fn eof_fires_death_once_and_fails_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("svc.sock");
        let (release_tx, release_rx) = bounded::<()>(1);
        let host = fake_host(&path, move |_reader, _writer| {
            let _ = release_rx.recv();
        });

        let service = SocketRemoteService::connect(&path, "p", Duration::from_secs(2)).unwrap();
        let deaths = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&deaths);
        service
            .link_to_death(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        release_tx.send(()).unwrap();
        host.join().unwrap();
        for _ in 0..100 {
            if !service.is_alive() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!service.is_alive());
        assert_eq!(deaths.load(Ordering::SeqCst), 1);
        assert!(matches!(
            service.player(),
            Err(TransportError::Disconnected)
        ));
        assert!(service.link_to_death(Box::new(|| {})).is_err());
    }

    #[test]
    fn unanswered_call_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("svc.sock");
        let (release_tx, release_rx) = bounded::<()>(1);
        let host = fake_host(&path, move |_reader, _writer| {
            let _ = release_rx.recv();
        });

        let service =
            SocketRemoteService::connect(&path, "p", Duration::from_millis(50)).unwrap();
        assert!(matches!(
            service.player(),
            Err(TransportError::Timeout { call: "get_player" })
        ));
        release_tx.send(()).unwrap();
        host.join().unwrap();
    }

    #[test]
    fn announce_without_host_is_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RuntimeLayout::new(tmp.path(), "missing.host");
        layout.ensure_dirs().unwrap();
        let discovery = SocketDiscovery::new(layout, Duration::from_millis(200));
        let endpoint = Arc::new(
            ProviderEndpoint::new(
                lyricon_core::ProviderInfo::new("com.example", "player"),
                Arc::new(crate::endpoint::IgnoreCommands),
            )
            .unwrap(),
        );

        assert!(matches!(
            discovery.announce(&endpoint),
            Err(DiscoveryError::Unreachable { .. })
        ));
        let served = discovery.endpoint_path().unwrap();
        assert!(served.exists());

        discovery.close();
        assert!(!served.exists());
        assert!(matches!(
            discovery.announce(&endpoint),
            Err(DiscoveryError::Closed)
        ));
    }
}
