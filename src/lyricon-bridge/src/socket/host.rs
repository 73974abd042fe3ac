//! Reference host.
//!
//! Accepts provider handoffs, serves their player calls into a renderer and
//! samples each provider's position segment. Good enough for demos and for
//! exercising providers end to end.

use super::boot::announce_host_ready;
use super::{bind_listener, remove_socket, RuntimeLayout};
use crate::protocol::{
    decode_provider_info, decode_song, read_message, write_message, EndpointRequest,
    EndpointResponse, Handoff, ServiceCall, ServiceRequest, ServiceResponse, ServiceResult,
    WireError, PROTOCOL_VERSION,
};
use crate::shm::PositionSegment;
use crate::transport::{SegmentDescriptor, TransportError, TransportResult};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use lyricon_core::{BridgeConfig, ProviderCommand, ProviderInfo, RemotePlayer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub call_timeout: Duration,
    pub position_poll: Duration,
}

impl HostOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            position_poll: config.position_poll(),
        }
    }
}

impl Default for HostOptions {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// A provider that completed a handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredProvider {
    pub info: ProviderInfo,
    pub endpoint: PathBuf,
}

pub struct BridgeHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    layout: RuntimeLayout,
    options: HostOptions,
    renderer: Arc<dyn RemotePlayer>,
    stopping: AtomicBool,
    providers: Mutex<HashMap<String, RegisteredProvider>>,
    sessions: Mutex<HashMap<u64, UnixStream>>,
    next_session: AtomicU64,
}

impl BridgeHost {
    /// Binds the discovery and service sockets, then tells waiting provider
    /// processes the host is ready.
    pub fn start(
        layout: RuntimeLayout,
        options: HostOptions,
        renderer: Arc<dyn RemotePlayer>,
    ) -> io::Result<Self> {
        layout.ensure_dirs()?;
        let discovery = bind_listener(&layout.discovery_socket())?;
        let service = match bind_listener(&layout.service_socket()) {
            Ok(service) => service,
            Err(err) => {
                remove_socket(&layout.discovery_socket());
                return Err(err);
            }
        };

        let inner = Arc::new(HostInner {
            layout,
            options,
            renderer,
            stopping: AtomicBool::new(false),
            providers: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        });

        let host = Arc::clone(&inner);
        thread::Builder::new()
            .name("lyricon-host-discovery".into())
            .spawn(move || host.accept_handoffs(discovery))?;
        let host = Arc::clone(&inner);
        thread::Builder::new()
            .name("lyricon-host-service".into())
            .spawn(move || host.accept_sessions(service))?;

        tracing::info!(
            host_id = %inner.layout.host_id(),
            runtime_dir = %inner.layout.root().display(),
            "Host started"
        );
        match announce_host_ready(&inner.layout) {
            Ok(notified) => tracing::debug!(notified, "Broadcast host ready"),
            Err(err) => tracing::warn!(error = %err, "Failed to broadcast host ready"),
        }
        Ok(Self { inner })
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.inner.layout
    }

    pub fn providers(&self) -> Vec<RegisteredProvider> {
        let mut providers: Vec<_> = self.inner.providers.lock().values().cloned().collect();
        providers.sort_by(|a, b| a.info.provider_id.cmp(&b.info.provider_id));
        providers
    }

    /// Number of live service connections.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Sends a provider-defined command through the provider's endpoint.
    pub fn run_command(
        &self,
        provider_id: &str,
        command: ProviderCommand,
    ) -> TransportResult<Option<Vec<u8>>> {
        let endpoint = self
            .inner
            .providers
            .lock()
            .get(provider_id)
            .map(|p| p.endpoint.clone())
            .ok_or_else(|| TransportError::Remote(format!("unknown provider {provider_id}")))?;
        let mut client = EndpointClient::connect(&endpoint, self.inner.options.call_timeout)?;
        match client.request(&EndpointRequest::RunCommand { command })? {
            EndpointResponse::CommandResult { reply } => Ok(reply),
            EndpointResponse::Error(err) => Err(TransportError::Remote(err.message)),
            _ => Err(TransportError::UnexpectedResponse { call: "run_command" }),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopping.load(Ordering::SeqCst)
    }

    /// Closes every socket. Connected providers observe this as host death.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl HostInner {
    fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        for path in [self.layout.discovery_socket(), self.layout.service_socket()] {
            let _ = UnixStream::connect(&path);
            remove_socket(&path);
        }
        for (_, stream) in self.sessions.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.providers.lock().clear();
        tracing::info!(host_id = %self.layout.host_id(), "Host stopped");
    }

    fn accept_handoffs(self: Arc<Self>, listener: UnixListener) {
        for stream in listener.incoming() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let host = Arc::clone(&self);
                    let spawned = thread::Builder::new()
                        .name("lyricon-host-handoff".into())
                        .spawn(move || {
                            if let Err(err) = host.handle_handoff(stream) {
                                tracing::warn!(error = %err, "Provider handoff failed");
                            }
                        });
                    if let Err(err) = spawned {
                        tracing::warn!(error = %err, "Failed to spawn handoff handler");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "Discovery accept failed"),
            }
        }
    }

    fn handle_handoff(&self, stream: UnixStream) -> TransportResult<()> {
        stream.set_read_timeout(Some(self.options.call_timeout))?;
        let mut reader = BufReader::new(stream);
        let Some(handoff) = read_message::<_, Handoff>(&mut reader)? else {
            return Ok(());
        };
        if handoff.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                version = handoff.protocol_version,
                expected = PROTOCOL_VERSION,
                "Rejecting handoff with incompatible protocol"
            );
            return Ok(());
        }

        let mut endpoint = EndpointClient::connect(&handoff.endpoint, self.options.call_timeout)?;
        let info = match endpoint.request(&EndpointRequest::GetProviderInfo)? {
            EndpointResponse::ProviderInfo { info } => decode_provider_info(&info)?,
            _ => {
                return Err(TransportError::UnexpectedResponse {
                    call: "get_provider_info",
                })
            }
        };
        tracing::info!(
            provider_id = %info.provider_id,
            player_id = %info.player_id,
            "Provider announced"
        );
        self.providers.lock().insert(
            info.provider_id.clone(),
            RegisteredProvider {
                info,
                endpoint: handoff.endpoint,
            },
        );

        match endpoint.request(&EndpointRequest::Registered {
            service: self.layout.service_socket(),
        })? {
            EndpointResponse::Ack => Ok(()),
            EndpointResponse::Error(err) => Err(TransportError::Remote(err.message)),
            _ => Err(TransportError::UnexpectedResponse { call: "registered" }),
        }
    }

    fn accept_sessions(self: Arc<Self>, listener: UnixListener) {
        for stream in listener.incoming() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let host = Arc::clone(&self);
                    let spawned = thread::Builder::new()
                        .name("lyricon-host-session".into())
                        .spawn(move || host.serve_session(stream));
                    if let Err(err) = spawned {
                        tracing::warn!(error = %err, "Failed to spawn session handler");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "Service accept failed"),
            }
        }
    }

    fn serve_session(&self, stream: UnixStream) {
        let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let (mut writer, tracked) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(writer), Ok(tracked)) => (writer, tracked),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "Failed to clone session stream");
                return;
            }
        };
        {
            let mut sessions = self.sessions.lock();
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            sessions.insert(session_id, tracked);
        }

        let mut session = Session::default();
        let mut reader = BufReader::new(stream);
        loop {
            let request = match read_message::<_, ServiceRequest>(&mut reader) {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(session_id, error = %err, "Session read failed");
                    break;
                }
            };
            let leaving = matches!(request.call, ServiceCall::Disconnect);
            let result = self.handle_call(&mut session, request.call);
            let response = ServiceResponse {
                id: request.id,
                result,
            };
            if let Err(err) = write_message(&mut writer, &response) {
                tracing::debug!(session_id, error = %err, "Session write failed");
                break;
            }
            if leaving {
                break;
            }
        }

        self.sessions.lock().remove(&session_id);
        let provider_id = session.provider_id.clone();
        session.close();
        if let Some(provider_id) = provider_id {
            tracing::info!(%provider_id, "Provider disconnected");
        }
    }

    fn handle_call(&self, session: &mut Session, call: ServiceCall) -> ServiceResult {
        tracing::debug!(call = call.name(), provider_id = ?session.provider_id, "Player call");
        let renderer = &self.renderer;
        let accepted = |accepted| ServiceResult::Accepted { accepted };
        match call {
            ServiceCall::Hello {
                protocol_version,
                provider_id,
            } => {
                if session.provider_id.is_some() {
                    return ServiceResult::Error(WireError::new("session already greeted"));
                }
                if protocol_version != PROTOCOL_VERSION {
                    tracing::warn!(
                        %provider_id,
                        version = protocol_version,
                        expected = PROTOCOL_VERSION,
                        "Rejecting provider with incompatible protocol"
                    );
                    return ServiceResult::Error(WireError::new(format!(
                        "unsupported protocol version {protocol_version}"
                    )));
                }
                session.provider_id = Some(provider_id);
                ServiceResult::Welcome
            }
            _ if session.provider_id.is_none() => {
                ServiceResult::Error(WireError::new("expected hello"))
            }
            ServiceCall::GetPlayer => ServiceResult::Player {
                segment: self.ensure_segment(session),
            },
            ServiceCall::Disconnect => accepted(true),
            ServiceCall::SetSong { payload } => match payload.as_deref().map(decode_song).transpose()
            {
                Ok(song) => accepted(renderer.set_song(song.as_ref())),
                Err(err) => ServiceResult::Error(WireError::new(err.to_string())),
            },
            ServiceCall::SetPlaybackState { playing } => {
                accepted(renderer.set_playback_state(playing))
            }
            ServiceCall::SeekTo { position_ms } => accepted(renderer.seek_to(position_ms)),
            ServiceCall::SetPositionUpdateInterval { interval_ms } => {
                accepted(renderer.set_position_update_interval(interval_ms))
            }
            ServiceCall::SendText { text } => accepted(renderer.send_text(text.as_deref())),
            ServiceCall::SetDisplayTranslation { visible } => {
                accepted(renderer.set_display_translation(visible))
            }
            ServiceCall::SetDisplayRoma { visible } => {
                accepted(renderer.set_display_roma(visible))
            }
        }
    }

    fn ensure_segment(&self, session: &mut Session) -> Option<SegmentDescriptor> {
        if let Some(poller) = session.poller.as_ref() {
            return Some(poller.segment.descriptor());
        }
        let provider_id = session.provider_id.as_deref()?;
        let path = self.layout.segment_path(provider_id);
        let started = PositionSegment::create(&path).and_then(|segment| {
            PositionPoller::start(
                Arc::new(segment),
                self.options.position_poll,
                Arc::clone(&self.renderer),
            )
        });
        match started {
            Ok(poller) => {
                let descriptor = poller.segment.descriptor();
                session.poller = Some(poller);
                Some(descriptor)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to create position segment");
                remove_socket(&path);
                None
            }
        }
    }
}

#[derive(Default)]
struct Session {
    provider_id: Option<String>,
    poller: Option<PositionPoller>,
}

impl Session {
    fn close(self) {
        if let Some(poller) = self.poller {
            poller.stop();
        }
    }
}

/// Samples a position segment and forwards changes to the renderer.
struct PositionPoller {
    segment: Arc<PositionSegment>,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl PositionPoller {
    fn start(
        segment: Arc<PositionSegment>,
        interval: Duration,
        renderer: Arc<dyn RemotePlayer>,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let sampled = Arc::clone(&segment);
        let thread = thread::Builder::new()
            .name("lyricon-host-position".into())
            .spawn(move || {
                let mut last = sampled.read_position();
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let position = sampled.read_position();
                            if position != last {
                                last = position;
                                renderer.set_position(position);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            segment,
            stop,
            thread,
        })
    }

    /// Stops sampling and deletes the segment file.
    fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            tracing::warn!("Position poller panicked");
        }
        let result = match Arc::try_unwrap(self.segment) {
            Ok(segment) => segment.unlink(),
            Err(segment) => std::fs::remove_file(segment.path()),
        };
        if let Err(err) = result {
            tracing::debug!(error = %err, "Failed to remove position segment");
        }
    }
}

/// Request/response client for a provider's callback endpoint.
struct EndpointClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl EndpointClient {
    fn connect(path: &Path, timeout: Duration) -> TransportResult<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    fn request(&mut self, request: &EndpointRequest) -> TransportResult<EndpointResponse> {
        write_message(&mut self.writer, request)?;
        read_message::<_, EndpointResponse>(&mut self.reader)?.ok_or(TransportError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_song;
    use lyricon_core::Song;

    #[derive(Default)]
    struct Renderer {
        calls: Mutex<Vec<String>>,
    }

    impl RemotePlayer for Renderer {
        fn is_active(&self) -> bool {
            true
        }
        fn set_song(&self, song: Option<&Song>) -> bool {
            let id = song.map_or("none".to_string(), |s| s.id.clone());
            self.calls.lock().push(format!("song {id}"));
            true
        }
        fn set_playback_state(&self, playing: bool) -> bool {
            self.calls.lock().push(format!("playing {playing}"));
            true
        }
        fn seek_to(&self, position_ms: i64) -> bool {
            self.calls.lock().push(format!("seek {position_ms}"));
            true
        }
        fn set_position(&self, position_ms: i64) -> bool {
            self.calls.lock().push(format!("position {position_ms}"));
            true
        }
        fn set_position_update_interval(&self, _interval_ms: i32) -> bool {
            true
        }
        fn send_text(&self, _text: Option<&str>) -> bool {
            true
        }
        fn set_display_translation(&self, _visible: bool) -> bool {
            true
        }
        fn set_display_roma(&self, _visible: bool) -> bool {
            false
        }
    }

    fn host() -> (tempfile::TempDir, BridgeHost, Arc<Renderer>) {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = Arc::new(Renderer::default());
        let host = BridgeHost::start(
            RuntimeLayout::new(tmp.path(), "test.host"),
            HostOptions {
                call_timeout: Duration::from_secs(2),
                position_poll: Duration::from_millis(5),
            },
            renderer.clone(),
        )
        .unwrap();
        (tmp, host, renderer)
    }

    fn call(
        reader: &mut BufReader<UnixStream>,
        writer: &mut UnixStream,
        id: u64,
        call: ServiceCall,
    ) -> ServiceResult {
        write_message(&mut *writer, &ServiceRequest { id, call }).unwrap();
        let response: ServiceResponse = read_message(reader).unwrap().unwrap();
        assert_eq!(response.id, id);
        response.result
    }

    fn session(host: &BridgeHost) -> (BufReader<UnixStream>, UnixStream) {
        let stream = UnixStream::connect(host.layout().service_socket()).unwrap();
        (BufReader::new(stream.try_clone().unwrap()), stream)
    }

    #[test]
    fn calls_require_hello_first() {
        let (_tmp, host, _) = host();
        let (mut reader, mut writer) = session(&host);
        assert!(matches!(
            call(&mut reader, &mut writer, 1, ServiceCall::GetPlayer),
            ServiceResult::Error(_)
        ));
        let hello = ServiceCall::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
            provider_id: "p".into(),
        };
        assert!(matches!(
            call(&mut reader, &mut writer, 2, hello),
            ServiceResult::Error(_)
        ));
    }

    #[test]
    fn player_calls_reach_renderer() {
        let (_tmp, host, renderer) = host();
        let (mut reader, mut writer) = session(&host);
        let hello = ServiceCall::Hello {
            protocol_version: PROTOCOL_VERSION,
            provider_id: "p".into(),
        };
        assert_eq!(call(&mut reader, &mut writer, 1, hello), ServiceResult::Welcome);

        let payload = encode_song(&Song::new("s")).unwrap();
        let results = [
            call(&mut reader, &mut writer, 2, ServiceCall::SetPlaybackState { playing: true }),
            call(&mut reader, &mut writer, 3, ServiceCall::SetSong { payload: Some(payload) }),
            call(&mut reader, &mut writer, 4, ServiceCall::SeekTo { position_ms: 42 }),
            call(&mut reader, &mut writer, 5, ServiceCall::SetDisplayRoma { visible: true }),
        ];
        assert_eq!(
            results,
            [
                ServiceResult::Accepted { accepted: true },
                ServiceResult::Accepted { accepted: true },
                ServiceResult::Accepted { accepted: true },
                ServiceResult::Accepted { accepted: false },
            ]
        );
        assert_eq!(
            *renderer.calls.lock(),
            vec!["playing true", "song s", "seek 42"]
        );
    }

    #[test]
    fn segment_positions_are_forwarded_and_cleaned_up() {
        let (_tmp, host, renderer) = host();
        let (mut reader, mut writer) = session(&host);
        let hello = ServiceCall::Hello {
            protocol_version: PROTOCOL_VERSION,
            provider_id: "p".into(),
        };
        call(&mut reader, &mut writer, 1, hello);
        let ServiceResult::Player {
            segment: Some(descriptor),
        } = call(&mut reader, &mut writer, 2, ServiceCall::GetPlayer)
        else {
            panic!("host offered no segment");
        };

        let provider = PositionSegment::open(&descriptor).unwrap();
        provider.write_position(1234);
        let mut forwarded = false;
        for _ in 0..200 {
            if renderer.calls.lock().iter().any(|c| c == "position 1234") {
                forwarded = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(forwarded);

        call(&mut reader, &mut writer, 3, ServiceCall::Disconnect);
        let mut removed = false;
        for _ in 0..200 {
            if !descriptor.path.exists() {
                removed = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(removed);
    }

    #[test]
    fn shutdown_closes_sessions_and_sockets() {
        let (_tmp, host, _) = host();
        let (mut reader, mut writer) = session(&host);
        let hello = ServiceCall::Hello {
            protocol_version: PROTOCOL_VERSION,
            provider_id: "p".into(),
        };
        call(&mut reader, &mut writer, 1, hello);

        host.shutdown();
        assert!(!host.is_running());
        assert!(!host.layout().service_socket().exists());
        let next: Option<ServiceResponse> = read_message(&mut reader).unwrap_or(None);
        assert!(next.is_none());
    }
}
