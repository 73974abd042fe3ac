//! Wire formats shared by providers and hosts.
//!
//! Payloads (`ProviderInfo`, `Song`) have fixed byte encodings that any
//! transport can carry. The socket transport additionally exchanges the
//! newline-delimited JSON messages defined here: one message per line,
//! responses correlated to requests by id.

use crate::transport::SegmentDescriptor;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use lyricon_core::models::base64_bytes;
use lyricon_core::{ModelError, ProviderCommand, ProviderInfo, Song};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for an inflated song payload.
pub const MAX_SONG_BYTES: u64 = 16 * 1024 * 1024;

/// Upper bound for a single framed message.
pub const MAX_MESSAGE_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("invalid payload: {0}")]
    Model(#[from] ModelError),
}

pub fn encode_provider_info(info: &ProviderInfo) -> Result<Vec<u8>, CodecError> {
    info.validate()?;
    Ok(serde_json::to_vec(info)?)
}

pub fn decode_provider_info(bytes: &[u8]) -> Result<ProviderInfo, CodecError> {
    let info: ProviderInfo = serde_json::from_slice(bytes)?;
    info.validate()?;
    Ok(info)
}

/// Serialises a song to JSON and DEFLATE-compresses it. Word-level timing
/// makes raw payloads large, and control messages are size-limited.
pub fn encode_song(song: &Song) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(song)?;
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode_song(bytes: &[u8]) -> Result<Song, CodecError> {
    let mut json = Vec::new();
    DeflateDecoder::new(bytes)
        .take(MAX_SONG_BYTES + 1)
        .read_to_end(&mut json)?;
    if json.len() as u64 > MAX_SONG_BYTES {
        return Err(CodecError::TooLarge {
            limit: MAX_SONG_BYTES,
        });
    }
    let song: Song = serde_json::from_slice(&json)?;
    song.validate()?;
    Ok(song)
}

/// Writes one message as a single JSON line.
pub fn write_message<W: Write, T: Serialize>(mut writer: W, message: &T) -> Result<(), CodecError> {
    let json = serde_json::to_string(message)?;
    writeln!(writer, "{json}")?;
    writer.flush()?;
    Ok(())
}

/// Reads one JSON line. `Ok(None)` means the peer closed the stream.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, CodecError> {
    let mut line = String::new();
    let read = reader.take(MAX_MESSAGE_BYTES).read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && read as u64 >= MAX_MESSAGE_BYTES {
        return Err(CodecError::TooLarge {
            limit: MAX_MESSAGE_BYTES,
        });
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

/// Discovery message: the only thing a provider sends unprompted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub protocol_version: u32,
    /// Address of the provider's callback endpoint.
    pub endpoint: PathBuf,
}

/// Host → provider requests on the callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum EndpointRequest {
    GetProviderInfo,
    RunCommand { command: ProviderCommand },
    /// The host accepted the provider; `service` is where to connect.
    Registered { service: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum EndpointResponse {
    ProviderInfo {
        #[serde(with = "base64_bytes")]
        info: Vec<u8>,
    },
    CommandResult {
        #[serde(default, with = "base64_bytes::option")]
        reply: Option<Vec<u8>>,
    },
    Ack,
    Error(WireError),
}

/// Provider → host request on the service connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: u64,
    pub call: ServiceCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum ServiceCall {
    /// First message on every service connection.
    Hello {
        protocol_version: u32,
        provider_id: String,
    },
    GetPlayer,
    /// The provider is leaving; the host should drop its state.
    Disconnect,
    SetSong {
        #[serde(default, with = "base64_bytes::option")]
        payload: Option<Vec<u8>>,
    },
    SetPlaybackState {
        playing: bool,
    },
    SeekTo {
        position_ms: i64,
    },
    SetPositionUpdateInterval {
        interval_ms: i32,
    },
    SendText {
        text: Option<String>,
    },
    SetDisplayTranslation {
        visible: bool,
    },
    SetDisplayRoma {
        visible: bool,
    },
}

impl ServiceCall {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceCall::Hello { .. } => "hello",
            ServiceCall::GetPlayer => "get_player",
            ServiceCall::Disconnect => "disconnect",
            ServiceCall::SetSong { .. } => "set_song",
            ServiceCall::SetPlaybackState { .. } => "set_playback_state",
            ServiceCall::SeekTo { .. } => "seek_to",
            ServiceCall::SetPositionUpdateInterval { .. } => "set_position_update_interval",
            ServiceCall::SendText { .. } => "send_text",
            ServiceCall::SetDisplayTranslation { .. } => "set_display_translation",
            ServiceCall::SetDisplayRoma { .. } => "set_display_roma",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub id: u64,
    pub result: ServiceResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ServiceResult {
    Welcome,
    Player { segment: Option<SegmentDescriptor> },
    Accepted { accepted: bool },
    Error(WireError),
}

/// Host → every provider process after the host (re)starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReady {
    pub host_id: String,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
}

impl WireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
