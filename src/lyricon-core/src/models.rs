use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Encoding of a provider logo payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoKind {
    /// Raw encoded bitmap bytes (PNG, WebP, ...).
    Bitmap,
    /// UTF-8 SVG text.
    Vector,
}

/// Icon shown by the host next to the provider's lyrics.
///
/// Equality and hashing compare the payload bytes, so two logos built from
/// the same file compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderLogo {
    pub kind: LogoKind,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Whether the host should keep the logo's own colors instead of tinting it.
    #[serde(default)]
    pub colorful: bool,
}

impl ProviderLogo {
    pub fn bitmap(data: impl Into<Vec<u8>>, colorful: bool) -> Self {
        Self {
            kind: LogoKind::Bitmap,
            data: data.into(),
            colorful,
        }
    }

    pub fn vector(svg: impl Into<String>, colorful: bool) -> Self {
        Self {
            kind: LogoKind::Vector,
            data: svg.into().into_bytes(),
            colorful,
        }
    }

    /// SVG text of a vector logo. `None` for bitmaps or non UTF-8 payloads.
    pub fn as_svg(&self) -> Option<&str> {
        match self.kind {
            LogoKind::Vector => std::str::from_utf8(&self.data).ok(),
            LogoKind::Bitmap => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Identity of a provider, handed to the host once at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Stable identifier of the providing application (usually its package name).
    pub provider_id: String,
    /// Identifier of the media player whose playback is being described.
    pub player_id: String,
    #[serde(default)]
    pub logo: Option<ProviderLogo>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ProviderInfo {
    pub fn new(provider_id: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            player_id: player_id.into(),
            logo: None,
            metadata: None,
        }
    }

    pub fn with_logo(mut self, logo: ProviderLogo) -> Self {
        self.logo = Some(logo);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.provider_id.trim().is_empty() {
            return Err(ModelError::EmptyField {
                field: "provider_id",
            });
        }
        if self.player_id.trim().is_empty() {
            return Err(ModelError::EmptyField { field: "player_id" });
        }
        Ok(())
    }
}

/// A single timed word inside a lyric line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricWord {
    pub begin_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// One line of lyrics with optional word-level timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricLine {
    pub begin_ms: i64,
    pub end_ms: i64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<LyricWord>,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub roma: Option<String>,
}

impl LyricLine {
    pub fn new(begin_ms: i64, end_ms: i64, text: impl Into<String>) -> Self {
        Self {
            begin_ms,
            end_ms,
            text: text.into(),
            words: Vec::new(),
            translation: None,
            roma: None,
        }
    }

    pub fn contains(&self, position_ms: i64) -> bool {
        position_ms >= self.begin_ms && position_ms < self.end_ms
    }
}

/// The song currently playing, with its full lyric timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub lyrics: Vec<LyricLine>,
}

impl Song {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            artist: None,
            duration_ms: 0,
            lyrics: Vec::new(),
        }
    }

    /// The line active at `position_ms`, if any.
    pub fn line_at(&self, position_ms: i64) -> Option<&LyricLine> {
        self.lyrics.iter().find(|line| line.contains(position_ms))
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.duration_ms < 0 {
            return Err(ModelError::NegativeDuration {
                duration_ms: self.duration_ms,
            });
        }
        for (index, line) in self.lyrics.iter().enumerate() {
            if line.end_ms < line.begin_ms {
                return Err(ModelError::InvertedTiming {
                    line: index,
                    begin_ms: line.begin_ms,
                    end_ms: line.end_ms,
                });
            }
            if let Some(word) = line.words.iter().find(|w| w.end_ms < w.begin_ms) {
                return Err(ModelError::InvertedTiming {
                    line: index,
                    begin_ms: word.begin_ms,
                    end_ms: word.end_ms,
                });
            }
        }
        Ok(())
    }
}

/// A provider-defined command sent by the host through the callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCommand {
    pub name: String,
    #[serde(default, with = "base64_bytes::option")]
    pub payload: Option<Vec<u8>>,
}

impl ProviderCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("song duration must not be negative (got {duration_ms})")]
    NegativeDuration { duration_ms: i64 },
    #[error("lyric line {line} ends before it begins ({begin_ms}..{end_ms})")]
    InvertedTiming {
        line: usize,
        begin_ms: i64,
        end_ms: i64,
    },
}

/// Serde adapter storing byte payloads as base64 text so they survive JSON transport.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::STANDARD;
        use base64::Engine as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
