//! Fehlertypen fuer den Codec-Adapter

use thiserror::Error;

/// Alle moeglichen Fehler des Codec-Adapters
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Resampling-Fehler: {0}")]
    Resampling(String),
}

impl AudioError {
    /// Gibt true zurueck wenn der Fehler ein bekanntes, transientes
    /// Stream-Artefakt beschreibt (Frame verwerfen, leise weitermachen)
    pub fn ist_stream_artefakt(&self) -> bool {
        match self {
            Self::CodecFehler(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("corrupted stream") || msg.contains("invalid packet")
            }
            _ => false,
        }
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
