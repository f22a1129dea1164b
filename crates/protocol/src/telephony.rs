//! Telefonie-Media-Stream-Protokoll (WebSocket, JSON-Textframes)
//!
//! Der Provider oeffnet pro Anruf eine WebSocket-Verbindung und sendet
//! `start`, `media`, `stop` und `error` Events. Ausgehend geht ausschliesslich
//! das `media`-Event mit base64-kodiertem Opus-Frame zurueck.
//!
//! ## Design
//! - Tagged Enum ueber das `event`-Feld (typsichere Nachrichtentypen)
//! - Unbekannte Felder werden toleriert (Provider erweitert sein Schema)
//! - Audio: mono, feste Abtastrate, ~20 ms Frames – beim Call-Answer verhandelt

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Eingehende Events
// ---------------------------------------------------------------------------

/// Ein eingehendes Event des Telefonie-Providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonieEvent {
    /// Beginn eines Media-Streams – erzeugt eine CallSession
    Start {
        stream_id: String,
        start: StartPayload,
    },
    /// Ein Audio-Frame (base64-kodiertes Opus)
    Media {
        stream_id: String,
        media: MediaPayload,
    },
    /// Ende des Media-Streams – beendet die CallSession
    Stop {
        stream_id: String,
        stop: StopPayload,
    },
    /// Provider-seitiger Stream-Fehler; meist wiederholbar, nie fatal
    Error { payload: ErrorPayload },
}

/// Payload des `start`-Events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    /// Handle fuer Control-Plane-Aktionen (answer, speak, hangup)
    pub call_control_id: String,
    /// Rufnummer des Anrufers (E.164), fuer den Kontext-Lookup
    #[serde(default)]
    pub from: Option<String>,
    /// Angerufene Nummer
    #[serde(default)]
    pub to: Option<String>,
    /// Beim Call-Answer verhandeltes Media-Format
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

/// Payload des `media`-Events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// base64-kodierter Opus-Frame
    pub payload: String,
    /// Nur ausgehend gesetzt: Format-Metadaten des Frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_format: Option<MediaFormat>,
}

/// Payload des `stop`-Events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload des `error`-Events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Media-Format
// ---------------------------------------------------------------------------

/// Format-Metadaten eines Audio-Frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// Codec-Name, fuer diese Strecke immer "opus"
    pub encoding: String,
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (Telefonie: immer 1)
    pub channels: u8,
}

impl MediaFormat {
    /// Opus mono mit der gegebenen Abtastrate
    pub fn opus_mono(sample_rate: u32) -> Self {
        Self {
            encoding: "opus".into(),
            sample_rate,
            channels: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Events
// ---------------------------------------------------------------------------

impl TelephonieEvent {
    /// Baut das ausgehende `media`-Event fuer einen kodierten Opus-Frame
    pub fn media_ausgehend(
        stream_id: impl Into<String>,
        payload_b64: String,
        sample_rate: u32,
    ) -> Self {
        Self::Media {
            stream_id: stream_id.into(),
            media: MediaPayload {
                payload: payload_b64,
                media_format: Some(MediaFormat::opus_mono(sample_rate)),
            },
        }
    }

    /// Gibt die StreamId des Events zurueck (Error-Events tragen keine)
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::Start { stream_id, .. }
            | Self::Media { stream_id, .. }
            | Self::Stop { stream_id, .. } => Some(stream_id),
            Self::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_parsen() {
        let json = r#"{"event":"start","stream_id":"abc","start":{"call_control_id":"cc1","from":"+4915112345678"}}"#;
        let ev: TelephonieEvent = serde_json::from_str(json).unwrap();
        match ev {
            TelephonieEvent::Start { stream_id, start } => {
                assert_eq!(stream_id, "abc");
                assert_eq!(start.call_control_id, "cc1");
                assert_eq!(start.from.as_deref(), Some("+4915112345678"));
                assert!(start.media_format.is_none());
            }
            _ => panic!("Start erwartet"),
        }
    }

    #[test]
    fn media_event_parsen() {
        let json = r#"{"event":"media","stream_id":"abc","media":{"payload":"AAAA"}}"#;
        let ev: TelephonieEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.stream_id(), Some("abc"));
    }

    #[test]
    fn stop_event_parsen() {
        let json = r#"{"event":"stop","stream_id":"abc","stop":{"reason":"hangup"}}"#;
        let ev: TelephonieEvent = serde_json::from_str(json).unwrap();
        match ev {
            TelephonieEvent::Stop { stop, .. } => {
                assert_eq!(stop.reason.as_deref(), Some("hangup"));
            }
            _ => panic!("Stop erwartet"),
        }
    }

    #[test]
    fn error_event_ohne_stream_id() {
        let json = r#"{"event":"error","payload":{"code":"100003","title":"malformed frame"}}"#;
        let ev: TelephonieEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.stream_id(), None);
    }

    #[test]
    fn media_ausgehend_serialisierung() {
        let ev = TelephonieEvent::media_ausgehend("abc", "b64daten".into(), 16_000);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""event":"media""#));
        assert!(json.contains(r#""stream_id":"abc""#));
        assert!(json.contains(r#""sample_rate":16000"#));
        assert!(json.contains(r#""encoding":"opus""#));
        assert!(json.contains(r#""channels":1"#));
    }

    #[test]
    fn eingehendes_media_ohne_format_serialisiert_kompakt() {
        let ev = TelephonieEvent::Media {
            stream_id: "s".into(),
            media: MediaPayload {
                payload: "x".into(),
                media_format: None,
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("media_format"));
    }
}
