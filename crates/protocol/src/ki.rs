//! KI-Live-Session-Protokoll (persistenter Streaming-Kanal)
//!
//! Ausgehend: eine initiale Session-Konfiguration, danach wiederholte
//! Audio-Append-Events (base64 PCM16) und eingeschobene Text-Prompts.
//! Eingehend: Audio-Deltas, Transkript-Deltas beider Gespraechsseiten,
//! Session-Lifecycle-Hinweise und typisierte Fehler.
//!
//! Audio ist auf beiden Strecken PCM16 little-endian, mono.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client -> KI
// ---------------------------------------------------------------------------

/// Ein vom Relay an die KI-Session gesendetes Event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum KiClientEvent {
    /// Initiale Session-Konfiguration, genau einmal nach dem Connect
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionKonfiguration },

    /// Ein Stueck Anrufer-Audio (base64 PCM16)
    #[serde(rename = "input_audio_buffer.append")]
    AudioAnhaengen { audio: String },

    /// Eingeschobener Text-Prompt (z.B. Systemhinweis waehrend des Anrufs)
    #[serde(rename = "conversation.item.create")]
    TextNachricht { text: String },

    /// Fordert eine Antwort auf zuvor gesendete Items an
    #[serde(rename = "response.create")]
    AntwortAnfordern,
}

/// Session-Konfiguration: Modell, Stimme, System-Prompt, Formate
#[derive(Debug, Clone, Serialize)]
pub struct SessionKonfiguration {
    pub model: String,
    pub voice: String,
    /// System-Prompt, gesaet aus dem Anrufer-Kontext
    pub instructions: String,
    pub input_audio_format: KiAudioFormat,
    pub output_audio_format: KiAudioFormat,
    /// Transkription beider Gespraechsseiten, damit das Relay mitlesen kann
    pub transcription: TranskriptionsFlags,
}

/// PCM-Formatangabe einer Strecke
#[derive(Debug, Clone, Serialize)]
pub struct KiAudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
}

impl KiAudioFormat {
    /// PCM16 mit der gegebenen Abtastrate
    pub fn pcm16(sample_rate: u32) -> Self {
        Self {
            encoding: "pcm16".into(),
            sample_rate,
        }
    }
}

/// Welche Gespraechsseiten transkribiert werden sollen
#[derive(Debug, Clone, Serialize)]
pub struct TranskriptionsFlags {
    pub input: bool,
    pub output: bool,
}

// ---------------------------------------------------------------------------
// KI -> Client
// ---------------------------------------------------------------------------

/// Ein von der KI-Session empfangenes Event
///
/// Unbekannte Event-Typen landen in [`KiServerEvent::Unbekannt`] und werden
/// vom Client ignoriert (Vorwaertskompatibilitaet).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum KiServerEvent {
    /// Session steht; traegt optional einen Begruessungstext
    #[serde(rename = "session.created")]
    SessionErstellt {
        session_id: String,
        #[serde(default)]
        welcome: Option<String>,
    },

    /// Ein Stueck Antwort-Audio (base64 PCM16)
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// Transkript-Delta der KI-Antwort
    #[serde(rename = "response.audio_transcript.delta")]
    AntwortTranskript { delta: String },

    /// Fertiges Transkript einer Anrufer-Aeusserung
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    AnruferTranskript { transcript: String },

    /// Eine Antwort ist abgeschlossen
    #[serde(rename = "response.done")]
    AntwortFertig,

    /// Die KI-Session wurde serverseitig beendet
    #[serde(rename = "session.ended")]
    SessionBeendet {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Typisierter Fehler mit Code und Nachricht
    #[serde(rename = "error")]
    Fehler { error: KiFehlerDetail },

    /// Alles was dieser Client (noch) nicht kennt
    #[serde(other)]
    Unbekannt,
}

/// Fehlerdetails eines `error`-Envelopes
#[derive(Debug, Clone, Deserialize)]
pub struct KiFehlerDetail {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl KiServerEvent {
    /// Parst ein eingehendes JSON-Textframe
    pub fn parsen(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Transkripte
// ---------------------------------------------------------------------------

/// Sprecherrolle eines Transkript-Eintrags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranskriptRolle {
    /// Der Anrufer (Telefonie-Seite)
    Anrufer,
    /// Die KI-Antwort
    Assistent,
}

/// Ein Transkript-Eintrag, in Emissionsreihenfolge der KI-Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transkript {
    pub rolle: TranskriptRolle,
    pub text: String,
    pub zeitpunkt: DateTime<Utc>,
}

impl Transkript {
    /// Erstellt einen Eintrag mit dem aktuellen Zeitstempel
    pub fn jetzt(rolle: TranskriptRolle, text: impl Into<String>) -> Self {
        Self {
            rolle,
            text: text.into(),
            zeitpunkt: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// PCM16 <-> base64
// ---------------------------------------------------------------------------

/// Kodiert PCM16-Samples als base64 (little-endian)
pub fn pcm_zu_b64(pcm: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    B64.encode(bytes)
}

/// Dekodiert base64 zu PCM16-Samples (ein ueberhaengendes Byte wird verworfen)
pub fn b64_zu_pcm(b64: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = B64.decode(b64)?;
    let mut pcm = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        pcm.push(i16::from_le_bytes([chunk[0], chunk[1]]));
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_serialisierung() {
        let ev = KiClientEvent::SessionUpdate {
            session: SessionKonfiguration {
                model: "voice-live-1".into(),
                voice: "marin".into(),
                instructions: "Du bist die Rezeption.".into(),
                input_audio_format: KiAudioFormat::pcm16(16_000),
                output_audio_format: KiAudioFormat::pcm16(24_000),
                transcription: TranskriptionsFlags {
                    input: true,
                    output: true,
                },
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"session.update""#));
        assert!(json.contains(r#""sample_rate":24000"#));
        assert!(json.contains(r#""input":true"#));
    }

    #[test]
    fn antwort_anfordern_ist_nur_typ() {
        let json = serde_json::to_string(&KiClientEvent::AntwortAnfordern).unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn audio_delta_parsen() {
        let ev = KiServerEvent::parsen(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap();
        assert!(matches!(ev, KiServerEvent::AudioDelta { .. }));
    }

    #[test]
    fn fehler_parsen() {
        let ev = KiServerEvent::parsen(
            r#"{"type":"error","error":{"code":"session_expired","message":"abgelaufen"}}"#,
        )
        .unwrap();
        match ev {
            KiServerEvent::Fehler { error } => {
                assert_eq!(error.code.as_deref(), Some("session_expired"));
                assert_eq!(error.message, "abgelaufen");
            }
            _ => panic!("Fehler erwartet"),
        }
    }

    #[test]
    fn unbekannte_events_tolerieren() {
        let ev = KiServerEvent::parsen(r#"{"type":"rate_limits.updated","limits":[]}"#).unwrap();
        assert!(matches!(ev, KiServerEvent::Unbekannt));
    }

    #[test]
    fn pcm_b64_roundtrip() {
        let pcm: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 12345];
        let b64 = pcm_zu_b64(&pcm);
        let zurueck = b64_zu_pcm(&b64).unwrap();
        assert_eq!(pcm, zurueck);
    }

    #[test]
    fn transkript_rollen_serde() {
        let t = Transkript::jetzt(TranskriptRolle::Anrufer, "Hallo");
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(r#""rolle":"anrufer""#));
    }
}
