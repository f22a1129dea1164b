//! LiveSession – die Naht zwischen Relay und KI-Transport
//!
//! Das Relay (Inbound-Pumpe, Outbound-Forwarder, Fallback-Policy) spricht
//! ausschliesslich gegen dieses Trait. Tests ersetzen die echte
//! WebSocket-Implementierung durch eine geskriptete Session.

use async_trait::async_trait;
use vermittler_protocol::ki::Transkript;

use crate::error::KiResult;

/// Eine persistente, bidirektionale Streaming-Session zum Speech-AI-Endpunkt
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Baut die Verbindung auf und gibt den Begruessungstext zurueck
    ///
    /// Schlaegt mit [`crate::KiError::Verbindung`] fehl wenn Handshake oder
    /// Timeout scheitern. Ein Connect-Timeout wird von der Fallback-Policy
    /// wie jeder andere Session-Fehler behandelt.
    async fn verbinden(&self) -> KiResult<String>;

    /// Sendet Anrufer-Audio (PCM16) an die KI
    ///
    /// Bei getrennter Session: geloggter No-op mit genau einem internen
    /// Reconnect-Versuch, danach werden Frames verworfen.
    async fn audio_senden(&self, pcm: &[i16]);

    /// Schiebt einen Text-Prompt in die laufende Konversation
    async fn text_senden(&self, text: &str);

    /// Nicht-blockierender Pop der Ausgabe-Audio-Queue
    fn audio_holen(&self) -> Option<Vec<i16>>;

    /// Nicht-blockierender Pop der Transkript-Queue
    fn transkript_holen(&self) -> Option<Transkript>;

    /// Trennt die Session; bricht interne Tasks ab und wartet auf sie.
    /// Idempotent.
    async fn trennen(&self);

    /// Gibt zurueck ob die Session gerade laeuft
    fn laeuft(&self) -> bool;

    /// Grund des letzten Fehlers (fuer Logging und Policy-Entscheidungen)
    fn letzter_fehler(&self) -> Option<String>;
}
