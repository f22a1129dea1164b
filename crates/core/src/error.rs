//! Fehlertypen fuer Vermittler
//!
//! Geschlossene Fehler-Taxonomie des Relays. Call-Sites entscheiden anhand
//! der Fehlerart deliberat zwischen Retry, Frame-Drop und Session-Teardown.
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer Vermittler
pub type Result<T> = std::result::Result<T, VermittlerError>;

/// Alle moeglichen Fehlerarten im Vermittler-System
#[derive(Debug, Error)]
pub enum VermittlerError {
    // --- Transport (Telefonie- oder KI-Socket) ---
    #[error("Transportfehler: {0}")]
    Transport(String),

    // --- Codec (einzelner Frame defekt) ---
    #[error("Codec-Fehler: {0}")]
    Codec(String),

    // --- KI-Session (Error-Envelope, Close, Connect-Timeout) ---
    #[error("KI-Session-Fehler: {0}")]
    KiSession(String),

    // --- Kontext-Lookup (Kollaborator nicht erreichbar) ---
    #[error("Kontext-Lookup fehlgeschlagen: {0}")]
    Kontext(String),

    // --- Programmier-Invarianten (z.B. Frame fuer fremde StreamId) ---
    #[error("Invariante verletzt: {0}")]
    Invariante(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl VermittlerError {
    /// Transportfehler aus einer beliebigen Nachricht
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler die CallSession beenden muss
    ///
    /// Nur Transportfehler reissen eine Session ab; Codec-Fehler verwerfen
    /// den Frame, KI-Fehler gehen an die Fallback-Policy, Kontext- und
    /// Invarianten-Fehler werden geloggt und verworfen.
    pub fn beendet_session(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::KiSession(_) | Self::Kontext(_))
    }
}
