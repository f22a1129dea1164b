//! Fehlertypen fuer den KI-Live-Session-Client

use thiserror::Error;

/// Alle moeglichen Fehler des KI-Clients
#[derive(Debug, Error)]
pub enum KiError {
    /// Handshake/Connect fehlgeschlagen oder Timeout ueberschritten
    #[error("Verbindung zur KI-Session fehlgeschlagen: {0}")]
    Verbindung(String),

    /// Die KI hat ein typisiertes Error-Envelope gesendet
    #[error("KI-Session-Fehler ({code}): {nachricht}")]
    Session { code: String, nachricht: String },
}

pub type KiResult<T> = Result<T, KiError>;
