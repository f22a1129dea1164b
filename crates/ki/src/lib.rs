//! vermittler-ki – KI-Live-Session-Client
//!
//! Haelt pro Anruf genau eine persistente Streaming-Verbindung zum
//! Speech-AI-Endpunkt. Zwei ueberwachte Queues entkoppeln Netzwerk-I/O
//! vom Echtzeit-Takt des Anrufs: eine Sende-Queue (Audio/Text zur KI)
//! und Ausgabe-Queues (Audio und Transkripte von der KI).
//!
//! Der Client verbindet sich NICHT selbststaendig neu – Reconnects sind
//! eine Entscheidung der Fallback-Policy im Relay (Trennung von Transport
//! und Policy). Einzige Ausnahme: ein einzelner interner Versuch wenn bei
//! getrennter Session gesendet wird.
//!
//! ## Module
//! - [`config`] – Endpunkt-, Modell- und Format-Konfiguration
//! - [`session`] – `LiveSession`-Trait (Naht fuer Tests und Relay)
//! - [`client`] – `KiLiveClient`, die WebSocket-Implementierung

pub mod client;
pub mod config;
pub mod error;
pub mod session;

pub use client::KiLiveClient;
pub use config::KiConfig;
pub use error::{KiError, KiResult};
pub use session::LiveSession;
