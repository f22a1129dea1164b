//! vermittler-protocol – Wire-Envelopes beider WebSocket-Strecken
//!
//! ## Module
//! - [`telephony`] – JSON-Frames des Telefonie-Providers (start/media/stop/error)
//! - [`ki`] – Envelopes der KI-Live-Session (Client- und Server-Events)
//!
//! Beide Strecken sprechen JSON-Textframes; Audio-Payloads sind base64.

pub mod ki;
pub mod telephony;

pub use ki::{KiClientEvent, KiServerEvent, Transkript, TranskriptRolle};
pub use telephony::{MediaFormat, TelephonieEvent};
