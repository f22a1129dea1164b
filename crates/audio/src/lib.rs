//! vermittler-audio – Codec-Adapter des Relays
//!
//! Zustandslose Bausteine fuer den Audio-Pfad: Opus-Decode (Telefonie -> PCM),
//! Opus-Encode (PCM -> Telefonie) und lineares Resampling zwischen der
//! KI-Abtastrate und der Telefonie-Abtastrate.
//!
//! ## Module
//! - [`codec`] – Opus Encoder/Decoder Wrapper (PCM16, mono)
//! - [`resample`] – Lineares Resampling und Frame-Anpassung

pub mod codec;
pub mod error;
pub mod resample;

pub use codec::{OpusDecoder, OpusEncoder};
pub use error::{AudioError, AudioResult};
pub use resample::{frame_anpassen, resample_linear};
