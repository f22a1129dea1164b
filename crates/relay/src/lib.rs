//! vermittler-relay – die Relay-Engine
//!
//! Haelt das Audio eines Telefonats in beide Richtungen am Laufen waehrend
//! eine entfernte KI-Session die Antworten liefert.
//!
//! ## Module
//! - [`session`] – CallSession, der Zustand eines aktiven Anrufs
//! - [`registry`] – SessionRegistry mit atomaren Per-Key-Operationen
//! - [`inbound`] – Media-Pumpe: Telefonie-Frames -> Opus-Decode -> KI
//! - [`outbound`] – Forwarder: KI-Audio -> Resample -> Opus-Encode -> Telefonie
//! - [`supervisor`] – Inaktivitaets-Waechter (periodische Eviction)
//! - [`fallback`] – Reconnect-Policy und dauerhafte Degradierung
//! - [`kontext`] – injizierter Anrufer-Kontext-Lookup
//! - [`control`] – Telefonie-Control-Plane (speak-Aktion)
//! - [`testhilfen`] – geskriptete Kollaboratoren fuer Tests

pub mod control;
pub mod fallback;
pub mod inbound;
pub mod kontext;
pub mod outbound;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod testhilfen;

pub use fallback::{FallbackConfig, FallbackPolicy};
pub use inbound::{KiSessionFabrik, MediaPumpe, SessionFabrik, VerbindungsKontext};
pub use kontext::{KontextProvider, StatischerKontextProvider};
pub use outbound::ForwarderConfig;
pub use registry::SessionRegistry;
pub use session::CallSession;
pub use supervisor::InaktivitaetsWaechter;
