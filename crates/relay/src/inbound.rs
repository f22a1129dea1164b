//! Inbound Media Pump – Telefonie-Frames in Richtung KI
//!
//! Verarbeitet die Events einer Telefonie-WebSocket-Verbindung:
//!
//! ```text
//! start  -> Kontext-Lookup -> KI-Session bauen + verbinden -> Forwarder starten
//! media  -> validieren -> base64 -> Opus-Decode -> KI audio_senden
//! stop   -> Session-Teardown
//! error  -> loggen (wiederholbar, nie fatal)
//! ```
//!
//! Ein Decode-Fehler verwirft genau den einen Frame und beendet niemals den
//! Anruf; Frames fuer eine fremde StreamId sind Invarianten-Verletzungen
//! und werden geloggt und verworfen.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vermittler_core::{AnruferKontext, CallControlId, StreamId};
use vermittler_ki::{KiConfig, KiLiveClient, LiveSession};
use vermittler_protocol::telephony::{StartPayload, StopPayload, TelephonieEvent};

use crate::fallback::FallbackPolicy;
use crate::kontext::{kontext_nachschlagen, KontextProvider};
use crate::outbound::{self, ForwarderConfig};
use crate::registry::SessionRegistry;
use crate::session::CallSession;

/// Frames unterhalb dieser Groesse sind Provider-Rauschen, kein Audio
const MIN_MEDIA_BYTES: usize = 8;

// ---------------------------------------------------------------------------
// Session-Fabrik
// ---------------------------------------------------------------------------

/// Baut pro Anruf die LiveSession – Naht fuer Tests
pub trait SessionFabrik: Send + Sync {
    /// Erstellt eine (noch unverbundene) Session fuer den Anrufer-Kontext
    fn erstellen(&self, kontext: AnruferKontext) -> Arc<dyn LiveSession>;
}

/// Produktions-Fabrik: echte WebSocket-Clients aus der KI-Konfiguration
pub struct KiSessionFabrik {
    config: KiConfig,
}

impl KiSessionFabrik {
    pub fn neu(config: KiConfig) -> Self {
        Self { config }
    }
}

impl SessionFabrik for KiSessionFabrik {
    fn erstellen(&self, kontext: AnruferKontext) -> Arc<dyn LiveSession> {
        Arc::new(KiLiveClient::neu(self.config.clone(), kontext))
    }
}

// ---------------------------------------------------------------------------
// Verbindungs-Kontext
// ---------------------------------------------------------------------------

/// Zustand einer Telefonie-WebSocket-Verbindung
///
/// Der Server haelt pro Verbindung genau einen Kontext; `aktive_stream`
/// wird vom `start`-Event gesetzt und identifiziert die StreamId fuer die
/// diese Verbindung Frames liefern darf.
pub struct VerbindungsKontext {
    /// Sende-Queue zum Socket-Writer dieser Verbindung
    pub telefonie_tx: mpsc::Sender<String>,
    /// Die auf dieser Verbindung aktive StreamId
    pub aktive_stream: Option<StreamId>,
}

impl VerbindungsKontext {
    pub fn neu(telefonie_tx: mpsc::Sender<String>) -> Self {
        Self {
            telefonie_tx,
            aktive_stream: None,
        }
    }
}

// ---------------------------------------------------------------------------
// MediaPumpe
// ---------------------------------------------------------------------------

/// Verarbeitet eingehende Telefonie-Events fuer alle Verbindungen
pub struct MediaPumpe {
    registry: SessionRegistry,
    kontext_provider: Arc<dyn KontextProvider>,
    fabrik: Arc<dyn SessionFabrik>,
    policy: Arc<FallbackPolicy>,
    forwarder_config: ForwarderConfig,
}

impl MediaPumpe {
    /// Erstellt die Pumpe mit allen injizierten Kollaboratoren
    pub fn neu(
        registry: SessionRegistry,
        kontext_provider: Arc<dyn KontextProvider>,
        fabrik: Arc<dyn SessionFabrik>,
        policy: Arc<FallbackPolicy>,
        forwarder_config: ForwarderConfig,
    ) -> Self {
        Self {
            registry,
            kontext_provider,
            fabrik,
            policy,
            forwarder_config,
        }
    }

    /// Verarbeitet ein Event einer Telefonie-Verbindung
    pub async fn ereignis_verarbeiten(
        &self,
        event: TelephonieEvent,
        verbindung: &mut VerbindungsKontext,
    ) {
        match event {
            TelephonieEvent::Start { stream_id, start } => {
                self.start_verarbeiten(StreamId::neu(stream_id), start, verbindung)
                    .await;
            }
            TelephonieEvent::Media { stream_id, media } => {
                self.media_verarbeiten(StreamId::neu(stream_id), &media.payload, verbindung)
                    .await;
            }
            TelephonieEvent::Stop { stream_id, stop } => {
                self.stop_verarbeiten(StreamId::neu(stream_id), stop, verbindung)
                    .await;
            }
            TelephonieEvent::Error { payload } => {
                // Provider-Stream-Fehler sind in aller Regel wiederholbar
                warn!(
                    code = payload.code.as_deref().unwrap_or("?"),
                    titel = payload.title.as_deref().unwrap_or(""),
                    "Telefonie-Provider meldet Stream-Fehler"
                );
            }
        }
    }

    /// Baut die Session beim Verbindungsende ab (Transport-Teardown)
    pub async fn verbindung_beendet(&self, verbindung: &mut VerbindungsKontext) {
        if let Some(stream_id) = verbindung.aktive_stream.take() {
            info!(stream_id = %stream_id, "Telefonie-Verbindung beendet – Teardown");
            self.registry.entfernen(&stream_id).await;
        }
    }

    // -----------------------------------------------------------------------
    // Event-Handler
    // -----------------------------------------------------------------------

    async fn start_verarbeiten(
        &self,
        stream_id: StreamId,
        start: StartPayload,
        verbindung: &mut VerbindungsKontext,
    ) {
        info!(
            stream_id = %stream_id,
            call_control_id = %start.call_control_id,
            anrufer = start.from.as_deref().unwrap_or("unbekannt"),
            "Anruf gestartet"
        );

        // Kontext-Lookup; Fehler degradieren zum leeren Kontext
        let kontext =
            kontext_nachschlagen(self.kontext_provider.as_ref(), start.from.as_deref()).await;

        let ki = self.fabrik.erstellen(kontext.clone());
        let session = Arc::new(CallSession::neu(
            stream_id.clone(),
            CallControlId::neu(start.call_control_id),
            kontext,
            ki,
            verbindung.telefonie_tx.clone(),
        ));

        // Ein doppeltes start fuer dieselbe StreamId baut die alte Session ab
        self.registry.anlegen(Arc::clone(&session)).await;
        verbindung.aktive_stream = Some(stream_id.clone());

        // Erster Verbindungsaufbau; schlaegt er fehl uebernimmt die
        // Fallback-Policy im Forwarder
        match session.ki().verbinden().await {
            Ok(willkommen) => {
                if !willkommen.is_empty() {
                    debug!(stream_id = %stream_id, willkommen = %willkommen, "KI begruesst");
                }
            }
            Err(e) => {
                warn!(
                    stream_id = %stream_id,
                    fehler = %e,
                    "KI-Session nicht erreichbar – Fallback-Policy uebernimmt"
                );
            }
        }

        let task = outbound::starten(
            Arc::clone(&session),
            self.registry.clone(),
            Arc::clone(&self.policy),
            self.forwarder_config.clone(),
        );
        session.ausgehenden_task_setzen(task);
    }

    async fn media_verarbeiten(
        &self,
        stream_id: StreamId,
        payload_b64: &str,
        verbindung: &VerbindungsKontext,
    ) {
        // Frames fuer eine fremde StreamId: Invariante verletzt, nie fatal
        if verbindung.aktive_stream.as_ref() != Some(&stream_id) {
            warn!(
                stream_id = %stream_id,
                aktive = ?verbindung.aktive_stream,
                "media-Frame fuer fremde StreamId verworfen"
            );
            return;
        }

        let Some(session) = self.registry.holen(&stream_id) else {
            debug!(stream_id = %stream_id, "media-Frame ohne Session verworfen");
            return;
        };

        let opus = match B64.decode(payload_b64) {
            Ok(opus) => opus,
            Err(e) => {
                warn!(stream_id = %stream_id, fehler = %e, "media-Payload kein base64");
                return;
            }
        };

        // Zu kleine Payloads sind Rauschen, kein Fehler
        if opus.len() < MIN_MEDIA_BYTES {
            debug!(stream_id = %stream_id, bytes = opus.len(), "Mini-Frame verworfen");
            return;
        }

        let pcm = match session.dekodieren(self.forwarder_config.telefonie_rate_hz, &opus) {
            Ok(pcm) => pcm,
            Err(e) if e.ist_stream_artefakt() => {
                // Transiente Stream-Artefakte: leise verwerfen
                debug!(stream_id = %stream_id, fehler = %e, "Frame-Artefakt uebersprungen");
                return;
            }
            Err(e) => {
                warn!(stream_id = %stream_id, fehler = %e, "Opus-Decode fehlgeschlagen");
                return;
            }
        };

        session.ki().audio_senden(&pcm).await;
        session.eingehend_zaehlen();
        session.aktivitaet_aktualisieren();
    }

    async fn stop_verarbeiten(
        &self,
        stream_id: StreamId,
        stop: StopPayload,
        verbindung: &mut VerbindungsKontext,
    ) {
        info!(
            stream_id = %stream_id,
            grund = stop.reason.as_deref().unwrap_or("unbekannt"),
            "Anruf beendet"
        );
        if verbindung.aktive_stream.as_ref() == Some(&stream_id) {
            verbindung.aktive_stream = None;
        }
        self.registry.entfernen(&stream_id).await;
    }
}
