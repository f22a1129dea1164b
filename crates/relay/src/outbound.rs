//! Outbound Audio Forwarder – KI-Audio zurueck zum Telefonie-Socket
//!
//! Ein langlebiger Task pro Anruf. Solange die CallSession existiert:
//!
//! ```text
//! KI audio_holen() --> Resample (KI-Rate -> Telefonie-Rate)
//!                  --> Frame-Anpassung (pad/truncate)
//!                  --> Opus-Encode
//!                  --> base64 --> media-Event --> Telefonie-Sende-Queue
//! ```
//!
//! Laeuft die KI-Session nicht, uebernimmt pro Durchlauf die
//! Fallback-Policy. Encode- und Sende-Fehler beenden die Schleife und
//! stossen den Teardown der Session an; Resampling-Fehler degradieren zum
//! geloggten Durchreichen des unveraenderten Puffers (kein totes Schweigen).

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use vermittler_audio::{frame_anpassen, resample_linear};
use vermittler_protocol::telephony::TelephonieEvent;

use crate::fallback::FallbackPolicy;
use crate::registry::SessionRegistry;
use crate::session::CallSession;

/// Konfiguration des Forwarders
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Abtastrate der Telefonie-Strecke (Opus-Encode-Ziel)
    pub telefonie_rate_hz: u32,
    /// Native Abtastrate des KI-Audios
    pub ki_rate_hz: u32,
    /// Schlafintervall wenn kein KI-Audio ansteht (kein Busy-Waiting)
    pub poll_intervall: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            telefonie_rate_hz: 16_000,
            ki_rate_hz: 24_000,
            poll_intervall: Duration::from_millis(20),
        }
    }
}

/// Startet den Forwarder-Task fuer eine Session
///
/// Der zurueckgegebene Handle gehoert in die Session
/// (`ausgehenden_task_setzen`), damit der Teardown ihn abbrechen und
/// abwarten kann bevor der Codec-Zustand freigegeben wird.
pub fn starten(
    session: Arc<CallSession>,
    registry: SessionRegistry,
    policy: Arc<FallbackPolicy>,
    config: ForwarderConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        schleife(session, registry, policy, config).await;
    })
}

async fn schleife(
    session: Arc<CallSession>,
    registry: SessionRegistry,
    policy: Arc<FallbackPolicy>,
    config: ForwarderConfig,
) {
    let stream_id = session.stream_id().clone();
    debug!(stream_id = %stream_id, "Outbound-Forwarder gestartet");

    loop {
        if !registry.enthaelt(&stream_id) {
            debug!(stream_id = %stream_id, "Session entfernt – Forwarder endet");
            return;
        }

        if !session.ki().laeuft() {
            policy.pruefen(&session).await;
            tokio::time::sleep(config.poll_intervall).await;
            continue;
        }

        // Beide Gespraechsseiten mitschreiben (Transkription ist aktiv)
        while let Some(transkript) = session.ki().transkript_holen() {
            tracing::info!(
                stream_id = %stream_id,
                rolle = ?transkript.rolle,
                text = %transkript.text,
                "Transkript"
            );
        }

        let Some(pcm) = session.ki().audio_holen() else {
            tokio::time::sleep(config.poll_intervall).await;
            continue;
        };

        if !frame_weiterleiten(&session, &config, pcm).await {
            // Encode- oder Sende-Fehler: Teardown anstossen. Der eigene
            // Task darf nicht auf sein eigenes Handle warten, deshalb
            // laeuft entfernen() in einem separaten Task.
            let registry = registry.clone();
            let stream_id = stream_id.clone();
            tokio::spawn(async move {
                registry.entfernen(&stream_id).await;
            });
            return;
        }
    }
}

/// Verarbeitet ein PCM-Stueck zu genau einem ausgehenden media-Event
///
/// Gibt false zurueck wenn die Schleife enden muss.
async fn frame_weiterleiten(
    session: &Arc<CallSession>,
    config: &ForwarderConfig,
    pcm: Vec<i16>,
) -> bool {
    let stream_id = session.stream_id();

    // KI-Rate -> Telefonie-Rate; bei Fehler degradiert: unveraendert
    // durchreichen statt Audio zu verwerfen
    let resampelt = match resample_linear(&pcm, config.ki_rate_hz, config.telefonie_rate_hz) {
        Ok(resampelt) => resampelt,
        Err(e) => {
            warn!(
                stream_id = %stream_id,
                fehler = %e,
                "Resampling fehlgeschlagen – Audio wird unveraendert durchgereicht"
            );
            pcm
        }
    };

    // Der Opus-Encoder akzeptiert nur exakte Frame-Groessen
    let frame_groesse = session.frame_groesse(config.telefonie_rate_hz);
    let frame = frame_anpassen(resampelt, frame_groesse);

    let opus = match session.kodieren(config.telefonie_rate_hz, &frame) {
        Ok(opus) => opus,
        Err(e) => {
            warn!(stream_id = %stream_id, fehler = %e, "Encode fehlgeschlagen – Teardown");
            return false;
        }
    };

    let event = TelephonieEvent::media_ausgehend(
        stream_id.als_str(),
        B64.encode(&opus),
        config.telefonie_rate_hz,
    );
    let json = match serde_json::to_string(&event) {
        Ok(json) => json,
        Err(e) => {
            warn!(stream_id = %stream_id, fehler = %e, "media-Event nicht serialisierbar");
            return false;
        }
    };

    if let Err(e) = session.telefonie_senden(json).await {
        warn!(stream_id = %stream_id, fehler = %e, "Telefonie-Senden fehlgeschlagen – Teardown");
        return false;
    }

    session.ausgehend_zaehlen();
    session.aktivitaet_aktualisieren();
    trace!(stream_id = %stream_id, samples = frame_groesse, "KI-Audio weitergeleitet");
    true
}
