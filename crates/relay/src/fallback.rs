//! Fallback/Reconnect-Policy
//!
//! Entscheidet pro Anruf ob die KI-Session neu verbunden oder auf die
//! Provider-Ansage degradiert wird. Der Transport (KiLiveClient) verbindet
//! sich nie selbststaendig neu – diese Policy ist die einzige Stelle die
//! Reconnects anstoesst.
//!
//! ## Zustandsautomat (pro Anruf)
//! ```text
//! connected --(Fehler/Close)--> reconnecting --(Erfolg)--> connected
//!                                   |
//!                 (Budget erschoepft, exponentieller Backoff)
//!                                   v
//!                          fallback_permanent   <- terminal, einmalige Ansage
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::control::SprachAktion;
use crate::session::CallSession;

/// Konfiguration der Fallback-Policy
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Maximale Reconnect-Versuche bevor dauerhaft degradiert wird
    pub max_versuche: u32,
    /// Basis des exponentiellen Backoffs zwischen Versuchen
    pub backoff_basis: Duration,
    /// Die einmalige Ansage im dauerhaften Fallback
    pub fallback_text: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_versuche: 2,
            backoff_basis: Duration::from_millis(500),
            fallback_text: "Entschuldigung, unser Sprachassistent ist gerade nicht erreichbar. \
                            Wir rufen Sie schnellstmoeglich zurueck."
                .into(),
        }
    }
}

/// Fallback/Reconnect-Policy, eine Instanz fuer den ganzen Prozess
///
/// Der veraenderliche Zustand lebt pro Anruf in dessen CallSession.
pub struct FallbackPolicy {
    sprach_aktion: Arc<dyn SprachAktion>,
    config: FallbackConfig,
}

impl FallbackPolicy {
    /// Erstellt die Policy mit der gegebenen Control-Plane-Anbindung
    pub fn neu(sprach_aktion: Arc<dyn SprachAktion>, config: FallbackConfig) -> Self {
        Self {
            sprach_aktion,
            config,
        }
    }

    /// Ein Policy-Durchlauf fuer eine Session ohne laufende KI-Verbindung
    ///
    /// Wird vom Outbound-Forwarder aufgerufen solange `laeuft() == false`.
    /// Blockiert hoechstens fuer die aktuelle Backoff-Wartezeit.
    pub async fn pruefen(&self, session: &Arc<CallSession>) {
        let zustand = session.fallback_zustand();

        // Terminal: nie wieder verbinden, nur Durchlaeufe zaehlen
        if zustand.dauerhaft {
            session.fallback_aktualisieren(|z| z.durchlaeufe += 1);
            return;
        }

        if zustand.versuche >= self.config.max_versuche {
            self.dauerhaft_degradieren(session).await;
            return;
        }

        let versuch = session.naechster_reconnect_versuch();
        let wartezeit = self.backoff(versuch);
        info!(
            stream_id = %session.stream_id(),
            versuch,
            wartezeit_ms = wartezeit.as_millis() as u64,
            "KI-Session getrennt – Reconnect-Versuch"
        );
        tokio::time::sleep(wartezeit).await;

        match session.ki().verbinden().await {
            Ok(_) => {
                info!(stream_id = %session.stream_id(), "KI-Session wiederhergestellt");
                // Der Anrufer hat Stille erlebt; die KI soll das kurz auffangen
                session
                    .ki()
                    .text_senden(
                        "Die Verbindung war kurz unterbrochen. Entschuldige dich in einem \
                         Satz beim Anrufer und setze das Gespraech fort.",
                    )
                    .await;
            }
            Err(e) => {
                warn!(
                    stream_id = %session.stream_id(),
                    versuch,
                    fehler = %e,
                    "Reconnect fehlgeschlagen"
                );
            }
        }
    }

    /// Wechselt in den terminalen Fallback und loest die einmalige Ansage aus
    async fn dauerhaft_degradieren(&self, session: &Arc<CallSession>) {
        let erste_degradierung = {
            let mut erste = false;
            session.fallback_aktualisieren(|z| {
                if !z.dauerhaft {
                    z.dauerhaft = true;
                    erste = !z.fallback_gesendet;
                    z.fallback_gesendet = true;
                }
            });
            erste
        };

        if !erste_degradierung {
            debug!(stream_id = %session.stream_id(), "Fallback bereits aktiv");
            return;
        }

        warn!(
            stream_id = %session.stream_id(),
            "Reconnect-Budget erschoepft – dauerhafter Fallback auf Provider-Ansage"
        );
        // Ein Versuch; schlaegt die Control-Plane fehl bleibt es trotzdem
        // bei genau einer Ansage (keine Wiederholungsschleife im Anruf)
        if let Err(e) = self
            .sprach_aktion
            .sprechen(session.call_control_id(), &self.config.fallback_text)
            .await
        {
            warn!(
                stream_id = %session.stream_id(),
                fehler = %e,
                "Fallback-Ansage fehlgeschlagen"
            );
        }
    }

    /// Exponentieller Backoff: basis * 2^(versuch-1)
    fn backoff(&self, versuch: u32) -> Duration {
        let faktor = 2u32.saturating_pow(versuch.saturating_sub(1).min(8));
        self.config.backoff_basis.saturating_mul(faktor)
    }
}
