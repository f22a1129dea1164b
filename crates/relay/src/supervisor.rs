//! Inaktivitaets-Waechter – raeumt verwaiste CallSessions ab
//!
//! Ein Task fuer den ganzen Prozess. In festem Intervall wird ein
//! Schnappschuss aller StreamIds genommen und jede Session entfernt deren
//! Inaktivitaet den Timeout ueberschreitet. Verschwindet eine StreamId
//! zwischen Schnappschuss und Eviction, ist das bereits erledigte Arbeit –
//! kein Fehler.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::SessionRegistry;

/// Standard-Pruefintervall des Waechters
pub const PRUEF_INTERVALL: Duration = Duration::from_secs(30);

/// Standard-Timeout: Sessions ohne Frame seit dieser Dauer gelten als tot
pub const INAKTIVITAETS_TIMEOUT: Duration = Duration::from_secs(60);

/// Periodischer Aufraeum-Task fuer inaktive Sessions
pub struct InaktivitaetsWaechter {
    registry: SessionRegistry,
    pruef_intervall: Duration,
    timeout: Duration,
}

impl InaktivitaetsWaechter {
    /// Erstellt den Waechter mit explizitem Intervall und Timeout
    pub fn neu(registry: SessionRegistry, pruef_intervall: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            pruef_intervall,
            timeout,
        }
    }

    /// Startet die periodische Sweep-Schleife
    pub fn starten(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut intervall = tokio::time::interval(self.pruef_intervall);
            intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                intervall.tick().await;
                self.durchlauf(Instant::now()).await;
            }
        })
    }

    /// Ein einzelner Sweep, gemessen an `jetzt` (testbar mit synthetischer Uhr)
    ///
    /// Gibt die Anzahl der entfernten Sessions zurueck.
    pub async fn durchlauf(&self, jetzt: Instant) -> usize {
        let faellig = self.registry.abgelaufene(jetzt, self.timeout);
        if faellig.is_empty() {
            return 0;
        }

        let mut entfernt = 0usize;
        for stream_id in faellig {
            if self.registry.entfernen(&stream_id).await {
                info!(
                    stream_id = %stream_id,
                    timeout_sek = self.timeout.as_secs(),
                    "Inaktive Session entfernt"
                );
                entfernt += 1;
            } else {
                // Zwischen Schnappschuss und Eviction verschwunden
                debug!(stream_id = %stream_id, "Session bereits anderweitig entfernt");
            }
        }
        entfernt
    }
}
