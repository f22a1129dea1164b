//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use vermittler_ki::KiConfig;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct VermittlerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Telefonie-Provider (Media-Format und Control-Plane)
    pub telefonie: TelefonieEinstellungen,
    /// KI-Live-Session
    pub ki: KiConfig,
    /// Relay-Verhalten (Polling, Timeouts, Fallback)
    pub relay: RelayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Anrufe
    pub max_anrufe: u32,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Vermittler Relay".into(),
            max_anrufe: 256,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den Telefonie-WebSocket-Listener
    pub bind_adresse: String,
    /// Port fuer den Telefonie-WebSocket-Listener
    pub ws_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            ws_port: 8765,
        }
    }
}

/// Telefonie-Provider-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelefonieEinstellungen {
    /// Basis-URL der REST-Control-Plane
    pub control_url: String,
    /// API-Schluessel der Control-Plane
    pub api_key: String,
    /// Beim Call-Answer verhandelte Abtastrate der Media-Strecke
    pub sample_rate_hz: u32,
    /// Stimme fuer die serverseitige Fallback-Ansage
    pub stimme: String,
    /// Sprache der Fallback-Ansage
    pub sprache: String,
}

impl Default for TelefonieEinstellungen {
    fn default() -> Self {
        Self {
            control_url: "https://api.telefonie.example/v2".into(),
            api_key: String::new(),
            sample_rate_hz: 16_000,
            stimme: "female".into(),
            sprache: "de-DE".into(),
        }
    }
}

/// Relay-Einstellungen (eine kanonische Komponente, per Konfiguration
/// parametrisiert statt pro Deployment-Ziel dupliziert)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Schlafintervall des Forwarders wenn kein KI-Audio ansteht (ms)
    pub poll_intervall_ms: u64,
    /// Pruefintervall des Inaktivitaets-Waechters (Sekunden)
    pub pruef_intervall_sek: u64,
    /// Inaktivitaets-Timeout fuer Eviction (Sekunden)
    pub inaktivitaets_timeout_sek: u64,
    /// Reconnect-Budget der Fallback-Policy
    pub max_reconnect_versuche: u32,
    /// Basis des exponentiellen Backoffs (ms)
    pub backoff_basis_ms: u64,
    /// Einmalige Ansage im dauerhaften Fallback
    pub fallback_text: String,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            poll_intervall_ms: 20,
            pruef_intervall_sek: 30,
            inaktivitaets_timeout_sek: 60,
            max_reconnect_versuche: 2,
            backoff_basis_ms: 500,
            fallback_text: "Entschuldigung, unser Sprachassistent ist gerade nicht erreichbar. \
                            Wir rufen Sie schnellstmoeglich zurueck."
                .into(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VermittlerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer den WebSocket-Listener zurueck
    pub fn ws_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.ws_port)
    }

    /// Poll-Intervall des Forwarders als Duration
    pub fn poll_intervall(&self) -> Duration {
        Duration::from_millis(self.relay.poll_intervall_ms)
    }

    /// Pruefintervall des Waechters als Duration
    pub fn pruef_intervall(&self) -> Duration {
        Duration::from_secs(self.relay.pruef_intervall_sek)
    }

    /// Inaktivitaets-Timeout als Duration
    pub fn inaktivitaets_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.inaktivitaets_timeout_sek)
    }
}
