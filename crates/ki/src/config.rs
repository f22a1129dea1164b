//! Konfiguration des KI-Live-Session-Clients

use serde::{Deserialize, Serialize};
use std::time::Duration;
use vermittler_core::AnruferKontext;

/// Konfiguration fuer eine KI-Live-Session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KiConfig {
    /// WebSocket-Endpunkt der Live-Session
    pub url: String,
    /// API-Schluessel (leer = keine Authentifizierung, z.B. lokaler Endpunkt)
    pub api_key: String,
    /// Modellname
    pub model: String,
    /// Ausgewaehlte Stimme fuer synthetisiertes Audio
    pub stimme: String,
    /// Basis-System-Prompt; wird pro Anruf um den Kontext ergaenzt
    pub instruktionen: String,
    /// Abtastrate des Audios das WIR zur KI senden (Telefonie-Rate)
    pub eingangs_rate_hz: u32,
    /// Native Abtastrate des Audios das die KI liefert
    pub ausgangs_rate_hz: u32,
    /// Connect/Handshake-Timeout in Sekunden
    pub verbindungs_timeout_sek: u64,
}

impl Default for KiConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.example.ai/v1/live".into(),
            api_key: String::new(),
            model: "voice-live-1".into(),
            stimme: "marin".into(),
            instruktionen: "Du bist die freundliche Telefon-Rezeption einer Ferienunterkunft. \
                            Antworte kurz und hilfsbereit."
                .into(),
            eingangs_rate_hz: 16_000,
            ausgangs_rate_hz: 24_000,
            verbindungs_timeout_sek: 10,
        }
    }
}

impl KiConfig {
    /// Gibt das Connect-Timeout als Duration zurueck
    pub fn verbindungs_timeout(&self) -> Duration {
        Duration::from_secs(self.verbindungs_timeout_sek)
    }

    /// Baut den vollstaendigen System-Prompt fuer einen Anruf
    ///
    /// Der Anrufer-Kontext (Property, Reservierung, Gastname) wird an den
    /// Basis-Prompt angehaengt; ein leerer Kontext ergibt nur die Basis.
    pub fn prompt_bauen(&self, kontext: &AnruferKontext) -> String {
        let mut prompt = self.instruktionen.clone();
        if !kontext.prompt_kontext.is_empty() {
            prompt.push_str("\n\nKontext zu diesem Anruf:\n");
            prompt.push_str(&kontext.prompt_kontext);
        }
        if let Some(name) = &kontext.gast_name {
            prompt.push_str(&format!("\nDer Gast heisst {}.", name));
        }
        prompt
    }
}
