//! Gemeinsame Identifikationstypen fuer Vermittler
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Anders als
//! bei UUIDs werden beide IDs vom Telefonie-Provider vergeben und sind
//! deshalb String-basiert.

use serde::{Deserialize, Serialize};

/// Eindeutige Kennung eines Media-Streams (ein Anruf = ein Stream)
///
/// Wird vom Telefonie-Provider beim `start`-Event vergeben und ist der
/// Primaerschluessel einer CallSession. Wird waehrend eines aktiven
/// Anrufs niemals wiederverwendet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    /// Erstellt eine StreamId aus einem Provider-String
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die innere String-Kennung zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaker Handle fuer Control-Plane-Aktionen eines Anrufs
///
/// Unabhaengig vom Media-Stream; wird fuer Provider-Aktionen wie
/// answer, speak und hangup verwendet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallControlId(pub String);

impl CallControlId {
    /// Erstellt eine CallControlId aus einem Provider-String
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die innere String-Kennung zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallControlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call:{}", self.0)
    }
}

impl From<&str> for CallControlId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kontext eines Anrufers aus dem externen Property/Reservierungs-Lookup
///
/// Nach Session-Start read-only; dient als Saat fuer den System-Prompt
/// der KI-Session. Ein fehlgeschlagener Lookup liefert den leeren
/// Standardkontext – der Anruf laeuft trotzdem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnruferKontext {
    /// Freitext-Kontext fuer den System-Prompt (Property, Reservierung, FAQ)
    pub prompt_kontext: String,
    /// Kennung der zugeordneten Unterkunft (falls aufloesbar)
    pub property_id: Option<String>,
    /// Name des Gastes (falls aufloesbar)
    pub gast_name: Option<String>,
}

impl AnruferKontext {
    /// Erstellt einen Kontext nur aus Prompt-Text
    pub fn aus_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt_kontext: prompt.into(),
            ..Self::default()
        }
    }

    /// Gibt zurueck ob der Lookup keinerlei Daten geliefert hat
    pub fn ist_leer(&self) -> bool {
        self.prompt_kontext.is_empty() && self.property_id.is_none() && self.gast_name.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_display() {
        let id = StreamId::neu("abc123");
        assert_eq!(id.to_string(), "stream:abc123");
        assert_eq!(id.als_str(), "abc123");
    }

    #[test]
    fn stream_ids_vergleichbar() {
        assert_eq!(StreamId::neu("a"), StreamId::from("a"));
        assert_ne!(StreamId::neu("a"), StreamId::neu("b"));
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let id = CallControlId::neu("cc-42");
        let json = serde_json::to_string(&id).unwrap();
        let id2: CallControlId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn leerer_kontext() {
        assert!(AnruferKontext::default().ist_leer());
        assert!(!AnruferKontext::aus_prompt("Haus am See").ist_leer());
    }
}
