//! KontextProvider – Anrufer-Kontext aus externer Persistenz
//!
//! Der Property/Reservierungs-Lookup ist ein externer Kollaborator und wird
//! als Trait injiziert statt ad hoc nachgeschlagen. Ein fehlgeschlagener
//! Lookup degradiert zum leeren Kontext – der Anruf laeuft immer weiter.

use async_trait::async_trait;
use tracing::warn;
use vermittler_core::{AnruferKontext, Result};

/// Loest die Rufnummer eines Anrufers zu seinem Gespraechskontext auf
#[async_trait]
pub trait KontextProvider: Send + Sync {
    /// Liefert Prompt-Kontext, Property-Kennung und Gastname zum Anrufer
    async fn kontext_fuer_anrufer(&self, telefonnummer: &str) -> Result<AnruferKontext>;
}

/// Kontext-Lookup mit Degradierung: Fehler ergeben den leeren Kontext
///
/// Zentrale Stelle fuer die Fehlerbehandlung aus §Kontext der Taxonomie,
/// damit die Pumpe nicht an jedem Aufrufort dieselbe Entscheidung trifft.
pub async fn kontext_nachschlagen(
    provider: &dyn KontextProvider,
    telefonnummer: Option<&str>,
) -> AnruferKontext {
    let Some(nummer) = telefonnummer else {
        return AnruferKontext::default();
    };
    match provider.kontext_fuer_anrufer(nummer).await {
        Ok(kontext) => kontext,
        Err(e) => {
            warn!(
                fehler = %e,
                "Kontext-Lookup fehlgeschlagen – Anruf laeuft mit leerem Kontext"
            );
            AnruferKontext::default()
        }
    }
}

/// Statischer Provider: liefert fuer jede Nummer denselben Kontext
///
/// Dient als Standard-Implementierung des Servers solange keine echte
/// Persistenz angebunden ist, und als Baustein fuer Tests.
#[derive(Debug, Clone, Default)]
pub struct StatischerKontextProvider {
    kontext: AnruferKontext,
}

impl StatischerKontextProvider {
    /// Provider mit festem Kontext
    pub fn neu(kontext: AnruferKontext) -> Self {
        Self { kontext }
    }
}

#[async_trait]
impl KontextProvider for StatischerKontextProvider {
    async fn kontext_fuer_anrufer(&self, _telefonnummer: &str) -> Result<AnruferKontext> {
        Ok(self.kontext.clone())
    }
}
