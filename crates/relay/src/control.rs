//! Telefonie-Control-Plane – serverseitige Sprachansage
//!
//! Die Fallback-Policy nutzt die REST-Control-Plane des Providers um eine
//! Ansage direkt vom Provider sprechen zu lassen (die KI-Session wird dabei
//! komplett umgangen). Das Trait ist die Naht fuer Tests.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use vermittler_core::{CallControlId, Result, VermittlerError};

/// Die `speak`-Aktion der Provider-Control-Plane
#[async_trait]
pub trait SprachAktion: Send + Sync {
    /// Laesst den Provider `text` in den Anruf sprechen
    async fn sprechen(&self, call_control_id: &CallControlId, text: &str) -> Result<()>;
}

/// REST-Client der Telefonie-Control-Plane
pub struct TelephonieControl {
    http: reqwest::Client,
    basis_url: String,
    api_key: String,
    stimme: String,
    sprache: String,
}

impl TelephonieControl {
    /// Erstellt einen Control-Plane-Client
    pub fn neu(
        basis_url: impl Into<String>,
        api_key: impl Into<String>,
        stimme: impl Into<String>,
        sprache: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            basis_url: basis_url.into(),
            api_key: api_key.into(),
            stimme: stimme.into(),
            sprache: sprache.into(),
        }
    }

    fn speak_url(&self, call_control_id: &CallControlId) -> String {
        format!(
            "{}/calls/{}/actions/speak",
            self.basis_url.trim_end_matches('/'),
            call_control_id.als_str()
        )
    }
}

#[async_trait]
impl SprachAktion for TelephonieControl {
    async fn sprechen(&self, call_control_id: &CallControlId, text: &str) -> Result<()> {
        let url = self.speak_url(call_control_id);
        debug!(call_control_id = %call_control_id, "Sprachansage via Control-Plane");

        let antwort = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "payload": text,
                "voice": self.stimme,
                "language": self.sprache,
            }))
            .send()
            .await
            .map_err(|e| VermittlerError::Transport(format!("speak-Aufruf: {e}")))?;

        if !antwort.status().is_success() {
            return Err(VermittlerError::Transport(format!(
                "speak-Aufruf abgelehnt: HTTP {}",
                antwort.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speak_url_bauen() {
        let control = TelephonieControl::neu("https://api.telefonie.example/v2/", "k", "f", "de-DE");
        let url = control.speak_url(&CallControlId::neu("cc-1"));
        assert_eq!(
            url,
            "https://api.telefonie.example/v2/calls/cc-1/actions/speak"
        );
    }
}
