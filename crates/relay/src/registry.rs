//! SessionRegistry – In-Memory-Verzeichnis aller aktiven Anrufe
//!
//! Der einzige von mehreren Tasks angefasste Zustand des Relays. Atomare
//! Per-Key-Operationen statt ad-hoc Map-Zugriffe: Nebenlaeufigkeits-
//! Korrektheit ist eine Eigenschaft dieser API, nicht der Aufrufer.
//!
//! Thread-safe durch DashMap; die veraenderlichen Felder einer einzelnen
//! CallSession sind in der Session selbst synchronisiert.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};
use vermittler_core::StreamId;

use crate::session::CallSession;

/// Zentrales Verzeichnis aller aktiven CallSessions
///
/// `Clone`-faehig (innerer Arc); alle Klone teilen denselben Zustand.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<StreamId, Arc<CallSession>>>,
}

impl SessionRegistry {
    /// Erstellt ein neues leeres Verzeichnis
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert eine neue Session
    ///
    /// Ein doppeltes `start`-Event fuer eine bereits aktive StreamId
    /// erzwingt zuerst den vollstaendigen Teardown der alten Session –
    /// eine StreamId zeigt zu jedem Zeitpunkt auf hoechstens eine Session.
    pub async fn anlegen(&self, session: Arc<CallSession>) {
        let stream_id = session.stream_id().clone();
        if self.inner.contains_key(&stream_id) {
            warn!(
                stream_id = %stream_id,
                "Doppeltes start-Event – alte Session wird abgebaut"
            );
            self.entfernen(&stream_id).await;
        }
        info!(stream_id = %stream_id, "CallSession angelegt");
        self.inner.insert(stream_id, session);
    }

    /// Gibt die Session zu einer StreamId zurueck
    pub fn holen(&self, stream_id: &StreamId) -> Option<Arc<CallSession>> {
        self.inner.get(stream_id).map(|r| Arc::clone(r.value()))
    }

    /// Aktualisiert den Aktivitaets-Zeitstempel einer Session
    pub fn aktivitaet_aktualisieren(&self, stream_id: &StreamId) {
        if let Some(session) = self.inner.get(stream_id) {
            session.aktivitaet_aktualisieren();
        }
    }

    /// Wendet eine Mutation unter dem Registry-Eintrag an
    ///
    /// Gibt false zurueck wenn die StreamId nicht (mehr) existiert.
    pub fn aktualisieren<F>(&self, stream_id: &StreamId, f: F) -> bool
    where
        F: FnOnce(&CallSession),
    {
        match self.inner.get(stream_id) {
            Some(session) => {
                f(&session);
                true
            }
            None => false,
        }
    }

    /// Entfernt eine Session und baut sie vollstaendig ab
    ///
    /// Reihenfolge ist tragend: erst den Forwarder-Task abbrechen und
    /// abwarten, dann KI trennen, dann Codec-Zustand freigeben, zuletzt
    /// die Telefonie-Sende-Queue schliessen. Idempotent – eine bereits
    /// entfernte StreamId ergibt false.
    pub async fn entfernen(&self, stream_id: &StreamId) -> bool {
        let Some((_, session)) = self.inner.remove(stream_id) else {
            debug!(stream_id = %stream_id, "entfernen: Session bereits weg");
            return false;
        };

        if let Some(task) = session.ausgehenden_task_nehmen() {
            task.abort();
            let _ = task.await;
        }

        session.ki().trennen().await;
        session.codec_freigeben();
        session.telefonie_schliessen();

        let (eingehend, ausgehend) = session.zaehler();
        info!(
            stream_id = %stream_id,
            eingehende_frames = eingehend,
            ausgehende_frames = ausgehend,
            "CallSession abgebaut"
        );
        true
    }

    /// Gibt zurueck ob eine StreamId aktiv ist
    pub fn enthaelt(&self, stream_id: &StreamId) -> bool {
        self.inner.contains_key(stream_id)
    }

    /// Schnappschuss aller aktiven StreamIds
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    /// Anzahl der aktiven Sessions
    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }

    /// StreamIds deren Inaktivitaet (gemessen an `jetzt`) den Timeout
    /// ueberschreitet
    ///
    /// `jetzt` ist explizit, damit der Waechter testbar bleibt.
    pub fn abgelaufene(&self, jetzt: Instant, timeout: Duration) -> Vec<StreamId> {
        self.inner
            .iter()
            .filter(|e| e.value().inaktiv_seit(jetzt) > timeout)
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhilfen::MockSession;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;
    use vermittler_core::{AnruferKontext, CallControlId};
    use vermittler_ki::LiveSession;

    fn session_mit_mock(id: &str) -> (Arc<CallSession>, Arc<MockSession>) {
        let (tx, _rx) = mpsc::channel(16);
        let mock = Arc::new(MockSession::verbunden());
        let session = Arc::new(CallSession::neu(
            StreamId::neu(id),
            CallControlId::neu(format!("cc-{id}")),
            AnruferKontext::default(),
            Arc::clone(&mock) as Arc<dyn vermittler_ki::LiveSession>,
            tx,
        ));
        (session, mock)
    }

    #[tokio::test]
    async fn anlegen_und_holen() {
        let registry = SessionRegistry::neu();
        let (session, _mock) = session_mit_mock("a");
        registry.anlegen(session).await;

        assert!(registry.enthaelt(&StreamId::neu("a")));
        assert!(registry.holen(&StreamId::neu("a")).is_some());
        assert!(registry.holen(&StreamId::neu("b")).is_none());
        assert_eq!(registry.anzahl(), 1);
        assert_eq!(registry.stream_ids(), vec![StreamId::neu("a")]);
    }

    #[tokio::test]
    async fn aktualisieren_unter_dem_eintrag() {
        let registry = SessionRegistry::neu();
        let (session, _mock) = session_mit_mock("a");
        registry.anlegen(session).await;

        assert!(registry.aktualisieren(&StreamId::neu("a"), |s| s.eingehend_zaehlen()));
        assert!(!registry.aktualisieren(&StreamId::neu("weg"), |s| s.eingehend_zaehlen()));

        let session = registry.holen(&StreamId::neu("a")).unwrap();
        assert_eq!(session.zaehler().0, 1);
    }

    #[tokio::test]
    async fn entfernen_ist_idempotent() {
        let registry = SessionRegistry::neu();
        let (session, mock) = session_mit_mock("a");
        registry.anlegen(session).await;

        assert!(registry.entfernen(&StreamId::neu("a")).await);
        // Zweiter Teardown derselben StreamId ist ein No-op
        assert!(!registry.entfernen(&StreamId::neu("a")).await);
        assert_eq!(registry.anzahl(), 0);
        assert_eq!(mock.trennungen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn doppeltes_start_baut_alte_session_ab() {
        let registry = SessionRegistry::neu();
        let (alte, alter_mock) = session_mit_mock("a");
        // Codec-Zustand der alten Session initialisieren
        alte.kodieren(16_000, &vec![0i16; 320]).unwrap();
        registry.anlegen(alte).await;

        let (neue, _neuer_mock) = session_mit_mock("a");
        registry.anlegen(Arc::clone(&neue)).await;

        // Genau eine lebende Session; die alte ist vollstaendig abgebaut
        assert_eq!(registry.anzahl(), 1);
        let aktiv = registry.holen(&StreamId::neu("a")).unwrap();
        assert!(Arc::ptr_eq(&aktiv, &neue));
        assert!(!alter_mock.laeuft());
        assert_eq!(alter_mock.trennungen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entfernen_gibt_codec_frei_und_stoppt_forwarder() {
        let registry = SessionRegistry::neu();
        let (session, _mock) = session_mit_mock("a");
        session.kodieren(16_000, &vec![0i16; 320]).unwrap();

        // Endlos-Task als Forwarder-Ersatz
        let task = tokio::spawn(async {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
        });
        session.ausgehenden_task_setzen(task);
        registry.anlegen(Arc::clone(&session)).await;

        assert!(registry.entfernen(&StreamId::neu("a")).await);
        assert!(!session.codec_aktiv());
        assert!(session.ausgehenden_task_nehmen().is_none());
    }

    #[tokio::test]
    async fn abgelaufene_mit_synthetischer_uhr() {
        let registry = SessionRegistry::neu();
        let (alte, _m1) = session_mit_mock("alt");
        let (frische, _m2) = session_mit_mock("frisch");

        let jetzt = Instant::now();
        alte.aktivitaet_setzen(jetzt);
        // "frisch" war 30s nach `jetzt` noch aktiv
        frische.aktivitaet_setzen(jetzt + Duration::from_secs(30));
        registry.anlegen(alte).await;
        registry.anlegen(frische).await;

        let timeout = Duration::from_secs(60);
        let faellig = registry.abgelaufene(jetzt + Duration::from_secs(70), timeout);
        assert_eq!(faellig, vec![StreamId::neu("alt")]);
    }
}
