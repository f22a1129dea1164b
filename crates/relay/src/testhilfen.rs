//! Geskriptete Kollaborator-Implementierungen fuer Tests
//!
//! Eine `MockSession` ersetzt den echten WebSocket-Client der KI-Session,
//! eine `MockSprachAktion` die Control-Plane des Telefonie-Providers.
//! Beide zeichnen alle Aufrufe auf, damit Tests Reihenfolge und Anzahl
//! pruefen koennen.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use vermittler_core::{CallControlId, VermittlerError};
use vermittler_ki::{KiError, KiResult, LiveSession};
use vermittler_protocol::ki::Transkript;

use crate::control::SprachAktion;

/// Geskriptete LiveSession ohne Netzwerk
pub struct MockSession {
    laeuft: AtomicBool,
    verbinden_klappt: bool,
    /// Anzahl der verbinden()-Aufrufe
    pub verbindungs_versuche: AtomicU32,
    /// Anzahl der trennen()-Aufrufe
    pub trennungen: AtomicU32,
    /// Aufgezeichnetes Anrufer-Audio, in Aufruf-Reihenfolge
    pub gesendetes_audio: Mutex<Vec<Vec<i16>>>,
    /// Aufgezeichnete Text-Prompts
    pub gesendete_texte: Mutex<Vec<String>>,
    /// Skript: Audio das audio_holen() liefern soll
    pub audio_ausgabe: Mutex<VecDeque<Vec<i16>>>,
    /// Skript: Transkripte die transkript_holen() liefern soll
    pub transkripte: Mutex<VecDeque<Transkript>>,
}

impl MockSession {
    fn mit(laeuft: bool, verbinden_klappt: bool) -> Self {
        Self {
            laeuft: AtomicBool::new(laeuft),
            verbinden_klappt,
            verbindungs_versuche: AtomicU32::new(0),
            trennungen: AtomicU32::new(0),
            gesendetes_audio: Mutex::new(Vec::new()),
            gesendete_texte: Mutex::new(Vec::new()),
            audio_ausgabe: Mutex::new(VecDeque::new()),
            transkripte: Mutex::new(VecDeque::new()),
        }
    }

    /// Session die bereits laeuft
    pub fn verbunden() -> Self {
        Self::mit(true, true)
    }

    /// Session die getrennt ist, sich aber verbinden laesst
    pub fn getrennt() -> Self {
        Self::mit(false, true)
    }

    /// Session deren verbinden() immer fehlschlaegt
    pub fn kaputt() -> Self {
        Self::mit(false, false)
    }

    /// Legt ein PCM-Stueck ins Ausgabe-Skript
    pub fn audio_einreihen(&self, pcm: Vec<i16>) {
        self.audio_ausgabe.lock().push_back(pcm);
    }
}

#[async_trait]
impl LiveSession for MockSession {
    async fn verbinden(&self) -> KiResult<String> {
        self.verbindungs_versuche.fetch_add(1, Ordering::SeqCst);
        if self.verbinden_klappt {
            self.laeuft.store(true, Ordering::SeqCst);
            Ok("Willkommen".into())
        } else {
            Err(KiError::Verbindung("Mock: Endpunkt nicht erreichbar".into()))
        }
    }

    async fn audio_senden(&self, pcm: &[i16]) {
        self.gesendetes_audio.lock().push(pcm.to_vec());
    }

    async fn text_senden(&self, text: &str) {
        self.gesendete_texte.lock().push(text.to_string());
    }

    fn audio_holen(&self) -> Option<Vec<i16>> {
        self.audio_ausgabe.lock().pop_front()
    }

    fn transkript_holen(&self) -> Option<Transkript> {
        self.transkripte.lock().pop_front()
    }

    async fn trennen(&self) {
        self.laeuft.store(false, Ordering::SeqCst);
        self.trennungen.fetch_add(1, Ordering::SeqCst);
    }

    fn laeuft(&self) -> bool {
        self.laeuft.load(Ordering::SeqCst)
    }

    fn letzter_fehler(&self) -> Option<String> {
        None
    }
}

/// Zeichnet sprechen()-Aufrufe auf statt die Control-Plane zu rufen
#[derive(Default)]
pub struct MockSprachAktion {
    /// Aufgezeichnete Ansagen: (call_control_id, text)
    pub ansagen: Mutex<Vec<(CallControlId, String)>>,
}

#[async_trait]
impl SprachAktion for MockSprachAktion {
    async fn sprechen(
        &self,
        call_control_id: &CallControlId,
        text: &str,
    ) -> vermittler_core::Result<()> {
        self.ansagen
            .lock()
            .push((call_control_id.clone(), text.to_string()));
        Ok(())
    }
}

/// Sprach-Aktion deren Aufrufe fehlschlagen (Provider nicht erreichbar)
#[derive(Default)]
pub struct KaputteSprachAktion {
    pub aufrufe: AtomicU32,
}

#[async_trait]
impl SprachAktion for KaputteSprachAktion {
    async fn sprechen(
        &self,
        _call_control_id: &CallControlId,
        _text: &str,
    ) -> vermittler_core::Result<()> {
        self.aufrufe.fetch_add(1, Ordering::SeqCst);
        Err(VermittlerError::transport("Mock: Control-Plane down"))
    }
}
