//! CallSession – Zustand eines aktiven Anrufs
//!
//! Eine CallSession buendelt alles was zu genau einem Telefonat gehoert:
//! die Sende-Queue zum Telefonie-Socket, den KI-Session-Handle, den lazily
//! erstellten Codec-Zustand, Aktivitaets-Zeitstempel und den Zustand der
//! Fallback-Policy. Alle veraenderlichen Felder sind intern synchronisiert;
//! kein Lock wird ueber einen await-Punkt gehalten.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vermittler_audio::codec::samples_pro_frame;
use vermittler_audio::{AudioResult, OpusDecoder, OpusEncoder};
use vermittler_core::{AnruferKontext, CallControlId, StreamId, VermittlerError};
use vermittler_ki::LiveSession;

// ---------------------------------------------------------------------------
// Codec-Zustand
// ---------------------------------------------------------------------------

/// Lazily erstellter Encoder/Decoder eines Anrufs
///
/// Wird beim ersten Frame der jeweiligen Richtung angelegt und beim
/// Session-Ende freigegeben.
#[derive(Default)]
pub struct CodecZustand {
    encoder: Option<OpusEncoder>,
    decoder: Option<OpusDecoder>,
}

// ---------------------------------------------------------------------------
// Fallback-Zustand
// ---------------------------------------------------------------------------

/// Zustand der Fallback/Reconnect-Policy fuer einen Anruf
///
/// `versuche` ist monoton nicht-fallend bis zur Erstellung einer neuen
/// CallSession; es wird nie mitten im Anruf zurueckgesetzt.
#[derive(Debug, Clone, Default)]
pub struct FallbackZustand {
    /// Anzahl der Reconnect-Versuche der Policy
    pub versuche: u32,
    /// Die einmalige Fallback-Ansage wurde ausgeloest
    pub fallback_gesendet: bool,
    /// Terminal: KI-Session wird fuer diesen Anruf nie wieder aufgenommen
    pub dauerhaft: bool,
    /// Policy-Durchlaeufe im terminalen Zustand (nur Zaehlung)
    pub durchlaeufe: u64,
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// Eine aktive Telefonat-Session
pub struct CallSession {
    stream_id: StreamId,
    call_control_id: CallControlId,
    /// Read-only nach Session-Start; Saat fuer den KI-System-Prompt
    kontext: AnruferKontext,
    ki: Arc<dyn LiveSession>,
    /// Sende-Queue zum Telefonie-Socket; exklusiv dieser Session.
    /// `None` nachdem die Session geschlossen wurde.
    telefonie_tx: Mutex<Option<mpsc::Sender<String>>>,
    codec: Mutex<CodecZustand>,
    letzte_aktivitaet: Mutex<Instant>,
    fallback: Mutex<FallbackZustand>,
    ausgehender_task: Mutex<Option<JoinHandle<()>>>,
    eingehende_frames: AtomicU64,
    ausgehende_frames: AtomicU64,
}

impl CallSession {
    /// Erstellt eine neue Session fuer einen beginnenden Anruf
    pub fn neu(
        stream_id: StreamId,
        call_control_id: CallControlId,
        kontext: AnruferKontext,
        ki: Arc<dyn LiveSession>,
        telefonie_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            stream_id,
            call_control_id,
            kontext,
            ki,
            telefonie_tx: Mutex::new(Some(telefonie_tx)),
            codec: Mutex::new(CodecZustand::default()),
            letzte_aktivitaet: Mutex::new(Instant::now()),
            fallback: Mutex::new(FallbackZustand::default()),
            ausgehender_task: Mutex::new(None),
            eingehende_frames: AtomicU64::new(0),
            ausgehende_frames: AtomicU64::new(0),
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn call_control_id(&self) -> &CallControlId {
        &self.call_control_id
    }

    pub fn kontext(&self) -> &AnruferKontext {
        &self.kontext
    }

    /// Gibt den KI-Session-Handle zurueck (hoechstens einer pro Session)
    pub fn ki(&self) -> &Arc<dyn LiveSession> {
        &self.ki
    }

    // -----------------------------------------------------------------------
    // Aktivitaet
    // -----------------------------------------------------------------------

    /// Setzt den Aktivitaets-Zeitstempel auf jetzt
    pub fn aktivitaet_aktualisieren(&self) {
        self.aktivitaet_setzen(Instant::now());
    }

    /// Setzt den Aktivitaets-Zeitstempel explizit (Waechter-Tests)
    pub fn aktivitaet_setzen(&self, zeitpunkt: Instant) {
        *self.letzte_aktivitaet.lock() = zeitpunkt;
    }

    /// Dauer seit der letzten Aktivitaet, gemessen an `jetzt`
    pub fn inaktiv_seit(&self, jetzt: Instant) -> Duration {
        jetzt.saturating_duration_since(*self.letzte_aktivitaet.lock())
    }

    // -----------------------------------------------------------------------
    // Codec (lazy)
    // -----------------------------------------------------------------------

    /// Dekodiert einen Opus-Frame; der Decoder wird beim ersten Frame erstellt
    pub fn dekodieren(&self, sample_rate_hz: u32, opus: &[u8]) -> AudioResult<Vec<i16>> {
        let mut codec = self.codec.lock();
        if codec.decoder.is_none() {
            codec.decoder = Some(OpusDecoder::neu(sample_rate_hz)?);
        }
        codec
            .decoder
            .as_mut()
            .expect("Decoder wurde gerade erstellt")
            .decode(opus)
    }

    /// Kodiert einen PCM-Frame; der Encoder wird beim ersten Frame erstellt
    pub fn kodieren(&self, sample_rate_hz: u32, pcm: &[i16]) -> AudioResult<Vec<u8>> {
        let mut codec = self.codec.lock();
        if codec.encoder.is_none() {
            codec.encoder = Some(OpusEncoder::neu(sample_rate_hz)?);
        }
        codec
            .encoder
            .as_mut()
            .expect("Encoder wurde gerade erstellt")
            .encode(pcm)
    }

    /// Frame-Groesse in Samples fuer die Telefonie-Rate
    pub fn frame_groesse(&self, sample_rate_hz: u32) -> usize {
        samples_pro_frame(sample_rate_hz)
    }

    /// Gibt den Codec-Zustand frei (nach Stopp des Forwarders!)
    pub fn codec_freigeben(&self) {
        *self.codec.lock() = CodecZustand::default();
    }

    /// Gibt zurueck ob Encoder oder Decoder initialisiert sind
    pub fn codec_aktiv(&self) -> bool {
        let codec = self.codec.lock();
        codec.encoder.is_some() || codec.decoder.is_some()
    }

    // -----------------------------------------------------------------------
    // Telefonie-Socket
    // -----------------------------------------------------------------------

    /// Sendet ein JSON-Textframe in Richtung Telefonie-Socket
    pub async fn telefonie_senden(&self, json: String) -> vermittler_core::Result<()> {
        let tx = self.telefonie_tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(json)
                .await
                .map_err(|_| VermittlerError::transport("Telefonie-Sende-Queue geschlossen")),
            None => Err(VermittlerError::transport(
                "Telefonie-Socket bereits geschlossen",
            )),
        }
    }

    /// Schliesst die Sende-Queue; der Socket-Writer beendet sich danach
    pub fn telefonie_schliessen(&self) {
        *self.telefonie_tx.lock() = None;
    }

    // -----------------------------------------------------------------------
    // Fallback-Zustand
    // -----------------------------------------------------------------------

    /// Schnappschuss des Fallback-Zustands
    pub fn fallback_zustand(&self) -> FallbackZustand {
        self.fallback.lock().clone()
    }

    /// Aktualisiert den Fallback-Zustand unter dem Session-Lock
    pub fn fallback_aktualisieren<F>(&self, f: F)
    where
        F: FnOnce(&mut FallbackZustand),
    {
        f(&mut self.fallback.lock());
    }

    /// Erhoeht den Versuchszaehler und gibt den neuen Stand zurueck
    pub fn naechster_reconnect_versuch(&self) -> u32 {
        let mut zustand = self.fallback.lock();
        zustand.versuche += 1;
        zustand.versuche
    }

    // -----------------------------------------------------------------------
    // Forwarder-Task
    // -----------------------------------------------------------------------

    /// Hinterlegt den Handle des Outbound-Forwarder-Tasks
    pub fn ausgehenden_task_setzen(&self, task: JoinHandle<()>) {
        *self.ausgehender_task.lock() = Some(task);
    }

    /// Nimmt den Forwarder-Handle heraus (fuer Abbruch beim Teardown)
    pub fn ausgehenden_task_nehmen(&self) -> Option<JoinHandle<()>> {
        self.ausgehender_task.lock().take()
    }

    // -----------------------------------------------------------------------
    // Zaehler
    // -----------------------------------------------------------------------

    pub fn eingehend_zaehlen(&self) {
        self.eingehende_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ausgehend_zaehlen(&self) {
        self.ausgehende_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// (eingehende, ausgehende) Frame-Zaehler
    pub fn zaehler(&self) -> (u64, u64) {
        (
            self.eingehende_frames.load(Ordering::Relaxed),
            self.ausgehende_frames.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("stream_id", &self.stream_id)
            .field("call_control_id", &self.call_control_id)
            .field("ki_laeuft", &self.ki.laeuft())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhilfen::MockSession;

    fn test_session() -> (CallSession, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let session = CallSession::neu(
            StreamId::neu("s-1"),
            CallControlId::neu("cc-1"),
            AnruferKontext::default(),
            Arc::new(MockSession::verbunden()),
            tx,
        );
        (session, rx)
    }

    #[test]
    fn codec_wird_lazy_erstellt() {
        let (session, _rx) = test_session();
        assert!(!session.codec_aktiv());

        let frame = vec![0i16; session.frame_groesse(16_000)];
        session.kodieren(16_000, &frame).unwrap();
        assert!(session.codec_aktiv());

        session.codec_freigeben();
        assert!(!session.codec_aktiv());
    }

    #[test]
    fn dekodieren_nach_kodieren() {
        let (session, _rx) = test_session();
        let frame = vec![0i16; 320];
        let opus = session.kodieren(16_000, &frame).unwrap();
        let pcm = session.dekodieren(16_000, &opus).unwrap();
        assert_eq!(pcm.len(), 320);
    }

    #[test]
    fn inaktivitaet_mit_explizitem_jetzt() {
        let (session, _rx) = test_session();
        let jetzt = Instant::now();
        session.aktivitaet_setzen(jetzt);
        assert_eq!(
            session.inaktiv_seit(jetzt + Duration::from_secs(90)),
            Duration::from_secs(90)
        );
        // Aktivitaet in der "Zukunft" ergibt keine Unterlaeufe
        session.aktivitaet_setzen(jetzt + Duration::from_secs(10));
        assert_eq!(session.inaktiv_seit(jetzt), Duration::ZERO);
    }

    #[test]
    fn fallback_versuche_monoton() {
        let (session, _rx) = test_session();
        assert_eq!(session.naechster_reconnect_versuch(), 1);
        assert_eq!(session.naechster_reconnect_versuch(), 2);
        session.fallback_aktualisieren(|z| z.dauerhaft = true);
        let zustand = session.fallback_zustand();
        assert_eq!(zustand.versuche, 2);
        assert!(zustand.dauerhaft);
    }

    #[tokio::test]
    async fn telefonie_senden_nach_schliessen_ist_fehler() {
        let (session, mut rx) = test_session();
        session.telefonie_senden("{}".into()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "{}");

        session.telefonie_schliessen();
        let result = session.telefonie_senden("{}".into()).await;
        assert!(matches!(result, Err(VermittlerError::Transport(_))));
    }

    #[test]
    fn zaehler_inkrementieren() {
        let (session, _rx) = test_session();
        session.eingehend_zaehlen();
        session.eingehend_zaehlen();
        session.ausgehend_zaehlen();
        assert_eq!(session.zaehler(), (2, 1));
    }
}
