//! End-to-End-Szenarien der Relay-Engine mit geskripteter KI-Session
//!
//! Deckt den vollen Lebenszyklus eines Anrufs ab: start -> media ->
//! KI-Antwort -> ausgehendes media-Event -> stop, sowie die Invarianten
//! fuer doppelte start-Events und die Frame-Weiterleitung in Reihenfolge.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use vermittler_audio::OpusEncoder;
use vermittler_core::{AnruferKontext, StreamId};
use vermittler_ki::LiveSession;
use vermittler_protocol::telephony::{MediaPayload, StartPayload, StopPayload, TelephonieEvent};
use vermittler_relay::testhilfen::{MockSession, MockSprachAktion};
use vermittler_relay::{
    FallbackConfig, FallbackPolicy, ForwarderConfig, MediaPumpe, SessionFabrik, SessionRegistry,
    StatischerKontextProvider, VerbindungsKontext,
};

// ---------------------------------------------------------------------------
// Testaufbau
// ---------------------------------------------------------------------------

/// Fabrik die geskriptete Sessions ausgibt und Handles darauf behaelt
#[derive(Default)]
struct MockFabrik {
    erstellte: Mutex<Vec<Arc<MockSession>>>,
}

impl SessionFabrik for MockFabrik {
    fn erstellen(&self, _kontext: AnruferKontext) -> Arc<dyn LiveSession> {
        let mock = Arc::new(MockSession::getrennt());
        self.erstellte.lock().push(Arc::clone(&mock));
        mock
    }
}

struct Aufbau {
    registry: SessionRegistry,
    pumpe: MediaPumpe,
    fabrik: Arc<MockFabrik>,
    verbindung: VerbindungsKontext,
    telefonie_rx: mpsc::Receiver<String>,
}

fn aufbau() -> Aufbau {
    let registry = SessionRegistry::neu();
    let fabrik = Arc::new(MockFabrik::default());
    let policy = Arc::new(FallbackPolicy::neu(
        Arc::new(MockSprachAktion::default()),
        FallbackConfig {
            backoff_basis: Duration::from_millis(1),
            ..FallbackConfig::default()
        },
    ));
    let pumpe = MediaPumpe::neu(
        registry.clone(),
        Arc::new(StatischerKontextProvider::default()),
        Arc::clone(&fabrik) as Arc<dyn SessionFabrik>,
        policy,
        ForwarderConfig {
            telefonie_rate_hz: 16_000,
            ki_rate_hz: 24_000,
            poll_intervall: Duration::from_millis(5),
        },
    );
    let (tx, rx) = mpsc::channel(64);
    Aufbau {
        registry,
        pumpe,
        fabrik,
        verbindung: VerbindungsKontext::neu(tx),
        telefonie_rx: rx,
    }
}

fn start_event(stream_id: &str, call_control_id: &str) -> TelephonieEvent {
    TelephonieEvent::Start {
        stream_id: stream_id.into(),
        start: StartPayload {
            call_control_id: call_control_id.into(),
            from: Some("+4915112345678".into()),
            to: Some("+4930987654".into()),
            media_format: None,
        },
    }
}

fn stop_event(stream_id: &str) -> TelephonieEvent {
    TelephonieEvent::Stop {
        stream_id: stream_id.into(),
        stop: StopPayload {
            reason: Some("hangup".into()),
        },
    }
}

/// Ein gueltiger 20-ms-Opus-Frame (16 kHz, mono) als base64
fn gueltiger_opus_frame_b64(encoder: &mut OpusEncoder) -> String {
    let pcm: Vec<i16> = (0..encoder.frame_size())
        .map(|i| ((i as f32 * 0.1).sin() * 6000.0) as i16)
        .collect();
    B64.encode(encoder.encode(&pcm).unwrap())
}

fn media_event(stream_id: &str, payload_b64: String) -> TelephonieEvent {
    TelephonieEvent::Media {
        stream_id: stream_id.into(),
        media: MediaPayload {
            payload: payload_b64,
            media_format: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Szenarien
// ---------------------------------------------------------------------------

#[tokio::test]
async fn voller_anruf_lebenszyklus() {
    let mut t = aufbau();
    let mut encoder = OpusEncoder::neu(16_000).unwrap();

    // start: Session entsteht, KI wird verbunden
    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc1"), &mut t.verbindung)
        .await;
    assert!(t.registry.enthaelt(&StreamId::neu("abc")));
    let mock = Arc::clone(&t.fabrik.erstellte.lock()[0]);
    assert!(mock.laeuft(), "KI-Session muss nach start laufen");

    // media: ein gueltiger Opus-Frame erreicht die KI als PCM
    t.pumpe
        .ereignis_verarbeiten(
            media_event("abc", gueltiger_opus_frame_b64(&mut encoder)),
            &mut t.verbindung,
        )
        .await;
    {
        let audio = mock.gesendetes_audio.lock();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].len(), 320, "20ms bei 16kHz");
    }

    // Die KI antwortet mit einem PCM-Stueck (20ms bei 24kHz)
    mock.audio_einreihen(vec![2000i16; 480]);

    // Der Forwarder muss genau ein ausgehendes media-Event erzeugen
    let json = tokio::time::timeout(Duration::from_secs(2), t.telefonie_rx.recv())
        .await
        .expect("Forwarder muss innerhalb der Frist senden")
        .expect("Queue offen");
    let event: TelephonieEvent = serde_json::from_str(&json).unwrap();
    match event {
        TelephonieEvent::Media { stream_id, media } => {
            assert_eq!(stream_id, "abc");
            assert!(!media.payload.is_empty());
            assert_eq!(media.media_format.unwrap().sample_rate, 16_000);
        }
        _ => panic!("media-Event erwartet"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        t.telefonie_rx.try_recv().is_err(),
        "genau ein ausgehendes Event fuer ein PCM-Stueck"
    );

    // stop: Registry leer, KI-Session getrennt
    t.pumpe
        .ereignis_verarbeiten(stop_event("abc"), &mut t.verbindung)
        .await;
    assert!(!t.registry.enthaelt(&StreamId::neu("abc")));
    assert_eq!(t.registry.anzahl(), 0);
    assert!(!mock.laeuft(), "isRunning muss nach stop false sein");
}

#[tokio::test]
async fn n_frames_ergeben_n_sendaudio_aufrufe_in_reihenfolge() {
    let mut t = aufbau();
    let mut encoder = OpusEncoder::neu(16_000).unwrap();

    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc1"), &mut t.verbindung)
        .await;
    let mock = Arc::clone(&t.fabrik.erstellte.lock()[0]);

    const N: usize = 10;
    for _ in 0..N {
        t.pumpe
            .ereignis_verarbeiten(
                media_event("abc", gueltiger_opus_frame_b64(&mut encoder)),
                &mut t.verbindung,
            )
            .await;
    }

    let audio = mock.gesendetes_audio.lock();
    assert_eq!(audio.len(), N, "genau N sendAudio-Aufrufe");
    // Aufzeichnung ist in Aufruf-Reihenfolge; jeder Frame ist vollstaendig
    assert!(audio.iter().all(|pcm| pcm.len() == 320));
}

#[tokio::test]
async fn frames_fuer_fremde_stream_id_werden_verworfen() {
    let mut t = aufbau();
    let mut encoder = OpusEncoder::neu(16_000).unwrap();

    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc1"), &mut t.verbindung)
        .await;
    let mock = Arc::clone(&t.fabrik.erstellte.lock()[0]);

    // Frame mit fremder StreamId: Invariante verletzt, aber nicht fatal
    t.pumpe
        .ereignis_verarbeiten(
            media_event("xyz", gueltiger_opus_frame_b64(&mut encoder)),
            &mut t.verbindung,
        )
        .await;

    assert!(mock.gesendetes_audio.lock().is_empty());
    assert!(t.registry.enthaelt(&StreamId::neu("abc")), "Anruf lebt weiter");
}

#[tokio::test]
async fn mini_frames_sind_rauschen() {
    let mut t = aufbau();

    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc1"), &mut t.verbindung)
        .await;
    let mock = Arc::clone(&t.fabrik.erstellte.lock()[0]);

    // 4 Bytes Payload: unterhalb der Mindestgroesse, leise verwerfen
    t.pumpe
        .ereignis_verarbeiten(
            media_event("abc", B64.encode([0u8; 4])),
            &mut t.verbindung,
        )
        .await;

    assert!(mock.gesendetes_audio.lock().is_empty());
    assert!(t.registry.enthaelt(&StreamId::neu("abc")));
}

#[tokio::test]
async fn doppeltes_start_laesst_genau_eine_session_leben() {
    let mut t = aufbau();

    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc1"), &mut t.verbindung)
        .await;
    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc2"), &mut t.verbindung)
        .await;

    assert_eq!(t.registry.anzahl(), 1);
    let erstellte = t.fabrik.erstellte.lock();
    assert_eq!(erstellte.len(), 2);
    // Alte Session vollstaendig abgebaut, neue laeuft
    assert!(!erstellte[0].laeuft());
    assert_eq!(
        erstellte[0]
            .trennungen
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(erstellte[1].laeuft());

    let session = t.registry.holen(&StreamId::neu("abc")).unwrap();
    assert_eq!(session.call_control_id().als_str(), "cc2");
}

#[tokio::test]
async fn verbindungsende_baut_session_ab() {
    let mut t = aufbau();

    t.pumpe
        .ereignis_verarbeiten(start_event("abc", "cc1"), &mut t.verbindung)
        .await;
    assert_eq!(t.registry.anzahl(), 1);

    // Telefonie-Socket bricht weg: Transport-Fehler -> Teardown
    t.pumpe.verbindung_beendet(&mut t.verbindung).await;
    assert_eq!(t.registry.anzahl(), 0);

    // Ein zweites Verbindungsende ist ein No-op
    t.pumpe.verbindung_beendet(&mut t.verbindung).await;
    assert_eq!(t.registry.anzahl(), 0);
}
