//! KiLiveClient – WebSocket-Implementierung der LiveSession
//!
//! ## Architektur
//!
//! ```text
//! audio_senden/text_senden
//!     |
//!     v
//! Sende-Queue (unbounded, ueberwacht) --> Sende-Task --> WS Sink
//!
//! WS Stream --> Empfangs-Task --> Audio-Queue      --> audio_holen
//!                             +-> Transkript-Queue --> transkript_holen
//! ```
//!
//! Beide Tasks gehoeren exklusiv dieser Session und werden bei `trennen`
//! abgebrochen und abgewartet. Stream-Fehler und unerwartete Closes setzen
//! die Session auf `nicht laufend` und hinterlegen den Fehlergrund – ob
//! neu verbunden wird, entscheidet die Fallback-Policy im Relay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use vermittler_core::AnruferKontext;
use vermittler_protocol::ki::{
    b64_zu_pcm, pcm_zu_b64, KiAudioFormat, KiClientEvent, KiServerEvent, SessionKonfiguration,
    Transkript, TranskriptRolle, TranskriptionsFlags,
};

use crate::config::KiConfig;
use crate::error::{KiError, KiResult};
use crate::session::LiveSession;

type WsVerbindung = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsVerbindung, Message>;
type WsStream = SplitStream<WsVerbindung>;

/// Ab dieser Queue-Tiefe wird vor Rueckstau gewarnt
const QUEUE_WARNSCHWELLE: usize = 512;

/// KI-Live-Session-Client ueber WebSocket
pub struct KiLiveClient {
    config: KiConfig,
    kontext: AnruferKontext,
    inner: Arc<Inner>,
}

struct Inner {
    laeuft: AtomicBool,
    /// Genau ein interner Reconnect-Versuch pro Trennung (Flag wird bei
    /// erfolgreichem Connect zurueckgesetzt)
    reconnect_versucht: AtomicBool,
    letzter_fehler: Mutex<Option<String>>,
    sende_tx: Mutex<Option<mpsc::UnboundedSender<KiClientEvent>>>,
    sende_tiefe: AtomicUsize,
    audio_queue: Mutex<VecDeque<Vec<i16>>>,
    transkript_queue: Mutex<VecDeque<Transkript>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KiLiveClient {
    /// Erstellt einen (noch unverbundenen) Client fuer einen Anruf
    pub fn neu(config: KiConfig, kontext: AnruferKontext) -> Self {
        Self {
            config,
            kontext,
            inner: Arc::new(Inner {
                laeuft: AtomicBool::new(false),
                reconnect_versucht: AtomicBool::new(false),
                letzter_fehler: Mutex::new(None),
                sende_tx: Mutex::new(None),
                sende_tiefe: AtomicUsize::new(0),
                audio_queue: Mutex::new(VecDeque::new()),
                transkript_queue: Mutex::new(VecDeque::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Baut das Session-Konfigurations-Event fuer diesen Anruf
    fn session_konfiguration(&self) -> KiClientEvent {
        KiClientEvent::SessionUpdate {
            session: SessionKonfiguration {
                model: self.config.model.clone(),
                voice: self.config.stimme.clone(),
                instructions: self.config.prompt_bauen(&self.kontext),
                input_audio_format: KiAudioFormat::pcm16(self.config.eingangs_rate_hz),
                output_audio_format: KiAudioFormat::pcm16(self.config.ausgangs_rate_hz),
                transcription: TranskriptionsFlags {
                    input: true,
                    output: true,
                },
            },
        }
    }

    /// Fuehrt Connect + Handshake aus und liefert Sink, Rest-Stream und
    /// den Begruessungstext aus `session.created`
    async fn handshake(&self) -> KiResult<(WsSink, WsStream, String)> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| KiError::Verbindung(format!("ungueltiger Endpunkt: {e}")))?;

        if !self.config.api_key.is_empty() {
            let wert = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| KiError::Verbindung(format!("ungueltiger API-Schluessel: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, wert);
        }

        let timeout = self.config.verbindungs_timeout();
        let (ws, _antwort) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| {
                KiError::Verbindung(format!("Connect-Timeout nach {}s", timeout.as_secs()))
            })?
            .map_err(|e| KiError::Verbindung(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();

        // Initiale Konfiguration: Stimme, System-Prompt, Transkription beider Seiten
        let konfiguration = serde_json::to_string(&self.session_konfiguration())
            .map_err(|e| KiError::Verbindung(format!("Konfiguration nicht serialisierbar: {e}")))?;
        sink.send(Message::text(konfiguration))
            .await
            .map_err(|e| KiError::Verbindung(format!("session.update fehlgeschlagen: {e}")))?;

        // Auf session.created warten; andere Events vor dem Ack werden uebersprungen
        let willkommen = tokio::time::timeout(timeout, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match KiServerEvent::parsen(text.as_str()) {
                        Ok(KiServerEvent::SessionErstellt {
                            session_id,
                            welcome,
                        }) => {
                            debug!(session_id = %session_id, "KI-Session erstellt");
                            return Ok(welcome.unwrap_or_default());
                        }
                        Ok(KiServerEvent::Fehler { error }) => {
                            return Err(KiError::Session {
                                code: error.code.unwrap_or_else(|| "unbekannt".into()),
                                nachricht: error.message,
                            });
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            trace!(fehler = %e, "Unparsbares Frame im Handshake uebersprungen");
                            continue;
                        }
                    },
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(KiError::Verbindung(e.to_string())),
                    None => {
                        return Err(KiError::Verbindung(
                            "Verbindung waehrend Handshake geschlossen".into(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| KiError::Verbindung("Handshake-Timeout".into()))??;

        Ok((sink, stream, willkommen))
    }

    /// Stellt sicher dass die Session laeuft; bei getrennter Session genau
    /// ein interner Reconnect-Versuch. Gibt zurueck ob gesendet werden darf.
    async fn sicherstellen_verbunden(&self, zweck: &str) -> bool {
        if self.inner.laeuft.load(Ordering::SeqCst) {
            return true;
        }
        if self.inner.reconnect_versucht.swap(true, Ordering::SeqCst) {
            trace!(zweck, "KI-Session getrennt – Daten verworfen");
            return false;
        }
        info!(zweck, "KI-Session getrennt – einmaliger Reconnect-Versuch");
        match self.verbinden().await {
            Ok(_) => true,
            Err(e) => {
                warn!(fehler = %e, "Interner Reconnect fehlgeschlagen");
                false
            }
        }
    }

    /// Reiht ein Event in die Sende-Queue ein (nicht-blockierend)
    fn einreihen(&self, event: KiClientEvent, zweck: &str) {
        let guard = self.inner.sende_tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(event).is_ok() {
                    let tiefe = self.inner.sende_tiefe.fetch_add(1, Ordering::Relaxed) + 1;
                    if tiefe > QUEUE_WARNSCHWELLE {
                        warn!(tiefe, zweck, "Sende-Queue laeuft voll");
                    }
                } else {
                    debug!(zweck, "Sende-Task beendet – Event verworfen");
                }
            }
            None => debug!(zweck, "Keine Sende-Queue – Event verworfen"),
        }
    }

    /// Bricht alte Tasks ab und wartet auf deren Ende
    async fn tasks_beenden(&self) {
        let alte: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in alte {
            task.abort();
            let _ = task.await;
        }
    }
}

#[async_trait]
impl LiveSession for KiLiveClient {
    async fn verbinden(&self) -> KiResult<String> {
        if self.inner.laeuft.load(Ordering::SeqCst) {
            return Err(KiError::Verbindung("Session laeuft bereits".into()));
        }

        // Reste einer frueheren Verbindung aufraeumen
        self.tasks_beenden().await;
        *self.inner.sende_tx.lock() = None;

        let (mut sink, mut stream, willkommen) = self.handshake().await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<KiClientEvent>();
        *self.inner.sende_tx.lock() = Some(tx);
        self.inner.sende_tiefe.store(0, Ordering::Relaxed);
        *self.inner.letzter_fehler.lock() = None;
        self.inner.laeuft.store(true, Ordering::SeqCst);
        self.inner.reconnect_versucht.store(false, Ordering::SeqCst);

        // Sende-Task: Queue -> WS Sink
        let sende_inner = Arc::clone(&self.inner);
        let sende_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sende_inner.sende_tiefe.fetch_sub(1, Ordering::Relaxed);
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(fehler = %e, "Event nicht serialisierbar – verworfen");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(json)).await {
                    sende_inner.fehler_setzen(format!("Senden fehlgeschlagen: {e}"));
                    break;
                }
            }
            debug!("KI-Sende-Task beendet");
        });

        // Empfangs-Task: WS Stream -> Ausgabe-Queues
        let empfangs_inner = Arc::clone(&self.inner);
        let empfangs_task = tokio::spawn(async move {
            // Antwort-Transkripte kommen als Deltas und werden bis zum
            // Abschluss der Antwort gesammelt
            let mut antwort_puffer = String::new();

            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let event = match KiServerEvent::parsen(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                trace!(fehler = %e, "Unparsbares KI-Frame verworfen");
                                continue;
                            }
                        };
                        if empfangs_inner.event_verarbeiten(event, &mut antwort_puffer) {
                            return; // Session-Ende oder Fehler-Envelope
                        }
                    }
                    Ok(Message::Close(grund)) => {
                        empfangs_inner
                            .fehler_setzen(format!("KI-Session geschlossen: {:?}", grund));
                        return;
                    }
                    Ok(_) => {
                        // Ping/Pong/Binary: fuer dieses Protokoll ohne Bedeutung
                        trace!("Nicht-Text-Frame ignoriert");
                    }
                    Err(e) => {
                        empfangs_inner.fehler_setzen(format!("Streaming-Fehler: {e}"));
                        return;
                    }
                }
            }
            empfangs_inner.fehler_setzen("KI-Stream unerwartet beendet".into());
        });

        *self.inner.tasks.lock() = vec![sende_task, empfangs_task];

        info!("KI-Live-Session verbunden");
        Ok(willkommen)
    }

    async fn audio_senden(&self, pcm: &[i16]) {
        if !self.sicherstellen_verbunden("audio").await {
            return;
        }
        self.einreihen(
            KiClientEvent::AudioAnhaengen {
                audio: pcm_zu_b64(pcm),
            },
            "audio",
        );
    }

    async fn text_senden(&self, text: &str) {
        if !self.sicherstellen_verbunden("text").await {
            return;
        }
        self.einreihen(
            KiClientEvent::TextNachricht {
                text: text.to_string(),
            },
            "text",
        );
        self.einreihen(KiClientEvent::AntwortAnfordern, "text");
    }

    fn audio_holen(&self) -> Option<Vec<i16>> {
        self.inner.audio_queue.lock().pop_front()
    }

    fn transkript_holen(&self) -> Option<Transkript> {
        self.inner.transkript_queue.lock().pop_front()
    }

    async fn trennen(&self) {
        // Idempotent: ein zweiter Aufruf findet keine Tasks und keinen Sender mehr
        self.inner.laeuft.store(false, Ordering::SeqCst);
        *self.inner.sende_tx.lock() = None;
        self.tasks_beenden().await;
        debug!("KI-Live-Session getrennt");
    }

    fn laeuft(&self) -> bool {
        self.inner.laeuft.load(Ordering::SeqCst)
    }

    fn letzter_fehler(&self) -> Option<String> {
        self.inner.letzter_fehler.lock().clone()
    }
}

impl Inner {
    /// Markiert die Session als nicht laufend und hinterlegt den Grund
    fn fehler_setzen(&self, grund: String) {
        warn!(grund = %grund, "KI-Session nicht mehr laufend");
        *self.letzter_fehler.lock() = Some(grund);
        self.laeuft.store(false, Ordering::SeqCst);
    }

    /// Verarbeitet ein Server-Event; gibt true zurueck wenn der
    /// Empfangs-Task enden soll
    fn event_verarbeiten(&self, event: KiServerEvent, antwort_puffer: &mut String) -> bool {
        match event {
            KiServerEvent::AudioDelta { delta } => match b64_zu_pcm(&delta) {
                Ok(pcm) => {
                    let mut queue = self.audio_queue.lock();
                    queue.push_back(pcm);
                    if queue.len() > QUEUE_WARNSCHWELLE {
                        warn!(tiefe = queue.len(), "Audio-Ausgabe-Queue laeuft voll");
                    }
                }
                Err(e) => debug!(fehler = %e, "Audio-Delta nicht dekodierbar – verworfen"),
            },
            KiServerEvent::AntwortTranskript { delta } => {
                antwort_puffer.push_str(&delta);
            }
            KiServerEvent::AntwortFertig => {
                if !antwort_puffer.is_empty() {
                    let text = std::mem::take(antwort_puffer);
                    self.transkript_queue
                        .lock()
                        .push_back(Transkript::jetzt(TranskriptRolle::Assistent, text));
                }
            }
            KiServerEvent::AnruferTranskript { transcript } => {
                self.transkript_queue
                    .lock()
                    .push_back(Transkript::jetzt(TranskriptRolle::Anrufer, transcript));
            }
            KiServerEvent::SessionBeendet { reason } => {
                self.fehler_setzen(format!(
                    "Session serverseitig beendet: {}",
                    reason.unwrap_or_else(|| "ohne Grund".into())
                ));
                return true;
            }
            KiServerEvent::Fehler { error } => {
                self.fehler_setzen(format!(
                    "KI-Fehler {}: {}",
                    error.code.unwrap_or_else(|| "unbekannt".into()),
                    error.message
                ));
                return true;
            }
            KiServerEvent::SessionErstellt { session_id, .. } => {
                // Nach dem Handshake nicht mehr erwartet
                debug!(session_id = %session_id, "Verspaetetes session.created ignoriert");
            }
            KiServerEvent::Unbekannt => {
                trace!("Unbekanntes KI-Event ignoriert");
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> KiLiveClient {
        let config = KiConfig {
            // Niemand lauscht hier – Connects schlagen sofort fehl
            url: "ws://127.0.0.1:9".into(),
            verbindungs_timeout_sek: 1,
            ..KiConfig::default()
        };
        KiLiveClient::neu(config, AnruferKontext::default())
    }

    #[tokio::test]
    async fn unverbunden_laeuft_nicht() {
        let client = test_client();
        assert!(!client.laeuft());
        assert!(client.audio_holen().is_none());
        assert!(client.transkript_holen().is_none());
    }

    #[tokio::test]
    async fn verbinden_gegen_toten_endpunkt_schlaegt_fehl() {
        let client = test_client();
        let result = client.verbinden().await;
        assert!(matches!(result, Err(KiError::Verbindung(_))));
        assert!(!client.laeuft());
    }

    #[tokio::test]
    async fn audio_senden_getrennt_ist_stiller_noop() {
        let client = test_client();
        // Erster Aufruf: ein interner Reconnect-Versuch (schlaegt fehl)
        client.audio_senden(&[0i16; 320]).await;
        // Zweiter Aufruf: kein weiterer Versuch, Frame wird nur verworfen
        client.audio_senden(&[0i16; 320]).await;
        assert!(!client.laeuft());
    }

    #[tokio::test]
    async fn trennen_ist_idempotent() {
        let client = test_client();
        client.trennen().await;
        client.trennen().await;
        assert!(!client.laeuft());
    }

    #[test]
    fn fehler_setzen_haelt_grund_fest() {
        let client = test_client();
        client.inner.fehler_setzen("Testgrund".into());
        assert_eq!(client.letzter_fehler().as_deref(), Some("Testgrund"));
        assert!(!client.laeuft());
    }

    #[test]
    fn audio_delta_landet_in_queue() {
        let client = test_client();
        let mut puffer = String::new();
        let pcm: Vec<i16> = vec![1, 2, 3, 4];
        let event = KiServerEvent::AudioDelta {
            delta: pcm_zu_b64(&pcm),
        };
        let ende = client.inner.event_verarbeiten(event, &mut puffer);
        assert!(!ende);
        assert_eq!(client.audio_holen(), Some(pcm));
        assert!(client.audio_holen().is_none());
    }

    #[test]
    fn transkript_deltas_werden_gesammelt() {
        let client = test_client();
        let mut puffer = String::new();
        client.inner.event_verarbeiten(
            KiServerEvent::AntwortTranskript {
                delta: "Guten ".into(),
            },
            &mut puffer,
        );
        client.inner.event_verarbeiten(
            KiServerEvent::AntwortTranskript {
                delta: "Tag!".into(),
            },
            &mut puffer,
        );
        // Erst der Abschluss der Antwort macht daraus einen Eintrag
        assert!(client.transkript_holen().is_none());
        client
            .inner
            .event_verarbeiten(KiServerEvent::AntwortFertig, &mut puffer);

        let eintrag = client.transkript_holen().unwrap();
        assert_eq!(eintrag.rolle, TranskriptRolle::Assistent);
        assert_eq!(eintrag.text, "Guten Tag!");
    }

    #[test]
    fn fehler_envelope_beendet_session() {
        let client = test_client();
        client.inner.laeuft.store(true, Ordering::SeqCst);
        let mut puffer = String::new();
        let ende = client.inner.event_verarbeiten(
            KiServerEvent::Fehler {
                error: vermittler_protocol::ki::KiFehlerDetail {
                    code: Some("overloaded".into()),
                    message: "zu viel los".into(),
                },
            },
            &mut puffer,
        );
        assert!(ende);
        assert!(!client.laeuft());
        assert!(client.letzter_fehler().unwrap().contains("overloaded"));
    }
}
