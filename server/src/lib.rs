//! vermittler-server – Bibliotheks-Root
//!
//! Verdrahtet die Relay-Engine mit dem Telefonie-WebSocket-Listener und
//! stellt den oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use vermittler_ki::KiConfig;
use vermittler_protocol::telephony::TelephonieEvent;
use vermittler_relay::control::TelephonieControl;
use vermittler_relay::{
    FallbackConfig, FallbackPolicy, ForwarderConfig, InaktivitaetsWaechter, KiSessionFabrik,
    MediaPumpe, SessionRegistry, StatischerKontextProvider, VerbindungsKontext,
};

use config::VermittlerConfig;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: VermittlerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: VermittlerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Registry, Fallback-Policy und Media-Pumpe verdrahten
    /// 2. Inaktivitaets-Waechter starten
    /// 3. Telefonie-WebSocket-Listener starten
    /// 4. Auf Ctrl-C warten, dann alle Verbindungen schliessen
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            ws = %self.config.ws_bind_adresse(),
            ki_endpunkt = %self.config.ki.url,
            "Server startet"
        );

        let registry = SessionRegistry::neu();

        let control = Arc::new(TelephonieControl::neu(
            self.config.telefonie.control_url.clone(),
            self.config.telefonie.api_key.clone(),
            self.config.telefonie.stimme.clone(),
            self.config.telefonie.sprache.clone(),
        ));
        let policy = Arc::new(FallbackPolicy::neu(
            control,
            FallbackConfig {
                max_versuche: self.config.relay.max_reconnect_versuche,
                backoff_basis: std::time::Duration::from_millis(self.config.relay.backoff_basis_ms),
                fallback_text: self.config.relay.fallback_text.clone(),
            },
        ));

        // KI-Session: Eingangsrate ist die Telefonie-Rate des Providers
        let ki_config = KiConfig {
            eingangs_rate_hz: self.config.telefonie.sample_rate_hz,
            ..self.config.ki.clone()
        };
        let pumpe = Arc::new(MediaPumpe::neu(
            registry.clone(),
            Arc::new(StatischerKontextProvider::default()),
            Arc::new(KiSessionFabrik::neu(ki_config)),
            policy,
            ForwarderConfig {
                telefonie_rate_hz: self.config.telefonie.sample_rate_hz,
                ki_rate_hz: self.config.ki.ausgangs_rate_hz,
                poll_intervall: self.config.poll_intervall(),
            },
        ));

        let waechter = InaktivitaetsWaechter::neu(
            registry.clone(),
            self.config.pruef_intervall(),
            self.config.inaktivitaets_timeout(),
        );
        let waechter_task = waechter.starten();

        // Shutdown-Signal an alle Verbindungs-Tasks verteilen
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown-Signal empfangen");
                let _ = shutdown_tx.send(true);
            }
        });

        self.accept_loop(registry, pumpe, shutdown_rx).await?;

        waechter_task.abort();
        tracing::info!("Server beendet");
        Ok(())
    }

    /// Akzeptiert Telefonie-WebSocket-Verbindungen bis zum Shutdown
    async fn accept_loop(
        &self,
        registry: SessionRegistry,
        pumpe: Arc<MediaPumpe>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.config.ws_bind_adresse()).await?;
        tracing::info!(adresse = %self.config.ws_bind_adresse(), "Telefonie-Listener gestartet");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Anruf-Limit pruefen
                            if registry.anzahl() >= self.config.server.max_anrufe as usize {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.config.server.max_anrufe,
                                    "Anruf-Limit erreicht – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }
                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let pumpe = Arc::clone(&pumpe);
                            let shutdown_rx = shutdown_rx.clone();
                            tokio::spawn(async move {
                                verbindung_verarbeiten(stream, pumpe, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(fehler = %e, "accept fehlgeschlagen");
                        }
                    }
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Listener wird beendet");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Verarbeitet eine Telefonie-WebSocket-Verbindung bis zu ihrem Ende
///
/// Pro Verbindung: ein Writer-Task der die Sende-Queue der Session in den
/// Socket draint, und diese Lese-Schleife die Events an die Media-Pumpe
/// reicht. Der Abbau laeuft immer ueber die Pumpe (Forwarder stoppt vor
/// dem Socket-Close).
async fn verbindung_verarbeiten(
    stream: TcpStream,
    pumpe: Arc<MediaPumpe>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let verbindungs_id = uuid::Uuid::new_v4();
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(verbindung = %verbindungs_id, fehler = %e, "WebSocket-Handshake fehlgeschlagen");
            return;
        }
    };
    let (mut sink, mut ws_stream) = ws.split();

    // Writer-Task: Sende-Queue -> Socket
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if sink.send(Message::text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut verbindung = VerbindungsKontext::neu(tx);

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<TelephonieEvent>(text.as_str()) {
                            Ok(event) => {
                                pumpe.ereignis_verarbeiten(event, &mut verbindung).await;
                            }
                            Err(e) => {
                                tracing::warn!(fehler = %e, "Unparsbares Telefonie-Frame verworfen");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(verbindung = %verbindungs_id, "Telefonie-Verbindung geschlossen");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary: der Provider sendet nur Textframes
                    }
                    Some(Err(e)) => {
                        tracing::warn!(fehler = %e, "Transportfehler auf Telefonie-Socket");
                        break;
                    }
                }
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Shutdown – Telefonie-Verbindung wird getrennt");
                    break;
                }
            }
        }
    }

    // Transport-Teardown: Session abbauen, danach den Writer schliessen
    pumpe.verbindung_beendet(&mut verbindung).await;
    writer.abort();
    let _ = writer.await;
    tracing::debug!(verbindung = %verbindungs_id, "Verbindungs-Task beendet");
}
