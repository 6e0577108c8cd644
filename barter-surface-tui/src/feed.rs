/// Tick feeds for the workspace
///
/// - `WebSocketFeed`: trades from the aggregated market data server, with automatic
///   reconnection and heartbeat
/// - `DemoFeed`: synthetic random-walk ticks for running without a server
use crate::types::MarketEventMessage;
use barter_surface::RawTick;
use futures::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// WebSocket feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket server URL
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Outcome of handling one text frame from the server.
#[derive(Debug, PartialEq)]
enum Frame {
    Tick(RawTick),
    Skipped,
    Malformed,
}

fn parse_frame(text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Frame::Malformed;
    };
    if value.get("type").and_then(|v| v.as_str()) == Some("welcome") {
        return Frame::Skipped;
    }
    match serde_json::from_value::<MarketEventMessage>(value) {
        Ok(event) => event.to_raw_tick().map_or(Frame::Skipped, Frame::Tick),
        Err(_) => Frame::Malformed,
    }
}

pub struct WebSocketFeed {
    config: FeedConfig,
}

impl WebSocketFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Spawn the connection loop, forwarding trade ticks into `ticks`.
    pub fn start(self, ticks: mpsc::Sender<RawTick>) -> mpsc::Receiver<ConnectionStatus> {
        let (status_tx, status_rx) = mpsc::channel(10);
        tokio::spawn(run_websocket_loop(self.config, ticks, status_tx));
        status_rx
    }
}

/// Main WebSocket connection loop with auto-reconnect
async fn run_websocket_loop(
    config: FeedConfig,
    ticks: mpsc::Sender<RawTick>,
    status_tx: mpsc::Sender<ConnectionStatus>,
) {
    info!(url = %config.url, "starting websocket feed");

    loop {
        let _ = status_tx.send(ConnectionStatus::Reconnecting).await;

        match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, "connected to market data server");
                let _ = status_tx.send(ConnectionStatus::Connected).await;

                let (mut write, mut read) = ws_stream.split();

                let ping_interval = config.ping_interval;
                let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(ping_interval);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if write.send(Message::Ping(vec![].into())).await.is_err() {
                                    debug!("failed to send ping, connection likely dead");
                                    break;
                                }
                            }
                            _ = ping_shutdown_rx.recv() => break,
                        }
                    }
                });

                let mut malformed = 0_u64;
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match parse_frame(&text) {
                            Frame::Tick(tick) => {
                                if ticks.send(tick).await.is_err() {
                                    warn!("aggregation domain gone, stopping feed");
                                    let _ = ping_shutdown_tx.send(()).await;
                                    return;
                                }
                            }
                            Frame::Skipped => {}
                            Frame::Malformed => {
                                malformed += 1;
                                debug!(malformed, raw = %text.as_str(), "unparseable server message");
                            }
                        },
                        Ok(Message::Close(_)) => {
                            info!("server closed connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "websocket error");
                            break;
                        }
                    }
                }

                let _ = ping_shutdown_tx.send(()).await;
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;
                warn!("connection closed, will reconnect");
            }
            Err(e) => {
                error!(url = %config.url, error = %e, "failed to connect");
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;
            }
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Synthetic random-walk ticks for a fixed set of symbols.
pub struct DemoFeed {
    symbols: Vec<String>,
    interval: Duration,
    seed: u64,
}

impl DemoFeed {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            interval: Duration::from_millis(20),
            seed: 0x5eed,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn start(self, ticks: mpsc::Sender<RawTick>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(ticks))
    }

    async fn run(self, ticks: mpsc::Sender<RawTick>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut prices: Vec<f64> = self.symbols.iter().map(|s| demo_base_price(s)).collect();
        let mut interval = tokio::time::interval(self.interval);
        info!(symbols = ?self.symbols, "demo feed running");

        loop {
            interval.tick().await;
            let now = chrono::Utc::now().timestamp_millis();

            for (symbol, price) in self.symbols.iter().zip(prices.iter_mut()) {
                if !rng.random_bool(0.6) {
                    continue;
                }
                // ~3bp steps with occasional bursts
                let burst = if rng.random_bool(0.02) { 8.0 } else { 1.0 };
                *price *= 1.0 + rng.random_range(-0.0003..0.0003) * burst;
                let volume = rng.random_range(0.01..2.0) * burst;

                if ticks.send(RawTick::new(symbol.as_str(), *price, volume, now)).await.is_err() {
                    debug!("demo feed receiver dropped");
                    return;
                }
            }
        }
    }
}

fn demo_base_price(symbol: &str) -> f64 {
    match symbol.to_ascii_uppercase().as_str() {
        "BTC" => 97_000.0,
        "ETH" => 3_400.0,
        "SOL" => 190.0,
        "ES" => 6_000.0,
        "NQ" => 21_000.0,
        _ => 100.0,
    }
}
