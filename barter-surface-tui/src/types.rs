/// Wire types of the aggregated market data server
///
/// Only the trade events are consumed by the workspace; every other kind is
/// skipped before it reaches the aggregation domain.
use barter_surface::RawTick;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market event message envelope from the server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketEventMessage {
    /// Timestamp when the event occurred on the exchange
    pub time_exchange: DateTime<Utc>,
    /// Timestamp when the event was received by the server
    pub time_received: DateTime<Utc>,
    /// Exchange name (e.g., "Okx", "BinanceFuturesUsd")
    pub exchange: String,
    pub instrument: InstrumentInfo,
    /// Event type: "trade", "liquidation", "open_interest", ...
    pub kind: String,
    /// Event-specific data, shape depends on `kind`
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentInfo {
    /// Base currency (e.g., "btc", "eth")
    pub base: String,
    pub quote: String,
    /// Contract kind (e.g., "perpetual", "spot")
    pub kind: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Trade event data
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeData {
    pub id: String,
    pub price: f64,
    /// Trade size in base currency
    pub amount: f64,
    pub side: Side,
}

impl MarketEventMessage {
    /// Trade events as a tick keyed by base asset. Trades on every venue and contract
    /// kind of the same base feed the same symbol.
    pub fn to_raw_tick(&self) -> Option<RawTick> {
        if self.kind != "trade" {
            return None;
        }
        let trade: TradeData = serde_json::from_value(self.data.clone()).ok()?;
        Some(RawTick::new(
            self.instrument.base.as_str(),
            trade.price,
            trade.amount,
            self.time_exchange.timestamp_millis(),
        ))
    }
}
