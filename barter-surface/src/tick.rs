//! Inbound tick types and normalisation.
//!
//! The feed delivers [`RawTick`]s as loosely typed JSON so malformed values survive
//! deserialisation and can be counted by the aggregator instead of failing the stream.

use crate::error::TickError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Instrument identifier, e.g. "BTC" or "ESZ5".
pub type Symbol = SmolStr;

/// Tick as delivered by the market-data gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawTick {
    pub symbol: String,
    pub price: serde_json::Value,
    pub volume: serde_json::Value,
    /// Exchange timestamp in epoch milliseconds
    pub timestamp: i64,
}

impl RawTick {
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price: serde_json::Value::from(price),
            volume: serde_json::Value::from(volume),
            timestamp,
        }
    }
}

/// Validated tick.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub price: f64,
    pub volume: f64,
    pub timestamp: i64,
}

impl Tick {
    pub fn new(symbol: &str, price: f64, volume: f64, timestamp: i64) -> Self {
        Self {
            symbol: normalise_symbol(symbol),
            price,
            volume,
            timestamp,
        }
    }
}

impl TryFrom<RawTick> for Tick {
    type Error = TickError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        let symbol = normalise_symbol(&raw.symbol);
        if symbol.is_empty() {
            return Err(TickError::EmptySymbol);
        }

        let price = numeric(&raw.price).ok_or_else(|| TickError::NonNumericPrice(raw.price.to_string()))?;
        if !(price.is_finite() && price > 0.0) {
            return Err(TickError::InvalidPrice(price.to_string()));
        }

        let volume =
            numeric(&raw.volume).ok_or_else(|| TickError::NonNumericVolume(raw.volume.to_string()))?;
        if !(volume.is_finite() && volume > 0.0) {
            return Err(TickError::InvalidVolume(volume.to_string()));
        }

        if raw.timestamp <= 0 {
            return Err(TickError::InvalidTimestamp(raw.timestamp));
        }

        Ok(Tick {
            symbol,
            price,
            volume,
            timestamp: raw.timestamp,
        })
    }
}

pub fn normalise_symbol(symbol: &str) -> Symbol {
    SmolStr::new(symbol.trim().to_uppercase())
}

/// Numbers and numeric strings are accepted, exchanges send both.
fn numeric(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tick_normalisation() {
        struct TestCase {
            input: RawTick,
            expected: Result<Tick, TickError>,
        }

        let raw = |symbol: &str, price: serde_json::Value, volume: serde_json::Value, timestamp: i64| RawTick {
            symbol: symbol.to_string(),
            price,
            volume,
            timestamp,
        };

        let tests = vec![
            TestCase {
                // TC0: valid tick, symbol upper-cased
                input: raw(" btc ", json!(100.5), json!(2.0), 1_000),
                expected: Ok(Tick::new("BTC", 100.5, 2.0, 1_000)),
            },
            TestCase {
                // TC1: numeric string price accepted
                input: raw("ETH", json!("2500.25"), json!(1), 5),
                expected: Ok(Tick::new("ETH", 2500.25, 1.0, 5)),
            },
            TestCase {
                // TC2: non-numeric price
                input: raw("ETH", json!("abc"), json!(1), 5),
                expected: Err(TickError::NonNumericPrice("\"abc\"".to_string())),
            },
            TestCase {
                // TC3: null price
                input: raw("ETH", serde_json::Value::Null, json!(1), 5),
                expected: Err(TickError::NonNumericPrice("null".to_string())),
            },
            TestCase {
                // TC4: zero volume
                input: raw("ETH", json!(10.0), json!(0.0), 5),
                expected: Err(TickError::InvalidVolume("0".to_string())),
            },
            TestCase {
                // TC5: negative price
                input: raw("ETH", json!(-1.0), json!(1.0), 5),
                expected: Err(TickError::InvalidPrice("-1".to_string())),
            },
            TestCase {
                // TC6: empty symbol
                input: raw("  ", json!(1.0), json!(1.0), 5),
                expected: Err(TickError::EmptySymbol),
            },
            TestCase {
                // TC7: non-positive timestamp
                input: raw("SOL", json!(1.0), json!(1.0), 0),
                expected: Err(TickError::InvalidTimestamp(0)),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Tick::try_from(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_raw_tick_deserialises_from_feed_json() {
        let raw: RawTick = serde_json::from_str(
            r#"{"symbol":"btc","price":"not-a-number","volume":1.5,"timestamp":1700000000000}"#,
        )
        .unwrap();

        assert!(matches!(Tick::try_from(raw), Err(TickError::NonNumericPrice(_))));
    }
}
