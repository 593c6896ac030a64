// =============================================================================
// Binance USD-M futures REST adapter — public endpoints only
// =============================================================================
//
// Only unauthenticated market-data endpoints are used: ticker price, klines,
// and partial order-book depth. No key material is required or accepted.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{Kline, MarketDataError, MarketDataSource};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Public-data client for Binance USD-M perpetual futures.
#[derive(Clone)]
pub struct BinanceFutures {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Deserialize)]
struct DepthSnapshot {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

impl BinanceFutures {
    pub fn new() -> Result<Self, MarketDataError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<T, MarketDataError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MarketDataError::Exchange {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

fn parse_f64(raw: &str, what: &str) -> Result<f64, MarketDataError> {
    raw.parse::<f64>()
        .map_err(|_| MarketDataError::Malformed(format!("{what}: {raw:?} is not a number")))
}

/// Decode one element of the /fapi/v1/klines array-of-arrays payload:
/// `[open_time, open, high, low, close, volume, ...]` with prices as strings.
fn parse_kline(row: &serde_json::Value) -> Result<Kline, MarketDataError> {
    let arr = row
        .as_array()
        .ok_or_else(|| MarketDataError::Malformed("kline row is not an array".to_string()))?;
    if arr.len() < 6 {
        return Err(MarketDataError::Malformed(format!(
            "kline row has {} fields, expected at least 6",
            arr.len()
        )));
    }

    let open_time_ms = arr[0]
        .as_i64()
        .ok_or_else(|| MarketDataError::Malformed("kline open_time is not an integer".to_string()))?;
    let open_time = DateTime::<Utc>::from_timestamp_millis(open_time_ms)
        .ok_or_else(|| MarketDataError::Malformed(format!("bad kline timestamp {open_time_ms}")))?;

    let field = |idx: usize, name: &str| -> Result<f64, MarketDataError> {
        let raw = arr[idx].as_str().ok_or_else(|| {
            MarketDataError::Malformed(format!("kline {name} is not a string"))
        })?;
        parse_f64(raw, name)
    };

    Ok(Kline {
        open_time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}

#[async_trait]
impl MarketDataSource for BinanceFutures {
    async fn get_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        let ticker: TickerPrice = self
            .get_json(&format!("/fapi/v1/ticker/price?symbol={symbol}"))
            .await?;
        let price = parse_f64(&ticker.price, "ticker price")?;
        debug!(symbol, price, "fetched ticker price");
        Ok(price)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError> {
        let rows: Vec<serde_json::Value> = self
            .get_json(&format!(
                "/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}"
            ))
            .await?;
        let mut klines = Vec::with_capacity(rows.len());
        for row in &rows {
            klines.push(parse_kline(row)?);
        }
        debug!(symbol, interval, count = klines.len(), "fetched klines");
        Ok(klines)
    }

    async fn get_order_book_imbalance(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<f64, MarketDataError> {
        let snapshot: DepthSnapshot = self
            .get_json(&format!("/fapi/v1/depth?symbol={symbol}&limit={depth}"))
            .await?;

        let sum_qty = |levels: &[(String, String)]| -> Result<f64, MarketDataError> {
            let mut total = 0.0;
            for (_, qty) in levels {
                total += parse_f64(qty, "depth quantity")?;
            }
            Ok(total)
        };

        let bid_vol = sum_qty(&snapshot.bids)?;
        let ask_vol = sum_qty(&snapshot.asks)?;
        let total = bid_vol + ask_vol;
        if total <= 0.0 {
            return Ok(0.0);
        }
        Ok((bid_vol - ask_vol) / total)
    }
}
