use crate::models::{Candle, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

pub const UPBIT_API_BASE: &str = "https://api.upbit.com/v1";

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout, throttling or server-side error
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Exchange rejected the request with an error payload
    #[error("exchange error {status} ({name}): {message}")]
    Api {
        status: StatusCode,
        name: String,
        message: String,
    },

    /// Body did not have the expected shape
    #[error("malformed response from {endpoint}: {reason}")]
    Malformed {
        endpoint: &'static str,
        reason: String,
    },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Api { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transient(e.to_string())
    }
}

/// One tradable instrument from the market list
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MarketInfo {
    pub market: String,
    #[serde(default)]
    pub korean_name: String,
    #[serde(default)]
    pub english_name: String,
    #[serde(default)]
    pub market_warning: Option<String>,
}

/// Candle resolution offered by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleUnit {
    Minutes(u32),
    Days,
}

impl CandleUnit {
    pub fn period_secs(&self) -> i64 {
        match self {
            CandleUnit::Minutes(m) => i64::from(*m) * 60,
            CandleUnit::Days => 24 * 60 * 60,
        }
    }

    fn path(&self) -> String {
        match self {
            CandleUnit::Minutes(m) => format!("candles/minutes/{}", m),
            CandleUnit::Days => "candles/days".to_string(),
        }
    }
}

/// Parameters of a candle series request
#[derive(Debug, Clone, PartialEq)]
pub struct CandleQuery {
    pub unit: CandleUnit,
    pub count: u32,
    /// Return candles ending before this instant; latest when `None`
    pub to: Option<DateTime<Utc>>,
}

/// Read-only market data endpoints the engine depends on
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn list_instruments(&self) -> Result<Vec<MarketInfo>, FetchError>;

    async fn snapshots(&self, instruments: &[String]) -> Result<Vec<Snapshot>, FetchError>;

    async fn candles(
        &self,
        instrument: &str,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, deserialize_with = "name_as_string")]
    name: String,
    #[serde(default)]
    message: String,
}

// The exchange sends `name` as either a number or a string
fn name_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct TickerData {
    market: String,
    trade_price: f64,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    prev_closing_price: f64,
    #[serde(default)]
    trade_volume: f64,
    /// Milliseconds since epoch of the last trade
    trade_timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    market: String,
    /// e.g. `2024-03-01T09:15:00`
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    #[serde(default)]
    candle_acc_trade_volume: f64,
}

/// Client for the exchange's public quotation API
///
/// Stateless apart from the connection pool; request budgeting is left to
/// the caller (see [`crate::api::RateLimits`]).
#[derive(Clone)]
pub struct UpbitClient {
    client: Client,
    base_url: String,
}

impl UpbitClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient(format!(
                "{} responded {}",
                endpoint, status
            )));
        }

        if !status.is_success() {
            return Err(match serde_json::from_slice::<ErrorResponse>(&body) {
                Ok(er) => FetchError::Api {
                    status,
                    name: er.error.name,
                    message: er.error.message,
                },
                Err(_) => FetchError::Malformed {
                    endpoint,
                    reason: format!(
                        "status {} with body {}",
                        status,
                        String::from_utf8_lossy(&body)
                    ),
                },
            });
        }

        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed {
            endpoint,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for UpbitClient {
    async fn list_instruments(&self) -> Result<Vec<MarketInfo>, FetchError> {
        self.get_json("market", "market/all", &[("isDetails", "true".to_string())])
            .await
    }

    async fn snapshots(&self, instruments: &[String]) -> Result<Vec<Snapshot>, FetchError> {
        if instruments.is_empty() {
            return Ok(Vec::new());
        }

        let tickers: Vec<TickerData> = self
            .get_json("ticker", "ticker", &[("markets", instruments.join(","))])
            .await?;

        tickers.into_iter().map(ticker_to_snapshot).collect()
    }

    async fn candles(
        &self,
        instrument: &str,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>, FetchError> {
        let mut params = vec![
            ("market", instrument.to_string()),
            ("count", query.count.to_string()),
        ];
        if let Some(to) = query.to {
            params.push(("to", to.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let data: Vec<CandleData> = self
            .get_json("candles", &query.unit.path(), &params)
            .await?;

        let period_secs = query.unit.period_secs();
        let mut candles = data
            .into_iter()
            .map(|c| candle_from_data(c, period_secs))
            .collect::<Result<Vec<_>, _>>()?;

        // Exchange returns newest first
        candles.sort_by_key(|c| c.period_start);
        Ok(candles)
    }
}

fn ticker_to_snapshot(t: TickerData) -> Result<Snapshot, FetchError> {
    let timestamp = Utc
        .timestamp_millis_opt(t.trade_timestamp)
        .single()
        .ok_or_else(|| FetchError::Malformed {
            endpoint: "ticker",
            reason: format!("invalid trade_timestamp {}", t.trade_timestamp),
        })?;

    Ok(Snapshot {
        instrument: t.market,
        trade_price: t.trade_price,
        opening_price: t.opening_price,
        high_price: t.high_price,
        low_price: t.low_price,
        prev_closing_price: t.prev_closing_price,
        trade_volume: t.trade_volume,
        timestamp,
    })
}

fn candle_from_data(c: CandleData, period_secs: i64) -> Result<Candle, FetchError> {
    let period_start = NaiveDateTime::parse_from_str(&c.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| FetchError::Malformed {
            endpoint: "candles",
            reason: format!("bad candle_date_time_utc {:?}: {}", c.candle_date_time_utc, e),
        })?
        .and_utc();

    Ok(Candle {
        instrument: c.market,
        period_start,
        period_secs,
        open: c.opening_price,
        high: c.high_price,
        low: c.low_price,
        close: c.trade_price,
        volume: c.candle_acc_trade_volume,
    })
}
