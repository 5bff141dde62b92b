use crate::shutdown::Shutdown;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use thiserror::Error;

// Type alias for the rate limiter to simplify signatures
type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Logical endpoint groups with independent request budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Market,
    Ticker,
    Candles,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Market => "market",
            Endpoint::Ticker => "ticker",
            Endpoint::Candles => "candles",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit of {0} must be greater than zero")]
    ZeroQuota(&'static str),
    #[error("cancelled while waiting for a request token")]
    Cancelled,
}

/// Short and long window token buckets for one endpoint
struct EndpointLimiter {
    per_second: DirectRateLimiter,
    per_minute: DirectRateLimiter,
}

impl EndpointLimiter {
    fn new(per_second: NonZeroU32, per_minute: NonZeroU32) -> Self {
        Self {
            per_second: RateLimiter::direct(Quota::per_second(per_second)),
            per_minute: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    async fn until_ready(&self) {
        self.per_second.until_ready().await;
        self.per_minute.until_ready().await;
    }
}

/// Self-imposed call budget for the exchange, one pair of buckets per endpoint
///
/// Built once at startup and shared by reference (or `Arc`) with whatever
/// issues requests.
pub struct RateLimits {
    market: EndpointLimiter,
    ticker: EndpointLimiter,
    candles: EndpointLimiter,
}

impl RateLimits {
    pub fn new(per_second: u32, per_minute: u32) -> Result<Self, RateLimitError> {
        let per_second =
            NonZeroU32::new(per_second).ok_or(RateLimitError::ZeroQuota("per_second"))?;
        let per_minute =
            NonZeroU32::new(per_minute).ok_or(RateLimitError::ZeroQuota("per_minute"))?;

        Ok(Self {
            market: EndpointLimiter::new(per_second, per_minute),
            ticker: EndpointLimiter::new(per_second, per_minute),
            candles: EndpointLimiter::new(per_second, per_minute),
        })
    }

    fn limiter(&self, endpoint: Endpoint) -> &EndpointLimiter {
        match endpoint {
            Endpoint::Market => &self.market,
            Endpoint::Ticker => &self.ticker,
            Endpoint::Candles => &self.candles,
        }
    }

    /// Wait for a request token on both windows, or bail out on shutdown
    pub async fn acquire(
        &self,
        endpoint: Endpoint,
        shutdown: &Shutdown,
    ) -> Result<(), RateLimitError> {
        if shutdown.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }

        tokio::select! {
            _ = self.limiter(endpoint).until_ready() => Ok(()),
            _ = shutdown.cancelled() => {
                tracing::debug!(endpoint = endpoint.as_str(), "Token wait cancelled");
                Err(RateLimitError::Cancelled)
            }
        }
    }
}
