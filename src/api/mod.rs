pub mod rate_limit;
pub mod upbit;

pub use rate_limit::{Endpoint, RateLimitError, RateLimits};
pub use upbit::{
    CandleQuery, CandleUnit, FetchError, MarketDataSource, MarketInfo, UpbitClient,
    UPBIT_API_BASE,
};
