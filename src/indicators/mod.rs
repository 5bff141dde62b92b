// Technical indicators module
pub mod rsi;

pub use rsi::{calculate_rsi, rsi_or_undefined, DEFAULT_RSI_PERIOD, UNDEFINED_RSI};
