// Data collection, state and order execution
pub mod history;
pub mod orchestrator;
pub mod poller;
pub mod trailing;
pub mod wallet;

pub use history::{CandleBook, HistoryStore, HistorySummary, Window};
pub use orchestrator::{CycleReport, Orchestrator};
pub use poller::{spawn_poller, Poller, PollerEvent, PollerSettings};
pub use trailing::TrailingTracker;
pub use wallet::{
    spawn_wallet, Fill, PendingFill, Position, Wallet, WalletActor, WalletError, WalletHandle,
    WalletSnapshot, WalletSummary,
};
