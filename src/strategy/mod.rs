//! Cross-exchange market making strategy.
//!
//! Contains the core logic for:
//! - Pricing maker quotes off the taker hedge price
//! - Tracking the resting quote on each side
//! - Cancelling quotes that drift or age out
//! - Hedging maker fills on the taker venue and accounting for profit

mod cancellation;
mod engine;
mod hedge;
mod lifecycle;
mod profit;
mod quote_manager;
mod status;

pub use cancellation::{CancelOutcome, CancelReason, CancellationMonitor};
pub use engine::{TickReport, XemmEngine};
pub use hedge::{potential_profit, HedgeExecutor, HedgeOutcome, HedgeRecord, UnhedgedFill, UnhedgedReason};
pub use lifecycle::{FillProgress, QuoteBook, QuoteState, TrackedOrder};
pub use profit::ProfitAccumulator;
pub use quote_manager::{MarketQuotes, PlacementOutcome, QuoteManager};
pub use status::{BalanceRow, ExchangeRow, OrderRow, StatusReport};
