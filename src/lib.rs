//! # Spot XEMM
//!
//! Cross-exchange market making: resting quotes on a maker venue, priced off
//! a taker venue, with every maker fill hedged on the taker.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading, presets and validation
//! - `exchange`: Venue adapter trait, shared types and the mock venue
//! - `strategy`: Quote pricing, order lifecycle, cancellation and hedging
//! - `persistence`: SQLite ledger and market data archive
//! - `paper`: Synthetic order books driving the mock venues
//! - `runner`: Event loop tying ticks and fills to the engine
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod paper;
pub mod persistence;
pub mod runner;
pub mod strategy;
pub mod utils;

pub use config::Config;
