//! SQLite persistence for the XEMM engine.
//!
//! The ledger keeps what a run did so it can be inspected and resumed:
//! - Running profit and fill counters
//! - Quote placement and cancellation history
//! - Hedges, including fills that could not be hedged
//!
//! Market data archival lives in `archive`.

pub mod archive;

pub use archive::ArchiveSink;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::exchange::{OrderSide, TradingPair, VenueId};
use crate::strategy::{CancelOutcome, HedgeOutcome, HedgeRecord, PlacementOutcome, ProfitAccumulator, TickReport, UnhedgedFill};

/// Persisted engine totals.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub total_profit: Decimal,
    pub hedge_count: u64,
    pub unhedged_count: u64,
    pub halted: bool,
    pub last_saved: DateTime<Utc>,
}

impl PersistedState {
    pub fn from_profit(profit: &ProfitAccumulator, halted: bool, now: DateTime<Utc>) -> Self {
        Self {
            total_profit: profit.total(),
            hedge_count: profit.hedge_count(),
            unhedged_count: profit.unhedged_count(),
            halted,
            last_saved: now,
        }
    }

    pub fn profit(&self) -> ProfitAccumulator {
        ProfitAccumulator::restore(self.total_profit, self.hedge_count, self.unhedged_count)
    }
}

/// One row of the hedge history.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeRow {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub fill_order_id: String,
    pub fill_side: String,
    pub fill_price: Decimal,
    pub fill_amount: Decimal,
    pub hedge_order_id: Option<String>,
    pub hedge_price: Option<Decimal>,
    pub hedge_amount: Option<Decimal>,
    pub profit: Decimal,
    pub reason: Option<String>,
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-backed record of quotes, hedges and profit.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open the ledger, creating the database and schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let ledger = Self { conn };
        ledger.init_schema()?;

        info!("Ledger initialized at {:?}", path);
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Engine totals (singleton row)
            CREATE TABLE IF NOT EXISTS strategy_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_profit TEXT NOT NULL,
                hedge_count INTEGER NOT NULL,
                unhedged_count INTEGER NOT NULL,
                halted INTEGER NOT NULL DEFAULT 0,
                last_saved TEXT NOT NULL
            );

            -- Maker quote lifecycle
            CREATE TABLE IF NOT EXISTS quote_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                venue TEXT NOT NULL,
                pair TEXT NOT NULL,
                event TEXT NOT NULL,
                side TEXT NOT NULL,
                order_id TEXT NOT NULL,
                price TEXT,
                amount TEXT,
                reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_quote_events_timestamp ON quote_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_quote_events_order ON quote_events(order_id);

            -- Taker hedges (status 'hedged' or 'unhedged')
            CREATE TABLE IF NOT EXISTS hedges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                fill_order_id TEXT NOT NULL,
                fill_side TEXT NOT NULL,
                fill_price TEXT NOT NULL,
                fill_amount TEXT NOT NULL,
                hedge_order_id TEXT,
                hedge_side TEXT,
                hedge_price TEXT,
                hedge_amount TEXT,
                profit TEXT NOT NULL,
                reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_hedges_timestamp ON hedges(timestamp);
            "#,
        )?;

        debug!("Ledger schema initialized");
        Ok(())
    }

    /// Save the engine totals.
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO strategy_state (id, total_profit, hedge_count, unhedged_count, halted, last_saved)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                total_profit = ?1,
                hedge_count = ?2,
                unhedged_count = ?3,
                halted = ?4,
                last_saved = ?5
            "#,
            params![
                state.total_profit.to_string(),
                state.hedge_count,
                state.unhedged_count,
                state.halted as i32,
                state.last_saved.to_rfc3339(),
            ],
        )?;

        debug!(total_profit = %state.total_profit, "State saved to ledger");
        Ok(())
    }

    /// Load the engine totals, if a previous run saved any.
    pub fn load_state(&self) -> Result<Option<PersistedState>> {
        let row: Option<(String, u64, u64, i32, String)> = self
            .conn
            .query_row(
                r#"
                SELECT total_profit, hedge_count, unhedged_count, halted, last_saved
                FROM strategy_state WHERE id = 1
                "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((total_profit, hedge_count, unhedged_count, halted, last_saved)) = row else {
            return Ok(None);
        };

        let state = PersistedState {
            total_profit: parse_decimal(&total_profit),
            hedge_count,
            unhedged_count,
            halted: halted != 0,
            last_saved: parse_time(&last_saved),
        };

        info!(
            total_profit = %state.total_profit,
            hedges = state.hedge_count,
            last_saved = %state.last_saved,
            "Loaded state from ledger"
        );
        Ok(Some(state))
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_quote_event(
        &self,
        timestamp: DateTime<Utc>,
        venue: &VenueId,
        pair: &TradingPair,
        event: &str,
        side: OrderSide,
        order_id: &str,
        price: Option<Decimal>,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO quote_events (timestamp, venue, pair, event, side, order_id, price, amount, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                timestamp.to_rfc3339(),
                venue.as_str(),
                pair.to_string(),
                event,
                side.as_str(),
                order_id,
                price.map(|v| v.to_string()),
                amount.map(|v| v.to_string()),
                reason,
            ],
        )?;
        Ok(())
    }

    /// Record the placements and cancellations of one tick.
    pub fn record_tick(
        &self,
        venue: &VenueId,
        pair: &TradingPair,
        report: &TickReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for (side, outcome) in &report.placements {
            if let PlacementOutcome::Placed {
                order_id,
                price,
                amount,
            } = outcome
            {
                self.insert_quote_event(
                    now, venue, pair, "placed", *side, order_id, Some(*price), Some(*amount), None,
                )?;
            }
        }

        for outcome in &report.cancellations {
            let (event, side, order_id, reason) = match outcome {
                CancelOutcome::Cancelled {
                    order_id,
                    side,
                    reason,
                } => ("cancelled", *side, order_id, Some(reason.to_string())),
                CancelOutcome::CancelFailed {
                    order_id,
                    side,
                    error,
                } => ("cancel_failed", *side, order_id, Some(error.clone())),
                CancelOutcome::Released { order_id, side } => ("released", *side, order_id, None),
                CancelOutcome::OrphanCancelled {
                    order_id,
                    side,
                    reason,
                } => ("orphan_cancelled", *side, order_id, Some(reason.to_string())),
            };
            self.insert_quote_event(now, venue, pair, event, side, order_id, None, None, reason)?;
        }

        Ok(())
    }

    /// Record a submitted hedge.
    pub fn record_hedge(&self, hedge: &HedgeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO hedges (timestamp, status, fill_order_id, fill_side, fill_price, fill_amount,
                                hedge_order_id, hedge_side, hedge_price, hedge_amount, profit, reason)
            VALUES (?1, 'hedged', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                hedge.timestamp.to_rfc3339(),
                hedge.fill_order_id,
                hedge.fill_side.as_str(),
                hedge.fill_price.to_string(),
                hedge.fill_amount.to_string(),
                hedge.hedge_order_id,
                hedge.hedge_side.as_str(),
                hedge.hedge_price.to_string(),
                hedge.hedge_amount.to_string(),
                hedge.profit.to_string(),
                (hedge.unhedged_residual > Decimal::ZERO)
                    .then(|| format!("unhedged residual {}", hedge.unhedged_residual)),
            ],
        )?;
        Ok(())
    }

    /// Record a fill that was left unhedged.
    pub fn record_unhedged(&self, unhedged: &UnhedgedFill) -> Result<()> {
        let fill = &unhedged.fill;
        self.conn.execute(
            r#"
            INSERT INTO hedges (timestamp, status, fill_order_id, fill_side, fill_price, fill_amount,
                                hedge_side, profit, reason)
            VALUES (?1, 'unhedged', ?2, ?3, ?4, ?5, ?6, '0', ?7)
            "#,
            params![
                fill.timestamp.to_rfc3339(),
                fill.order_id,
                fill.side.as_str(),
                fill.price.to_string(),
                fill.amount.to_string(),
                fill.side.opposite().as_str(),
                unhedged.reason.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Record whatever the hedge executor did with a fill.
    pub fn record_outcome(&self, outcome: &HedgeOutcome) -> Result<()> {
        match outcome {
            HedgeOutcome::Ignored => Ok(()),
            HedgeOutcome::Hedged(hedge) => self.record_hedge(hedge),
            HedgeOutcome::Unhedged(unhedged) => self.record_unhedged(unhedged),
        }
    }

    /// Most recent hedge rows, newest first.
    pub fn recent_hedges(&self, limit: usize) -> Result<Vec<HedgeRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, status, fill_order_id, fill_side, fill_price, fill_amount,
                   hedge_order_id, hedge_price, hedge_amount, profit, reason
            FROM hedges
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map([limit], |row| {
                Ok(HedgeRow {
                    timestamp: parse_time(&row.get::<_, String>(0)?),
                    status: row.get(1)?,
                    fill_order_id: row.get(2)?,
                    fill_side: row.get(3)?,
                    fill_price: parse_decimal(&row.get::<_, String>(4)?),
                    fill_amount: parse_decimal(&row.get::<_, String>(5)?),
                    hedge_order_id: row.get(6)?,
                    hedge_price: row.get::<_, Option<String>>(7)?.map(|s| parse_decimal(&s)),
                    hedge_amount: row.get::<_, Option<String>>(8)?.map(|s| parse_decimal(&s)),
                    profit: parse_decimal(&row.get::<_, String>(9)?),
                    reason: row.get(10)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    /// Number of quote events by event name.
    pub fn quote_event_count(&self, event: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM quote_events WHERE event = ?1",
            [event],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FillEvent;
    use crate::strategy::{CancelReason, UnhedgedReason};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn hedge_record() -> HedgeRecord {
        HedgeRecord {
            fill_order_id: "okx-1".to_string(),
            fill_side: OrderSide::Buy,
            fill_price: dec!(99.68),
            fill_amount: dec!(10),
            hedge_order_id: "binance-1".to_string(),
            hedge_side: OrderSide::Sell,
            hedge_price: dec!(99.98),
            hedge_amount: dec!(10),
            profit: dec!(1.0034),
            maker_remaining: Decimal::ZERO,
            unhedged_residual: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_state() {
        let ledger = Ledger::new(":memory:").unwrap();
        assert!(ledger.load_state().unwrap().is_none());

        let mut profit = ProfitAccumulator::new();
        profit.record_hedge(dec!(1.0034));
        profit.record_unhedged();
        ledger
            .save_state(&PersistedState::from_profit(&profit, true, Utc::now()))
            .unwrap();

        let loaded = ledger.load_state().unwrap().unwrap();
        assert_eq!(loaded.total_profit, dec!(1.0034));
        assert_eq!(loaded.unhedged_count, 1);
        assert!(loaded.halted);
        assert_eq!(loaded.profit(), profit);

        // Second save overwrites the singleton row
        profit.record_hedge(dec!(0.5));
        ledger
            .save_state(&PersistedState::from_profit(&profit, false, Utc::now()))
            .unwrap();
        assert_eq!(ledger.load_state().unwrap().unwrap().hedge_count, 2);
    }

    #[test]
    fn test_hedge_residual_is_recorded() {
        let ledger = Ledger::new(":memory:").unwrap();
        let mut hedge = hedge_record();
        hedge.hedge_amount = dec!(9);
        hedge.unhedged_residual = dec!(1);

        ledger.record_hedge(&hedge).unwrap();

        let rows = ledger.recent_hedges(1).unwrap();
        assert_eq!(rows[0].hedge_amount, Some(dec!(9)));
        assert_eq!(rows[0].reason.as_deref(), Some("unhedged residual 1"));
    }

    #[test]
    fn test_records_hedged_and_unhedged_fills() {
        let ledger = Ledger::new(":memory:").unwrap();

        ledger.record_outcome(&HedgeOutcome::Hedged(hedge_record())).unwrap();
        ledger
            .record_outcome(&HedgeOutcome::Unhedged(UnhedgedFill {
                fill: FillEvent {
                    order_id: "okx-2".to_string(),
                    pair: TradingPair::new("DOGE", "USDT"),
                    side: OrderSide::Sell,
                    price: dec!(100.42),
                    amount: dec!(10),
                    timestamp: Utc::now(),
                },
                reason: UnhedgedReason::SubmitFailed("timeout".to_string()),
                maker_remaining: Decimal::ZERO,
            }))
            .unwrap();
        ledger.record_outcome(&HedgeOutcome::Ignored).unwrap();

        let rows = ledger.recent_hedges(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "unhedged");
        assert_eq!(rows[0].hedge_order_id, None);
        assert!(rows[0].reason.as_deref().unwrap().contains("timeout"));
        assert_eq!(rows[1].status, "hedged");
        assert_eq!(rows[1].profit, dec!(1.0034));
        assert_eq!(rows[1].hedge_price, Some(dec!(99.98)));
        assert_eq!(rows[1].reason, None);
    }

    #[test]
    fn test_records_tick_events() {
        let ledger = Ledger::new(":memory:").unwrap();
        let report = TickReport {
            skipped: None,
            quotes: None,
            placements: vec![
                (
                    OrderSide::Buy,
                    PlacementOutcome::Placed {
                        order_id: "okx-1".to_string(),
                        price: dec!(99.68),
                        amount: dec!(10),
                    },
                ),
                (OrderSide::Sell, PlacementOutcome::PositionLimit),
            ],
            cancellations: vec![CancelOutcome::Cancelled {
                order_id: "okx-0".to_string(),
                side: OrderSide::Buy,
                reason: CancelReason::Expired {
                    age: Duration::seconds(31),
                },
            }],
        };

        ledger
            .record_tick(&VenueId::new("okx"), &TradingPair::new("DOGE", "USDT"), &report, Utc::now())
            .unwrap();

        assert_eq!(ledger.quote_event_count("placed").unwrap(), 1);
        assert_eq!(ledger.quote_event_count("cancelled").unwrap(), 1);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("xemm-ledger-{}", std::process::id()));
        let path = dir.join("nested").join("ledger.db");

        let ledger = Ledger::new(&path).unwrap();
        ledger.record_hedge(&hedge_record()).unwrap();
        assert!(path.exists());

        drop(ledger);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
