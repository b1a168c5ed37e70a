//! Order book and trade archival.
//!
//! Snapshots and trades are buffered in memory and written in batches, one
//! transaction per flush. Rows are unique per (venue, pair, timestamp), so
//! re-recording the same instant is a no-op.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

use crate::exchange::{BookLevel, OrderBookSnapshot, PublicTrade, VenueId};

/// Buffered SQLite writer for market data.
pub struct ArchiveSink {
    conn: Connection,
    depth: usize,
    flush_interval: Duration,
    last_flush: Option<DateTime<Utc>>,
    books: Vec<(VenueId, OrderBookSnapshot)>,
    trades: Vec<(VenueId, PublicTrade)>,
}

impl ArchiveSink {
    pub fn new<P: AsRef<Path>>(db_path: P, depth: usize, flush_interval: Duration) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create archive directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open archive at {:?}", path))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS book_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                venue TEXT NOT NULL,
                pair TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                bids TEXT NOT NULL,
                asks TEXT NOT NULL,
                UNIQUE(venue, pair, timestamp)
            );

            CREATE TABLE IF NOT EXISTS public_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                venue TEXT NOT NULL,
                pair TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                side TEXT NOT NULL,
                is_aggressive INTEGER NOT NULL,
                UNIQUE(venue, pair, timestamp)
            );
            "#,
        )?;

        info!(depth, "Archive initialized at {:?}", path);
        Ok(Self {
            conn,
            depth,
            flush_interval,
            last_flush: None,
            books: Vec::new(),
            trades: Vec::new(),
        })
    }

    /// Buffer the top `depth` levels of a snapshot.
    pub fn record_book(&mut self, venue: &VenueId, snapshot: OrderBookSnapshot) {
        self.books.push((venue.clone(), snapshot.truncated(self.depth)));
    }

    pub fn record_trade(&mut self, venue: &VenueId, trade: PublicTrade) {
        self.trades.push((venue.clone(), trade));
    }

    /// Records buffered and not yet written.
    pub fn pending(&self) -> usize {
        self.books.len() + self.trades.len()
    }

    /// Write everything buffered in one transaction. Returns rows inserted.
    pub fn flush(&mut self) -> Result<usize> {
        if self.pending() == 0 {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;

        for (venue, book) in &self.books {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO book_snapshots (venue, pair, timestamp, bids, asks)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    venue.as_str(),
                    book.pair.to_string(),
                    book.timestamp.to_rfc3339(),
                    levels_json(&book.bids)?,
                    levels_json(&book.asks)?,
                ],
            )?;
        }

        for (venue, trade) in &self.trades {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO public_trades (venue, pair, timestamp, price, amount, side, is_aggressive)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    venue.as_str(),
                    trade.pair.to_string(),
                    trade.timestamp.to_rfc3339(),
                    trade.price.to_string(),
                    trade.amount.to_string(),
                    trade.side.as_str(),
                    trade.is_aggressive as i32,
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            books = self.books.len(),
            trades = self.trades.len(),
            inserted,
            "Archive flushed"
        );
        self.books.clear();
        self.trades.clear();
        Ok(inserted)
    }

    /// Flush if `flush_interval` has passed since the last flush.
    ///
    /// The first call only starts the clock.
    pub fn maybe_flush(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let Some(last) = self.last_flush else {
            self.last_flush = Some(now);
            return Ok(0);
        };
        if now - last < self.flush_interval {
            return Ok(0);
        }
        self.last_flush = Some(now);
        self.flush()
    }

    pub fn book_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM book_snapshots", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn trade_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM public_trades", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// `[[price, amount], ...]` with decimals as strings.
fn levels_json(levels: &[BookLevel]) -> Result<String> {
    let pairs: Vec<[String; 2]> = levels
        .iter()
        .map(|l| [l.price.to_string(), l.amount.to_string()])
        .collect();
    serde_json::to_string(&pairs).context("Failed to encode book levels")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, TradingPair};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn snapshot(timestamp: DateTime<Utc>, levels: usize) -> OrderBookSnapshot {
        let level = |i: usize| Decimal::from(i as u64) / dec!(1000);
        OrderBookSnapshot {
            pair: TradingPair::new("DOGE", "USDT"),
            timestamp,
            bids: (0..levels).map(|i| BookLevel::new(dec!(0.1) - level(i), dec!(100))).collect(),
            asks: (0..levels).map(|i| BookLevel::new(dec!(0.101) + level(i), dec!(100))).collect(),
        }
    }

    fn trade(timestamp: DateTime<Utc>) -> PublicTrade {
        PublicTrade {
            pair: TradingPair::new("DOGE", "USDT"),
            timestamp,
            price: dec!(0.1005),
            amount: dec!(250),
            side: OrderSide::Buy,
            is_aggressive: true,
        }
    }

    #[test]
    fn test_flush_writes_buffered_records() {
        let mut sink = ArchiveSink::new(":memory:", 3, Duration::seconds(10)).unwrap();
        let venue = VenueId::new("binance");
        let now = Utc::now();

        sink.record_book(&venue, snapshot(now, 5));
        sink.record_trade(&venue, trade(now));
        assert_eq!(sink.pending(), 2);

        assert_eq!(sink.flush().unwrap(), 2);
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.book_count().unwrap(), 1);
        assert_eq!(sink.trade_count().unwrap(), 1);

        let bids: String = sink
            .conn
            .query_row("SELECT bids FROM book_snapshots", [], |row| row.get(0))
            .unwrap();
        let decoded: Vec<[String; 2]> = serde_json::from_str(&bids).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(Decimal::from_str(&decoded[0][0]).unwrap(), dec!(0.1));
        assert_eq!(decoded[0][1], "100");
    }

    #[test]
    fn test_duplicate_timestamps_are_ignored() {
        let mut sink = ArchiveSink::new(":memory:", 10, Duration::seconds(10)).unwrap();
        let venue = VenueId::new("okx");
        let now = Utc::now();

        sink.record_book(&venue, snapshot(now, 2));
        sink.flush().unwrap();
        sink.record_book(&venue, snapshot(now, 2));
        sink.record_book(&VenueId::new("binance"), snapshot(now, 2));

        assert_eq!(sink.flush().unwrap(), 1);
        assert_eq!(sink.book_count().unwrap(), 2);
    }

    #[test]
    fn test_maybe_flush_waits_for_interval() {
        let mut sink = ArchiveSink::new(":memory:", 10, Duration::seconds(10)).unwrap();
        let venue = VenueId::new("okx");
        let t0 = Utc::now();

        sink.record_trade(&venue, trade(t0));
        assert_eq!(sink.maybe_flush(t0).unwrap(), 0);
        assert_eq!(sink.maybe_flush(t0 + Duration::seconds(9)).unwrap(), 0);
        assert_eq!(sink.pending(), 1);

        assert_eq!(sink.maybe_flush(t0 + Duration::seconds(10)).unwrap(), 1);
        assert_eq!(sink.trade_count().unwrap(), 1);
    }
}
