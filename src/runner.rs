//! Paper-trading event loop.
//!
//! One task owns the engine and serializes everything that touches it:
//! interval ticks, fill events from the mock venues and the shutdown signal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::exchange::{FillEvent, MockVenue, VenueAdapter, VenueRegistry};
use crate::paper::PaperMarket;
use crate::persistence::{ArchiveSink, Ledger, PersistedState};
use crate::strategy::{HedgeOutcome, TickReport, XemmEngine};

enum LoopEvent {
    Tick,
    Fill(FillEvent),
    FillsClosed,
    Shutdown,
}

pub struct PaperRunner {
    engine: XemmEngine,
    market: PaperMarket,
    maker: Arc<MockVenue>,
    taker: Arc<MockVenue>,
    fills: mpsc::UnboundedReceiver<FillEvent>,
    ledger: Ledger,
    archive: Option<ArchiveSink>,
    archive_depth: usize,
    status_every_ticks: u64,
    ticks: u64,
}

impl PaperRunner {
    /// Build mock venues, the paper market and the engine from `config`.
    pub async fn new(config: &Config, ledger: Ledger, archive: Option<ArchiveSink>) -> Result<Self> {
        let params = config.xemm_params()?;
        let (fill_tx, fill_rx) = mpsc::unbounded_channel();

        let maker = Arc::new(
            MockVenue::new(params.maker.venue.as_str(), params.maker_fee).with_fill_sender(fill_tx.clone()),
        );
        let taker = Arc::new(
            MockVenue::new(params.taker.venue.as_str(), params.taker_fee).with_fill_sender(fill_tx),
        );

        let market = PaperMarket::new(config.paper.clone(), params.maker.clone(), params.taker.clone());
        market.seed_balances(&maker, &taker).await;

        let registry = VenueRegistry::new().with(maker.clone()).with(taker.clone());
        let mut engine = XemmEngine::from_registry(params, &registry)?;

        if let Some(state) = ledger.load_state()? {
            info!(
                total_profit = %state.total_profit,
                hedges = state.hedge_count,
                unhedged = state.unhedged_count,
                "💾 [LEDGER] Resuming profit totals"
            );
            if state.halted {
                warn!("💾 [LEDGER] Previous run halted after an unhedged fill");
            }
            engine = engine.with_profit(state.profit());
        }

        Ok(Self {
            engine,
            market,
            maker,
            taker,
            fills: fill_rx,
            ledger,
            archive,
            archive_depth: config.archive.depth,
            status_every_ticks: config.runtime.status_every_ticks,
            ticks: 0,
        })
    }

    pub fn engine(&self) -> &XemmEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Advance the paper market, then run one engine tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        self.market.step(&self.maker, &self.taker, now).await;
        // Fills from the new books must reach the engine before the
        // cancellation pass compares it against the venue snapshot
        self.drain_fills().await?;

        let report = self.engine.on_tick(now).await;
        let maker = &self.engine.params().maker;
        self.ledger
            .record_tick(&maker.venue, &maker.pair, &report, now)
            .context("Failed to record tick")?;

        self.archive_market(now).await?;

        self.ticks += 1;
        if self.status_every_ticks > 0 && self.ticks % self.status_every_ticks == 0 {
            self.log_status(now).await;
            self.save_state(now)?;
        }

        Ok(report)
    }

    /// Hedge one fill and record the result.
    pub async fn on_fill(&mut self, fill: FillEvent) -> Result<HedgeOutcome> {
        let outcome = self.engine.on_fill(&fill).await;
        if outcome != HedgeOutcome::Ignored {
            self.ledger.record_outcome(&outcome)?;
            self.save_state(fill.timestamp)?;
        }
        Ok(outcome)
    }

    /// Handle every fill already queued. Returns how many were handled.
    pub async fn drain_fills(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Ok(fill) = self.fills.try_recv() {
            self.on_fill(fill).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn archive_market(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(archive) = self.archive.as_mut() else {
            return Ok(());
        };

        for (venue, pair) in [
            (&self.maker, &self.engine.params().maker.pair),
            (&self.taker, &self.engine.params().taker.pair),
        ] {
            match venue.snapshot(pair, self.archive_depth).await {
                Ok(book) => archive.record_book(venue.venue_id(), book),
                Err(e) => warn!(venue = %venue.venue_id(), error = %e, "No book to archive"),
            }
            for trade in venue.drain_tape().await {
                archive.record_trade(venue.venue_id(), trade);
            }
        }

        archive.maybe_flush(now).context("Failed to flush archive")?;
        Ok(())
    }

    async fn log_status(&self, now: DateTime<Utc>) {
        match self.engine.status(now).await {
            Ok(report) => {
                for line in report.render().lines() {
                    info!("{}", line);
                }
            }
            Err(e) => warn!(error = %e, "Status report unavailable"),
        }
    }

    fn save_state(&self, now: DateTime<Utc>) -> Result<()> {
        let state = PersistedState::from_profit(self.engine.profit(), self.engine.is_halted(), now);
        self.ledger.save_state(&state).context("Failed to save engine state")
    }

    /// Run until ctrl-c, or until `max_ticks` ticks when given.
    pub async fn run(mut self, tick_interval: Duration, max_ticks: Option<u64>) -> Result<()> {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(tick_ms = tick_interval.as_millis() as u64, "🚀 Starting XEMM loop");

        loop {
            let event = tokio::select! {
                _ = interval.tick() => LoopEvent::Tick,
                fill = self.fills.recv() => match fill {
                    Some(fill) => LoopEvent::Fill(fill),
                    None => LoopEvent::FillsClosed,
                },
                _ = &mut shutdown => LoopEvent::Shutdown,
            };

            match event {
                LoopEvent::Tick => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Tick failed");
                    }
                    if max_ticks.is_some_and(|max| self.ticks >= max) {
                        info!(ticks = self.ticks, "Tick limit reached");
                        break;
                    }
                }
                LoopEvent::Fill(fill) => {
                    if let Err(e) = self.on_fill(fill).await {
                        error!(error = %e, "Fill handling failed");
                    }
                }
                LoopEvent::FillsClosed => {
                    warn!("Fill channel closed");
                    break;
                }
                LoopEvent::Shutdown => {
                    info!("🛑 Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Hedge queued fills, pull quotes and persist everything.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.drain_fills().await?;
        self.engine.on_stop().await;
        self.drain_fills().await?;

        let now = Utc::now();
        self.save_state(now)?;
        if let Some(archive) = self.archive.as_mut() {
            archive.flush().context("Failed to flush archive")?;
        }

        self.log_status(now).await;
        info!(
            total_profit = %self.engine.profit().total(),
            hedges = self.engine.profit().hedge_count(),
            unhedged = self.engine.profit().unhedged_count(),
            "👋 XEMM shutdown complete"
        );
        Ok(())
    }
}
