//! The XEMM engine context.
//!
//! Owns the run parameters, both venue adapters, the per-side quote state and
//! the profit accumulator. The runner drives it with `on_tick` and `on_fill`
//! from a single task, so every handler runs to completion before the next.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::XemmParams;
use crate::exchange::{FillEvent, OrderSide, VenueAdapter, VenueRegistry, VenueResult};
use crate::strategy::cancellation::{CancelOutcome, CancellationMonitor};
use crate::strategy::hedge::{HedgeExecutor, HedgeOutcome};
use crate::strategy::lifecycle::QuoteBook;
use crate::strategy::profit::ProfitAccumulator;
use crate::strategy::quote_manager::{MarketQuotes, PlacementOutcome, QuoteManager};
use crate::strategy::status::{BalanceRow, StatusInputs, StatusReport};

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Set when market data was unavailable and nothing was done
    pub skipped: Option<String>,
    pub quotes: Option<MarketQuotes>,
    pub placements: Vec<(OrderSide, PlacementOutcome)>,
    pub cancellations: Vec<CancelOutcome>,
}

impl TickReport {
    fn skipped(reason: String) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn placed(&self) -> usize {
        self.placements
            .iter()
            .filter(|(_, o)| matches!(o, PlacementOutcome::Placed { .. }))
            .count()
    }
}

pub struct XemmEngine {
    params: XemmParams,
    maker: Arc<dyn VenueAdapter>,
    taker: Arc<dyn VenueAdapter>,
    quote_manager: QuoteManager,
    cancellation: CancellationMonitor,
    hedger: HedgeExecutor,
    book: QuoteBook,
    profit: ProfitAccumulator,
    halted: bool,
}

impl XemmEngine {
    pub fn new(params: XemmParams, maker: Arc<dyn VenueAdapter>, taker: Arc<dyn VenueAdapter>) -> Self {
        Self {
            quote_manager: QuoteManager::new(params.clone()),
            cancellation: CancellationMonitor::new(params.clone()),
            hedger: HedgeExecutor::new(params.clone()),
            params,
            maker,
            taker,
            book: QuoteBook::new(),
            profit: ProfitAccumulator::new(),
            halted: false,
        }
    }

    /// Resolve both venues from the registry.
    pub fn from_registry(params: XemmParams, registry: &VenueRegistry) -> Result<Self> {
        let maker = registry.resolve(&params.maker.venue)?;
        let taker = registry.resolve(&params.taker.venue)?;
        Ok(Self::new(params, maker, taker))
    }

    /// Continue the profit totals of a previous run.
    pub fn with_profit(mut self, profit: ProfitAccumulator) -> Self {
        self.profit = profit;
        self
    }

    pub fn params(&self) -> &XemmParams {
        &self.params
    }

    pub fn book(&self) -> &QuoteBook {
        &self.book
    }

    pub fn profit(&self) -> &ProfitAccumulator {
        &self.profit
    }

    /// Whether quoting stopped after an unhedged fill.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Place quotes for idle sides, then re-check resting ones.
    ///
    /// A market data failure skips both steps.
    #[instrument(skip(self))]
    pub async fn on_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let quotes = match MarketQuotes::fetch(self.maker.as_ref(), self.taker.as_ref(), &self.params).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!(error = %e, "Market data unavailable, skipping tick");
                return TickReport::skipped(e.to_string());
            }
        };

        let placements = if self.halted {
            Vec::new()
        } else {
            self.quote_manager
                .place_quotes(self.maker.as_ref(), self.taker.as_ref(), &quotes, &mut self.book, now)
                .await
        };

        let cancellations = self
            .cancellation
            .run(self.maker.as_ref(), &quotes, &mut self.book, now)
            .await;

        TickReport {
            skipped: None,
            quotes: Some(quotes),
            placements,
            cancellations,
        }
    }

    /// Hedge a maker fill and account for it.
    pub async fn on_fill(&mut self, fill: &FillEvent) -> HedgeOutcome {
        let outcome = self
            .hedger
            .on_fill(self.taker.as_ref(), fill, &mut self.book)
            .await;

        match &outcome {
            HedgeOutcome::Ignored => {}
            HedgeOutcome::Hedged(record) => {
                self.profit.record_hedge(record.profit);
                info!(
                    profit = %record.profit,
                    total_profit = %self.profit.total(),
                    hedges = self.profit.hedge_count(),
                    "Potential profit updated"
                );
            }
            HedgeOutcome::Unhedged(_) => {
                self.profit.record_unhedged();
                if self.params.halt_on_unhedged_fill && !self.halted {
                    self.halted = true;
                    error!(
                        unhedged = self.profit.unhedged_count(),
                        "Halting quoting after unhedged fill"
                    );
                }
            }
        }

        outcome
    }

    /// Cancel every tracked quote. Returns how many cancels succeeded.
    #[instrument(skip(self))]
    pub async fn on_stop(&mut self) -> usize {
        let mut cancelled = 0;
        let pair = self.params.maker.pair.clone();
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let Some(order_id) = self.book.tracked(side).map(|o| o.order_id.clone()) else {
                continue;
            };
            match self.maker.cancel_order(&pair, &order_id).await {
                Ok(()) => {
                    self.book.release(side);
                    cancelled += 1;
                }
                Err(e) => warn!(%order_id, %side, error = %e, "Failed to cancel quote on shutdown"),
            }
        }
        info!(cancelled, "Engine stopped");
        cancelled
    }

    /// Gather balances, prices and live quotes into a report.
    pub async fn status(&self, now: DateTime<Utc>) -> VenueResult<StatusReport> {
        let quotes = MarketQuotes::fetch(self.maker.as_ref(), self.taker.as_ref(), &self.params).await?;
        let maker_mid = self.maker.mid_price(&self.params.maker.pair).await?;
        let taker_mid = self.taker.mid_price(&self.params.taker.pair).await?;
        let maker_orders = self.maker.active_orders().await?;

        let mut balances = Vec::with_capacity(4);
        for (venue, pair) in [
            (&self.maker, &self.params.maker.pair),
            (&self.taker, &self.params.taker.pair),
        ] {
            for asset in [&pair.base, &pair.quote] {
                balances.push(BalanceRow {
                    venue: venue.venue_id().clone(),
                    asset: asset.clone(),
                    amount: venue.available_balance(asset).await?,
                });
            }
        }

        Ok(StatusReport::build(StatusInputs {
            params: &self.params,
            quotes,
            maker_mid,
            taker_mid,
            maker_orders,
            balances,
            profit: &self.profit,
            halted: self.halted,
            now,
        }))
    }
}
