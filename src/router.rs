//! Market data router - pushes normalized venue ticks into the order books
//! and forwards trade/fill events to the trading core.

use std::sync::Arc;
use tracing::debug;

use crate::core::types::{FillReport, MarketTick, TradeTick};
use crate::engine::TradingCore;

/// Ingestion front door for venue adapters.
///
/// Each submit call costs O(1) book work plus queue pushes; listener
/// delivery is best-effort fan-out through the engine's event queue, so a
/// slow consumer never blocks the ingestion thread.
#[derive(Clone)]
pub struct MarketDataRouter {
    core: Arc<TradingCore>,
}

impl MarketDataRouter {
    pub fn new(core: Arc<TradingCore>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<TradingCore> {
        &self.core
    }

    /// Apply a depth update to the book for the tick's symbol, creating the
    /// book on first sight. The venue timestamp doubles as the update id
    /// when the adapter has no native sequence number.
    pub fn submit_market_tick(&self, tick: MarketTick) {
        let book = self.core.registry().get_or_create(&tick.symbol);
        let update_id = tick.timestamp as i64;
        if tick.is_bid {
            book.update_bid(tick.price, tick.quantity, update_id);
        } else {
            book.update_ask(tick.price, tick.quantity, update_id);
        }

        let mid = book.mid_price();
        if !mid.is_zero() {
            self.core.mark_to_market(&tick.symbol, mid);
        }

        debug!(symbol = %tick.symbol, is_bid = tick.is_bid, "market tick routed");
        self.core
            .emit_market_data(tick.symbol, tick.price, tick.quantity, tick.is_bid);
    }

    /// Forward a public trade. Trades are informational: the book is only
    /// mutated by depth updates.
    pub fn submit_trade_tick(&self, tick: TradeTick) {
        let is_buy = tick.side == "buy";
        self.core
            .emit_trade_event(tick.symbol, tick.price, tick.quantity, is_buy);
    }

    /// Forward a private fill into order/position/balance accounting.
    pub fn submit_fill_report(&self, report: FillReport) -> bool {
        self.core.on_exchange_fill(report)
    }
}
