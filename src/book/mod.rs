//! Order book - per-symbol L2 book assembled from venue depth updates.

pub mod registry;
pub mod side;

pub use registry::OrderBookRegistry;
pub use side::{BookSide, PriceLevel};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::clock::{Clock, Timestamp};
use crate::core::decimal::format_decimal;
use crate::core::types::OrderSide;

/// Book update listener, called with the symbol after each mutation.
/// Invoked synchronously under an internal lock: keep it short, never
/// blocking, never re-entering the same book.
pub type UpdateListener = Box<dyn Fn(&str) + Send + Sync>;

/// A (price, amount, update_id) batch entry for [`OrderBook::apply_updates`].
pub type LevelUpdate = (Decimal, Decimal, i64);

struct BookMeta {
    last_update_id: i64,
    last_update_time: Timestamp,
}

/// L2 order book for one symbol.
///
/// Mutators are serialized by an internal lock, so listeners observe a
/// monotonic `last_update_id`. Reads hit the per-side locks directly and
/// return consistent copies.
pub struct OrderBook {
    symbol: String,
    clock: Arc<Clock>,
    bids: BookSide,
    asks: BookSide,
    // Lock order within a book: meta before listeners, never the reverse.
    meta: Mutex<BookMeta>,
    listeners: Mutex<Vec<UpdateListener>>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, clock: Arc<Clock>) -> Self {
        let now = clock.now();
        Self {
            symbol: symbol.into(),
            clock,
            bids: BookSide::new(OrderSide::Buy),
            asks: BookSide::new(OrderSide::Sell),
            meta: Mutex::new(BookMeta {
                last_update_id: 0,
                last_update_time: now,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Apply one bid update: amount = 0 removes the level.
    pub fn update_bid(&self, price: Decimal, amount: Decimal, update_id: i64) {
        let mut meta = self.meta.lock();
        let now = self.clock.now();
        self.bids.update(price, amount, update_id, now);
        meta.last_update_id = update_id;
        meta.last_update_time = now;
        self.notify();
    }

    /// Apply one ask update: amount = 0 removes the level.
    pub fn update_ask(&self, price: Decimal, amount: Decimal, update_id: i64) {
        let mut meta = self.meta.lock();
        let now = self.clock.now();
        self.asks.update(price, amount, update_id, now);
        meta.last_update_id = update_id;
        meta.last_update_time = now;
        self.notify();
    }

    /// Apply a batch of updates atomically from the listener's perspective:
    /// all bids, then all asks, one stamp, one notification. `final_id` is
    /// assigned even when both batches are empty.
    pub fn apply_updates(&self, bids: &[LevelUpdate], asks: &[LevelUpdate], final_id: i64) {
        let mut meta = self.meta.lock();
        let now = self.clock.now();
        for &(price, amount, update_id) in bids {
            self.bids.update(price, amount, update_id, now);
        }
        for &(price, amount, update_id) in asks {
            self.asks.update(price, amount, update_id, now);
        }
        meta.last_update_id = final_id;
        meta.last_update_time = now;
        self.notify();
    }

    /// Best bid price, or zero when there are no bids. Zero is a sentinel:
    /// callers that must distinguish use [`OrderBook::has_bids`].
    pub fn best_bid(&self) -> Decimal {
        self.bids.best().map(|l| l.price).unwrap_or(Decimal::ZERO)
    }

    /// Best ask price, or zero when there are no asks.
    pub fn best_ask(&self) -> Decimal {
        self.asks.best().map(|l| l.price).unwrap_or(Decimal::ZERO)
    }

    pub fn has_bids(&self) -> bool {
        !self.bids.is_empty()
    }

    pub fn has_asks(&self) -> bool {
        !self.asks.is_empty()
    }

    /// Mid price, or zero when either side is empty.
    pub fn mid_price(&self) -> Decimal {
        let bid = self.best_bid();
        let ask = self.best_ask();
        if bid.is_zero() || ask.is_zero() {
            return Decimal::ZERO;
        }
        (bid + ask) / Decimal::from(2)
    }

    /// best_ask - best_bid, or zero when either side is empty.
    pub fn spread(&self) -> Decimal {
        let bid = self.best_bid();
        let ask = self.best_ask();
        if bid.is_zero() || ask.is_zero() {
            return Decimal::ZERO;
        }
        ask - bid
    }

    /// Bid levels best-first; limit = 0 returns all.
    pub fn bids(&self, limit: usize) -> Vec<PriceLevel> {
        self.bids.levels(limit)
    }

    /// Ask levels best-first; limit = 0 returns all.
    pub fn asks(&self, limit: usize) -> Vec<PriceLevel> {
        self.asks.levels(limit)
    }

    /// Average fill price of a market order of `quantity` walking the
    /// opposite side, or zero when liquidity is insufficient.
    pub fn impact_price(&self, is_buy: bool, quantity: Decimal) -> Decimal {
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let levels = if is_buy { self.asks(0) } else { self.bids(0) };
        let mut remaining = quantity;
        let mut total_cost = Decimal::ZERO;

        for level in levels {
            if remaining.is_zero() {
                break;
            }
            let consumed = level.amount.min(remaining);
            total_cost += consumed * level.price;
            remaining -= consumed;
        }

        if remaining > Decimal::ZERO {
            return Decimal::ZERO;
        }
        total_cost / quantity
    }

    /// Volume on the opposite side touched by a sweep to `price`.
    pub fn volume_at_price(&self, is_buy: bool, price: Decimal) -> Decimal {
        if is_buy {
            self.asks.volume_at_or_better(price)
        } else {
            self.bids.volume_at_or_better(price)
        }
    }

    /// Register an update listener. One invocation per successful mutator.
    pub fn register_update_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(callback));
    }

    pub fn last_update_id(&self) -> i64 {
        self.meta.lock().last_update_id
    }

    pub fn last_update_time(&self) -> Timestamp {
        self.meta.lock().last_update_time
    }

    /// Drop all levels and reset the sequence.
    pub fn clear(&self) {
        let mut meta = self.meta.lock();
        self.bids.clear();
        self.asks.clear();
        meta.last_update_id = 0;
        meta.last_update_time = self.clock.now();
    }

    /// False only when both sides are populated and the book is crossed.
    pub fn is_valid(&self) -> bool {
        let bid = self.best_bid();
        let ask = self.best_ask();
        if bid.is_zero() || ask.is_zero() {
            return true;
        }
        bid < ask
    }

    /// Canonical snapshot: {symbol, timestamp (ms), lastUpdateId, bids, asks}
    /// with [price, amount] string pairs, `depth` levels per side.
    pub fn to_json(&self, depth: usize) -> Value {
        let (last_update_id, last_update_time) = {
            let meta = self.meta.lock();
            (meta.last_update_id, meta.last_update_time)
        };

        let levels_json = |levels: Vec<PriceLevel>| -> Value {
            levels
                .into_iter()
                .map(|l| json!([format_decimal(l.price), format_decimal(l.amount)]))
                .collect()
        };

        json!({
            "symbol": self.symbol,
            "timestamp": last_update_time.as_millis(),
            "lastUpdateId": last_update_id,
            "bids": levels_json(self.bids(depth)),
            "asks": levels_json(self.asks(depth)),
        })
    }

    fn notify(&self) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener(&self.symbol);
        }
    }
}
