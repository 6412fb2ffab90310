//! One side of a limit order book: price levels under a single mutex.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::clock::Timestamp;
use crate::core::types::OrderSide;

/// A venue-published aggregate at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
    pub update_id: i64,
    pub arrival: Timestamp,
}

/// Price levels for one side of one symbol.
///
/// BUY iterates best-first by descending price, SELL by ascending price.
/// Prices are unique within a side; ties on price cannot occur, so the
/// arrival stamp only records when the level last changed.
pub struct BookSide {
    side: OrderSide,
    levels: Mutex<BTreeMap<Decimal, PriceLevel>>,
}

impl BookSide {
    pub fn new(side: OrderSide) -> Self {
        Self {
            side,
            levels: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    /// Insert, replace or remove the level at `price`. An amount of zero
    /// removes the level (no-op when absent). Replacing an existing price
    /// re-stamps `arrival`: these are exchange-published aggregates, not
    /// resting orders, so a replace is a fresh level.
    pub fn update(&self, price: Decimal, amount: Decimal, update_id: i64, now: Timestamp) {
        let mut levels = self.levels.lock();
        if amount.is_zero() {
            levels.remove(&price);
        } else {
            levels.insert(
                price,
                PriceLevel {
                    price,
                    amount,
                    update_id,
                    arrival: now,
                },
            );
        }
    }

    /// Best level for this side, if any.
    pub fn best(&self) -> Option<PriceLevel> {
        let levels = self.levels.lock();
        match self.side {
            OrderSide::Buy => levels.values().next_back().copied(),
            OrderSide::Sell => levels.values().next().copied(),
        }
    }

    /// First `limit` levels best-first; limit = 0 returns all. The returned
    /// vector is a copy taken under the lock.
    pub fn levels(&self, limit: usize) -> Vec<PriceLevel> {
        let levels = self.levels.lock();
        let take = if limit == 0 { levels.len() } else { limit };
        match self.side {
            OrderSide::Buy => levels.values().rev().take(take).copied().collect(),
            OrderSide::Sell => levels.values().take(take).copied().collect(),
        }
    }

    /// Total amount at or better than `price`: >= for BUY, <= for SELL.
    /// Stops at the first non-qualifying level, exploiting the sort order.
    pub fn volume_at_or_better(&self, price: Decimal) -> Decimal {
        let mut total = Decimal::ZERO;
        for level in self.levels(0) {
            let qualifies = match self.side {
                OrderSide::Buy => level.price >= price,
                OrderSide::Sell => level.price <= price,
            };
            if !qualifies {
                break;
            }
            total += level.amount;
        }
        total
    }

    pub fn clear(&self) {
        self.levels.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.levels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_update_inserts_single_level_per_price() {
        let side = BookSide::new(OrderSide::Buy);
        side.update(dec("49900"), dec("1.5"), 1, ts(1));
        side.update(dec("49900"), dec("2.0"), 2, ts(2));

        let levels = side.levels(0);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].amount, dec("2.0"));
        assert_eq!(levels[0].update_id, 2);
        assert_eq!(levels[0].arrival, ts(2));
    }

    #[test]
    fn test_zero_amount_removes_level() {
        let side = BookSide::new(OrderSide::Sell);
        side.update(dec("50000"), dec("1.2"), 1, ts(1));
        side.update(dec("50000"), Decimal::ZERO, 2, ts(2));
        assert!(side.is_empty());

        // Removing an absent price is a no-op
        side.update(dec("50000"), Decimal::ZERO, 3, ts(3));
        assert!(side.is_empty());
    }

    #[test]
    fn test_buy_side_iterates_descending() {
        let side = BookSide::new(OrderSide::Buy);
        side.update(dec("49850"), dec("2.3"), 1, ts(1));
        side.update(dec("49900"), dec("1.5"), 2, ts(2));
        side.update(dec("49700"), dec("0.4"), 3, ts(3));

        let prices: Vec<_> = side.levels(0).iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec("49900"), dec("49850"), dec("49700")]);
        assert_eq!(side.best().unwrap().price, dec("49900"));
    }

    #[test]
    fn test_sell_side_iterates_ascending() {
        let side = BookSide::new(OrderSide::Sell);
        side.update(dec("50050"), dec("0.8"), 1, ts(1));
        side.update(dec("50000"), dec("1.2"), 2, ts(2));

        let prices: Vec<_> = side.levels(0).iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec("50000"), dec("50050")]);
        assert_eq!(side.best().unwrap().price, dec("50000"));
    }

    #[test]
    fn test_levels_limit() {
        let side = BookSide::new(OrderSide::Sell);
        for i in 0..5 {
            side.update(dec("100") + Decimal::from(i), dec("1"), i as i64, ts(i as i64));
        }
        assert_eq!(side.levels(2).len(), 2);
        assert_eq!(side.levels(0).len(), 5);
    }

    #[test]
    fn test_volume_at_or_better() {
        let side = BookSide::new(OrderSide::Buy);
        side.update(dec("49900"), dec("1.5"), 1, ts(1));
        side.update(dec("49850"), dec("2.3"), 2, ts(2));
        side.update(dec("49800"), dec("1.0"), 3, ts(3));

        assert_eq!(side.volume_at_or_better(dec("49850")), dec("3.8"));
        assert_eq!(side.volume_at_or_better(dec("49901")), Decimal::ZERO);
        assert_eq!(side.volume_at_or_better(dec("49000")), dec("4.8"));

        let asks = BookSide::new(OrderSide::Sell);
        asks.update(dec("50000"), dec("1.2"), 4, ts(4));
        asks.update(dec("50050"), dec("0.8"), 5, ts(5));
        assert_eq!(asks.volume_at_or_better(dec("50000")), dec("1.2"));
        assert_eq!(asks.volume_at_or_better(dec("50050")), dec("2.0"));
    }
}
