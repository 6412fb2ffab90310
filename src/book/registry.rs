//! Order book registry - symbol to book lookup shared across threads.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::book::OrderBook;
use crate::clock::Clock;

/// Concurrent symbol -> [`OrderBook`] map. Reads take a shared lock and
/// never block each other; create/remove/clear take the exclusive lock.
pub struct OrderBookRegistry {
    clock: Arc<Clock>,
    books: RwLock<HashMap<String, Arc<OrderBook>>>,
}

impl OrderBookRegistry {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Stable handle to the book for `symbol`, creating it if absent.
    pub fn get_or_create(&self, symbol: &str) -> Arc<OrderBook> {
        if let Some(book) = self.books.read().get(symbol) {
            return book.clone();
        }

        let mut books = self.books.write();
        books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(OrderBook::new(symbol, self.clock.clone())))
            .clone()
    }

    /// The book for `symbol`, if one exists.
    pub fn get(&self, symbol: &str) -> Option<Arc<OrderBook>> {
        self.books.read().get(symbol).cloned()
    }

    pub fn has(&self, symbol: &str) -> bool {
        self.books.read().contains_key(symbol)
    }

    /// Remove the book for `symbol`. Returns false when absent.
    pub fn remove(&self, symbol: &str) -> bool {
        self.books.write().remove(symbol).is_some()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    pub fn clear_all(&self) {
        self.books.write().clear();
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> OrderBookRegistry {
        OrderBookRegistry::new(Arc::new(Clock::backtest()))
    }

    #[test]
    fn test_get_or_create_returns_stable_handle() {
        let reg = registry();
        let a = reg.get_or_create("BTC-USDT");
        let b = reg.get_or_create("BTC-USDT");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_has_remove_symbols() {
        let reg = registry();
        reg.get_or_create("BTC-USDT");
        reg.get_or_create("ETH-USDT");

        assert!(reg.has("BTC-USDT"));
        assert!(!reg.has("SOL-USDT"));

        let mut symbols = reg.symbols();
        symbols.sort();
        assert_eq!(symbols, vec!["BTC-USDT", "ETH-USDT"]);

        assert!(reg.remove("BTC-USDT"));
        assert!(!reg.remove("BTC-USDT"));
        assert_eq!(reg.len(), 1);

        reg.clear_all();
        assert!(reg.is_empty());
    }
}
