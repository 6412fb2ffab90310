//! Venue adapters - the closed connector surface plus an in-process replay
//! feed for backtests. Wire transports live outside this crate and speak to
//! the engine through [`MarketDataRouter`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::core::error::{Error, Result};
use crate::core::types::{FillReport, MarketTick, TradeTick};
use crate::router::MarketDataRouter;

/// Supported venues. The surface is small and closed, so a tagged variant
/// beats trait objects here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Bybit,
    Okx,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Bybit => "bybit",
            Venue::Okx => "okx",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Adapter capability shared by every market data connector.
///
/// Implementations normalize venue payloads into [`MarketTick`],
/// [`TradeTick`] and [`FillReport`] values and hand them to the router from
/// their own ingestion threads.
pub trait MarketDataConnector: Send + Sync {
    fn venue(&self) -> Venue;
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self);
    fn subscribe_orderbook(&mut self, symbol: &str) -> Result<()>;
    fn subscribe_trades(&mut self, symbol: &str) -> Result<()>;
    fn unsubscribe_orderbook(&mut self, symbol: &str) -> Result<()>;
    fn unsubscribe_trades(&mut self, symbol: &str) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// One recorded event for replay.
#[derive(Debug, Clone)]
pub enum ReplayEvent {
    Market(MarketTick),
    Trade(TradeTick),
    Fill(FillReport),
}

impl ReplayEvent {
    fn symbol(&self) -> &str {
        match self {
            ReplayEvent::Market(t) => &t.symbol,
            ReplayEvent::Trade(t) => &t.symbol,
            ReplayEvent::Fill(f) => &f.symbol,
        }
    }
}

/// In-process connector that replays recorded events through the router.
/// Drives backtests and tests without any wire transport.
pub struct ReplayConnector {
    venue: Venue,
    router: MarketDataRouter,
    events: Vec<ReplayEvent>,
    books: HashSet<String>,
    trades: HashSet<String>,
    connected: bool,
}

impl ReplayConnector {
    pub fn new(venue: Venue, router: MarketDataRouter) -> Self {
        Self {
            venue,
            router,
            events: Vec::new(),
            books: HashSet::new(),
            trades: HashSet::new(),
            connected: false,
        }
    }

    /// Append recorded events in delivery order.
    pub fn load(&mut self, events: impl IntoIterator<Item = ReplayEvent>) {
        self.events.extend(events);
    }

    /// Push every event for a subscribed symbol through the router, in load
    /// order. Returns the number of events delivered.
    pub fn replay(&self) -> Result<usize> {
        if !self.connected {
            return Err(Error::InvalidState("replay before connect".into()));
        }

        let mut delivered = 0;
        for event in &self.events {
            let wanted = match event {
                ReplayEvent::Market(_) | ReplayEvent::Fill(_) => {
                    self.books.contains(event.symbol())
                }
                ReplayEvent::Trade(_) => self.trades.contains(event.symbol()),
            };
            if !wanted {
                continue;
            }
            match event.clone() {
                ReplayEvent::Market(tick) => self.router.submit_market_tick(tick),
                ReplayEvent::Trade(tick) => self.router.submit_trade_tick(tick),
                ReplayEvent::Fill(report) => {
                    self.router.submit_fill_report(report);
                }
            }
            delivered += 1;
        }
        info!(venue = %self.venue, delivered, "replay finished");
        Ok(delivered)
    }
}

impl MarketDataConnector for ReplayConnector {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn subscribe_orderbook(&mut self, symbol: &str) -> Result<()> {
        self.books.insert(symbol.to_string());
        Ok(())
    }

    fn subscribe_trades(&mut self, symbol: &str) -> Result<()> {
        self.trades.insert(symbol.to_string());
        Ok(())
    }

    fn unsubscribe_orderbook(&mut self, symbol: &str) -> Result<()> {
        if self.books.remove(symbol) {
            Ok(())
        } else {
            Err(Error::UnknownEntity(format!("no orderbook subscription for '{symbol}'")))
        }
    }

    fn unsubscribe_trades(&mut self, symbol: &str) -> Result<()> {
        if self.trades.remove(symbol) {
            Ok(())
        } else {
            Err(Error::UnknownEntity(format!("no trade subscription for '{symbol}'")))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockMode;
    use crate::engine::TradingCoreBuilder;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_replay_respects_subscriptions() {
        let core = Arc::new(
            TradingCoreBuilder::new()
                .with_clock_mode(ClockMode::Backtest)
                .build(),
        );
        let router = MarketDataRouter::new(core.clone());

        let mut feed = ReplayConnector::new(Venue::Binance, router);
        feed.load([
            ReplayEvent::Market(MarketTick {
                symbol: "BTC-USDT".to_string(),
                price: dec("49900"),
                quantity: dec("1.5"),
                timestamp: 1,
                is_bid: true,
            }),
            ReplayEvent::Market(MarketTick {
                symbol: "ETH-USDT".to_string(),
                price: dec("3000"),
                quantity: dec("10"),
                timestamp: 2,
                is_bid: true,
            }),
        ]);

        assert!(feed.replay().is_err()); // not connected yet

        feed.connect().unwrap();
        assert!(feed.is_connected());
        feed.subscribe_orderbook("BTC-USDT").unwrap();

        assert_eq!(feed.replay().unwrap(), 1);
        assert!(core.registry().has("BTC-USDT"));
        assert!(!core.registry().has("ETH-USDT"));

        assert!(feed.unsubscribe_orderbook("BTC-USDT").is_ok());
        assert!(feed.unsubscribe_orderbook("BTC-USDT").is_err());
        assert_eq!(feed.replay().unwrap(), 0);

        feed.disconnect();
        assert!(!feed.is_connected());
    }
}
