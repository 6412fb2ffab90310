//! Core types - strong typing shared across the engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::core::error::{Error, Result};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(Error::Validation(format!("invalid order side '{s}'"))),
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "LIMIT" => Ok(OrderType::Limit),
            "MARKET" => Ok(OrderType::Market),
            "STOP_LIMIT" => Ok(OrderType::StopLimit),
            "STOP_MARKET" => Ok(OrderType::StopMarket),
            _ => Err(Error::Validation(format!("invalid order type '{s}'"))),
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "OPEN" => Ok(OrderStatus::Open),
            "PARTIAL" => Ok(OrderStatus::Partial),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            _ => Err(Error::Validation(format!("invalid order status '{s}'"))),
        }
    }

    /// FILLED, CANCELLED, REJECTED and EXPIRED are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade execution report stored in the history ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub timestamp: Timestamp,
}

/// Portfolio position for one symbol. Quantity is signed: negative is short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub last_update: Timestamp,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_update: Timestamp::default(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Cost-basis value of the open quantity.
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.average_price
    }
}

/// Account balance for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
    pub last_update: Timestamp,
}

impl Balance {
    pub fn new(currency: impl Into<String>, total: Decimal, available: Decimal) -> Self {
        Self {
            currency: currency.into(),
            total,
            available,
            locked: total - available,
            last_update: Timestamp::default(),
        }
    }

    pub fn empty(currency: impl Into<String>) -> Self {
        Self::new(currency, Decimal::ZERO, Decimal::ZERO)
    }
}

/// Pre-trade risk limits.
///
/// `max_orders_per_second` and `max_drawdown` are carried for configuration
/// and serialization; the risk gate enforces order size, position size and
/// daily loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_order_size: Decimal,
    pub max_daily_loss: Decimal,
    pub max_drawdown: Decimal,
    pub max_orders_per_second: u32,
    pub enable_position_limits: bool,
    pub enable_order_limits: bool,
    pub enable_loss_limits: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(1000),
            max_order_size: Decimal::from(100),
            max_daily_loss: Decimal::from(10_000),
            max_drawdown: Decimal::ZERO,
            max_orders_per_second: 100,
            enable_position_limits: true,
            enable_order_limits: true,
            enable_loss_limits: true,
        }
    }
}

/// Normalized depth update from a venue adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Venue timestamp, ms since epoch. Doubles as the update id when the
    /// adapter has no native sequence number.
    pub timestamp: u64,
    pub is_bid: bool,
}

/// Normalized public trade from a venue adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeTick {
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: u64,
    /// "buy" or "sell" as published by the venue
    pub side: String,
}

/// Private fill report for one of our orders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee_amount: Decimal,
    pub fee_currency: String,
    pub timestamp: u64,
}

/// Split "BASE-QUOTE" into its currencies. Pairs without a dash fall back to
/// (pair, "USDT").
pub fn split_trading_pair(pair: &str) -> (String, String) {
    match pair.split_once('-') {
        Some((base, quote)) => (base.to_string(), quote.to_string()),
        None => (pair.to_string(), "USDT".to_string()),
    }
}

/// Validate the `<BASE>-<QUOTE>` grammar: non-empty uppercase alphanumeric
/// segments. A pair without a dash is a bare base currency and is accepted.
pub fn validate_trading_pair(pair: &str) -> Result<()> {
    let segment_ok =
        |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());

    let valid = match pair.split_once('-') {
        Some((base, quote)) => segment_ok(base) && segment_ok(quote),
        None => segment_ok(pair),
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("malformed trading pair '{pair}'")))
    }
}
