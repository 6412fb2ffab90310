//! Order - client order entity with status state machine, execution ledger
//! and stable JSON serialization.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::{ambient, Clock, Timestamp};
use crate::core::decimal::{format_decimal, parse_decimal};
use crate::core::error::{Error, Result};
use crate::core::types::{split_trading_pair, OrderSide, OrderStatus, OrderType};

/// Tolerance between the execution ledger sum and `filled_quantity`.
fn fill_tolerance() -> Decimal {
    Decimal::new(1, 8) // 0.00000001
}

/// One fill on a venue, kept for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub execution_id: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee_amount: Decimal,
    pub fee_currency: String,
    pub timestamp: Timestamp,
}

impl Execution {
    pub fn value(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn to_json(&self) -> Value {
        json!({
            "execution_id": self.execution_id,
            "quantity": format_decimal(self.quantity),
            "price": format_decimal(self.price),
            "fee_amount": format_decimal(self.fee_amount),
            "fee_currency": self.fee_currency,
            "timestamp": self.timestamp.as_millis(),
            "value": format_decimal(self.value()),
        })
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(Self {
            execution_id: str_field(value, "execution_id")?.to_string(),
            quantity: dec_field(value, "quantity")?,
            price: dec_field(value, "price")?,
            fee_amount: dec_field(value, "fee_amount")?,
            fee_currency: str_field(value, "fee_currency")?.to_string(),
            timestamp: Timestamp::from_millis(i64_field(value, "timestamp")?),
        })
    }
}

/// Client order.
///
/// Identity is `client_order_id`; two orders with the same id are equal.
/// Status moves PENDING -> OPEN -> PARTIAL -> FILLED with CANCELLED,
/// REJECTED and EXPIRED as the other terminal exits; terminal states are
/// never left.
#[derive(Debug, Clone)]
pub struct Order {
    client_order_id: String,
    trading_pair: String,
    side: OrderSide,
    order_type: OrderType,
    base_currency: String,
    quote_currency: String,
    price: Decimal,
    quantity: Decimal,
    filled_quantity: Decimal,
    creation_time: Timestamp,
    last_update_time: Timestamp,
    status: OrderStatus,
    position_tag: String,
    exchange_order_id: String,
    executions: Vec<Execution>,
    rejection_reason: Option<String>,
    expiry_time: Option<Timestamp>,
}

impl Order {
    /// New limit order, timestamps stamped from `clock`.
    pub fn limit(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        clock: &Clock,
    ) -> Self {
        Self::with_type(
            client_order_id,
            trading_pair,
            side,
            OrderType::Limit,
            price,
            quantity,
            clock,
        )
    }

    /// New market order; price is unset.
    pub fn market(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        clock: &Clock,
    ) -> Self {
        Self::with_type(
            client_order_id,
            trading_pair,
            side,
            OrderType::Market,
            Decimal::ZERO,
            quantity,
            clock,
        )
    }

    pub fn with_type(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        price: Decimal,
        quantity: Decimal,
        clock: &Clock,
    ) -> Self {
        let trading_pair = trading_pair.into();
        let (base_currency, quote_currency) = split_trading_pair(&trading_pair);
        let now = clock.now();
        Self {
            client_order_id: client_order_id.into(),
            trading_pair,
            side,
            order_type,
            base_currency,
            quote_currency,
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            creation_time: now,
            last_update_time: now,
            status: OrderStatus::Pending,
            position_tag: String::new(),
            exchange_order_id: String::new(),
            executions: Vec::new(),
            rejection_reason: None,
            expiry_time: None,
        }
    }

    // Accessors

    pub fn client_order_id(&self) -> &str {
        &self.client_order_id
    }

    pub fn trading_pair(&self) -> &str {
        &self.trading_pair
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn filled_quantity(&self) -> Decimal {
        self.filled_quantity
    }

    pub fn creation_time(&self) -> Timestamp {
        self.creation_time
    }

    pub fn last_update_time(&self) -> Timestamp {
        self.last_update_time
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn position_tag(&self) -> &str {
        &self.position_tag
    }

    pub fn exchange_order_id(&self) -> &str {
        &self.exchange_order_id
    }

    pub fn executions(&self) -> &[Execution] {
        &self.executions
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn expiry_time(&self) -> Option<Timestamp> {
        self.expiry_time
    }

    pub fn is_buy(&self) -> bool {
        self.side == OrderSide::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == OrderSide::Sell
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    /// OPEN or PARTIAL: live in the market.
    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::Partial)
    }

    // Derived values

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Filled fraction in percent.
    pub fn fill_percentage(&self) -> Decimal {
        if self.quantity.is_zero() {
            return Decimal::ZERO;
        }
        (self.filled_quantity / self.quantity) * Decimal::from(100)
    }

    /// Sum of quantity * price over the execution ledger.
    pub fn executed_value(&self) -> Decimal {
        self.executions.iter().map(Execution::value).sum()
    }

    /// Volume-weighted execution price; zero when unfilled.
    pub fn average_execution_price(&self) -> Decimal {
        if self.filled_quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.executed_value() / self.filled_quantity
    }

    /// Fees accumulated per currency. No conversion is applied.
    pub fn total_fees(&self) -> BTreeMap<String, Decimal> {
        let mut fees = BTreeMap::new();
        for exec in &self.executions {
            *fees.entry(exec.fee_currency.clone()).or_insert(Decimal::ZERO) += exec.fee_amount;
        }
        fees
    }

    pub fn age_ms(&self, now: Timestamp) -> i64 {
        (now.as_millis() - self.creation_time.as_millis()).max(0)
    }

    pub fn time_since_last_update_ms(&self, now: Timestamp) -> i64 {
        (now.as_millis() - self.last_update_time.as_millis()).max(0)
    }

    // State machine

    /// Attempt a status transition; illegal transitions (including any move
    /// out of a terminal state) return false and change nothing.
    fn transition(&mut self, next: OrderStatus, now: Timestamp) -> bool {
        use OrderStatus::*;
        let legal = match self.status {
            Pending => matches!(next, Open | Rejected),
            Open => matches!(next, Partial | Filled | Cancelled | Expired),
            Partial => matches!(next, Partial | Filled | Cancelled | Expired),
            Filled | Cancelled | Rejected | Expired => false,
        };
        if legal {
            self.status = next;
            self.last_update_time = now;
        }
        legal
    }

    /// PENDING -> OPEN on acceptance.
    pub fn mark_open(&mut self, now: Timestamp) -> bool {
        self.transition(OrderStatus::Open, now)
    }

    /// PENDING -> REJECTED with a reason.
    pub fn mark_rejected(&mut self, reason: impl Into<String>, now: Timestamp) -> bool {
        if self.transition(OrderStatus::Rejected, now) {
            self.rejection_reason = Some(reason.into());
            true
        } else {
            false
        }
    }

    pub fn mark_cancelled(&mut self, now: Timestamp) -> bool {
        self.transition(OrderStatus::Cancelled, now)
    }

    pub fn mark_expired(&mut self, now: Timestamp) -> bool {
        self.transition(OrderStatus::Expired, now)
    }

    pub fn set_exchange_order_id(&mut self, id: impl Into<String>, now: Timestamp) {
        self.exchange_order_id = id.into();
        self.last_update_time = now;
    }

    pub fn set_position_tag(&mut self, tag: impl Into<String>) {
        self.position_tag = tag.into();
    }

    pub fn set_price(&mut self, price: Decimal, now: Timestamp) {
        self.price = price;
        self.last_update_time = now;
    }

    /// Apply a fill with no venue execution detail: a synthetic execution
    /// (no fee) is appended to keep the ledger consistent.
    pub fn apply_fill(&mut self, quantity: Decimal, price: Decimal, now: Timestamp) -> Result<()> {
        let execution = Execution {
            execution_id: Uuid::new_v4().to_string(),
            quantity,
            price,
            fee_amount: Decimal::ZERO,
            fee_currency: self.quote_currency.clone(),
            timestamp: now,
        };
        self.record_execution(execution, now)
    }

    /// Apply a fill with full venue execution detail.
    pub fn add_execution(
        &mut self,
        execution_id: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
        fee_amount: Decimal,
        fee_currency: impl Into<String>,
        now: Timestamp,
    ) -> Result<()> {
        let execution = Execution {
            execution_id: execution_id.into(),
            quantity,
            price,
            fee_amount,
            fee_currency: fee_currency.into(),
            timestamp: now,
        };
        self.record_execution(execution, now)
    }

    /// Shared fill accounting. Quantity beyond the remaining amount is
    /// clamped; the excess is reported as a validation error while the
    /// order itself stays consistent.
    fn record_execution(&mut self, mut execution: Execution, now: Timestamp) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "fill on terminal order {} ({})",
                self.client_order_id, self.status
            )));
        }
        if execution.quantity <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "non-positive fill quantity {} for order {}",
                format_decimal(execution.quantity),
                self.client_order_id
            )));
        }

        let remaining = self.remaining_quantity();
        let excess = execution.quantity - remaining;
        if excess > Decimal::ZERO {
            execution.quantity = remaining;
        }

        if !execution.quantity.is_zero() {
            self.filled_quantity += execution.quantity;
            self.executions.push(execution);
        }
        self.last_update_time = now;
        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };

        if excess > Decimal::ZERO {
            return Err(Error::Validation(format!(
                "fill exceeds remaining quantity by {} on order {}; clamped",
                format_decimal(excess),
                self.client_order_id
            )));
        }
        Ok(())
    }

    /// Structural validation including the execution-ledger invariant.
    pub fn is_valid(&self) -> bool {
        if self.client_order_id.is_empty() || self.trading_pair.is_empty() {
            return false;
        }
        if self.quantity <= Decimal::ZERO {
            return false;
        }
        if self.order_type == OrderType::Limit && self.price <= Decimal::ZERO {
            return false;
        }
        if self.filled_quantity < Decimal::ZERO || self.filled_quantity > self.quantity {
            return false;
        }

        let executed: Decimal = self.executions.iter().map(|e| e.quantity).sum();
        (executed - self.filled_quantity).abs() <= fill_tolerance()
    }

    /// Book-priority comparator: better price first (higher for BUY, lower
    /// for SELL), ties broken by earlier creation.
    pub fn priority_cmp(&self, other: &Order) -> Ordering {
        let by_price = match self.side {
            OrderSide::Buy => other.price.cmp(&self.price),
            OrderSide::Sell => self.price.cmp(&other.price),
        };
        by_price.then(self.creation_time.cmp(&other.creation_time))
    }

    // Serialization

    /// Stable JSON: every stored field plus the derived fields
    /// {remaining_quantity, fill_percentage, age_ms, is_active,
    /// average_execution_price, total_fees}.
    pub fn to_json(&self, now: Timestamp) -> Value {
        let fees: Map<String, Value> = self
            .total_fees()
            .into_iter()
            .map(|(ccy, amount)| (ccy, Value::String(format_decimal(amount))))
            .collect();

        let mut obj = json!({
            "client_order_id": self.client_order_id,
            "trading_pair": self.trading_pair,
            "side": self.side.as_str(),
            "type": self.order_type.as_str(),
            "base_currency": self.base_currency,
            "quote_currency": self.quote_currency,
            "price": format_decimal(self.price),
            "quantity": format_decimal(self.quantity),
            "filled_quantity": format_decimal(self.filled_quantity),
            "creation_time": self.creation_time.as_millis(),
            "last_update_time": self.last_update_time.as_millis(),
            "status": self.status.as_str(),
            "position": self.position_tag,
            "exchange_order_id": self.exchange_order_id,
            "executions": self.executions.iter().map(Execution::to_json).collect::<Vec<_>>(),
            "remaining_quantity": format_decimal(self.remaining_quantity()),
            "fill_percentage": format_decimal(self.fill_percentage()),
            "age_ms": self.age_ms(now),
            "is_active": self.is_active(),
            "average_execution_price": format_decimal(self.average_execution_price()),
            "total_fees": fees,
        });

        if let Some(reason) = &self.rejection_reason {
            obj["rejection_reason"] = Value::String(reason.clone());
        }
        if let Some(expiry) = self.expiry_time {
            obj["expiry_time"] = Value::Number(expiry.as_millis().into());
        }
        obj
    }

    pub fn to_json_string(&self, now: Timestamp) -> String {
        serde_json::to_string_pretty(&self.to_json(now)).unwrap_or_default()
    }

    /// Restore an order from its JSON form. Stored fields are restored
    /// exactly; derived fields in the input are ignored and recomputed.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut executions = Vec::new();
        if let Some(items) = value.get("executions").and_then(Value::as_array) {
            for item in items {
                executions.push(Execution::from_json(item)?);
            }
        }

        let order = Self {
            client_order_id: str_field(value, "client_order_id")?.to_string(),
            trading_pair: str_field(value, "trading_pair")?.to_string(),
            side: OrderSide::parse(str_field(value, "side")?)?,
            order_type: OrderType::parse(str_field(value, "type")?)?,
            base_currency: str_field(value, "base_currency")?.to_string(),
            quote_currency: str_field(value, "quote_currency")?.to_string(),
            price: dec_field(value, "price")?,
            quantity: dec_field(value, "quantity")?,
            filled_quantity: dec_field(value, "filled_quantity")?,
            creation_time: Timestamp::from_millis(i64_field(value, "creation_time")?),
            last_update_time: Timestamp::from_millis(i64_field(value, "last_update_time")?),
            status: OrderStatus::parse(str_field(value, "status")?)?,
            position_tag: value
                .get("position")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            exchange_order_id: value
                .get("exchange_order_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            executions,
            rejection_reason: value
                .get("rejection_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            expiry_time: value
                .get("expiry_time")
                .and_then(Value::as_i64)
                .map(Timestamp::from_millis),
        };
        Ok(order)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.client_order_id == other.client_order_id
    }
}

impl Eq for Order {}

impl Hash for Order {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.client_order_id.hash(state);
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Order(id={}, pair={}, side={}, type={}, price={}, quantity={}, filled={}, status={})",
            self.client_order_id,
            self.trading_pair,
            self.side,
            self.order_type,
            format_decimal(self.price),
            format_decimal(self.quantity),
            format_decimal(self.filled_quantity),
            self.status
        )
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(format!("missing or non-string field '{key}'")))
}

fn i64_field(value: &Value, key: &str) -> Result<i64> {
    value
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Validation(format!("missing or non-integer field '{key}'")))
}

fn dec_field(value: &Value, key: &str) -> Result<Decimal> {
    parse_decimal(str_field(value, key)?)
}

/// Fluent order construction with build-time validation.
pub struct OrderBuilder {
    client_order_id: String,
    trading_pair: String,
    side: Option<OrderSide>,
    order_type: OrderType,
    price: Decimal,
    quantity: Decimal,
    position_tag: String,
    expiry_time: Option<Timestamp>,
    clock: Option<Arc<Clock>>,
}

impl OrderBuilder {
    pub fn new() -> Self {
        Self {
            client_order_id: String::new(),
            trading_pair: String::new(),
            side: None,
            order_type: OrderType::Limit,
            price: Decimal::ZERO,
            quantity: Decimal::ZERO,
            position_tag: String::new(),
            expiry_time: None,
            clock: None,
        }
    }

    pub fn id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = client_order_id.into();
        self
    }

    pub fn pair(mut self, trading_pair: impl Into<String>) -> Self {
        self.trading_pair = trading_pair.into();
        self
    }

    pub fn buy(mut self, quantity: Decimal) -> Self {
        self.side = Some(OrderSide::Buy);
        self.quantity = quantity;
        self
    }

    pub fn sell(mut self, quantity: Decimal) -> Self {
        self.side = Some(OrderSide::Sell);
        self.quantity = quantity;
        self
    }

    pub fn at_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self.order_type = OrderType::Limit;
        self
    }

    pub fn market_order(mut self) -> Self {
        self.order_type = OrderType::Market;
        self
    }

    pub fn limit_order(mut self) -> Self {
        self.order_type = OrderType::Limit;
        self
    }

    pub fn position(mut self, tag: impl Into<String>) -> Self {
        self.position_tag = tag.into();
        self
    }

    pub fn expires_at(mut self, expiry: Timestamp) -> Self {
        self.expiry_time = Some(expiry);
        self
    }

    /// Stamp timestamps from this clock instead of the ambient one.
    pub fn with_clock(mut self, clock: Arc<Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Order> {
        if self.client_order_id.is_empty() {
            return Err(Error::Validation("order id is required".into()));
        }
        if self.trading_pair.is_empty() {
            return Err(Error::Validation("trading pair is required".into()));
        }
        let side = self
            .side
            .ok_or_else(|| Error::Validation("order side is required".into()))?;
        if self.quantity <= Decimal::ZERO {
            return Err(Error::Validation(
                "quantity must be greater than zero".into(),
            ));
        }
        if self.order_type == OrderType::Limit && self.price <= Decimal::ZERO {
            return Err(Error::Validation("price is required for limit orders".into()));
        }

        let clock = self.clock.unwrap_or_else(ambient);
        let mut order = Order::with_type(
            self.client_order_id,
            self.trading_pair,
            side,
            self.order_type,
            self.price,
            self.quantity,
            &clock,
        );
        order.position_tag = self.position_tag;
        order.expiry_time = self.expiry_time;
        Ok(order)
    }
}

impl Default for OrderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
