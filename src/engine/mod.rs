//! Trading core - orchestrates order lifecycle, portfolio accounting,
//! pre-trade risk and event dispatch over the order book registry.

pub mod events;

pub use events::EventQueue;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::book::OrderBookRegistry;
use crate::clock::{Clock, ClockMode, Timestamp, POLL_INTERVAL};
use crate::core::config::EngineConfig;
use crate::core::decimal::{format_decimal, parse_decimal};
use crate::core::error::{Error, Result};
use crate::core::types::{
    split_trading_pair, validate_trading_pair, Balance, FillReport, OrderSide, Position,
    RiskLimits, Trade,
};
use crate::order::Order;

pub type OrderCallback = Arc<dyn Fn(&Order) + Send + Sync>;
pub type TradeCallback = Arc<dyn Fn(&Trade) + Send + Sync>;
pub type PositionCallback = Arc<dyn Fn(&Position) + Send + Sync>;
pub type BalanceCallback = Arc<dyn Fn(&Balance) + Send + Sync>;
/// (symbol, price, quantity, is_bid)
pub type MarketDataCallback = Arc<dyn Fn(&str, Decimal, Decimal, bool) + Send + Sync>;
/// (symbol, price, quantity, is_buy)
pub type TradeEventCallback = Arc<dyn Fn(&str, Decimal, Decimal, bool) + Send + Sync>;
/// (source, message)
pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Strategy-facing callback bundle. Every field defaults to no-op; all
/// invocations are delivered through the engine's event queue, never under
/// a state lock.
#[derive(Default, Clone)]
pub struct TradingCallbacks {
    pub on_order_filled: Option<OrderCallback>,
    pub on_order_cancelled: Option<OrderCallback>,
    pub on_order_rejected: Option<OrderCallback>,
    pub on_trade_executed: Option<TradeCallback>,
    pub on_position_update: Option<PositionCallback>,
    pub on_balance_update: Option<BalanceCallback>,
    pub on_market_data: Option<MarketDataCallback>,
    pub on_trade: Option<TradeEventCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Everything behind the single core state lock.
struct CoreState {
    active_orders: BTreeMap<String, Order>,
    positions: BTreeMap<String, Position>,
    balances: BTreeMap<String, Balance>,
    trade_history: Vec<Trade>,
    risk_limits: RiskLimits,
    daily_pnl: Decimal,
    total_pnl: Decimal,
}

impl CoreState {
    fn new() -> Self {
        Self {
            active_orders: BTreeMap::new(),
            positions: BTreeMap::new(),
            balances: BTreeMap::new(),
            trade_history: Vec::new(),
            risk_limits: RiskLimits::default(),
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
        }
    }

    fn risk_violation(&self, order: &Order) -> Option<String> {
        let limits = &self.risk_limits;

        if limits.enable_order_limits && order.quantity() > limits.max_order_size {
            return Some(format!(
                "order size {} exceeds max {}",
                format_decimal(order.quantity()),
                format_decimal(limits.max_order_size)
            ));
        }

        if limits.enable_position_limits {
            let current = self
                .positions
                .get(order.trading_pair())
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO);
            let hypothetical = if order.is_buy() {
                current + order.quantity()
            } else {
                current - order.quantity()
            };
            if hypothetical.abs() > limits.max_position_size {
                return Some(format!(
                    "position {} would exceed max {}",
                    format_decimal(hypothetical),
                    format_decimal(limits.max_position_size)
                ));
            }
        }

        if limits.enable_loss_limits && self.daily_pnl < -limits.max_daily_loss {
            return Some(format!(
                "daily loss {} breaches limit {}",
                format_decimal(self.daily_pnl),
                format_decimal(limits.max_daily_loss)
            ));
        }

        None
    }

    /// Apply a signed delta to one currency balance and return a snapshot.
    fn apply_balance_delta(&mut self, currency: &str, delta: Decimal, now: Timestamp) {
        let balance = self
            .balances
            .entry(currency.to_string())
            .or_insert_with(|| Balance::empty(currency));
        balance.total += delta;
        balance.available += delta;
        balance.locked = balance.total - balance.available;
        balance.last_update = now;
    }
}

/// The trading core.
///
/// Owns the clock, the order book registry, the order/position/balance
/// maps, the trade history and the event queue. Lock order across the
/// engine: registry < core state < event queue; events are enqueued only
/// after the state lock is released.
pub struct TradingCore {
    clock: Arc<Clock>,
    registry: Arc<OrderBookRegistry>,
    state: RwLock<CoreState>,
    callbacks: RwLock<TradingCallbacks>,
    events: Arc<EventQueue>,
    running: Arc<AtomicBool>,
    processor: Mutex<Option<JoinHandle<()>>>,
}

impl TradingCore {
    pub fn new() -> Self {
        let clock = Arc::new(Clock::live());
        let registry = Arc::new(OrderBookRegistry::new(clock.clone()));
        Self {
            clock,
            registry,
            state: RwLock::new(CoreState::new()),
            callbacks: RwLock::new(TradingCallbacks::default()),
            events: Arc::new(EventQueue::new()),
            running: Arc::new(AtomicBool::new(false)),
            processor: Mutex::new(None),
        }
    }

    /// Install a fresh clock and registry for the given mode. Call before
    /// start(); existing books are discarded, portfolio state is kept.
    pub fn initialize(&mut self, mode: ClockMode) {
        self.install_clock(Clock::new(mode));
    }

    /// Install a specific clock (e.g. a rate-adjusted simulated one) and a
    /// fresh registry bound to it.
    pub fn install_clock(&mut self, clock: Clock) {
        self.stop();
        self.clock = Arc::new(clock);
        self.registry = Arc::new(OrderBookRegistry::new(self.clock.clone()));
    }

    pub fn clock(&self) -> Arc<Clock> {
        self.clock.clone()
    }

    pub fn registry(&self) -> Arc<OrderBookRegistry> {
        self.registry.clone()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the clock and the event-dispatch thread. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clock.start();

        let events = self.events.clone();
        let running = self.running.clone();
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match events.pop() {
                    Some(event) => EventQueue::run(event),
                    None => std::thread::sleep(POLL_INTERVAL),
                }
            }
        });
        *self.processor.lock() = Some(handle);
        info!("trading core started");
    }

    /// Stop and join the dispatchers. Events already dequeued finish;
    /// events still queued stay queued. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.clock.stop();
        if let Some(handle) = self.processor.lock().take() {
            let _ = handle.join();
        }
        info!("trading core stopped");
    }

    /// Synchronously run every queued callback on the calling thread.
    /// Deterministic alternative to the dispatch thread for backtests and
    /// tests. Returns the number of callbacks run.
    pub fn drain_events(&self) -> usize {
        self.events.drain()
    }

    // Order management

    /// Validate, risk-check, then store the order as OPEN. Returns false
    /// (with no state change beyond a rejection event) when validation or
    /// the risk gate fails.
    pub fn submit_order(&self, order: Order) -> bool {
        if let Err(e) = validate_order(&order) {
            warn!(order = %order, "order validation failed: {e}");
            return false;
        }

        let now = self.clock.now();
        let rejected = {
            let mut state = self.state.write();

            if state.active_orders.contains_key(order.client_order_id()) {
                warn!(
                    id = order.client_order_id(),
                    "duplicate client_order_id rejected"
                );
                return false;
            }

            match state.risk_violation(&order) {
                Some(reason) => {
                    let mut copy = order;
                    copy.mark_rejected(reason.clone(), now);
                    info!(order = %copy, reason = %reason, "order rejected by risk gate");
                    Some(copy)
                }
                None => {
                    let mut copy = order;
                    copy.mark_open(now);
                    debug!(order = %copy, "order accepted");
                    state
                        .active_orders
                        .insert(copy.client_order_id().to_string(), copy);
                    None
                }
            }
        };

        match rejected {
            Some(order) => {
                self.emit_order_rejected(order);
                false
            }
            None => true,
        }
    }

    /// Cancel by client order id. Unknown ids return false silently.
    pub fn cancel_order(&self, client_order_id: &str) -> bool {
        let now = self.clock.now();
        let cancelled = {
            let mut state = self.state.write();
            match state.active_orders.remove(client_order_id) {
                Some(mut order) => {
                    order.mark_cancelled(now);
                    Some(order)
                }
                None => None,
            }
        };

        match cancelled {
            Some(order) => {
                info!(id = client_order_id, "order cancelled");
                self.emit_order_cancelled(order);
                true
            }
            None => false,
        }
    }

    /// Price-only modify. `new_quantity` is accepted for interface
    /// stability but ignored: quantity changes require cancel-and-resubmit.
    /// A `new_price` of zero is the keep-current sentinel.
    pub fn modify_order(
        &self,
        client_order_id: &str,
        new_price: Option<Decimal>,
        new_quantity: Option<Decimal>,
    ) -> bool {
        let _ = new_quantity;
        let now = self.clock.now();
        let mut state = self.state.write();
        match state.active_orders.get_mut(client_order_id) {
            Some(order) => {
                if let Some(price) = new_price {
                    if !price.is_zero() {
                        order.set_price(price, now);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Active (OPEN/PARTIAL) orders, optionally for one symbol.
    pub fn get_active_orders(&self, symbol: Option<&str>) -> Vec<Order> {
        let state = self.state.read();
        state
            .active_orders
            .values()
            .filter(|o| o.is_active())
            .filter(|o| symbol.map_or(true, |s| o.trading_pair() == s))
            .cloned()
            .collect()
    }

    pub fn get_order(&self, client_order_id: &str) -> Option<Order> {
        self.state.read().active_orders.get(client_order_id).cloned()
    }

    // Fill application

    /// Apply an externally reported fill: order ledger, position, balances,
    /// P&L, and the corresponding callbacks. Fills for unknown ids are
    /// ignored with an on_error notification.
    pub fn on_exchange_fill(&self, fill: FillReport) -> bool {
        let now = self.clock.now();
        let trade_time = if fill.timestamp > 0 {
            Timestamp::from_millis(fill.timestamp as i64)
        } else {
            now
        };

        // Mid price is read before the state lock: registry < core state.
        let mid = self
            .registry
            .get(&fill.symbol)
            .map(|book| book.mid_price())
            .unwrap_or(Decimal::ZERO);

        let trade = Trade {
            trade_id: Uuid::new_v4().to_string(),
            client_order_id: fill.client_order_id.clone(),
            exchange_order_id: fill.exchange_order_id.clone(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            price: fill.price,
            quantity: fill.quantity,
            fee: fill.fee_amount,
            fee_currency: fill.fee_currency.clone(),
            timestamp: trade_time,
        };

        let mut filled_order: Option<Order> = None;
        let mut ledger_error: Option<String> = None;
        let position_snapshot: Position;
        let balance_snapshots: Vec<Balance>;

        {
            let mut state = self.state.write();

            let Some(order) = state.active_orders.get_mut(&fill.client_order_id) else {
                drop(state);
                warn!(id = %fill.client_order_id, "fill for unknown order ignored");
                self.emit_error(
                    "fill",
                    format!("fill for unknown order '{}'", fill.client_order_id),
                );
                return false;
            };

            if order.exchange_order_id().is_empty() && !fill.exchange_order_id.is_empty() {
                order.set_exchange_order_id(fill.exchange_order_id.clone(), now);
            }
            if let Err(e) = order.add_execution(
                Uuid::new_v4().to_string(),
                fill.quantity,
                fill.price,
                fill.fee_amount,
                fill.fee_currency.clone(),
                now,
            ) {
                ledger_error = Some(e.to_string());
            }
            if order.is_filled() {
                filled_order = state.active_orders.remove(&fill.client_order_id);
            }

            // Position and realized P&L
            let mut realized = Decimal::ZERO;
            {
                let position = state
                    .positions
                    .entry(fill.symbol.clone())
                    .or_insert_with(|| Position::new(fill.symbol.clone()));

                match fill.side {
                    OrderSide::Buy => {
                        let total_cost = position.quantity * position.average_price
                            + fill.quantity * fill.price;
                        position.quantity += fill.quantity;
                        if !position.quantity.is_zero() {
                            position.average_price = total_cost / position.quantity;
                        }
                    }
                    OrderSide::Sell => {
                        realized = fill.quantity * (fill.price - position.average_price);
                        position.realized_pnl += realized;
                        position.quantity -= fill.quantity;
                    }
                }

                position.last_update = now;
                position.unrealized_pnl = if position.quantity.is_zero() || mid.is_zero() {
                    Decimal::ZERO
                } else {
                    (mid - position.average_price) * position.quantity
                };
                position_snapshot = position.clone();
            }
            if fill.side == OrderSide::Sell {
                state.total_pnl += realized;
                state.daily_pnl += realized;
            }

            // Balances: base moves by quantity, quote by notional, fees in
            // their own currency.
            let (base, quote) = split_trading_pair(&fill.symbol);
            let notional = fill.quantity * fill.price;
            match fill.side {
                OrderSide::Buy => {
                    state.apply_balance_delta(&base, fill.quantity, now);
                    state.apply_balance_delta(&quote, -notional, now);
                }
                OrderSide::Sell => {
                    state.apply_balance_delta(&base, -fill.quantity, now);
                    state.apply_balance_delta(&quote, notional, now);
                }
            }
            if !fill.fee_amount.is_zero() {
                state.apply_balance_delta(&fill.fee_currency, -fill.fee_amount, now);
            }

            let mut affected = vec![base, quote];
            if !fill.fee_amount.is_zero() && !affected.contains(&fill.fee_currency) {
                affected.push(fill.fee_currency.clone());
            }
            balance_snapshots = affected
                .iter()
                .filter_map(|ccy| state.balances.get(ccy).cloned())
                .collect();

            state.trade_history.push(trade.clone());
        }

        debug!(
            symbol = %trade.symbol,
            side = %trade.side,
            price = %format_decimal(trade.price),
            quantity = %format_decimal(trade.quantity),
            "fill applied"
        );

        if let Some(order) = filled_order {
            self.emit_order_filled(order);
        }
        self.emit_trade_executed(trade);
        self.emit_position_update(position_snapshot);
        for balance in balance_snapshots {
            self.emit_balance_update(balance);
        }
        if let Some(message) = ledger_error {
            warn!("fill ledger error: {message}");
            self.emit_error("fill", message);
        }
        true
    }

    // Portfolio queries

    /// Position for `symbol`; a flat empty position when none exists.
    pub fn get_position(&self, symbol: &str) -> Position {
        self.state
            .read()
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::new(symbol))
    }

    pub fn get_all_positions(&self) -> BTreeMap<String, Position> {
        self.state.read().positions.clone()
    }

    /// Balance for `currency`; an empty balance when none exists.
    pub fn get_balance(&self, currency: &str) -> Balance {
        self.state
            .read()
            .balances
            .get(currency)
            .cloned()
            .unwrap_or_else(|| Balance::empty(currency))
    }

    pub fn get_all_balances(&self) -> BTreeMap<String, Balance> {
        self.state.read().balances.clone()
    }

    /// Cash plus cost-basis position value. Non-base balances are counted
    /// 1:1 (FX conversion is out of scope); fees already reduced balances.
    pub fn get_portfolio_value(&self, base_currency: &str) -> Decimal {
        let _ = base_currency;
        let state = self.state.read();
        let cash: Decimal = state.balances.values().map(|b| b.total).sum();
        let positions: Decimal = state.positions.values().map(Position::market_value).sum();
        cash + positions
    }

    pub fn get_realized_pnl(&self) -> Decimal {
        self.state.read().total_pnl
    }

    pub fn get_unrealized_pnl(&self) -> Decimal {
        self.state
            .read()
            .positions
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }

    /// Running daily P&L. There is no automatic midnight reset: the value
    /// accumulates until reset() or import_state() replaces it.
    pub fn get_daily_pnl(&self) -> Decimal {
        self.state.read().daily_pnl
    }

    /// Trade history, optionally filtered by symbol; limit = 0 returns all.
    pub fn get_trade_history(&self, symbol: Option<&str>, limit: usize) -> Vec<Trade> {
        let state = self.state.read();
        let iter = state
            .trade_history
            .iter()
            .filter(|t| symbol.map_or(true, |s| t.symbol == s));
        if limit == 0 {
            iter.cloned().collect()
        } else {
            iter.take(limit).cloned().collect()
        }
    }

    // Risk management

    pub fn set_risk_limits(&self, limits: RiskLimits) {
        self.state.write().risk_limits = limits;
    }

    pub fn risk_limits(&self) -> RiskLimits {
        self.state.read().risk_limits.clone()
    }

    /// Pre-trade risk gate: order size, hypothetical position size, daily
    /// loss, each subject to its enable flag.
    pub fn check_risk_limits(&self, order: &Order) -> bool {
        self.state.read().risk_violation(order).is_none()
    }

    // Market data plumbing

    /// Ensure a book exists for `symbol` and return it.
    pub fn subscribe_market_data(&self, symbol: &str) -> Arc<crate::book::OrderBook> {
        self.registry.get_or_create(symbol)
    }

    /// Drop the book for `symbol`.
    pub fn unsubscribe_market_data(&self, symbol: &str) {
        self.registry.remove(symbol);
    }

    /// Refresh a position's mark-to-market value from the book mid price.
    pub(crate) fn mark_to_market(&self, symbol: &str, mid: Decimal) {
        if mid.is_zero() {
            return;
        }
        let now = self.clock.now();
        let mut state = self.state.write();
        if let Some(position) = state.positions.get_mut(symbol) {
            if !position.quantity.is_zero() {
                position.unrealized_pnl = (mid - position.average_price) * position.quantity;
                position.last_update = now;
            }
        }
    }

    // Callbacks

    pub fn set_callbacks(&self, callbacks: TradingCallbacks) {
        *self.callbacks.write() = callbacks;
    }

    fn emit_order_filled(&self, order: Order) {
        if let Some(cb) = self.callbacks.read().on_order_filled.clone() {
            self.events.push(Box::new(move || cb(&order)));
        }
    }

    fn emit_order_cancelled(&self, order: Order) {
        if let Some(cb) = self.callbacks.read().on_order_cancelled.clone() {
            self.events.push(Box::new(move || cb(&order)));
        }
    }

    fn emit_order_rejected(&self, order: Order) {
        if let Some(cb) = self.callbacks.read().on_order_rejected.clone() {
            self.events.push(Box::new(move || cb(&order)));
        }
    }

    fn emit_trade_executed(&self, trade: Trade) {
        if let Some(cb) = self.callbacks.read().on_trade_executed.clone() {
            self.events.push(Box::new(move || cb(&trade)));
        }
    }

    fn emit_position_update(&self, position: Position) {
        if let Some(cb) = self.callbacks.read().on_position_update.clone() {
            self.events.push(Box::new(move || cb(&position)));
        }
    }

    fn emit_balance_update(&self, balance: Balance) {
        if let Some(cb) = self.callbacks.read().on_balance_update.clone() {
            self.events.push(Box::new(move || cb(&balance)));
        }
    }

    pub(crate) fn emit_market_data(
        &self,
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        is_bid: bool,
    ) {
        if let Some(cb) = self.callbacks.read().on_market_data.clone() {
            self.events
                .push(Box::new(move || cb(&symbol, price, quantity, is_bid)));
        }
    }

    pub(crate) fn emit_trade_event(
        &self,
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        is_buy: bool,
    ) {
        if let Some(cb) = self.callbacks.read().on_trade.clone() {
            self.events
                .push(Box::new(move || cb(&symbol, price, quantity, is_buy)));
        }
    }

    pub(crate) fn emit_error(&self, source: &str, message: String) {
        if let Some(cb) = self.callbacks.read().on_error.clone() {
            let source = source.to_string();
            self.events.push(Box::new(move || cb(&source, &message)));
        }
    }

    // Lifecycle utilities

    /// Engine counters and P&L totals as a JSON blob.
    pub fn get_statistics(&self) -> Value {
        let state = self.state.read();
        let unrealized: Decimal = state.positions.values().map(|p| p.unrealized_pnl).sum();
        json!({
            "active_orders": state.active_orders.len(),
            "positions": state.positions.len(),
            "total_trades": state.trade_history.len(),
            "realized_pnl": format_decimal(state.total_pnl),
            "unrealized_pnl": format_decimal(unrealized),
            "daily_pnl": format_decimal(state.daily_pnl),
            "running": self.is_running(),
        })
    }

    /// Clear orders, portfolio, history, P&L and every order book. For
    /// backtest harnesses between runs.
    pub fn reset(&self) {
        {
            let mut state = self.state.write();
            state.active_orders.clear();
            state.positions.clear();
            state.balances.clear();
            state.trade_history.clear();
            state.daily_pnl = Decimal::ZERO;
            state.total_pnl = Decimal::ZERO;
        }
        self.registry.clear_all();
        info!("trading core reset");
    }

    /// Snapshot positions, balances and P&L totals as JSON. Orders and
    /// order books are intentionally not persisted.
    pub fn export_state(&self) -> String {
        let state = self.state.read();

        let positions: Vec<Value> = state
            .positions
            .values()
            .map(|p| {
                json!({
                    "symbol": p.symbol,
                    "quantity": format_decimal(p.quantity),
                    "average_price": format_decimal(p.average_price),
                    "realized_pnl": format_decimal(p.realized_pnl),
                })
            })
            .collect();

        let balances: Vec<Value> = state
            .balances
            .values()
            .map(|b| {
                json!({
                    "currency": b.currency,
                    "total": format_decimal(b.total),
                    "available": format_decimal(b.available),
                })
            })
            .collect();

        json!({
            "positions": positions,
            "balances": balances,
            "total_pnl": format_decimal(state.total_pnl),
            "daily_pnl": format_decimal(state.daily_pnl),
        })
        .to_string()
    }

    /// Restore positions, balances and P&L totals from export_state()
    /// output. Active orders and order books are untouched. Returns false
    /// on malformed input, leaving state unchanged.
    pub fn import_state(&self, json: &str) -> bool {
        match self.parse_state(json) {
            Ok((positions, balances, total_pnl, daily_pnl)) => {
                let mut state = self.state.write();
                state.positions = positions;
                state.balances = balances;
                state.total_pnl = total_pnl;
                state.daily_pnl = daily_pnl;
                info!("state imported");
                true
            }
            Err(e) => {
                warn!("state import failed: {e}");
                false
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn parse_state(
        &self,
        json: &str,
    ) -> Result<(
        BTreeMap<String, Position>,
        BTreeMap<String, Balance>,
        Decimal,
        Decimal,
    )> {
        let value: Value = serde_json::from_str(json)?;
        let now = self.clock.now();

        let str_of = |v: &Value, key: &str| -> Result<String> {
            v.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(format!("missing field '{key}'")))
        };
        let dec_of = |v: &Value, key: &str| -> Result<Decimal> {
            parse_decimal(
                v.get(key)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Validation(format!("missing field '{key}'")))?,
            )
        };

        let mut positions = BTreeMap::new();
        for item in value
            .get("positions")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Validation("missing 'positions' array".into()))?
        {
            let symbol = str_of(item, "symbol")?;
            let position = Position {
                symbol: symbol.clone(),
                quantity: dec_of(item, "quantity")?,
                average_price: dec_of(item, "average_price")?,
                unrealized_pnl: Decimal::ZERO,
                realized_pnl: dec_of(item, "realized_pnl")?,
                last_update: now,
            };
            positions.insert(symbol, position);
        }

        let mut balances = BTreeMap::new();
        for item in value
            .get("balances")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Validation("missing 'balances' array".into()))?
        {
            let currency = str_of(item, "currency")?;
            let total = dec_of(item, "total")?;
            let available = dec_of(item, "available")?;
            let mut balance = Balance::new(currency.clone(), total, available);
            balance.last_update = now;
            balances.insert(currency, balance);
        }

        let total_pnl = parse_decimal(
            value
                .get("total_pnl")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Validation("missing 'total_pnl'".into()))?,
        )?;
        let daily_pnl = parse_decimal(
            value
                .get("daily_pnl")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Validation("missing 'daily_pnl'".into()))?,
        )?;

        Ok((positions, balances, total_pnl, daily_pnl))
    }
}

impl Default for TradingCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TradingCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Structural order validation at the submit boundary.
fn validate_order(order: &Order) -> Result<()> {
    if order.client_order_id().is_empty() {
        return Err(Error::Validation("empty client_order_id".into()));
    }
    if order.trading_pair().is_empty() {
        return Err(Error::Validation("empty trading pair".into()));
    }
    validate_trading_pair(order.trading_pair())?;
    if order.quantity() <= Decimal::ZERO {
        return Err(Error::Validation("quantity must be positive".into()));
    }
    if order.order_type() == crate::core::types::OrderType::Limit && order.price() <= Decimal::ZERO
    {
        return Err(Error::Validation("limit orders require a positive price".into()));
    }
    if order.filled_quantity() > order.quantity() {
        return Err(Error::Validation("filled quantity exceeds quantity".into()));
    }
    Ok(())
}

/// Fluent construction of a configured [`TradingCore`].
pub struct TradingCoreBuilder {
    clock_mode: ClockMode,
    simulation_rate: f64,
    risk_limits: RiskLimits,
    callbacks: TradingCallbacks,
}

impl TradingCoreBuilder {
    pub fn new() -> Self {
        Self {
            clock_mode: ClockMode::Live,
            simulation_rate: 1.0,
            risk_limits: RiskLimits::default(),
            callbacks: TradingCallbacks::default(),
        }
    }

    /// Seed mode, simulation rate and risk limits from a loaded
    /// [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new()
            .with_clock_mode(config.mode)
            .with_simulation_rate(config.simulation_rate)
            .with_risk_limits(config.risk_limits())
    }

    pub fn with_clock_mode(mut self, mode: ClockMode) -> Self {
        self.clock_mode = mode;
        self
    }

    /// Virtual seconds per wall second; only meaningful in Simulated mode.
    pub fn with_simulation_rate(mut self, rate: f64) -> Self {
        self.simulation_rate = rate;
        self
    }

    pub fn with_risk_limits(mut self, limits: RiskLimits) -> Self {
        self.risk_limits = limits;
        self
    }

    pub fn with_callbacks(mut self, callbacks: TradingCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn build(self) -> TradingCore {
        let mut core = TradingCore::new();
        match self.clock_mode {
            ClockMode::Simulated => core.install_clock(Clock::simulated(self.simulation_rate)),
            mode => core.initialize(mode),
        }
        core.set_risk_limits(self.risk_limits);
        core.set_callbacks(self.callbacks);
        core
    }
}

impl Default for TradingCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::AtomicUsize;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn backtest_core() -> TradingCore {
        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .build();
        core.clock().set_time(Timestamp::from_millis(1_700_000_000_000));
        core
    }

    fn limit_order(core: &TradingCore, id: &str, side: OrderSide, qty: &str, price: &str) -> Order {
        Order::limit(id, "BTC-USDT", side, dec(price), dec(qty), &core.clock())
    }

    fn fill(id: &str, side: OrderSide, qty: &str, price: &str) -> FillReport {
        FillReport {
            client_order_id: id.to_string(),
            exchange_order_id: "X-1".to_string(),
            symbol: "BTC-USDT".to_string(),
            side,
            price: dec(price),
            quantity: dec(qty),
            fee_amount: Decimal::ZERO,
            fee_currency: "USDT".to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_submit_and_query_active_orders() {
        let core = backtest_core();
        assert!(core.submit_order(limit_order(&core, "o1", OrderSide::Buy, "1", "50000")));
        assert!(core.submit_order(limit_order(&core, "o2", OrderSide::Sell, "1", "50100")));

        let active = core.get_active_orders(None);
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(Order::is_active));

        assert_eq!(core.get_active_orders(Some("BTC-USDT")).len(), 2);
        assert_eq!(core.get_active_orders(Some("ETH-USDT")).len(), 0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let core = backtest_core();
        assert!(core.submit_order(limit_order(&core, "o1", OrderSide::Buy, "1", "50000")));
        assert!(!core.submit_order(limit_order(&core, "o1", OrderSide::Buy, "1", "50000")));
        assert_eq!(core.get_active_orders(None).len(), 1);
    }

    #[test]
    fn test_submit_rejects_invalid_orders() {
        let core = backtest_core();
        assert!(!core.submit_order(limit_order(&core, "", OrderSide::Buy, "1", "50000")));
        assert!(!core.submit_order(limit_order(&core, "o1", OrderSide::Buy, "1", "0")));
        assert!(!core.submit_order(Order::limit(
            "o2",
            "btc-usdt",
            OrderSide::Buy,
            dec("50000"),
            dec("1"),
            &core.clock()
        )));
    }

    #[test]
    fn test_risk_reject_fires_callback_once() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let rejected_id = Arc::new(Mutex::new(String::new()));

        let r = rejected.clone();
        let rid = rejected_id.clone();
        let callbacks = TradingCallbacks {
            on_order_rejected: Some(Arc::new(move |order: &Order| {
                r.fetch_add(1, Ordering::SeqCst);
                *rid.lock() = order.client_order_id().to_string();
            })),
            ..Default::default()
        };

        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .with_risk_limits(RiskLimits {
                max_order_size: dec("1.0"),
                ..Default::default()
            })
            .with_callbacks(callbacks)
            .build();

        let order = limit_order(&core, "big", OrderSide::Buy, "1.5", "50000");
        assert!(!core.submit_order(order));
        core.drain_events();

        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(*rejected_id.lock(), "big");
        assert!(core.get_active_orders(None).is_empty());
    }

    #[test]
    fn test_position_limit_gate() {
        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .with_risk_limits(RiskLimits {
                max_position_size: dec("2.0"),
                max_order_size: dec("10"),
                ..Default::default()
            })
            .build();

        // 1.5 long is fine; another 1.5 would breach |3.0| > 2.0
        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1.5", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1.5", "50000"));
        assert!(!core.submit_order(limit_order(&core, "b", OrderSide::Buy, "1.5", "50000")));
        // Selling down is allowed
        assert!(core.submit_order(limit_order(&core, "c", OrderSide::Sell, "1.5", "50000")));
    }

    #[test]
    fn test_loss_limit_gate() {
        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .with_risk_limits(RiskLimits {
                max_daily_loss: dec("50"),
                max_order_size: dec("10"),
                max_position_size: dec("100"),
                ..Default::default()
            })
            .build();

        // Buy 1 @ 50000, sell 1 @ 49900: realized -100 < -50 limit
        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1", "50000"));
        assert!(core.submit_order(limit_order(&core, "b", OrderSide::Sell, "1", "49900")));
        core.on_exchange_fill(fill("b", OrderSide::Sell, "1", "49900"));

        assert_eq!(core.get_daily_pnl(), dec("-100"));
        assert!(!core.submit_order(limit_order(&core, "c", OrderSide::Buy, "1", "50000")));
    }

    #[test]
    fn test_fill_and_pnl_accounting() {
        let core = backtest_core();

        assert!(core.submit_order(limit_order(&core, "buy1", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("buy1", OrderSide::Buy, "1", "50000"));

        let position = core.get_position("BTC-USDT");
        assert_eq!(position.quantity, dec("1"));
        assert_eq!(position.average_price, dec("50000"));

        assert!(core.submit_order(limit_order(&core, "sell1", OrderSide::Sell, "0.4", "50100")));
        core.on_exchange_fill(fill("sell1", OrderSide::Sell, "0.4", "50100"));

        let position = core.get_position("BTC-USDT");
        assert_eq!(position.quantity, dec("0.6"));
        assert_eq!(position.average_price, dec("50000"));
        assert_eq!(position.realized_pnl, dec("40"));
        assert_eq!(core.get_realized_pnl(), dec("40"));
        assert_eq!(core.get_daily_pnl(), dec("40"));
    }

    #[test]
    fn test_average_price_on_scaling_in() {
        let core = backtest_core();

        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1", "50000"));
        assert!(core.submit_order(limit_order(&core, "b", OrderSide::Buy, "1", "51000")));
        core.on_exchange_fill(fill("b", OrderSide::Buy, "1", "51000"));

        let position = core.get_position("BTC-USDT");
        assert_eq!(position.quantity, dec("2"));
        assert_eq!(position.average_price, dec("50500"));
    }

    #[test]
    fn test_balances_after_fill() {
        let core = backtest_core();

        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        let mut report = fill("a", OrderSide::Buy, "1", "50000");
        report.fee_amount = dec("25");
        report.fee_currency = "USDT".to_string();
        core.on_exchange_fill(report);

        assert_eq!(core.get_balance("BTC").total, dec("1"));
        assert_eq!(core.get_balance("USDT").total, dec("-50025"));
        // Untouched currency reads as empty
        assert_eq!(core.get_balance("ETH").total, Decimal::ZERO);
    }

    #[test]
    fn test_full_fill_removes_order_and_fires_callback() {
        let filled = Arc::new(AtomicUsize::new(0));
        let trades = Arc::new(AtomicUsize::new(0));

        let f = filled.clone();
        let t = trades.clone();
        let callbacks = TradingCallbacks {
            on_order_filled: Some(Arc::new(move |order: &Order| {
                assert!(order.is_filled());
                f.fetch_add(1, Ordering::SeqCst);
            })),
            on_trade_executed: Some(Arc::new(move |_trade: &Trade| {
                t.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };

        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .with_callbacks(callbacks)
            .build();

        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "0.4", "50000"));
        assert_eq!(core.get_active_orders(None).len(), 1);
        core.on_exchange_fill(fill("a", OrderSide::Buy, "0.6", "50000"));
        assert!(core.get_active_orders(None).is_empty());

        core.drain_events();
        assert_eq!(filled.load(Ordering::SeqCst), 1);
        assert_eq!(trades.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_fill_ignored_with_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let callbacks = TradingCallbacks {
            on_error: Some(Arc::new(move |source: &str, _message: &str| {
                assert_eq!(source, "fill");
                e.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };

        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .with_callbacks(callbacks)
            .build();

        assert!(!core.on_exchange_fill(fill("ghost", OrderSide::Buy, "1", "50000")));
        core.drain_events();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(core.get_position("BTC-USDT").is_flat());
        assert!(core.get_trade_history(None, 0).is_empty());
    }

    #[test]
    fn test_cancel_order() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let c = cancelled.clone();
        let callbacks = TradingCallbacks {
            on_order_cancelled: Some(Arc::new(move |order: &Order| {
                assert!(order.is_cancelled());
                c.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };

        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Backtest)
            .with_callbacks(callbacks)
            .build();

        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        assert!(core.cancel_order("a"));
        assert!(!core.cancel_order("a"));
        assert!(!core.cancel_order("never-seen"));

        core.drain_events();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(core.get_active_orders(None).is_empty());
    }

    #[test]
    fn test_modify_order_is_price_only() {
        let core = backtest_core();
        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));

        assert!(core.modify_order("a", Some(dec("49500")), Some(dec("9"))));
        let order = core.get_order("a").unwrap();
        assert_eq!(order.price(), dec("49500"));
        // Quantity untouched by design
        assert_eq!(order.quantity(), dec("1"));

        // Zero price is the keep-current sentinel
        assert!(core.modify_order("a", Some(Decimal::ZERO), None));
        assert_eq!(core.get_order("a").unwrap().price(), dec("49500"));

        assert!(!core.modify_order("ghost", Some(dec("1")), None));
    }

    #[test]
    fn test_trade_history_filters() {
        let core = backtest_core();
        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "3", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1", "50000"));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1", "50000"));

        let mut eth = fill("e", OrderSide::Buy, "1", "3000");
        eth.symbol = "ETH-USDT".to_string();
        assert!(core.submit_order(Order::limit(
            "e",
            "ETH-USDT",
            OrderSide::Buy,
            dec("3000"),
            dec("1"),
            &core.clock()
        )));
        core.on_exchange_fill(eth);

        assert_eq!(core.get_trade_history(None, 0).len(), 3);
        assert_eq!(core.get_trade_history(Some("BTC-USDT"), 0).len(), 2);
        assert_eq!(core.get_trade_history(None, 1).len(), 1);
    }

    #[test]
    fn test_statistics_blob() {
        let core = backtest_core();
        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "0.5", "50000"));

        let stats = core.get_statistics();
        assert_eq!(stats["active_orders"], 1);
        assert_eq!(stats["positions"], 1);
        assert_eq!(stats["total_trades"], 1);
        assert_eq!(stats["running"], false);
        assert_eq!(stats["realized_pnl"], "0");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let core = backtest_core();

        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1", "50000"));
        assert!(core.submit_order(limit_order(&core, "b", OrderSide::Sell, "0.4", "50100")));
        core.on_exchange_fill(fill("b", OrderSide::Sell, "0.4", "50100"));
        core.subscribe_market_data("BTC-USDT");

        let snapshot = core.export_state();
        core.reset();
        assert!(core.get_position("BTC-USDT").is_flat());
        assert_eq!(core.get_realized_pnl(), Decimal::ZERO);
        assert!(core.registry().is_empty());

        assert!(core.import_state(&snapshot));
        let position = core.get_position("BTC-USDT");
        assert_eq!(position.quantity, dec("0.6"));
        assert_eq!(position.average_price, dec("50000"));
        assert_eq!(position.realized_pnl, dec("40"));
        assert_eq!(core.get_realized_pnl(), dec("40"));
        assert_eq!(core.get_daily_pnl(), dec("40"));
        assert_eq!(core.get_balance("BTC").total, dec("0.6"));
        // Orders and books are not part of the snapshot
        assert!(core.get_active_orders(None).is_empty());
        assert!(core.registry().is_empty());
    }

    #[test]
    fn test_import_rejects_malformed_json() {
        let core = backtest_core();
        assert!(!core.import_state("not json"));
        assert!(!core.import_state("{\"positions\": 7}"));
    }

    #[test]
    fn test_portfolio_value() {
        let core = backtest_core();
        assert!(core.submit_order(limit_order(&core, "a", OrderSide::Buy, "1", "50000")));
        core.on_exchange_fill(fill("a", OrderSide::Buy, "1", "50000"));

        // Cash: BTC 1 + USDT -50000 counted 1:1; position value 1 * 50000
        let value = core.get_portfolio_value("USDT");
        assert_eq!(value, dec("1"));
    }

    #[test]
    fn test_builder_from_config() {
        let config = EngineConfig {
            mode: ClockMode::Backtest,
            ..Default::default()
        };
        let core = TradingCoreBuilder::from_config(&config).build();
        for symbol in &config.symbols {
            core.subscribe_market_data(symbol);
        }

        assert_eq!(core.clock().mode(), ClockMode::Backtest);
        assert!(core.registry().has("BTC-USDT"));
        assert_eq!(core.risk_limits().max_order_size, Decimal::from(100));
    }

    #[test]
    fn test_simulated_clock_advances_when_started() {
        let core = TradingCoreBuilder::new()
            .with_clock_mode(ClockMode::Simulated)
            .with_simulation_rate(100.0)
            .build();
        let t0 = core.now();
        core.start();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while core.now() <= t0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        core.stop();
        assert!(core.now() > t0);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let core = backtest_core();
        core.start();
        core.start();
        assert!(core.is_running());
        core.stop();
        core.stop();
        assert!(!core.is_running());
    }
}
