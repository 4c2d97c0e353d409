//! Process-wide trading state.
//!
//! Holds yesterday's limit pools, the trading calendar, a best-effort mirror
//! of broker balance/position, and today's accumulated buy activity. One
//! instance lives for the process lifetime; the daily refresh job and the
//! intraday tick job both mutate it, so every read-modify-write goes through
//! a single `RwLock`. Refresh methods fetch with no lock held and apply the
//! results under one write acquisition.

use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::market::{LimitPool, MarketData};

/// Mutable fields behind the lock.
#[derive(Debug, Default)]
struct StateInner {
    /// Codes that closed limit-up on the previous trading day
    yesterday_limit_up: HashSet<String>,
    /// Codes that closed limit-down on the previous trading day
    yesterday_limit_down: HashSet<String>,
    /// Trading-day dates ("YYYY-MM-DD"), ascending; empty until fetched
    trading_calendar: Vec<String>,
    /// Available funds mirrored from the broker
    balance: f64,
    /// Raw position rows mirrored from the broker
    positions: Vec<Value>,
    /// Codes bought today
    today_bought: HashSet<String>,
    /// Buys per sector today
    today_bought_per_sector: HashMap<String, u32>,
}

/// Read-only view taken at the start of a pipeline run so every filter in
/// that run sees one consistent state.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub yesterday_limit_up: HashSet<String>,
    pub yesterday_limit_down: HashSet<String>,
    pub today_bought: HashSet<String>,
    sector_counts: HashMap<String, u32>,
    per_sector_cap: u32,
}

impl StateSnapshot {
    /// Whether this sector already reached today's buy cap.
    pub fn sector_capped(&self, sector_id: &str) -> bool {
        self.sector_counts.get(sector_id).copied().unwrap_or(0) >= self.per_sector_cap
    }

    pub fn is_bought(&self, code: &str) -> bool {
        self.today_bought.contains(code)
    }
}

/// Shared trading state.
pub struct SharedState {
    inner: RwLock<StateInner>,
    /// Maximum buys per sector per day
    per_sector_cap: u32,
}

impl SharedState {
    pub fn new(per_sector_cap: u32) -> Self {
        Self {
            inner: RwLock::new(StateInner::default()),
            per_sector_cap: per_sector_cap.max(1),
        }
    }

    // ========================================================================
    // Refresh jobs
    // ========================================================================

    /// Daily pre-open refresh.
    ///
    /// Limit pools and the trading calendar reset to empty when their fetch
    /// fails, so gating logic fails closed. Balance and position keep their
    /// previous values on failure. Today's buy bookkeeping is cleared
    /// unconditionally for the new day.
    pub async fn refresh_daily(&self, market: &dyn MarketData, broker: &dyn Broker) {
        let today = Local::now().date_naive();

        let limit_up = match market.yesterday_limit_up_pool(today).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "Limit-up pool refresh failed, resetting to empty");
                LimitPool::new(today, Vec::new())
            }
        };

        let limit_down = match market.yesterday_limit_down_pool(today).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "Limit-down pool refresh failed, resetting to empty");
                LimitPool::new(today, Vec::new())
            }
        };

        let calendar = match market.trading_calendar().await {
            Ok(days) => days,
            Err(e) => {
                warn!(error = %e, "Trading calendar refresh failed, resetting to empty");
                Vec::new()
            }
        };

        let balance = match broker.balance().await {
            Ok(b) => Some(b.available),
            Err(e) => {
                warn!(error = %e, "Balance refresh failed, keeping previous value");
                None
            }
        };

        let positions = match broker.position().await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(error = %e, "Position refresh failed, keeping previous value");
                None
            }
        };

        if let Ok(mut inner) = self.inner.write() {
            inner.yesterday_limit_up = limit_up.codes;
            inner.yesterday_limit_down = limit_down.codes;
            inner.trading_calendar = calendar;
            if let Some(available) = balance {
                inner.balance = available;
            }
            if let Some(rows) = positions {
                inner.positions = rows;
            }
            inner.today_bought.clear();
            inner.today_bought_per_sector.clear();

            info!(
                limit_up = inner.yesterday_limit_up.len(),
                limit_down = inner.yesterday_limit_down.len(),
                calendar_days = inner.trading_calendar.len(),
                balance = inner.balance,
                positions = inner.positions.len(),
                "Daily state refresh completed"
            );
        }
    }

    /// Mid-day fallback when the calendar was never populated.
    pub async fn refresh_calendar_only(&self, market: &dyn MarketData) {
        let calendar = match market.trading_calendar().await {
            Ok(days) => days,
            Err(e) => {
                warn!(error = %e, "Trading calendar refresh failed, resetting to empty");
                Vec::new()
            }
        };

        if let Ok(mut inner) = self.inner.write() {
            info!(calendar_days = calendar.len(), "Trading calendar refreshed");
            inner.trading_calendar = calendar;
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn calendar_is_empty(&self) -> bool {
        self.inner
            .read()
            .map(|inner| inner.trading_calendar.is_empty())
            .unwrap_or(true)
    }

    /// Calendar membership for a "YYYY-MM-DD" date.
    pub fn is_trade_date(&self, date: NaiveDate) -> bool {
        let key = date.format("%Y-%m-%d").to_string();
        self.inner
            .read()
            .map(|inner| inner.trading_calendar.iter().any(|d| d == &key))
            .unwrap_or(false)
    }

    pub fn available_balance(&self) -> f64 {
        self.inner.read().map(|inner| inner.balance).unwrap_or(0.0)
    }

    pub fn position_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.positions.len())
            .unwrap_or(0)
    }

    pub fn is_bought(&self, code: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.today_bought.contains(code))
            .unwrap_or(false)
    }

    /// Whether this sector already reached today's buy cap.
    pub fn sector_capped(&self, sector_id: &str) -> bool {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .today_bought_per_sector
                    .get(sector_id)
                    .copied()
                    .unwrap_or(0)
                    >= self.per_sector_cap
            })
            .unwrap_or(true)
    }

    /// Consistent view for one pipeline run.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        match inner {
            Ok(inner) => StateSnapshot {
                yesterday_limit_up: inner.yesterday_limit_up.clone(),
                yesterday_limit_down: inner.yesterday_limit_down.clone(),
                today_bought: inner.today_bought.clone(),
                sector_counts: inner.today_bought_per_sector.clone(),
                per_sector_cap: self.per_sector_cap,
            },
            Err(_) => StateSnapshot {
                yesterday_limit_up: HashSet::new(),
                yesterday_limit_down: HashSet::new(),
                today_bought: HashSet::new(),
                sector_counts: HashMap::new(),
                per_sector_cap: self.per_sector_cap,
            },
        }
    }

    // ========================================================================
    // Buy bookkeeping
    // ========================================================================

    /// Record a successful buy in one atomic step.
    ///
    /// Returns false without mutating anything when the code was already
    /// bought today or the sector already sits at the cap. On success the
    /// local balance drops by `cost`, the code joins today's bought set and
    /// the sector counter increments.
    pub fn record_buy(&self, code: &str, sector_id: &str, cost: f64) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };

        if inner.today_bought.contains(code) {
            return false;
        }
        let count = inner
            .today_bought_per_sector
            .get(sector_id)
            .copied()
            .unwrap_or(0);
        if count >= self.per_sector_cap {
            return false;
        }

        inner.today_bought.insert(code.to_string());
        inner
            .today_bought_per_sector
            .insert(sector_id.to_string(), count + 1);
        inner.balance -= cost;
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_buy_once_per_code() {
        let state = SharedState::new(2);
        assert!(state.record_buy("600519", "BK1036", 9870.0));
        assert!(state.is_bought("600519"));

        // Same code again must be a no-op
        assert!(!state.record_buy("600519", "BK1036", 9870.0));
        assert_eq!(state.available_balance(), -9870.0);
    }

    #[test]
    fn test_record_buy_sector_cap() {
        let state = SharedState::new(2);
        assert!(state.record_buy("600519", "BK1036", 1.0));
        assert!(state.record_buy("000858", "BK1036", 1.0));
        assert!(state.sector_capped("BK1036"));

        // Third buy in the same sector is refused
        assert!(!state.record_buy("603369", "BK1036", 1.0));
        assert!(!state.is_bought("603369"));

        // A different sector is unaffected
        assert!(!state.sector_capped("BK0475"));
        assert!(state.record_buy("300750", "BK0475", 1.0));
    }

    #[test]
    fn test_record_buy_decrements_balance() {
        let state = SharedState::new(2);
        state.record_buy("600001", "BK0001", 2500.5);
        state.record_buy("600002", "BK0002", 1000.0);
        assert_eq!(state.available_balance(), -3500.5);
    }

    #[test]
    fn test_snapshot_reflects_buys() {
        let state = SharedState::new(2);
        state.record_buy("600519", "BK1036", 1.0);
        state.record_buy("000858", "BK1036", 1.0);

        let snapshot = state.snapshot();
        assert!(snapshot.is_bought("600519"));
        assert!(!snapshot.is_bought("601318"));
        assert!(snapshot.sector_capped("BK1036"));
        assert!(!snapshot.sector_capped("BK0475"));
    }

    #[test]
    fn test_empty_state_defaults() {
        let state = SharedState::new(2);
        assert!(state.calendar_is_empty());
        assert!(!state.is_trade_date(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()));
        assert_eq!(state.available_balance(), 0.0);
        assert_eq!(state.position_count(), 0);
        assert!(!state.sector_capped("BK1036"));
    }

    #[test]
    fn test_cap_floor_is_one() {
        let state = SharedState::new(0);
        assert!(state.record_buy("600519", "BK1036", 1.0));
        assert!(!state.record_buy("000858", "BK1036", 1.0));
    }
}
