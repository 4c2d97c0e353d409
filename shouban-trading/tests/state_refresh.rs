//! Tests for the daily state refresh semantics.
//!
//! The contract under test: gating inputs (limit pools, trading calendar)
//! reset to empty when their fetch fails, account mirrors (balance,
//! positions) keep their last good value, and the per-day buy bookkeeping
//! clears unconditionally.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

use shouban_trading::broker::{AccountBalance, Broker, BrokerError, OrderAck};
use shouban_trading::market::{
    Exchange, LimitPool, MarketData, MarketError, Quote, SectorTop, StockSnapshot,
};
use shouban_trading::state::SharedState;

// ============================================================================
// Toggleable Fakes
// ============================================================================

struct FlakyMarket {
    calendar: Vec<String>,
    limit_up: Vec<String>,
    limit_down: Vec<String>,
    failing: AtomicBool,
}

impl FlakyMarket {
    fn healthy() -> Self {
        Self {
            calendar: vec!["2025-06-03".to_string(), "2025-06-04".to_string()],
            limit_up: vec!["600333".to_string()],
            limit_down: vec!["600444".to_string()],
            failing: AtomicBool::new(false),
        }
    }

    fn fail(&self) {
        self.failing.store(true, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), MarketError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(MarketError::Network("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketData for FlakyMarket {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn yesterday_limit_up_pool(&self, date: NaiveDate) -> Result<LimitPool, MarketError> {
        self.check()?;
        Ok(LimitPool::new(date, self.limit_up.iter().cloned()))
    }

    async fn yesterday_limit_down_pool(&self, date: NaiveDate) -> Result<LimitPool, MarketError> {
        self.check()?;
        Ok(LimitPool::new(date, self.limit_down.iter().cloned()))
    }

    async fn trading_calendar(&self) -> Result<Vec<String>, MarketError> {
        self.check()?;
        Ok(self.calendar.clone())
    }

    async fn top_sectors(&self, _n: usize) -> Result<Vec<SectorTop>, MarketError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn sector_constituents(
        &self,
        _sector_id: &str,
    ) -> Result<Vec<StockSnapshot>, MarketError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn gain_rank(&self, _exchange: Exchange) -> Result<Vec<StockSnapshot>, MarketError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn speed_rank(&self, _exchange: Exchange) -> Result<Vec<StockSnapshot>, MarketError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn quote(&self, code: &str) -> Result<Quote, MarketError> {
        self.check()?;
        Err(MarketError::DataNotAvailable(code.to_string()))
    }
}

struct FlakyBroker {
    available: f64,
    positions: Vec<serde_json::Value>,
    failing: AtomicBool,
}

impl FlakyBroker {
    fn healthy(available: f64) -> Self {
        Self {
            available,
            positions: vec![
                json!({"证券代码": "600777", "可用数量": 200}),
                json!({"证券代码": "000888", "可用数量": 500}),
            ],
            failing: AtomicBool::new(false),
        }
    }

    fn fail(&self) {
        self.failing.store(true, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), BrokerError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(BrokerError::Transport {
                attempts: 3,
                message: "connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn balance(&self) -> Result<AccountBalance, BrokerError> {
        self.check()?;
        Ok(AccountBalance {
            available: self.available,
        })
    }

    async fn position(&self) -> Result<Vec<serde_json::Value>, BrokerError> {
        self.check()?;
        Ok(self.positions.clone())
    }

    async fn buy(&self, _code: &str, _price: f64, _quantity: u64) -> Result<OrderAck, BrokerError> {
        self.check()?;
        Ok(OrderAck {
            code: 0,
            message: None,
            data: None,
        })
    }

    async fn success_orders(&self) -> Result<Vec<serde_json::Value>, BrokerError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn filled_orders(&self) -> Result<Vec<serde_json::Value>, BrokerError> {
        self.check()?;
        Ok(Vec::new())
    }
}

// ============================================================================
// Refresh Tests
// ============================================================================

#[tokio::test]
async fn test_refresh_populates_state() {
    let market = FlakyMarket::healthy();
    let broker = FlakyBroker::healthy(50_000.0);
    let state = SharedState::new(2);

    state.refresh_daily(&market, &broker).await;

    let snapshot = state.snapshot();
    assert!(snapshot.yesterday_limit_up.contains("600333"));
    assert!(snapshot.yesterday_limit_down.contains("600444"));
    assert!(!state.calendar_is_empty());
    assert_eq!(state.available_balance(), 50_000.0);
    assert_eq!(state.position_count(), 2);
}

#[tokio::test]
async fn test_refresh_clears_daily_bookkeeping() {
    let market = FlakyMarket::healthy();
    let broker = FlakyBroker::healthy(50_000.0);
    let state = SharedState::new(1);

    assert!(state.record_buy("600111", "BK0001", 9_872.0));
    assert!(state.is_bought("600111"));
    assert!(state.sector_capped("BK0001"));

    state.refresh_daily(&market, &broker).await;

    // A new day: no code is "bought", no sector is capped, and the balance
    // is the broker's number again rather than the locally decremented one
    assert!(!state.is_bought("600111"));
    assert!(!state.sector_capped("BK0001"));
    assert_eq!(state.available_balance(), 50_000.0);
}

#[tokio::test]
async fn test_market_failure_fails_closed() {
    let market = FlakyMarket::healthy();
    let broker = FlakyBroker::healthy(50_000.0);
    let state = SharedState::new(2);

    state.refresh_daily(&market, &broker).await;
    assert!(!state.calendar_is_empty());

    market.fail();
    state.refresh_daily(&market, &broker).await;

    // Stale pools would let yesterday's boards through, so they reset
    let snapshot = state.snapshot();
    assert!(snapshot.yesterday_limit_up.is_empty());
    assert!(snapshot.yesterday_limit_down.is_empty());
    assert!(state.calendar_is_empty());
}

#[tokio::test]
async fn test_broker_failure_keeps_stale_account() {
    let market = FlakyMarket::healthy();
    let broker = FlakyBroker::healthy(50_000.0);
    let state = SharedState::new(2);

    state.refresh_daily(&market, &broker).await;

    broker.fail();
    state.refresh_daily(&market, &broker).await;

    // Account mirrors keep their last good value; the market side of the
    // refresh still went through
    assert_eq!(state.available_balance(), 50_000.0);
    assert_eq!(state.position_count(), 2);
    assert!(state.snapshot().yesterday_limit_up.contains("600333"));
}

#[tokio::test]
async fn test_calendar_only_refresh_is_narrow() {
    let market = FlakyMarket::healthy();
    let state = SharedState::new(2);

    assert!(state.record_buy("600111", "BK0001", 9_872.0));

    state.refresh_calendar_only(&market).await;

    // Only the calendar moves; buy bookkeeping and account mirrors stay
    assert!(!state.calendar_is_empty());
    assert!(state.is_bought("600111"));
    assert!((state.available_balance() - (-9_872.0)).abs() < 1e-9);
}

#[tokio::test]
async fn test_calendar_only_failure_resets_calendar() {
    let market = FlakyMarket::healthy();
    let state = SharedState::new(2);

    state.refresh_calendar_only(&market).await;
    assert!(!state.calendar_is_empty());

    market.fail();
    state.refresh_calendar_only(&market).await;

    assert!(state.calendar_is_empty());
}
