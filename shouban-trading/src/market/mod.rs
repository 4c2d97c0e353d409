//! Market data types and gateway abstraction.
//!
//! Defines the `MarketData` trait consumed by the filter pipeline and the
//! trade executor, plus the domain types it returns. The production
//! implementation (`EastmoneyClient`) translates the wire format of the
//! eastmoney/szse endpoints into these types; opaque field codes never leave
//! the adapter.

mod eastmoney;

pub use eastmoney::EastmoneyClient;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Core Data Types
// ============================================================================

/// Exchange for rank-board queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Shanghai Stock Exchange
    Shanghai,
    /// Shenzhen Stock Exchange
    Shenzhen,
}

impl Exchange {
    /// Both exchanges, in the order rank boards are merged
    pub const ALL: [Exchange; 2] = [Self::Shanghai, Self::Shenzhen];
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shanghai => write!(f, "SH"),
            Self::Shenzhen => write!(f, "SZ"),
        }
    }
}

/// Price-limit class derived from the symbol prefix.
///
/// Main-board stocks (60/00 prefixes) cap at 10% per day, ChiNext (30 prefix)
/// at 20%; the change-percent filter applies a different threshold per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    /// Main board (Shanghai "60", Shenzhen "00")
    Main,
    /// ChiNext board ("30")
    ChiNext,
}

/// One row of market data for a symbol at a point in time.
///
/// `change_pct` keeps the source's fixed-point unit: 950 means +9.50%.
/// `circulating_cap` is in currency minor units. Both are `None` when the
/// source sent a non-numeric placeholder; rows with `None` are dropped
/// wherever the value is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    /// 6-digit exchange symbol, immutable key
    pub code: String,
    /// Display name; may carry risk markers ("ST", "*", "退")
    pub name: String,
    /// Signed change percent, fixed point (950 == 9.50%)
    pub change_pct: Option<i64>,
    /// Circulating market cap in minor units
    pub circulating_cap: Option<u64>,
    /// Sector the row was fetched under (constituent fetches only)
    pub sector_id: Option<String>,
}

impl StockSnapshot {
    /// Check for suspension/delisting risk markers in the name
    pub fn has_risk_marker(&self) -> bool {
        self.name.contains("ST") || self.name.contains('*') || self.name.contains('退')
    }

    /// Check for the STAR market prefix ("688")
    pub fn is_star_market(&self) -> bool {
        self.code.starts_with("688")
    }

    /// Price-limit class from the symbol prefix; `None` for any other board
    pub fn limit_class(&self) -> Option<LimitClass> {
        if self.code.starts_with("60") || self.code.starts_with("00") {
            Some(LimitClass::Main)
        } else if self.code.starts_with("30") {
            Some(LimitClass::ChiNext)
        } else {
            None
        }
    }
}

/// One entry of the ranked sector/concept top list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorTop {
    /// Sector/concept board id (e.g., "BK0892")
    pub sector_id: String,
    /// Display name
    pub name: String,
    /// Aggregate change percent, fixed point
    pub change_pct: Option<i64>,
}

/// A dated set of codes that hit the daily price limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitPool {
    /// Trading day the pool belongs to
    pub date: NaiveDate,
    /// Symbols in the pool
    pub codes: HashSet<String>,
}

impl LimitPool {
    /// Create a pool from a code collection
    pub fn new(date: NaiveDate, codes: impl IntoIterator<Item = String>) -> Self {
        Self {
            date,
            codes: codes.into_iter().collect(),
        }
    }

    /// Check membership
    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Number of codes in the pool
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True when the pool carries no codes
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Bid/ask quote for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol
    pub code: String,
    /// Last traded price
    pub last: Option<f64>,
    /// Limit-up price for the day
    pub limit_up_price: Option<f64>,
    /// Limit-down price for the day
    pub limit_down_price: Option<f64>,
}

impl Quote {
    /// Limit-up price, only when present and positive
    pub fn valid_limit_up(&self) -> Option<f64> {
        self.limit_up_price.filter(|p| *p > 0.0)
    }
}

// ============================================================================
// Market Error
// ============================================================================

/// Errors from market data gateways.
#[derive(Debug, Clone)]
pub enum MarketError {
    /// Network error (connection failed)
    Network(String),
    /// Request timed out
    Timeout(String),
    /// Response carried no usable data for the request
    DataNotAvailable(String),
    /// Response body could not be decoded
    Parse(String),
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for MarketError {}

impl MarketError {
    /// Check if the error is recoverable (worth retrying on a later tick)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

// ============================================================================
// Trading Sessions
// ============================================================================

/// Open sessions in seconds from midnight: 9:15-11:30 and 13:00-15:00,
/// bounds inclusive.
const OPEN_SESSIONS: [(u32, u32); 2] = [
    (9 * 3600 + 15 * 60, 11 * 3600 + 30 * 60),
    (13 * 3600, 15 * 3600),
];

/// Check whether a local time falls inside an open trading session.
pub fn is_open_session(now: NaiveTime) -> bool {
    let secs = now.num_seconds_from_midnight();
    OPEN_SESSIONS
        .iter()
        .any(|(start, end)| secs >= *start && secs <= *end)
}

// ============================================================================
// Market Data Trait
// ============================================================================

/// Trait for market data gateways.
///
/// The pipeline and executor only ever talk to this trait; tests substitute
/// in-memory fakes for the eastmoney implementation.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Get the gateway name (e.g., "eastmoney")
    fn name(&self) -> &'static str;

    /// Fetch the previous trading day's limit-up pool.
    async fn yesterday_limit_up_pool(&self, date: NaiveDate) -> Result<LimitPool, MarketError>;

    /// Fetch the previous trading day's limit-down pool.
    async fn yesterday_limit_down_pool(&self, date: NaiveDate) -> Result<LimitPool, MarketError>;

    /// Fetch the trading calendar: `YYYY-MM-DD` strings of confirmed trading
    /// days, ascending.
    async fn trading_calendar(&self) -> Result<Vec<String>, MarketError>;

    /// Check whether a date is a trading day.
    ///
    /// Default implementation looks the date up in the fetched calendar.
    async fn is_trade_date(&self, date: NaiveDate) -> Result<bool, MarketError> {
        let date = date.format("%Y-%m-%d").to_string();
        Ok(self.trading_calendar().await?.iter().any(|d| *d == date))
    }

    /// Check whether a local time falls inside an open trading session.
    fn is_trade_time(&self, now: NaiveTime) -> bool {
        is_open_session(now)
    }

    /// Fetch the top `n` sector/concept boards by change.
    async fn top_sectors(&self, n: usize) -> Result<Vec<SectorTop>, MarketError>;

    /// Fetch up to 20 constituents of a sector, tagged with the sector id.
    async fn sector_constituents(&self, sector_id: &str)
        -> Result<Vec<StockSnapshot>, MarketError>;

    /// Fetch the gain-rank leaderboard of one exchange.
    async fn gain_rank(&self, exchange: Exchange) -> Result<Vec<StockSnapshot>, MarketError>;

    /// Fetch the speed-rank (rate-of-change) leaderboard of one exchange.
    async fn speed_rank(&self, exchange: Exchange) -> Result<Vec<StockSnapshot>, MarketError>;

    /// Fetch the bid/ask quote for one symbol.
    async fn quote(&self, code: &str) -> Result<Quote, MarketError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(code: &str, name: &str) -> StockSnapshot {
        StockSnapshot {
            code: code.to_string(),
            name: name.to_string(),
            change_pct: None,
            circulating_cap: None,
            sector_id: None,
        }
    }

    #[test]
    fn test_risk_markers() {
        assert!(snapshot("600001", "ST中基").has_risk_marker());
        assert!(snapshot("600002", "*ST安泰").has_risk_marker());
        assert!(snapshot("600003", "退市西水").has_risk_marker());
        assert!(!snapshot("600004", "贵州茅台").has_risk_marker());
    }

    #[test]
    fn test_limit_class() {
        assert_eq!(snapshot("600519", "x").limit_class(), Some(LimitClass::Main));
        assert_eq!(snapshot("000001", "x").limit_class(), Some(LimitClass::Main));
        assert_eq!(
            snapshot("300750", "x").limit_class(),
            Some(LimitClass::ChiNext)
        );
        assert_eq!(snapshot("688001", "x").limit_class(), None);
        assert_eq!(snapshot("830001", "x").limit_class(), None);
    }

    #[test]
    fn test_star_market() {
        assert!(snapshot("688001", "x").is_star_market());
        assert!(!snapshot("600001", "x").is_star_market());
    }

    #[test]
    fn test_open_sessions() {
        let t = |h, m, s| NaiveTime::from_hms_opt(h, m, s).unwrap();
        assert!(is_open_session(t(9, 15, 0)));
        assert!(is_open_session(t(10, 0, 0)));
        assert!(is_open_session(t(11, 30, 0)));
        assert!(!is_open_session(t(11, 30, 1)));
        assert!(!is_open_session(t(12, 0, 0)));
        assert!(is_open_session(t(13, 0, 0)));
        assert!(is_open_session(t(15, 0, 0)));
        assert!(!is_open_session(t(15, 0, 1)));
        assert!(!is_open_session(t(9, 14, 59)));
    }

    #[test]
    fn test_limit_pool() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let pool = LimitPool::new(date, vec!["600001".to_string(), "000002".to_string()]);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("600001"));
        assert!(!pool.contains("300001"));
        assert!(!pool.is_empty());
    }

    #[test]
    fn test_quote_valid_limit_up() {
        let mut quote = Quote {
            code: "600001".to_string(),
            last: Some(11.0),
            limit_up_price: Some(12.1),
            limit_down_price: Some(9.9),
        };
        assert_eq!(quote.valid_limit_up(), Some(12.1));

        quote.limit_up_price = Some(0.0);
        assert_eq!(quote.valid_limit_up(), None);

        quote.limit_up_price = None;
        assert_eq!(quote.valid_limit_up(), None);
    }

    #[test]
    fn test_market_error_recoverable() {
        assert!(MarketError::Network("refused".into()).is_recoverable());
        assert!(MarketError::Timeout("15s".into()).is_recoverable());
        assert!(!MarketError::DataNotAvailable("empty pool".into()).is_recoverable());
        assert!(!MarketError::Parse("bad json".into()).is_recoverable());
    }
}
