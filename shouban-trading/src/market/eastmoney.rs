//! Eastmoney/SZSE market data adapter.
//!
//! Implements the `MarketData` trait against the public web endpoints:
//! - sector tops, constituents, rank boards: push2.eastmoney.com clist
//! - yesterday limit pools: push2ex.eastmoney.com
//! - trading calendar: szse.cn monthList
//! - bid/ask quotes: push2.eastmoney.com stock/get
//!
//! The endpoints speak in opaque `f`-codes; those are renamed to domain
//! fields during deserialization and never leave this module.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    Exchange, LimitPool, MarketData, MarketError, Quote, SectorTop, StockSnapshot,
};

// ============================================================================
// Constants
// ============================================================================

/// Eastmoney list API (sectors, constituents, rank boards)
const LIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";

/// Eastmoney real-time quote API
const QUOTE_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";

/// Yesterday limit-up pool
const LIMIT_UP_POOL_URL: &str = "https://push2ex.eastmoney.com/getYesterdayZTPool";

/// Limit-down pool
const LIMIT_DOWN_POOL_URL: &str = "https://push2ex.eastmoney.com/getTopicDTPool";

/// SZSE trading calendar (current month window)
const CALENDAR_URL: &str = "https://www.szse.cn/api/report/exchange/onepersistenthour/monthList";

/// Access tokens the web frontends embed in every request
const LIST_TOKEN: &str = "fa5fd1943c7b386f172d6893dbfba10b";
const POOL_TOKEN: &str = "7eea3edcaed734bea9cbfc24409ed989";

/// Scope expression selecting concept boards on the list API
const SECTOR_SCOPE: &str = "m:90+t:3+f:!50";

/// Rank board sizes per exchange
const GAIN_RANK_SIZE: usize = 50;
const SPEED_RANK_SIZE: usize = 10;

/// Scope expression selecting one exchange's stocks on the list API
fn exchange_scope(exchange: Exchange) -> &'static str {
    match exchange {
        Exchange::Shanghai => "m:1+t:2,m:1+t:23",
        Exchange::Shenzhen => "m:0+t:6,m:0+t:80",
    }
}

// ============================================================================
// Numeric Coercion
// ============================================================================

/// Coerce a JSON value to i64. The list API sends integers but substitutes
/// "-" for suspended or unpriced rows.
fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to u64 (market caps).
fn value_to_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)
        }),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to f64 (decimal quote prices).
fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalize a pool entry code to the 6-digit symbol form. The pool API
/// strips leading zeros by sending codes as integers.
fn normalize_code(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => n.as_u64().map(|c| format!("{:06}", c)),
        Value::String(s) if !s.is_empty() => Some(format!("{:0>6}", s)),
        _ => None,
    }
}

// ============================================================================
// Eastmoney Client
// ============================================================================

/// Production `MarketData` implementation over the eastmoney/szse endpoints.
pub struct EastmoneyClient {
    /// HTTP client
    client: reqwest::Client,
}

impl EastmoneyClient {
    /// Create a client with the given per-request timeout
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    /// Create from config
    pub fn from_config(config: &shouban_common::MarketConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    /// Map a reqwest failure into the gateway error taxonomy
    fn transport_error(e: reqwest::Error) -> MarketError {
        if e.is_timeout() {
            MarketError::Timeout(e.to_string())
        } else {
            MarketError::Network(e.to_string())
        }
    }

    /// Fetch rows from the list API with one scope/sort/size combination.
    async fn fetch_list(
        &self,
        page_size: usize,
        sort_field: &str,
        scope: &str,
        fields: &str,
    ) -> Result<Vec<ListRow>, MarketError> {
        let page_size = page_size.to_string();
        let params = [
            ("pn", "1"),
            ("pz", page_size.as_str()),
            ("po", "1"),
            ("np", "1"),
            ("ut", LIST_TOKEN),
            ("fltt", "1"),
            ("invt", "2"),
            ("fid", sort_field),
            ("fs", scope),
            ("fields", fields),
        ];

        debug!(scope = scope, sort = sort_field, "Fetching list from eastmoney");

        let response = self
            .client
            .get(LIST_URL)
            .query(&params)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", response.status())));
        }

        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(format!("list response: {}", e)))?;

        let data = body
            .data
            .ok_or_else(|| MarketError::DataNotAvailable(format!("no rows for scope {}", scope)))?;

        Ok(data.diff)
    }

    /// Fetch one of the push2ex pools for a date.
    async fn fetch_pool(
        &self,
        url: &str,
        sort: &str,
        date: NaiveDate,
    ) -> Result<LimitPool, MarketError> {
        let date_str = date.format("%Y%m%d").to_string();
        let params = [
            ("ut", POOL_TOKEN),
            ("dpt", "wz.ztzt"),
            ("Pageindex", "0"),
            ("pagesize", "50"),
            ("sort", sort),
            ("date", date_str.as_str()),
        ];

        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", response.status())));
        }

        let body: PoolResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(format!("pool response: {}", e)))?;

        let data = body
            .data
            .ok_or_else(|| MarketError::DataNotAvailable(format!("no pool for {}", date_str)))?;

        let codes = data.pool.iter().filter_map(|row| {
            let code = row.code.as_ref().and_then(normalize_code);
            if code.is_none() {
                warn!(row = ?row, "Pool row without code, skipping");
            }
            code
        });

        Ok(LimitPool::new(date, codes))
    }

    /// Convert list rows to snapshots, dropping rows without a code.
    fn to_snapshots(rows: Vec<ListRow>, sector_id: Option<&str>) -> Vec<StockSnapshot> {
        rows.into_iter()
            .filter_map(|row| {
                let Some(code) = row.code else {
                    warn!("List row without code, skipping");
                    return None;
                };
                Some(StockSnapshot {
                    code,
                    name: row.name.unwrap_or_default(),
                    change_pct: row.change_pct.as_ref().and_then(value_to_i64),
                    circulating_cap: row.circulating_cap.as_ref().and_then(value_to_u64),
                    sector_id: sector_id.map(str::to_string),
                })
            })
            .collect()
    }
}

// ============================================================================
// MarketData Implementation
// ============================================================================

#[async_trait]
impl MarketData for EastmoneyClient {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    async fn yesterday_limit_up_pool(&self, date: NaiveDate) -> Result<LimitPool, MarketError> {
        self.fetch_pool(LIMIT_UP_POOL_URL, "zs:desc", date).await
    }

    async fn yesterday_limit_down_pool(&self, date: NaiveDate) -> Result<LimitPool, MarketError> {
        self.fetch_pool(LIMIT_DOWN_POOL_URL, "fund:asc", date).await
    }

    async fn trading_calendar(&self) -> Result<Vec<String>, MarketError> {
        let response = self
            .client
            .get(CALENDAR_URL)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", response.status())));
        }

        let body: CalendarResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(format!("calendar response: {}", e)))?;

        let rows = body
            .data
            .ok_or_else(|| MarketError::DataNotAvailable("calendar has no rows".into()))?;

        let mut days: Vec<String> = rows
            .into_iter()
            .filter(|row| row.is_trading_day())
            .filter_map(|row| row.date)
            .collect();
        days.sort();

        Ok(days)
    }

    async fn top_sectors(&self, n: usize) -> Result<Vec<SectorTop>, MarketError> {
        let rows = self
            .fetch_list(n, "f3", SECTOR_SCOPE, "f12,f14,f3")
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let sector_id = row.code?;
                Some(SectorTop {
                    sector_id,
                    name: row.name.unwrap_or_default(),
                    change_pct: row.change_pct.as_ref().and_then(value_to_i64),
                })
            })
            .collect())
    }

    async fn sector_constituents(
        &self,
        sector_id: &str,
    ) -> Result<Vec<StockSnapshot>, MarketError> {
        let scope = format!("b:{}", sector_id);
        let rows = self
            .fetch_list(20, "f3", &scope, "f12,f14,f3,f21")
            .await?;

        Ok(Self::to_snapshots(rows, Some(sector_id)))
    }

    async fn gain_rank(&self, exchange: Exchange) -> Result<Vec<StockSnapshot>, MarketError> {
        let rows = self
            .fetch_list(
                GAIN_RANK_SIZE,
                "f3",
                exchange_scope(exchange),
                "f12,f14,f3,f21",
            )
            .await?;

        Ok(Self::to_snapshots(rows, None))
    }

    async fn speed_rank(&self, exchange: Exchange) -> Result<Vec<StockSnapshot>, MarketError> {
        let rows = self
            .fetch_list(
                SPEED_RANK_SIZE,
                "f22",
                exchange_scope(exchange),
                "f12,f14,f3,f21",
            )
            .await?;

        Ok(Self::to_snapshots(rows, None))
    }

    async fn quote(&self, code: &str) -> Result<Quote, MarketError> {
        // Market prefix: Shanghai symbols start with 6
        let market = if code.starts_with('6') { "1" } else { "0" };
        let secid = format!("{}.{}", market, code);
        let params = [
            ("fltt", "2"),
            ("invt", "2"),
            ("fields", "f43,f51,f52,f57,f58"),
            ("secid", secid.as_str()),
        ];

        let response = self
            .client
            .get(QUOTE_URL)
            .query(&params)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", response.status())));
        }

        let body: QuoteResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(format!("quote response: {}", e)))?;

        let data = body
            .data
            .ok_or_else(|| MarketError::DataNotAvailable(format!("no quote for {}", code)))?;

        Ok(Quote {
            code: code.to_string(),
            last: data.last.as_ref().and_then(value_to_f64),
            limit_up_price: data.limit_up.as_ref().and_then(value_to_f64),
            limit_down_price: data.limit_down.as_ref().and_then(value_to_f64),
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Option<ListData>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    diff: Vec<ListRow>,
}

/// One row of the list API. `f12` doubles as stock code and sector id
/// depending on the scope expression.
#[derive(Debug, Deserialize)]
struct ListRow {
    #[serde(rename = "f12")]
    code: Option<String>,
    #[serde(rename = "f14")]
    name: Option<String>,
    #[serde(rename = "f3")]
    change_pct: Option<Value>,
    #[serde(rename = "f21")]
    circulating_cap: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    data: Option<PoolData>,
}

#[derive(Debug, Deserialize)]
struct PoolData {
    #[serde(default)]
    pool: Vec<PoolRow>,
}

#[derive(Debug, Deserialize)]
struct PoolRow {
    #[serde(rename = "c")]
    code: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    data: Option<Vec<CalendarRow>>,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    #[serde(rename = "jyrq")]
    date: Option<String>,
    #[serde(rename = "jybz")]
    trading_flag: Option<Value>,
}

impl CalendarRow {
    fn is_trading_day(&self) -> bool {
        match &self.trading_flag {
            Some(Value::String(s)) => s == "1",
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    data: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    /// Last price
    #[serde(rename = "f43")]
    last: Option<Value>,
    /// Limit-up price
    #[serde(rename = "f51")]
    limit_up: Option<Value>,
    /// Limit-down price
    #[serde(rename = "f52")]
    limit_down: Option<Value>,
}

// ============================================================================
// Tests
// ============================================================================
