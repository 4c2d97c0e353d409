//! Candidate filtering pipeline.
//!
//! Implements the first-board funnel: gate checks, sector universe
//! construction, then an ordered sequence of set-narrowing filters that ends
//! in the buy list. Every stage records how many rows it eliminated so a run
//! can be reconstructed from the logs. Upstream fetch failures degrade to
//! empty contributions; nothing here raises past the pipeline boundary.

use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::market::{Exchange, MarketData, StockSnapshot};
use crate::state::{SharedState, StateSnapshot};
use shouban_common::TradingConfig;

/// Change-percent floor for main-board codes ("60"/"00"), fixed-point units.
const MAIN_BOARD_MIN_CHANGE: i64 = 950;
/// Change-percent floor for ChiNext codes ("30"), fixed-point units.
const CHINEXT_MIN_CHANGE: i64 = 1950;
/// Circulating-cap band lower bound, CNY.
const CAP_BAND_LOW: u64 = 1_000_000_000;
/// Circulating-cap band upper bound, CNY.
const CAP_BAND_HIGH: u64 = 3_000_000_000;
/// Circulating-cap floor above which large names pass regardless of band.
const BLUE_CHIP_FLOOR: u64 = 20_000_000_000;

// ============================================================================
// Filter Stage
// ============================================================================

/// Filter stage identifier for tracking where candidates are eliminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterStage {
    /// Sector universe (all constituent rows)
    Universe,
    /// Deduplicate by code, first sector wins
    Dedup,
    /// Exclude yesterday's limit-up and limit-down pools
    LimitPools,
    /// Exclude ST / delisting-risk names
    RiskName,
    /// Circulating market-cap band
    MarketCap,
    /// Exclude STAR-market codes
    Board,
    /// Change-percent threshold by board class
    ChangeThreshold,
    /// Corroboration against gain-rank and speed-rank boards
    RankJoin,
    /// Exclude codes already bought today
    AlreadyBought,
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Universe => write!(f, "板块成分"),
            Self::Dedup => write!(f, "去重"),
            Self::LimitPools => write!(f, "昨日涨跌停剔除"),
            Self::RiskName => write!(f, "风险标记剔除"),
            Self::MarketCap => write!(f, "流通市值"),
            Self::Board => write!(f, "科创板剔除"),
            Self::ChangeThreshold => write!(f, "涨幅阈值"),
            Self::RankJoin => write!(f, "涨幅涨速榜交叉"),
            Self::AlreadyBought => write!(f, "当日已买剔除"),
        }
    }
}

// ============================================================================
// Stage Report
// ============================================================================

/// Elimination record for one filter stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Stage name
    pub stage: FilterStage,
    /// Rows that survived this stage
    pub passed: usize,
    /// Rows eliminated at this stage
    pub eliminated: usize,
}

impl StageReport {
    pub fn new(stage: FilterStage, input_count: usize, passed_count: usize) -> Self {
        Self {
            stage,
            passed: passed_count,
            eliminated: input_count.saturating_sub(passed_count),
        }
    }
}

// ============================================================================
// Pipeline Outcome
// ============================================================================

/// Why a run produced no candidates without filtering anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Today is not in the trading calendar
    NotTradingDay,
    /// Outside the open trading sessions
    OutsideSession,
    /// Past the entry cutoff time
    PastCutoff,
    /// Sector top list unavailable or empty
    NoSectorData,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotTradingDay => write!(f, "not a trading day"),
            Self::OutsideSession => write!(f, "outside trading session"),
            Self::PastCutoff => write!(f, "past entry cutoff"),
            Self::NoSectorData => write!(f, "no sector data"),
        }
    }
}

/// A stock that survived the full funnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub code: String,
    pub name: String,
    /// Sector that introduced the code (first occurrence wins)
    pub sector_id: String,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Surviving candidates, in funnel order
    pub candidates: Vec<Candidate>,
    /// Per-stage elimination records
    pub reports: Vec<StageReport>,
    /// Set when a gate aborted the run before any filtering
    pub skipped: Option<SkipReason>,
}

impl PipelineOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            candidates: Vec::new(),
            reports: Vec::new(),
            skipped: Some(reason),
        }
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        match self.skipped {
            Some(reason) => format!("skipped: {}", reason),
            None => {
                let scanned = self
                    .reports
                    .first()
                    .map(|r| r.passed + r.eliminated)
                    .unwrap_or(0);
                format!("{} rows in, {} candidates out", scanned, self.candidates.len())
            }
        }
    }
}

// ============================================================================
// Pure stage predicates
// ============================================================================

/// Deduplicate by code keeping the first occurrence, so the first sector to
/// introduce a stock keeps the tag.
fn dedup_by_code(rows: Vec<StockSnapshot>) -> Vec<StockSnapshot> {
    let mut seen: HashSet<String> = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.code.clone()))
        .collect()
}

/// Band filter: mid-band [1B, 3B] or large names above 20B.
fn passes_cap_band(cap: u64) -> bool {
    (CAP_BAND_LOW..=CAP_BAND_HIGH).contains(&cap) || cap >= BLUE_CHIP_FLOOR
}

/// Change-percent floor by board class. Codes outside the two recognized
/// prefix classes never pass, and non-numeric change is treated as missing.
fn passes_change_threshold(row: &StockSnapshot) -> bool {
    let Some(change) = row.change_pct else {
        return false;
    };
    match row.limit_class() {
        Some(crate::market::LimitClass::Main) => change >= MAIN_BOARD_MIN_CHANGE,
        Some(crate::market::LimitClass::ChiNext) => change >= CHINEXT_MIN_CHANGE,
        None => false,
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The first-board candidate pipeline.
pub struct FirstBoardPipeline {
    config: TradingConfig,
}

impl FirstBoardPipeline {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Run the funnel at the current wall-clock time.
    pub async fn run(&self, market: &dyn MarketData, state: &SharedState) -> PipelineOutcome {
        self.run_at(market, state, Local::now().naive_local()).await
    }

    /// Run the funnel as of `now`. Split out so the gates are testable
    /// against a fixed clock.
    pub async fn run_at(
        &self,
        market: &dyn MarketData,
        state: &SharedState,
        now: NaiveDateTime,
    ) -> PipelineOutcome {
        // Gate 1: trading calendar. An empty calendar means "unknown", so
        // refresh once and re-check before concluding it is a non-trading day.
        if state.calendar_is_empty() {
            state.refresh_calendar_only(market).await;
        }
        if !state.is_trade_date(now.date()) {
            debug!(date = %now.date(), "Pipeline gated: not a trading day");
            return PipelineOutcome::skipped(SkipReason::NotTradingDay);
        }

        // Gate 2: open trading session.
        if !market.is_trade_time(now.time()) {
            debug!(time = %now.time(), "Pipeline gated: outside trading session");
            return PipelineOutcome::skipped(SkipReason::OutsideSession);
        }

        // Gate 3: entry cutoff. The strategy only trades the opening
        // momentum window.
        if self.past_cutoff(now.time()) {
            debug!(time = %now.time(), "Pipeline gated: past entry cutoff");
            return PipelineOutcome::skipped(SkipReason::PastCutoff);
        }

        let snapshot = state.snapshot();
        let mut reports = Vec::new();

        // Stage 1: sector universe.
        let rows = match self.collect_universe(market, &snapshot).await {
            Some(rows) => rows,
            None => return PipelineOutcome::skipped(SkipReason::NoSectorData),
        };
        reports.push(StageReport::new(FilterStage::Universe, rows.len(), rows.len()));

        // Stage 2: dedup by code, first sector wins.
        let input = rows.len();
        let rows = dedup_by_code(rows);
        self.record(&mut reports, FilterStage::Dedup, input, rows.len());

        // Stage 3: yesterday's limit pools. First boards only, so both
        // continuation (limit-up) and reversal (limit-down) names drop.
        let rows = self.retain(rows, &mut reports, FilterStage::LimitPools, |row| {
            !snapshot.yesterday_limit_up.contains(&row.code)
                && !snapshot.yesterday_limit_down.contains(&row.code)
        });

        // Stage 4: risk-marker names.
        let rows = self.retain(rows, &mut reports, FilterStage::RiskName, |row| {
            !row.has_risk_marker()
        });

        // Stage 5: circulating-cap band.
        let rows = self.retain(rows, &mut reports, FilterStage::MarketCap, |row| {
            row.circulating_cap.map(passes_cap_band).unwrap_or(false)
        });

        // Stage 6: STAR-market exclusion.
        let rows = self.retain(rows, &mut reports, FilterStage::Board, |row| {
            !row.is_star_market()
        });

        // Stage 7: change-percent thresholds.
        let rows = self.retain(
            rows,
            &mut reports,
            FilterStage::ChangeThreshold,
            passes_change_threshold,
        );

        // Stage 8: corroboration against both rank boards.
        let gain_codes = self.gain_union(market).await;
        let speed_codes = self.speed_union(market).await;
        let rows = self.retain(rows, &mut reports, FilterStage::RankJoin, |row| {
            gain_codes.contains(&row.code) && speed_codes.contains(&row.code)
        });

        // Stage 9: already bought today.
        let rows = self.retain(rows, &mut reports, FilterStage::AlreadyBought, |row| {
            !snapshot.is_bought(&row.code)
        });

        let candidates: Vec<Candidate> = rows
            .into_iter()
            .map(|row| Candidate {
                code: row.code,
                name: row.name,
                sector_id: row.sector_id.unwrap_or_default(),
            })
            .collect();

        let outcome = PipelineOutcome {
            candidates,
            reports,
            skipped: None,
        };
        info!(summary = %outcome.summary(), "Pipeline run complete");
        outcome
    }

    /// Past-cutoff check against the configured entry cutoff.
    fn past_cutoff(&self, now: NaiveTime) -> bool {
        let (hour, minute) = (self.config.cutoff_hour, self.config.cutoff_minute);
        now.hour() > hour || (now.hour() == hour && now.minute() >= minute)
    }

    /// Fetch the top sector boards and their constituents, skipping sectors
    /// that already reached today's buy cap before spending a constituent
    /// fetch. Returns None when the sector list itself is unavailable.
    async fn collect_universe(
        &self,
        market: &dyn MarketData,
        snapshot: &StateSnapshot,
    ) -> Option<Vec<StockSnapshot>> {
        let sectors = match market.top_sectors(self.config.top_sectors).await {
            Ok(sectors) => sectors,
            Err(e) => {
                warn!(error = %e, "Sector top list fetch failed, aborting run");
                return None;
            }
        };
        if sectors.is_empty() {
            warn!("Sector top list empty, aborting run");
            return None;
        }

        let mut rows = Vec::new();
        for sector in &sectors {
            if snapshot.sector_capped(&sector.sector_id) {
                debug!(sector = %sector.sector_id, "Sector at buy cap, skipping constituents");
                continue;
            }
            match market.sector_constituents(&sector.sector_id).await {
                Ok(constituents) => rows.extend(constituents),
                Err(e) => {
                    warn!(sector = %sector.sector_id, error = %e, "Constituent fetch failed, skipping sector");
                }
            }
        }
        Some(rows)
    }

    /// Union of gain-rank codes across both exchanges. A failed fetch
    /// contributes an empty set.
    async fn gain_union(&self, market: &dyn MarketData) -> HashSet<String> {
        let mut codes = HashSet::new();
        for exchange in Exchange::ALL {
            match market.gain_rank(exchange).await {
                Ok(rows) => codes.extend(rows.into_iter().map(|row| row.code)),
                Err(e) => {
                    warn!(%exchange, error = %e, "Gain rank fetch failed, treating as empty")
                }
            }
        }
        codes
    }

    /// Union of speed-rank codes across both exchanges.
    async fn speed_union(&self, market: &dyn MarketData) -> HashSet<String> {
        let mut codes = HashSet::new();
        for exchange in Exchange::ALL {
            match market.speed_rank(exchange).await {
                Ok(rows) => codes.extend(rows.into_iter().map(|row| row.code)),
                Err(e) => {
                    warn!(%exchange, error = %e, "Speed rank fetch failed, treating as empty")
                }
            }
        }
        codes
    }

    fn retain(
        &self,
        rows: Vec<StockSnapshot>,
        reports: &mut Vec<StageReport>,
        stage: FilterStage,
        keep: impl Fn(&StockSnapshot) -> bool,
    ) -> Vec<StockSnapshot> {
        let input = rows.len();
        let passed: Vec<StockSnapshot> = rows.into_iter().filter(|row| keep(row)).collect();
        self.record(reports, stage, input, passed.len());
        passed
    }

    fn record(
        &self,
        reports: &mut Vec<StageReport>,
        stage: FilterStage,
        input: usize,
        passed: usize,
    ) {
        let report = StageReport::new(stage, input, passed);
        debug!(stage = %stage, passed = report.passed, eliminated = report.eliminated, "Filter stage applied");
        reports.push(report);
    }
}

// ============================================================================
// Tests
// ============================================================================
