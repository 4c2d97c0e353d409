//! Wall-clock scheduler for the trading bot.
//!
//! Drives two kinds of work from cron expressions evaluated against local
//! time: the daily pre-open state refresh, and the open/close events that
//! bound the two intraday trading windows. While a window is open, every
//! tick runs the candidate pipeline followed by the executor. The loop
//! checks for shutdown only between ticks, so an in-flight run always
//! completes.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::executor::TradeExecutor;
use crate::market::{self, MarketData};
use crate::pipeline::FirstBoardPipeline;
use crate::state::SharedState;
use shouban_common::Config;

// ============================================================================
// Tasks
// ============================================================================

/// Cron-driven tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotTask {
    /// Pre-open cache refresh
    DailyRefresh,
    /// Morning window opens
    MorningOpen,
    /// Morning window closes (lunch break)
    MorningClose,
    /// Afternoon window opens
    AfternoonOpen,
    /// Afternoon window closes (market close)
    AfternoonClose,
}

impl BotTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DailyRefresh => "daily_refresh",
            Self::MorningOpen => "morning_open",
            Self::MorningClose => "morning_close",
            Self::AfternoonOpen => "afternoon_open",
            Self::AfternoonClose => "afternoon_close",
        }
    }
}

/// Whether a schedule has an unexecuted fire time in the recent past.
///
/// Looks at fire times after the last execution (or the past hour on first
/// check) and reports true only for fires within the last minute that have
/// not been executed yet.
fn due_for_execution(
    schedule: &Schedule,
    last_exec: Option<DateTime<Local>>,
    now: DateTime<Local>,
) -> bool {
    let after = last_exec.unwrap_or_else(|| now - chrono::Duration::hours(1));

    for scheduled in schedule.after(&after).take(10) {
        if scheduled <= now {
            let since_scheduled = now.signed_duration_since(scheduled);
            if since_scheduled < chrono::Duration::seconds(60) {
                if let Some(last) = last_exec {
                    if last >= scheduled {
                        continue; // Already executed
                    }
                }
                return true;
            }
        } else {
            // Future scheduled time
            break;
        }
    }

    false
}

// ============================================================================
// Scheduler
// ============================================================================

/// Cron scheduler plus intraday tick loop.
pub struct BotScheduler {
    market: Arc<dyn MarketData>,
    broker: Arc<dyn Broker>,
    state: Arc<SharedState>,
    pipeline: FirstBoardPipeline,
    executor: TradeExecutor,
    schedules: Vec<(BotTask, Schedule)>,
    last_executions: HashMap<BotTask, DateTime<Local>>,
    /// Whether a trading window is currently open
    in_window: bool,
    tick_secs: u64,
}

impl BotScheduler {
    pub fn new(
        config: &Config,
        market: Arc<dyn MarketData>,
        broker: Arc<dyn Broker>,
        state: Arc<SharedState>,
    ) -> Result<Self> {
        let schedule = &config.schedule;
        let schedules = vec![
            (
                BotTask::DailyRefresh,
                parse_cron(&schedule.daily_refresh, "daily_refresh")?,
            ),
            (
                BotTask::MorningOpen,
                parse_cron(&schedule.window_open_morning, "window_open_morning")?,
            ),
            (
                BotTask::MorningClose,
                parse_cron(&schedule.window_close_morning, "window_close_morning")?,
            ),
            (
                BotTask::AfternoonOpen,
                parse_cron(&schedule.window_open_afternoon, "window_open_afternoon")?,
            ),
            (
                BotTask::AfternoonClose,
                parse_cron(&schedule.window_close_afternoon, "window_close_afternoon")?,
            ),
        ];

        info!(
            daily_refresh = %schedule.daily_refresh,
            morning_open = %schedule.window_open_morning,
            morning_close = %schedule.window_close_morning,
            afternoon_open = %schedule.window_open_afternoon,
            afternoon_close = %schedule.window_close_afternoon,
            tick_secs = schedule.tick_secs,
            "Scheduler configured"
        );

        Ok(Self {
            market,
            broker,
            state,
            pipeline: FirstBoardPipeline::new(config.trading.clone()),
            executor: TradeExecutor::new(config.trading.clone()),
            schedules,
            last_executions: HashMap::new(),
            in_window: false,
            tick_secs: schedule.tick_secs.max(1),
        })
    }

    /// Run the scheduler loop until `shutdown` flips.
    pub async fn run(&mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        // A restart inside a window should not wait for the next open event.
        self.in_window = market::is_open_session(Local::now().time());
        info!(in_window = self.in_window, "Scheduler started");

        for (task, schedule) in &self.schedules {
            if let Some(next) = schedule.upcoming(Local).next() {
                debug!(task = task.name(), next = %next, "Next fire time");
            }
        }

        let mut ticker = interval(Duration::from_secs(self.tick_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
                _ = shutdown.changed() => {
                    info!("Scheduler draining");
                    break;
                }
            }
        }
    }

    /// One tick: fire due cron tasks, then run the pipeline if a window is
    /// open.
    async fn on_tick(&mut self) {
        let now = Local::now();

        let due: Vec<BotTask> = self
            .schedules
            .iter()
            .filter(|(task, schedule)| {
                due_for_execution(schedule, self.last_executions.get(task).copied(), now)
            })
            .map(|(task, _)| *task)
            .collect();

        for task in due {
            self.last_executions.insert(task, now);
            self.run_task(task).await;
        }

        if self.in_window {
            let outcome = self
                .pipeline
                .run(self.market.as_ref(), self.state.as_ref())
                .await;
            if !outcome.candidates.is_empty() {
                self.executor
                    .execute(
                        &outcome.candidates,
                        self.market.as_ref(),
                        self.broker.as_ref(),
                        self.state.as_ref(),
                    )
                    .await;
            }
        }
    }

    async fn run_task(&mut self, task: BotTask) {
        info!(task = task.name(), "Executing scheduled task");
        match task {
            BotTask::DailyRefresh => {
                self.state
                    .refresh_daily(self.market.as_ref(), self.broker.as_ref())
                    .await;
            }
            BotTask::MorningOpen | BotTask::AfternoonOpen => {
                self.in_window = true;
                info!("Trading window opened");
            }
            BotTask::MorningClose | BotTask::AfternoonClose => {
                self.in_window = false;
                info!("Trading window closed");
            }
        }
    }
}

fn parse_cron(expr: &str, name: &str) -> Result<Schedule> {
    Schedule::from_str(expr).with_context(|| format!("Invalid {} cron: {}", name, expr))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shouban_common::ScheduleConfig;

    #[test]
    fn test_task_names() {
        assert_eq!(BotTask::DailyRefresh.name(), "daily_refresh");
        assert_eq!(BotTask::MorningOpen.name(), "morning_open");
        assert_eq!(BotTask::MorningClose.name(), "morning_close");
        assert_eq!(BotTask::AfternoonOpen.name(), "afternoon_open");
        assert_eq!(BotTask::AfternoonClose.name(), "afternoon_close");
    }

    #[test]
    fn test_default_schedules_parse() {
        let config = ScheduleConfig::default();
        for expr in [
            &config.daily_refresh,
            &config.window_open_morning,
            &config.window_close_morning,
            &config.window_open_afternoon,
            &config.window_close_afternoon,
        ] {
            assert!(Schedule::from_str(expr).is_ok(), "should parse: {}", expr);
        }
    }

    // 2025-06-04 is a Wednesday
    fn wednesday(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 4, h, m, s).unwrap()
    }

    #[test]
    fn test_due_shortly_after_fire_time() {
        let schedule = Schedule::from_str("0 30 9 * * Mon-Fri").unwrap();
        assert!(due_for_execution(&schedule, None, wednesday(9, 30, 25)));
    }

    #[test]
    fn test_not_due_long_after_fire_time() {
        let schedule = Schedule::from_str("0 30 9 * * Mon-Fri").unwrap();
        assert!(!due_for_execution(&schedule, None, wednesday(9, 35, 0)));
    }

    #[test]
    fn test_not_due_twice() {
        let schedule = Schedule::from_str("0 30 9 * * Mon-Fri").unwrap();
        let fired_at = wednesday(9, 30, 10);
        assert!(!due_for_execution(
            &schedule,
            Some(fired_at),
            wednesday(9, 30, 40)
        ));
    }

    #[test]
    fn test_not_due_before_fire_time() {
        let schedule = Schedule::from_str("0 30 9 * * Mon-Fri").unwrap();
        assert!(!due_for_execution(&schedule, None, wednesday(9, 29, 0)));
    }
}
