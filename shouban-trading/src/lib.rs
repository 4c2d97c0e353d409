//! Shouban Trading Library
//!
//! Intraday screening and auto-trading bot for A-share first-board (首板)
//! momentum plays.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       shouban-trading                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌───────────────┐  ┌───────────────────────┐  │
//! │  │  Market Data │  │  Candidate    │  │  Trade Executor       │  │
//! │  │  (eastmoney) │→ │  Pipeline     │→ │  + Broker Gateway     │  │
//! │  └──────────────┘  └───────────────┘  └───────────────────────┘  │
//! │           ↑                ↑                      │              │
//! │           └────────── SharedState ←───────────────┘              │
//! │                          ↑                                       │
//! │                     BotScheduler                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Strategy
//!
//! During the opening momentum window the bot scans the top concept boards,
//! narrows their constituents through a chain of first-board filters
//! (yesterday's limit pools, risk-marker names, circulating-cap band,
//! change-percent thresholds, gain/speed rank corroboration) and buys the
//! survivors at the limit-up price in 100-share lots.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod broker;
pub mod executor;
pub mod market;
pub mod pipeline;
pub mod scheduler;
pub mod state;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::broker::{Broker, HttpBroker};
use crate::market::{EastmoneyClient, MarketData};
use crate::scheduler::BotScheduler;
use crate::state::SharedState;
use shouban_common::Config;

/// Main bot service.
pub struct BotService {
    config: Config,
    market: Arc<dyn MarketData>,
    broker: Arc<dyn Broker>,
    state: Arc<SharedState>,
}

impl BotService {
    /// Create a new bot service.
    pub fn new(config: Config) -> Self {
        let market: Arc<dyn MarketData> = Arc::new(EastmoneyClient::from_config(&config.market));
        let broker: Arc<dyn Broker> = Arc::new(HttpBroker::from_config(&config.broker));
        let state = Arc::new(SharedState::new(config.trading.per_sector_cap));

        Self {
            config,
            market,
            broker,
            state,
        }
    }

    /// Run until interrupted.
    ///
    /// Refreshes the state once up front so a process started after the
    /// scheduled refresh time still has pools and a calendar, then blocks on
    /// the scheduler until a shutdown signal arrives and lets any in-flight
    /// tick finish before returning.
    pub async fn start(self) -> Result<()> {
        self.state
            .refresh_daily(self.market.as_ref(), self.broker.as_ref())
            .await;

        let mut scheduler = BotScheduler::new(
            &self.config,
            Arc::clone(&self.market),
            Arc::clone(&self.broker),
            Arc::clone(&self.state),
        )?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        });

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Shutdown signal received, draining scheduler");

        let _ = shutdown_tx.send(true);
        if let Err(e) = scheduler_handle.await {
            tracing::warn!(error = %e, "Scheduler task did not shut down cleanly");
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}
