//! Trade executor.
//!
//! Walks the candidate list produced by the pipeline, sizes each order
//! against the limit-up price and submits it through the broker. State is
//! only mutated after a broker-confirmed success, and one candidate failing
//! never aborts the rest of the list.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::market::MarketData;
use crate::pipeline::Candidate;
use crate::state::SharedState;
use shouban_common::TradingConfig;

/// Counters for one executor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    /// Candidates handed to the executor
    pub attempted: usize,
    /// Orders confirmed by the broker and recorded
    pub bought: usize,
    /// Candidates dropped before submission (no quote, unsizeable, cap)
    pub skipped: usize,
    /// Submissions that failed (broker rejection or transport)
    pub failed: usize,
}

/// Round down to a 100-share lot targeting `notional` at `price`.
fn lot_quantity(notional: f64, price: f64) -> u64 {
    if price <= 0.0 {
        return 0;
    }
    let shares = (notional / price).floor() as u64;
    (shares / 100) * 100
}

pub struct TradeExecutor {
    config: TradingConfig,
}

impl TradeExecutor {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Submit orders for the surviving candidates.
    pub async fn execute(
        &self,
        candidates: &[Candidate],
        market: &dyn MarketData,
        broker: &dyn Broker,
        state: &SharedState,
    ) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            attempted: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            // Caps are enforced before any order leaves the process; earlier
            // candidates in this same pass may have consumed the sector.
            if state.is_bought(&candidate.code) || state.sector_capped(&candidate.sector_id) {
                debug!(
                    code = %candidate.code,
                    sector = %candidate.sector_id,
                    "Cap reached, skipping candidate"
                );
                summary.skipped += 1;
                continue;
            }

            let quote = match market.quote(&candidate.code).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(code = %candidate.code, error = %e, "Quote fetch failed, skipping candidate");
                    summary.skipped += 1;
                    continue;
                }
            };

            // The strategy buys at the limit-up price, betting the stock
            // locks there.
            let Some(limit_up) = quote.valid_limit_up() else {
                warn!(code = %candidate.code, "No usable limit-up price, skipping candidate");
                summary.skipped += 1;
                continue;
            };

            let quantity = lot_quantity(self.config.notional, limit_up);
            if quantity == 0 {
                warn!(
                    code = %candidate.code,
                    price = limit_up,
                    "Notional too small for one lot, skipping candidate"
                );
                summary.skipped += 1;
                continue;
            }

            match broker.buy(&candidate.code, limit_up, quantity).await {
                Ok(ack) if ack.is_success() => {
                    let cost = quantity as f64 * limit_up;
                    if state.record_buy(&candidate.code, &candidate.sector_id, cost) {
                        info!(
                            code = %candidate.code,
                            name = %candidate.name,
                            sector = %candidate.sector_id,
                            price = limit_up,
                            quantity,
                            cost,
                            "Buy order confirmed"
                        );
                        summary.bought += 1;
                    } else {
                        // Filled but the code or sector hit a cap between the
                        // pipeline snapshot and now.
                        warn!(
                            code = %candidate.code,
                            sector = %candidate.sector_id,
                            "Buy confirmed but not recorded, cap reached"
                        );
                        summary.skipped += 1;
                    }
                }
                Ok(ack) => {
                    warn!(
                        code = %candidate.code,
                        broker_code = ack.code,
                        message = ack.message.as_deref().unwrap_or(""),
                        "Buy order rejected"
                    );
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(code = %candidate.code, error = %e, "Buy order submission failed");
                    summary.failed += 1;
                }
            }
        }

        if summary.attempted > 0 {
            info!(
                attempted = summary.attempted,
                bought = summary.bought,
                skipped = summary.skipped,
                failed = summary.failed,
                "Executor pass complete"
            );
        }
        summary
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lot_quantity_reference_price() {
        // floor(floor(10000 / 12.34) / 100) * 100
        assert_eq!(lot_quantity(10_000.0, 12.34), 800);
    }

    #[test]
    fn test_lot_quantity_rounds_to_lot() {
        assert_eq!(lot_quantity(10_000.0, 9.99), 1000);
        assert_eq!(lot_quantity(10_000.0, 100.0), 100);
        assert_eq!(lot_quantity(10_000.0, 33.0), 300);
    }

    #[test]
    fn test_lot_quantity_too_expensive() {
        // One lot would already exceed the notional
        assert_eq!(lot_quantity(10_000.0, 101.0), 0);
        assert_eq!(lot_quantity(10_000.0, 250.0), 0);
    }

    #[test]
    fn test_lot_quantity_degenerate_price() {
        assert_eq!(lot_quantity(10_000.0, 0.0), 0);
        assert_eq!(lot_quantity(10_000.0, -5.0), 0);
    }

    #[test]
    fn test_summary_default() {
        let summary = ExecutionSummary::default();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.bought, 0);
    }
}
