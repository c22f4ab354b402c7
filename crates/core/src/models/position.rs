use serde::{Deserialize, Serialize};

use super::feed::FeedSnapshot;

/// Derived holding of one symbol. Never persisted; recomputed from the
/// transaction set on every valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,

    /// Net held quantity, floored at zero.
    pub total_amount: f64,

    /// Net cost basis in USD, floored at zero.
    pub total_cost: f64,

    /// `total_cost / total_amount`, or 0 when nothing is held.
    pub average_price: f64,

    /// Quote price used for valuation (0 when no quote matched).
    pub current_price: f64,

    pub current_value: f64,

    pub unrealized_pnl: f64,

    pub unrealized_pnl_percent: f64,

    /// Profit locked in by earlier sells/withdrawals.
    pub realized_pnl: f64,

    pub total_fees: f64,

    /// 24h change of the matched quote in percent (0 when no quote matched).
    pub change_24h: f64,
}

/// Aggregate valuation of a whole portfolio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub total_value: f64,
    pub total_cost: f64,
    pub total_unrealized_pnl: f64,
    pub total_realized_pnl: f64,
    /// `total_unrealized_pnl + total_realized_pnl`
    pub total_pnl: f64,
    /// `total_pnl / total_cost × 100`, or 0 when there is no cost basis.
    pub total_pnl_percent: f64,
    pub total_fees: f64,
    /// Ordered by descending `current_value`.
    pub positions: Vec<Position>,
}

impl PortfolioMetrics {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    /// Share of `total_value` held in each position, in percent, in position order.
    pub fn allocations(&self) -> Vec<(String, f64)> {
        self.positions
            .iter()
            .map(|p| {
                let pct = if self.total_value > 0.0 {
                    p.current_value / self.total_value * 100.0
                } else {
                    0.0
                };
                (p.symbol.clone(), pct)
            })
            .collect()
    }
}

/// Metrics together with the price snapshot they were computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValuation {
    pub metrics: PortfolioMetrics,
    pub prices: FeedSnapshot,
}

impl PortfolioValuation {
    /// Set when the live fetch gave up; the metrics then use cached quotes.
    pub fn price_error(&self) -> Option<&str> {
        self.prices.error.as_deref()
    }
}
