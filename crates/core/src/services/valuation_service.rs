use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::position::{PortfolioMetrics, Position};
use crate::models::price::{index_by_symbol, Quote};
use crate::models::transaction::Transaction;
use crate::services::cost_basis::{AverageCost, CostBasisStrategy};

/// Folds a transaction history and a set of quotes into portfolio metrics.
///
/// Pure business logic with no I/O. The same inputs always produce the same
/// output, and nothing here fails: a missing quote values the position at
/// zero and an over-withdrawal empties the holding.
pub struct ValuationService {
    strategy: Box<dyn CostBasisStrategy>,
}

impl ValuationService {
    /// Average-cost valuation (the system of record).
    pub fn new() -> Self {
        Self::with_strategy(Box::new(AverageCost))
    }

    pub fn with_strategy(strategy: Box<dyn CostBasisStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn compute_metrics(&self, transactions: &[Transaction], quotes: &[Quote]) -> PortfolioMetrics {
        compute_metrics_with(self.strategy.as_ref(), transactions, quotes)
    }
}

impl Default for ValuationService {
    fn default() -> Self {
        Self::new()
    }
}

/// Average-cost portfolio metrics.
pub fn compute_metrics(transactions: &[Transaction], quotes: &[Quote]) -> PortfolioMetrics {
    compute_metrics_with(&AverageCost, transactions, quotes)
}

/// Portfolio metrics under an explicit cost-basis strategy.
pub fn compute_metrics_with(
    strategy: &dyn CostBasisStrategy,
    transactions: &[Transaction],
    quotes: &[Quote],
) -> PortfolioMetrics {
    let quotes = index_by_symbol(quotes);
    let mut metrics = PortfolioMetrics::default();

    for (symbol, txs) in group_by_symbol(transactions) {
        let holding = strategy.fold(&txs);
        if holding.total_amount <= 0.0 {
            continue;
        }

        let quote = quotes.get(symbol);
        let current_price = quote.map_or(0.0, |q| q.price_usd);
        let change_24h = quote.map_or(0.0, |q| q.change_24h_percent);

        let average_price = holding.total_cost / holding.total_amount;
        let current_value = holding.total_amount * current_price;
        let unrealized_pnl = current_value - holding.total_cost;
        let unrealized_pnl_percent = if holding.total_cost > 0.0 {
            unrealized_pnl / holding.total_cost * 100.0
        } else {
            0.0
        };

        metrics.total_value += current_value;
        metrics.total_cost += holding.total_cost;
        metrics.total_unrealized_pnl += unrealized_pnl;
        metrics.total_realized_pnl += holding.realized_pnl;
        metrics.total_fees += holding.total_fees;

        metrics.positions.push(Position {
            symbol: symbol.to_string(),
            total_amount: holding.total_amount,
            total_cost: holding.total_cost,
            average_price,
            current_price,
            current_value,
            unrealized_pnl,
            unrealized_pnl_percent,
            realized_pnl: holding.realized_pnl,
            total_fees: holding.total_fees,
            change_24h,
        });
    }

    metrics.total_pnl = metrics.total_unrealized_pnl + metrics.total_realized_pnl;
    metrics.total_pnl_percent = if metrics.total_cost > 0.0 {
        metrics.total_pnl / metrics.total_cost * 100.0
    } else {
        0.0
    };

    metrics.positions.sort_by(|a, b| {
        b.current_value
            .partial_cmp(&a.current_value)
            .unwrap_or(Ordering::Equal)
    });

    metrics
}

/// Group transactions by symbol, keeping the first-seen order of symbols
/// and the input order of transactions within each group.
fn group_by_symbol(transactions: &[Transaction]) -> Vec<(&str, Vec<&Transaction>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&Transaction>)> = Vec::new();

    for tx in transactions {
        let slot = *index.entry(tx.symbol.as_str()).or_insert_with(|| {
            groups.push((tx.symbol.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(tx);
    }

    groups
}
