use tracing::debug;

use crate::models::transaction::Transaction;

/// Net result of folding one symbol's transactions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Holding {
    /// Net held quantity, never negative.
    pub total_amount: f64,
    /// Net cost basis, never negative.
    pub total_cost: f64,
    pub realized_pnl: f64,
    pub total_fees: f64,
}

/// How the cost of units leaving a holding is determined.
///
/// [`AverageCost`] is the system of record. [`Fifo`] is an alternate
/// tax-lot view; the two diverge on realized P&L under partial sells.
pub trait CostBasisStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fold the transactions of a single symbol, in the order given.
    fn fold(&self, transactions: &[&Transaction]) -> Holding;
}

/// Weighted-average cost, recomputed on every outflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageCost;

impl CostBasisStrategy for AverageCost {
    fn name(&self) -> &'static str {
        "average-cost"
    }

    fn fold(&self, transactions: &[&Transaction]) -> Holding {
        let mut h = Holding::default();

        for tx in transactions {
            if tx.transaction_type.is_inflow() {
                h.total_amount += tx.amount;
                h.total_cost += tx.value;
                // A negative stored value can't take the cost basis below zero.
                if h.total_cost < 0.0 {
                    debug!(symbol = %tx.symbol, id = %tx.id, "inflow value drives cost below zero, clamping");
                    h.total_cost = 0.0;
                }
            } else {
                let avg_cost = if h.total_amount > 0.0 {
                    h.total_cost / h.total_amount
                } else {
                    0.0
                };
                let sold_value = tx.amount * tx.unit_price;
                let sold_cost = tx.amount * avg_cost;

                h.realized_pnl += sold_value - sold_cost - tx.fees;
                h.total_amount -= tx.amount;
                h.total_cost -= sold_cost;

                // Over-withdrawal clamps to an empty holding instead of going negative.
                if h.total_amount < 0.0 {
                    debug!(symbol = %tx.symbol, id = %tx.id, "outflow exceeds holdings, clamping to zero");
                    h.total_amount = 0.0;
                }
                if h.total_cost < 0.0 {
                    h.total_cost = 0.0;
                }
            }
            h.total_fees += tx.fees;
        }

        h
    }
}

/// First-in-first-out lot consumption, ordered by transaction timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl CostBasisStrategy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn fold(&self, transactions: &[&Transaction]) -> Holding {
        let mut ordered: Vec<&Transaction> = transactions.to_vec();
        ordered.sort_by_key(|tx| tx.timestamp);

        let mut lots: Vec<Transaction> = Vec::new();
        let mut realized_pnl = 0.0;
        let mut total_fees = 0.0;

        for tx in ordered {
            if tx.transaction_type.is_inflow() {
                lots.push(tx.clone());
            } else {
                let outcome = fifo_realized(&tx.symbol, tx.amount, tx.unit_price, &lots);
                realized_pnl += outcome.realized_pnl - tx.fees;
                lots = outcome.remaining_buys;
            }
            total_fees += tx.fees;
        }

        Holding {
            total_amount: lots.iter().map(|l| l.amount).sum::<f64>().max(0.0),
            total_cost: lots.iter().map(|l| l.value).sum::<f64>().max(0.0),
            realized_pnl,
            total_fees,
        }
    }
}

/// Realized P&L of one sale under FIFO, plus the buy lots left afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FifoOutcome {
    pub realized_pnl: f64,
    /// Untouched lots as-is; a partially consumed lot with its amount and
    /// value reduced to what remains.
    pub remaining_buys: Vec<Transaction>,
}

/// Consume `symbol`'s buy/deposit lots oldest-first to cover a sale of
/// `sell_amount` at `sell_price`.
///
/// Profit per lot is `(sell_price − lot.unit_price) × consumed`. Transactions
/// of other symbols and outflows in `buys` are ignored. A sale larger than
/// all lots consumes everything; the excess carries no P&L.
pub fn fifo_realized(
    symbol: &str,
    sell_amount: f64,
    sell_price: f64,
    buys: &[Transaction],
) -> FifoOutcome {
    let mut lots: Vec<&Transaction> = buys
        .iter()
        .filter(|tx| tx.symbol == symbol && tx.transaction_type.is_inflow())
        .collect();
    lots.sort_by_key(|tx| tx.timestamp);

    let mut remaining_to_sell = sell_amount;
    let mut realized_pnl = 0.0;
    let mut remaining_buys = Vec::with_capacity(lots.len());

    for lot in lots {
        if remaining_to_sell <= 0.0 {
            remaining_buys.push(lot.clone());
            continue;
        }

        let consumed = remaining_to_sell.min(lot.amount);
        realized_pnl += (sell_price - lot.unit_price) * consumed;
        remaining_to_sell -= consumed;

        if lot.amount > consumed {
            let left = lot.amount - consumed;
            let mut partial = lot.clone();
            partial.amount = left;
            partial.value = left * lot.unit_price;
            remaining_buys.push(partial);
        }
    }

    FifoOutcome {
        realized_pnl,
        remaining_buys,
    }
}
