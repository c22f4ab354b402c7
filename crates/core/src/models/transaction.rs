use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a recorded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
    Deposit,
    Withdrawal,
}

impl TransactionType {
    /// `buy` and `deposit` add to holdings.
    pub fn is_inflow(self) -> bool {
        matches!(self, TransactionType::Buy | TransactionType::Deposit)
    }

    /// `sell` and `withdrawal` remove from holdings.
    pub fn is_outflow(self) -> bool {
        !self.is_inflow()
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "buy"),
            TransactionType::Sell => write!(f, "sell"),
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = crate::errors::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(TransactionType::Buy),
            "sell" => Ok(TransactionType::Sell),
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            other => Err(crate::errors::CoreError::Validation(format!(
                "Unknown transaction type: {other}"
            ))),
        }
    }
}

/// A single buy/sell/deposit/withdrawal record.
///
/// Field names on the wire follow the hosted `crypto_transactions` table.
/// Records are immutable once created; the valuation engine only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,

    /// Asset ticker, matched case-sensitively against quotes.
    #[serde(rename = "crypto_symbol")]
    pub symbol: String,

    #[serde(rename = "transaction_type")]
    pub transaction_type: TransactionType,

    /// Quantity of the asset (non-negative).
    pub amount: f64,

    /// USD price per unit at the time of the transaction.
    #[serde(rename = "purchase_price", default, deserialize_with = "super::null_as_zero")]
    pub unit_price: f64,

    /// USD fee, always a cost.
    #[serde(default, deserialize_with = "super::null_as_zero")]
    pub fees: f64,

    /// USD notional, fee-adjusted when the record was created.
    #[serde(rename = "transaction_value", default, deserialize_with = "super::null_as_zero")]
    pub value: f64,

    #[serde(rename = "created_at")]
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Record a new transaction now, computing its fee-adjusted value:
    /// inflows add the fee to the cost, outflows subtract it from the proceeds.
    pub fn new(
        transaction_type: TransactionType,
        symbol: impl Into<String>,
        amount: f64,
        unit_price: f64,
        fees: f64,
    ) -> Self {
        Self::at(transaction_type, symbol, amount, unit_price, fees, Utc::now())
    }

    /// Same as [`Transaction::new`] with an explicit timestamp.
    pub fn at(
        transaction_type: TransactionType,
        symbol: impl Into<String>,
        amount: f64,
        unit_price: f64,
        fees: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let gross = amount * unit_price;
        let value = if transaction_type.is_inflow() {
            gross + fees
        } else {
            gross - fees
        };
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            transaction_type,
            amount,
            unit_price,
            fees,
            value,
            timestamp,
        }
    }

    /// Override the stored value (imports and tests that carry their own notional).
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }
}
