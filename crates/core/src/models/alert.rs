use serde::{Deserialize, Serialize};

use crate::format::format_percentage;

/// Which performance milestone the portfolio crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// Total P&L at or above the performance threshold.
    Milestone,
    /// Total P&L at or above the high-performance threshold.
    TakeProfits,
    /// Total P&L at or below the negative performance threshold.
    Decline,
}

/// The single active alert shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    pub pnl_percent: f64,
    pub message: String,
}

impl PerformanceAlert {
    pub fn new(kind: AlertKind, pnl_percent: f64) -> Self {
        let message = match kind {
            AlertKind::Milestone => format!(
                "Congratulations! Your portfolio has gained {}!",
                format_percentage(pnl_percent)
            ),
            AlertKind::TakeProfits => format!(
                "Outstanding performance! Your portfolio has gained {}! You might consider taking some profits.",
                format_percentage(pnl_percent)
            ),
            AlertKind::Decline => format!(
                "Your portfolio has declined {:.2}%. Consider reviewing your positions.",
                pnl_percent.abs()
            ),
        };
        Self {
            kind,
            pnl_percent,
            message,
        }
    }
}
