//! Spend tracking against daily and monthly limits.
//!
//! The ledger itself is an external service behind `BudgetLedgerPort`. The
//! gate composes it with the configured limits and fails closed: when the
//! ledger cannot be reached, no spend is allowed through.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::RemediationConfig;

/// Accounting period for spend queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetPeriod {
    /// Calendar day, UTC.
    Daily,
    /// Calendar month, UTC.
    Monthly,
}

impl BudgetPeriod {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Budget ledger errors.
#[derive(Debug, Clone, Error)]
pub enum BudgetLedgerError {
    /// The ledger service could not be reached.
    #[error("budget ledger unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port to the external spend ledger.
#[async_trait]
pub trait BudgetLedgerPort: Send + Sync {
    /// Cumulative spend in the current period.
    async fn current_spend(&self, period: BudgetPeriod) -> Result<Decimal, BudgetLedgerError>;

    /// Record spend under a category.
    async fn record_spend(&self, amount: Decimal, category: &str)
    -> Result<(), BudgetLedgerError>;
}

/// Why the gate refused a spend.
#[derive(Debug, Clone)]
pub enum BudgetDenial {
    /// The spend would push a period over its limit.
    LimitExceeded {
        /// Period whose limit would be exceeded.
        period: BudgetPeriod,
        /// Spend already recorded in the period.
        current_spend: Decimal,
        /// Configured limit for the period.
        limit: Decimal,
        /// Amount that was requested.
        requested: Decimal,
    },
    /// The ledger could not be consulted; spend is refused.
    LedgerUnavailable {
        /// Error details.
        message: String,
    },
}

impl fmt::Display for BudgetDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded {
                period,
                current_spend,
                limit,
                requested,
            } => write!(
                f,
                "{period} budget exhausted: ${current_spend} spent of ${limit}, ${requested} requested"
            ),
            Self::LedgerUnavailable { message } => {
                write!(f, "budget ledger unavailable: {message}")
            }
        }
    }
}

/// Hard gate over daily and monthly spend limits.
pub struct BudgetGate {
    ledger: Arc<dyn BudgetLedgerPort>,
    daily_limit: Decimal,
    monthly_limit: Decimal,
}

impl BudgetGate {
    /// Build a gate over `ledger` with limits from the remediation config.
    #[must_use]
    pub fn new(ledger: Arc<dyn BudgetLedgerPort>, config: &RemediationConfig) -> Self {
        Self {
            ledger,
            daily_limit: Decimal::try_from(config.daily_spend_limit).unwrap_or_default(),
            monthly_limit: Decimal::try_from(config.monthly_spend_limit).unwrap_or_default(),
        }
    }

    /// Check whether `amount` fits inside both period limits.
    ///
    /// Spending exactly up to a limit is allowed; the first dollar past it
    /// is not.
    pub async fn check(&self, amount: Decimal) -> Result<(), BudgetDenial> {
        for (period, limit) in [
            (BudgetPeriod::Daily, self.daily_limit),
            (BudgetPeriod::Monthly, self.monthly_limit),
        ] {
            let current = self
                .ledger
                .current_spend(period)
                .await
                .map_err(|err| BudgetDenial::LedgerUnavailable {
                    message: err.to_string(),
                })?;
            if current + amount > limit {
                return Err(BudgetDenial::LimitExceeded {
                    period,
                    current_spend: current,
                    limit,
                    requested: amount,
                });
            }
        }
        Ok(())
    }
}

/// Ledger kept in process memory.
///
/// Used in tests and as the default wiring until an external ledger service
/// is configured.
#[derive(Default)]
pub struct InMemoryBudgetLedger {
    entries: Mutex<Vec<SpendEntry>>,
}

struct SpendEntry {
    at: DateTime<Utc>,
    amount: Decimal,
}

impl InMemoryBudgetLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record spend with an explicit timestamp.
    pub fn record_spend_at(&self, amount: Decimal, at: DateTime<Utc>) {
        self.entries.lock().push(SpendEntry { at, amount });
    }

    /// Spend recorded in the period containing `now`.
    #[must_use]
    pub fn spend_in_period_at(&self, period: BudgetPeriod, now: DateTime<Utc>) -> Decimal {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|e| match period {
                BudgetPeriod::Daily => e.at.date_naive() == now.date_naive(),
                BudgetPeriod::Monthly => {
                    e.at.year() == now.year() && e.at.month() == now.month()
                }
            })
            .map(|e| e.amount)
            .sum()
    }
}

#[async_trait]
impl BudgetLedgerPort for InMemoryBudgetLedger {
    async fn current_spend(&self, period: BudgetPeriod) -> Result<Decimal, BudgetLedgerError> {
        Ok(self.spend_in_period_at(period, Utc::now()))
    }

    async fn record_spend(
        &self,
        amount: Decimal,
        category: &str,
    ) -> Result<(), BudgetLedgerError> {
        tracing::debug!(amount = %amount, category, "Spend recorded");
        self.record_spend_at(amount, Utc::now());
        Ok(())
    }
}
