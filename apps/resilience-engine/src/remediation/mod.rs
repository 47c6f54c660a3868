//! Remediation pipeline: queue, budget gate, and bounded dispatch.
//!
//! Backfill requests enter through [`RemediationQueue::submit`], pick up
//! approval (automatic or human), and leave through the
//! [`RemediationDispatcher`], which spends against the limits enforced by
//! [`BudgetGate`].

mod budget;
mod dispatcher;
mod queue;
mod request;

pub use budget::{
    BudgetDenial, BudgetGate, BudgetLedgerError, BudgetLedgerPort, BudgetPeriod,
    InMemoryBudgetLedger,
};
pub use dispatcher::{
    BackfillError, BackfillExecutorPort, BackfillOutcome, NoOpBackfillExecutor,
    RemediationDispatcher,
};
pub use queue::RemediationQueue;
pub use request::{RemediationError, RemediationRequest, RemediationStatus};
