#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! SaaSBase Credit Ledger
//!
//! Transactional credit accounting for the billing subsystem.
//!
//! ## Design
//!
//! - **Ledger rows are the balance**: the sum of all non-expired
//!   credit-type rows' remaining `credits` is a user's available balance.
//!   Consumption shrinks those rows in place; debit rows are written as an
//!   immutable audit trail and never hold consumable balance themselves.
//! - **FIFO with priority**: consumption drains daily-bonus credits first,
//!   then everything else soonest-to-expire first, permanent credits last.
//! - **Pessimistic locking**: consumption selects its candidate rows
//!   `FOR UPDATE` inside one transaction, so two concurrent spends of the
//!   same balance serialize instead of double-spending.

pub mod clock;
pub mod error;
pub mod model;
pub mod planner;
pub mod service;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use error::{LedgerError, LedgerResult};
pub use model::{
    CreditBalance, CreditHistoryPage, CreditTransaction, CreditsType, NewCreditTransaction,
    TransactionType,
};
pub use planner::{plan_consumption, ConsumptionPlan, ConsumptionSlice};
pub use service::{ConsumeCredits, ConsumeOutcome, CreditService, GrantCredits, GrantMode};
pub use store::CreditStore;
