#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! SaaSBase API
//!
//! The HTTP surface over the credit ledger and payment subsystems:
//! webhook intake, balance/history reads, checkout creation and the
//! admin grant endpoint.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
