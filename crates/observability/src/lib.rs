//! Process-wide tracing setup for the stock ledger.

pub mod subscriber;

pub use subscriber::{DEFAULT_FILTER, init, init_for_tests};
