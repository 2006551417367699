//! Token accounting for SQLPilot sessions.
//!
//! Every model response reports how many tokens it consumed. The
//! [`TokenAccountant`] folds those reports into running session totals
//! that the front end can show after each answer.

pub mod accountant;

pub use accountant::{TokenAccountant, TokenTotals};
