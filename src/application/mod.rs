pub mod calculator;
pub mod engine;
pub mod ingester;
pub mod reconciliation;
pub mod transition;
