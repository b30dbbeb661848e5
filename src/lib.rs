pub mod api;
pub mod batch;
pub mod config;
pub mod ledger;
pub mod publish;
pub mod telemetry;
