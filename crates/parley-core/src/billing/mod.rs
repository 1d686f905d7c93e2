//! Metering: allowance ledger, model pricing, and the usage audit log.

pub mod ledger;
pub mod pricing;
pub mod usage_log;
