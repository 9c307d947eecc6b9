pub mod metrics;
pub mod provisioning;
