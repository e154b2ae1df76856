//! Online judge engine: runs untrusted submissions in a bounded sandbox pool
//! and turns their outcomes into verdicts.

pub mod config;
pub mod constants;
pub mod core;
pub mod native;
pub mod stubs;
