//! kubeyard-core — shared configuration and constants for Kubeyard.
//!
//! Holds the `kubeyard.toml` parser, duration parsing for human-readable
//! intervals (`"30s"`, `"500ms"`, `"5m"`), the retry policies used by every
//! bounded polling loop, and the fixed port layout of a managed cluster.

pub mod config;
pub mod duration;
pub mod retry;
pub mod types;

pub use config::{
    LimitsConfig, PollingConfig, ServiceConfig, SshConfig, SweepsConfig, settings,
};
pub use duration::parse_duration;
pub use retry::RetryPolicy;
pub use types::*;
