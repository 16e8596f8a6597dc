//! kubeyard-cloud — infrastructure collaborators for Kubeyard.
//!
//! Defines the strongly-typed contracts the orchestrator drives (VMs,
//! networks, firewall and port-forward rules, certificate issuance, remote
//! command execution, boot media, settings, host capacity and catalog
//! lookups) plus two implementations that ship with the daemon:
//!
//! - [`TcpProbe`]: a real TCP reachability check.
//! - [`SimulatedCloud`]: an in-memory cloud implementing every contract,
//!   with fault injection. Backs the `sandbox` daemon mode and the tests.

pub mod config_store;
pub mod error;
pub mod probe;
pub mod services;
pub mod sim;
pub mod traits;
pub mod types;

pub use config_store::StaticConfigStore;
pub use error::{CloudError, CloudResult};
pub use probe::TcpProbe;
pub use services::CloudServices;
pub use sim::SimulatedCloud;
pub use traits::*;
pub use types::*;
