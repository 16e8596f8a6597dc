//! kubeyard-state — embedded state store for Kubeyard clusters.
//!
//! Backed by [redb](https://docs.rs/redb), persists cluster records, their
//! one-to-one details, and the ordered cluster → VM mapping. Also owns the
//! [`ClusterStateMachine`], the only writer of a cluster's lifecycle state.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! VM mapping keys are `{cluster_id}:{index:06}` so a prefix scan yields the
//! entries in provisioning order, master first.
//!
//! State changes are optimistic: the machine reads the current state, looks
//! up the transition table, then issues a compare-and-set write that fails
//! with a stale-read outcome if another writer got there first.

pub mod error;
pub mod lifecycle;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult, TransitionError};
pub use lifecycle::{ClusterStateMachine, next_state};
pub use store::{CasOutcome, StateStore, epoch_secs};
pub use types::*;
