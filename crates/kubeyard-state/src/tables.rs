//! redb table definitions for the Kubeyard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Cluster records keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Cluster details keyed by `{cluster_id}`.
pub const CLUSTER_DETAILS: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster_details");

/// VM mapping keyed by `{cluster_id}:{index:06}`.
pub const CLUSTER_VMS: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster_vms");
