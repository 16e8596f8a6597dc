//! Create, start, stop and delete scenarios against the sandbox cloud.

mod common;

use common::*;

use base64::Engine as _;
use kubeyard_cloud::{NetworkState, VmService, VmState, Zone};
use kubeyard_orchestrator::{ClusterFilter, OrchestratorError, TeardownOutcome};
use kubeyard_state::ClusterState;

// ── Create ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_persists_cluster_without_vms() {
    let h = harness().await;
    let cluster = h.manager.create_cluster(&request("demo", 3)).await.unwrap();

    assert_eq!(cluster.state, ClusterState::Created);
    assert_eq!(cluster.node_count, 3);
    assert_eq!(cluster.cores, 3);
    assert_eq!(cluster.memory_mb, 3 * 2048);
    assert_eq!(cluster.template_id, "tmpl-coreos");
    assert!(h.manager.cluster_vms(&cluster.id).unwrap().is_empty());
    assert!(h.cloud.live_vms().await.is_empty());

    let details = h.store.get_details(&cluster.id).unwrap().unwrap();
    assert_eq!(details.admin_username, "admin");
    assert!(!details.admin_password.is_empty());
    assert!(details.network_cleanup);

    let network = h.cloud.network(&cluster.network_id).await.unwrap();
    assert_eq!(network.name, "demo-network");
}

#[tokio::test]
async fn create_rejects_bad_size_and_name() {
    let h = harness().await;
    for (name, size) in [("demo", 0), ("demo", 101), ("  ", 1)] {
        let err = h.manager.create_cluster(&request(name, size)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)), "{name}/{size}: {err}");
    }
    assert!(h.store.list_clusters().unwrap().is_empty());
}

#[tokio::test]
async fn create_checks_zone() {
    let h = harness().await;
    let mut req = request("demo", 1);
    req.zone_id = "nowhere".into();
    let err = h.manager.create_cluster(&req).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    h.cloud
        .add_zone(Zone {
            id: "zone-off".into(),
            name: "disabled".into(),
            enabled: false,
        })
        .await;
    req.zone_id = "zone-off".into();
    let err = h.manager.create_cluster(&req).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)));
}

#[tokio::test]
async fn create_checks_key_pair_and_capacity() {
    let h = harness().await;
    let mut req = request("demo", 1);
    req.ssh_key_pair = Some("missing".into());
    let err = h.manager.create_cluster(&req).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    // 4 hosts × 16 small VMs each.
    let err = h.manager.create_cluster(&request("huge", 64)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Capacity(_)), "{err}");
    assert!(h.manager.create_cluster(&request("big", 63)).await.is_ok());
}

#[tokio::test]
async fn create_rejects_partial_registry() {
    let h = harness().await;
    let mut req = request("demo", 1);
    req.registry_username = Some("bob".into());
    let err = h.manager.create_cluster(&req).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
}

#[tokio::test]
async fn create_on_supplied_network() {
    let h = harness().await;
    let network = h.cloud.add_network("shared", "zone-1", "acct-1").await;

    let mut req = request("first", 1);
    req.network_id = Some(network.id.clone());
    let first = h.manager.create_cluster(&req).await.unwrap();
    assert_eq!(first.network_id, network.id);
    let details = h.store.get_details(&first.id).unwrap().unwrap();
    assert!(!details.network_cleanup);

    // Same network again is refused while the first cluster lives.
    req.name = "second".into();
    let err = h.manager.create_cluster(&req).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let foreign = h.cloud.add_network("foreign", "zone-1", "acct-2").await;
    req.network_id = Some(foreign.id);
    let err = h.manager.create_cluster(&req).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)));
}

// ── Cold start ─────────────────────────────────────────────────

#[tokio::test]
async fn cold_start_brings_up_master_and_nodes() {
    let h = harness().await;
    let created = h.manager.create_cluster(&request("demo", 3)).await.unwrap();
    let cluster = h.manager.start_cluster(&created.id, true).await.unwrap();

    assert_eq!(cluster.state, ClusterState::Running);
    assert_eq!(cluster.endpoint.as_deref(), Some("https://203.0.113.10:6443/"));
    assert!(
        cluster
            .console_endpoint
            .as_deref()
            .unwrap()
            .contains("kubernetes-dashboard")
    );

    let vms = h.manager.cluster_vms(&cluster.id).unwrap();
    assert_eq!(vms.len(), 4);
    assert_eq!(
        vms.iter().map(|m| m.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    let master = h.cloud.vm(&vms[0].vm_id).await.unwrap();
    assert_eq!(master.hostname, "demo-k8s-master");
    for (i, mapping) in vms.iter().enumerate().skip(1) {
        let vm = h.cloud.vm(&mapping.vm_id).await.unwrap();
        assert_eq!(vm.hostname, format!("demo-k8s-node-{i}"));
        assert_eq!(vm.state, VmState::Running);
    }

    assert_eq!(ssh_range(&h.cloud).await, Some((2222, 2225)));
    assert!(h
        .cloud
        .ingress_rules()
        .await
        .iter()
        .any(|r| r.start_port == 6443 && r.end_port == 6443));
    assert_eq!(
        forwarded_ports(&h.cloud).await,
        vec![2222, 2223, 2224, 2225, 6443]
    );
    assert!(h.cloud.attached_media().await.is_empty());
}

#[tokio::test]
async fn cold_start_stores_rewritten_kubeconfig() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;

    let kubeconfig = h.manager.cluster_config(&cluster.id).unwrap();
    assert!(kubeconfig.contains("server: https://203.0.113.10:6443"));
    assert!(!kubeconfig.contains("10.1.1."));

    let raw = h.store.get_details(&cluster.id).unwrap().unwrap().kube_config.unwrap();
    let decoded = base64::engine::general_purpose::STANDARD.decode(raw).unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), kubeconfig);
}

#[tokio::test]
async fn master_failure_lands_in_error() {
    let h = harness().await;
    h.cloud.fail_vm_create("k8s-master").await;
    let created = h.manager.create_cluster(&request("demo", 3)).await.unwrap();

    let err = h.manager.start_cluster(&created.id, true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }), "{err}");

    let cluster = h.manager.get_cluster(&created.id).unwrap();
    assert_eq!(cluster.state, ClusterState::Error);
    assert_eq!(cluster.endpoint, None);
    assert!(h.manager.cluster_vms(&created.id).unwrap().len() <= 1);
}

#[tokio::test]
async fn unreachable_api_server_fails_start() {
    let h = harness().await;
    h.cloud.set_api_reachable(false).await;
    let created = h.manager.create_cluster(&request("demo", 2)).await.unwrap();

    let err = h.manager.start_cluster(&created.id, true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }));
    let cluster = h.manager.get_cluster(&created.id).unwrap();
    assert_eq!(cluster.state, ClusterState::Error);
    assert_eq!(cluster.endpoint, None);
    // VMs stay for teardown; the ISO does not.
    assert_eq!(h.manager.cluster_vms(&created.id).unwrap().len(), 3);
    assert!(h.cloud.attached_media().await.is_empty());
}

#[tokio::test]
async fn pending_addon_fails_start_after_endpoint_is_set() {
    let h = harness().await;
    h.cloud.set_addon_ready(false).await;
    let created = h.manager.create_cluster(&request("demo", 1)).await.unwrap();

    let err = h.manager.start_cluster(&created.id, true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }));
    let cluster = h.manager.get_cluster(&created.id).unwrap();
    assert_eq!(cluster.state, ClusterState::Error);
    assert!(cluster.endpoint.is_some());
    assert_eq!(cluster.console_endpoint, None);
}

#[tokio::test]
async fn cold_start_only_from_created() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    let err = h.manager.start_cluster(&cluster.id, true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)));
}

// ── Stop / warm start ──────────────────────────────────────────

#[tokio::test]
async fn stop_then_warm_start() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;

    let stopped = h.manager.stop_cluster(&cluster.id).await.unwrap();
    assert_eq!(stopped.state, ClusterState::Stopped);
    for mapping in h.manager.cluster_vms(&cluster.id).unwrap() {
        assert_eq!(h.cloud.vm(&mapping.vm_id).await.unwrap().state, VmState::Stopped);
    }

    // Stopping again is a no-op.
    let again = h.manager.stop_cluster(&cluster.id).await.unwrap();
    assert_eq!(again.state, ClusterState::Stopped);

    let started = h.manager.start_cluster(&cluster.id, false).await.unwrap();
    assert_eq!(started.state, ClusterState::Running);
    for mapping in h.manager.cluster_vms(&cluster.id).unwrap() {
        assert_eq!(h.cloud.vm(&mapping.vm_id).await.unwrap().state, VmState::Running);
    }

    // Starting a running cluster is a no-op.
    let again = h.manager.start_cluster(&cluster.id, false).await.unwrap();
    assert_eq!(again.state, ClusterState::Running);
}

#[tokio::test]
async fn warm_start_with_stuck_vm_raises_alert() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;
    h.manager.stop_cluster(&cluster.id).await.unwrap();

    let node = &h.manager.cluster_vms(&cluster.id).unwrap()[2];
    h.cloud.fail_vm_start(&node.vm_id).await;

    let err = h.manager.start_cluster(&cluster.id, false).await.unwrap_err();
    assert!(err.to_string().contains(&node.vm_id));
    assert_eq!(
        h.manager.get_cluster(&cluster.id).unwrap().state,
        ClusterState::Alert
    );
    // The other VMs were still started.
    let master = &h.manager.cluster_vms(&cluster.id).unwrap()[0];
    assert_eq!(h.cloud.vm(&master.vm_id).await.unwrap().state, VmState::Running);
}

#[tokio::test]
async fn warm_start_with_unreachable_api_raises_alert() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    h.manager.stop_cluster(&cluster.id).await.unwrap();
    h.cloud.set_api_reachable(false).await;

    assert!(h.manager.start_cluster(&cluster.id, false).await.is_err());
    assert_eq!(
        h.manager.get_cluster(&cluster.id).unwrap().state,
        ClusterState::Alert
    );
}

// ── Delete ─────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_everything_and_is_idempotent() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 3).await;

    let outcome = h.manager.delete_cluster(&cluster.id).await.unwrap();
    assert_eq!(outcome, TeardownOutcome::Completed);
    assert!(h.cloud.live_vms().await.is_empty());
    assert!(h.store.list_vms(&cluster.id).unwrap().is_empty());
    assert_eq!(
        h.cloud.network(&cluster.network_id).await.unwrap().state,
        NetworkState::Destroyed
    );

    let record = h.store.get_cluster(&cluster.id).unwrap().unwrap();
    assert_eq!(record.state, ClusterState::Destroyed);
    assert!(record.removed_at.is_some());
    assert!(!record.gc_pending);
    assert!(matches!(
        h.manager.get_cluster(&cluster.id),
        Err(OrchestratorError::NotFound(_))
    ));

    let again = h.manager.delete_cluster(&cluster.id).await.unwrap();
    assert_eq!(again, TeardownOutcome::Completed);
}

#[tokio::test]
async fn failed_network_destroy_is_deferred_then_completed() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    h.cloud.fail_network_destroy(true).await;

    let outcome = h.manager.delete_cluster(&cluster.id).await.unwrap();
    assert!(matches!(outcome, TeardownOutcome::Deferred { .. }));
    let record = h.manager.get_cluster(&cluster.id).unwrap();
    assert!(record.gc_pending);
    assert_eq!(record.state, ClusterState::Error);
    assert!(h.cloud.live_vms().await.is_empty());

    h.cloud.fail_network_destroy(false).await;
    let outcome = h.manager.delete_cluster(&cluster.id).await.unwrap();
    assert_eq!(outcome, TeardownOutcome::Completed);
    let record = h.store.get_cluster(&cluster.id).unwrap().unwrap();
    assert!(!record.gc_pending);
    assert!(record.is_removed());
}

#[tokio::test]
async fn failed_vm_destroy_keeps_its_mapping() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;
    let stuck = h.manager.cluster_vms(&cluster.id).unwrap()[1].clone();
    h.cloud.fail_vm_destroy(&stuck.vm_id, true).await;

    let outcome = h.manager.delete_cluster(&cluster.id).await.unwrap();
    assert!(matches!(outcome, TeardownOutcome::Deferred { .. }));
    let remaining = h.store.list_vms(&cluster.id).unwrap();
    assert_eq!(remaining, vec![stuck.clone()]);
    assert!(h.manager.get_cluster(&cluster.id).unwrap().gc_pending);
    // The network is left alone while a VM still lives on it.
    assert_ne!(
        h.cloud.network(&cluster.network_id).await.unwrap().state,
        NetworkState::Destroyed
    );
}

#[tokio::test]
async fn delete_unmaps_vms_already_gone() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;
    // A vm destroyed by an earlier pass whose unmap never landed.
    let orphan = h.manager.cluster_vms(&cluster.id).unwrap()[2].clone();
    h.cloud.destroy(&orphan.vm_id).await.unwrap();
    h.cloud.expunge(&orphan.vm_id).await.unwrap();
    assert_eq!(h.store.list_vms(&cluster.id).unwrap().len(), 3);

    let outcome = h.manager.delete_cluster(&cluster.id).await.unwrap();
    assert_eq!(outcome, TeardownOutcome::Completed);
    assert!(h.store.list_vms(&cluster.id).unwrap().is_empty());
    assert!(h.cloud.live_vms().await.is_empty());
}

#[tokio::test]
async fn delete_requires_a_settled_state() {
    let h = harness().await;
    let created = h.manager.create_cluster(&request("demo", 1)).await.unwrap();
    let err = h.manager.delete_cluster(&created.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)));
    assert_eq!(
        h.manager.get_cluster(&created.id).unwrap().state,
        ClusterState::Created
    );
}

#[tokio::test]
async fn failed_cold_start_can_be_deleted() {
    let h = harness().await;
    h.cloud.set_api_reachable(false).await;
    let created = h.manager.create_cluster(&request("demo", 2)).await.unwrap();
    assert!(h.manager.start_cluster(&created.id, true).await.is_err());

    let outcome = h.manager.delete_cluster(&created.id).await.unwrap();
    assert_eq!(outcome, TeardownOutcome::Completed);
    assert!(h.cloud.live_vms().await.is_empty());
}

// ── Queries ────────────────────────────────────────────────────

#[tokio::test]
async fn list_filters_by_state_name_and_owner() {
    let h = harness().await;
    let running = running_cluster(&h, "alpha", 1).await;
    let created = h.manager.create_cluster(&request("beta", 1)).await.unwrap();
    let mut other = request("alphabet", 1);
    other.owner.account_id = "acct-2".into();
    h.manager.create_cluster(&other).await.unwrap();

    let all = h.manager.list_clusters(&ClusterFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    let by_state = h
        .manager
        .list_clusters(&ClusterFilter {
            state: Some(ClusterState::Running),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_state.len(), 1);
    assert_eq!(by_state[0].id, running.id);

    let by_name = h
        .manager
        .list_clusters(&ClusterFilter {
            name: Some("ALPHA".into()),
            account_id: Some("acct-1".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_name.len(), 1);

    let err = h
        .manager
        .list_clusters(&ClusterFilter {
            state: Some(ClusterState::Scaling),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    h.manager.delete_cluster(&running.id).await.unwrap();
    let destroyed = h
        .manager
        .list_clusters(&ClusterFilter {
            state: Some(ClusterState::Destroyed),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].id, running.id);
    assert!(h.manager.get_cluster(&created.id).is_ok());
}

#[tokio::test]
async fn kubeconfig_missing_before_start() {
    let h = harness().await;
    let created = h.manager.create_cluster(&request("demo", 1)).await.unwrap();
    assert!(matches!(
        h.manager.cluster_config(&created.id),
        Err(OrchestratorError::NotFound(_))
    ));
}
