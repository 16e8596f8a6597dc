//! Offering changes and node count changes.

mod common;

use common::*;

use kubeyard_cloud::{Hypervisor, VmState};
use kubeyard_orchestrator::{OrchestratorError, ScaleRequest};
use kubeyard_state::ClusterState;

fn size(n: u32) -> ScaleRequest {
    ScaleRequest {
        size: Some(n),
        ..Default::default()
    }
}

fn offering(id: &str) -> ScaleRequest {
    ScaleRequest {
        service_offering_id: Some(id.to_string()),
        ..Default::default()
    }
}

// ── Horizontal ─────────────────────────────────────────────────

#[tokio::test]
async fn scale_up_adds_nodes_and_widens_ssh_range() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 3).await;

    let scaled = h.manager.scale_cluster(&cluster.id, &size(5)).await.unwrap();
    assert_eq!(scaled.state, ClusterState::Running);
    assert_eq!(scaled.node_count, 5);
    assert_eq!(scaled.cores, 5);
    assert_eq!(scaled.memory_mb, 5 * 2048);

    let vms = h.manager.cluster_vms(&cluster.id).unwrap();
    assert_eq!(
        vms.iter().map(|m| m.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4, 5]
    );
    let newest = h.cloud.vm(&vms[5].vm_id).await.unwrap();
    assert_eq!(newest.hostname, "demo-k8s-node-5");
    assert_eq!(newest.state, VmState::Running);

    assert_eq!(ssh_range(&h.cloud).await, Some((2222, 2227)));
    assert_eq!(
        forwarded_ports(&h.cloud).await,
        vec![2222, 2223, 2224, 2225, 2226, 2227, 6443]
    );
    assert!(h.cloud.attached_media().await.is_empty());
}

#[tokio::test]
async fn scale_down_removes_highest_nodes_first() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 5).await;

    let scaled = h.manager.scale_cluster(&cluster.id, &size(3)).await.unwrap();
    assert_eq!(scaled.state, ClusterState::Running);
    assert_eq!(scaled.node_count, 3);

    let drains: Vec<String> = h
        .cloud
        .commands()
        .await
        .into_iter()
        .filter(|c| c.starts_with("sudo kubectl drain"))
        .collect();
    assert_eq!(drains.len(), 2);
    assert!(drains[0].contains("demo-k8s-node-5"));
    assert!(drains[1].contains("demo-k8s-node-4"));

    let vms = h.manager.cluster_vms(&cluster.id).unwrap();
    assert_eq!(
        vms.iter().map(|m| m.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert_eq!(h.cloud.live_vms().await.len(), 4);
    assert_eq!(ssh_range(&h.cloud).await, Some((2222, 2225)));
    assert_eq!(
        forwarded_ports(&h.cloud).await,
        vec![2222, 2223, 2224, 2225, 6443]
    );
}

#[tokio::test]
async fn scale_down_then_up_reuses_indices() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 3).await;
    h.manager.scale_cluster(&cluster.id, &size(1)).await.unwrap();
    let scaled = h.manager.scale_cluster(&cluster.id, &size(2)).await.unwrap();

    assert_eq!(scaled.node_count, 2);
    let vms = h.manager.cluster_vms(&cluster.id).unwrap();
    assert_eq!(vms.iter().map(|m| m.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    let node = h.cloud.vm(&vms[2].vm_id).await.unwrap();
    assert_eq!(node.hostname, "demo-k8s-node-2");
    assert_eq!(ssh_range(&h.cloud).await, Some((2222, 2224)));
}

#[tokio::test]
async fn same_size_is_a_no_op() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;
    let before = h.cloud.commands().await.len();

    let scaled = h.manager.scale_cluster(&cluster.id, &size(2)).await.unwrap();
    assert_eq!(scaled.state, ClusterState::Running);
    assert_eq!(h.cloud.commands().await.len(), before);
}

#[tokio::test]
async fn node_that_never_joins_raises_alert() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    h.cloud.hold_node_not_ready("demo-k8s-node-2").await;

    let err = h.manager.scale_cluster(&cluster.id, &size(2)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }), "{err}");
    let record = h.manager.get_cluster(&cluster.id).unwrap();
    assert_eq!(record.state, ClusterState::Alert);
    // The size only changes once the nodes are ready.
    assert_eq!(record.node_count, 1);
    assert!(h.cloud.attached_media().await.is_empty());
}

#[tokio::test]
async fn short_vm_map_refuses_to_scale() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 3).await;
    h.store.remove_vm(&cluster.id, 2).unwrap();
    let vms_before = h.cloud.live_vms().await.len();

    let err = h.manager.scale_cluster(&cluster.id, &size(4)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }), "{err}");

    let record = h.manager.get_cluster(&cluster.id).unwrap();
    assert_eq!(record.state, ClusterState::Alert);
    assert_eq!(record.node_count, 3);
    let vms = h.manager.cluster_vms(&cluster.id).unwrap();
    assert_eq!(vms.iter().map(|m| m.index).collect::<Vec<_>>(), vec![0, 1, 3]);
    assert_eq!(h.cloud.live_vms().await.len(), vms_before);
    assert_eq!(ssh_range(&h.cloud).await, Some((2222, 2225)));
}

#[tokio::test]
async fn short_vm_map_refuses_offering_change() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;
    h.store.remove_vm(&cluster.id, 1).unwrap();

    let err = h
        .manager
        .scale_cluster(&cluster.id, &offering("medium"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }), "{err}");
    let record = h.manager.get_cluster(&cluster.id).unwrap();
    assert_eq!(record.state, ClusterState::Alert);
    assert_eq!(record.service_offering_id, "small");
}

#[tokio::test]
async fn upscale_without_capacity_raises_alert() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 3).await;
    let vms_before = h.cloud.live_vms().await.len();

    // 4 hosts × 16 small VMs cannot take 97 more.
    let err = h.manager.scale_cluster(&cluster.id, &size(100)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Capacity(_)), "{err}");

    let record = h.manager.get_cluster(&cluster.id).unwrap();
    assert_eq!(record.state, ClusterState::Alert);
    assert_eq!(record.node_count, 3);
    assert_eq!(h.cloud.live_vms().await.len(), vms_before);
}

// ── Vertical ───────────────────────────────────────────────────

#[tokio::test]
async fn offering_upgrade_resizes_every_vm() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 2).await;

    let scaled = h
        .manager
        .scale_cluster(&cluster.id, &offering("medium"))
        .await
        .unwrap();
    assert_eq!(scaled.state, ClusterState::Running);
    assert_eq!(scaled.service_offering_id, "medium");
    assert_eq!(scaled.cores, 4);
    assert_eq!(scaled.memory_mb, 2 * 4096);

    for mapping in h.manager.cluster_vms(&cluster.id).unwrap() {
        assert_eq!(h.cloud.vm(&mapping.vm_id).await.unwrap().offering_id, "medium");
    }
}

#[tokio::test]
async fn offering_and_size_together() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;

    let scaled = h
        .manager
        .scale_cluster(
            &cluster.id,
            &ScaleRequest {
                service_offering_id: Some("medium".into()),
                size: Some(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(scaled.service_offering_id, "medium");
    assert_eq!(scaled.node_count, 2);
    assert_eq!(scaled.cores, 4);

    // The new node boots with the new offering.
    for mapping in h.manager.cluster_vms(&cluster.id).unwrap() {
        assert_eq!(h.cloud.vm(&mapping.vm_id).await.unwrap().offering_id, "medium");
    }
}

#[tokio::test]
async fn offering_downgrade_is_rejected() {
    let h = harness().await;
    let mut req = request("demo", 1);
    req.service_offering_id = "medium".into();
    let created = h.manager.create_cluster(&req).await.unwrap();
    let cluster = h.manager.start_cluster(&created.id, true).await.unwrap();

    let err = h
        .manager
        .scale_cluster(&cluster.id, &offering("small"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(
        h.manager.get_cluster(&cluster.id).unwrap().state,
        ClusterState::Running
    );
}

#[tokio::test]
async fn live_resize_needs_a_capable_hypervisor() {
    let h = harness().await;
    h.cloud.set_hypervisor(Hypervisor::Kvm).await;
    let cluster = running_cluster(&h, "demo", 1).await;

    let err = h
        .manager
        .scale_cluster(&cluster.id, &offering("medium"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)), "{err}");

    // Stopped VMs can be resized on any hypervisor.
    h.manager.stop_cluster(&cluster.id).await.unwrap();
    let scaled = h
        .manager
        .scale_cluster(&cluster.id, &offering("medium"))
        .await
        .unwrap();
    assert_eq!(scaled.state, ClusterState::Stopped);
    assert_eq!(scaled.service_offering_id, "medium");
}

#[tokio::test]
async fn resize_failure_raises_alert() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    let master = h.manager.cluster_vms(&cluster.id).unwrap()[0].clone();
    h.cloud.fail_vm_resize(&master.vm_id).await;

    let err = h
        .manager
        .scale_cluster(&cluster.id, &offering("large"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }));
    let record = h.manager.get_cluster(&cluster.id).unwrap();
    assert_eq!(record.state, ClusterState::Alert);
    assert_eq!(record.service_offering_id, "small");
}

// ── Preconditions ──────────────────────────────────────────────

#[tokio::test]
async fn empty_request_is_rejected() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    let err = h
        .manager
        .scale_cluster(&cluster.id, &ScaleRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
}

#[tokio::test]
async fn size_bounds_are_checked() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    for n in [0, 101] {
        let err = h.manager.scale_cluster(&cluster.id, &size(n)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)), "{n}: {err}");
    }
}

#[tokio::test]
async fn stopped_cluster_cannot_change_size() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    h.manager.stop_cluster(&cluster.id).await.unwrap();

    let err = h.manager.scale_cluster(&cluster.id, &size(3)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)));
    assert_eq!(h.manager.get_cluster(&cluster.id).unwrap().node_count, 1);
}

#[tokio::test]
async fn created_cluster_only_updates_its_record() {
    let h = harness().await;
    let created = h.manager.create_cluster(&request("demo", 1)).await.unwrap();

    let scaled = h
        .manager
        .scale_cluster(
            &created.id,
            &ScaleRequest {
                service_offering_id: Some("medium".into()),
                size: Some(3),
            },
        )
        .await
        .unwrap();
    assert_eq!(scaled.state, ClusterState::Created);
    assert_eq!(scaled.node_count, 3);
    assert_eq!(scaled.cores, 6);
    assert_eq!(scaled.memory_mb, 3 * 4096);
    assert!(h.cloud.live_vms().await.is_empty());

    // The next cold start honours the new size.
    let started = h.manager.start_cluster(&created.id, true).await.unwrap();
    assert_eq!(h.manager.cluster_vms(&started.id).unwrap().len(), 4);
}

#[tokio::test]
async fn alert_cluster_cannot_be_scaled() {
    let h = harness().await;
    let cluster = running_cluster(&h, "demo", 1).await;
    h.cloud.hold_node_not_ready("demo-k8s-node-2").await;
    assert!(h.manager.scale_cluster(&cluster.id, &size(2)).await.is_err());

    let err = h.manager.scale_cluster(&cluster.id, &size(3)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Permission(_)));
}
