//! Garbage collection and status reconciliation against the sandbox cloud.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use kubeyard_cloud::{CloudServices, SimulatedCloud, StaticConfigStore, VmState};
use kubeyard_core::{PollingConfig, RetryPolicy, ServiceConfig, SweepsConfig, settings};
use kubeyard_orchestrator::{ClusterManager, CreateClusterRequest, TeardownOutcome};
use kubeyard_reconcile::{GarbageCollector, StatusReconciler, SweepScheduler};
use kubeyard_state::{
    ClusterEvent, ClusterRecord, ClusterState, ClusterStateMachine, Owner, StateStore,
};

struct Fixture {
    cloud: Arc<SimulatedCloud>,
    store: StateStore,
    manager: ClusterManager,
    gc: GarbageCollector,
    reconciler: StatusReconciler,
    _shutdown: watch::Sender<bool>,
    _templates: TempDir,
}

async fn fixture() -> Fixture {
    let templates = tempfile::tempdir().unwrap();
    let master = templates.path().join("master.yml");
    let node = templates.path().join("node.yml");
    std::fs::write(&master, "#cloud-config\nruncmd:\n  - kubeadm init {{ k8s_master.cluster.token }}\n").unwrap();
    std::fs::write(&node, "#cloud-config\nruncmd:\n  - kubeadm join {{ k8s_master.default_ip }}\n").unwrap();

    let mut config = ServiceConfig::default();
    for (key, value) in [
        (settings::TEMPLATE_NAME, "coreos-kubernetes".to_string()),
        (settings::MASTER_BOOT_CONFIG, master.display().to_string()),
        (settings::NODE_BOOT_CONFIG, node.display().to_string()),
        (settings::NETWORK_OFFERING, "DefaultIsolatedNetworkOffering".to_string()),
    ] {
        config.settings.insert(key.to_string(), value);
    }
    config.polling = PollingConfig::uniform(RetryPolicy::new(3, Duration::from_millis(5)));

    let cloud = Arc::new(SimulatedCloud::sandbox().await);
    let store = StateStore::open_in_memory().unwrap();
    let services = CloudServices::simulated(cloud.clone(), Arc::new(StaticConfigStore::from(&config)));
    let (shutdown, rx) = watch::channel(false);
    let manager = ClusterManager::new(store.clone(), services.clone(), config, rx);
    let gc = GarbageCollector::new(store.clone(), manager.teardown_workflow().clone());
    let reconciler = StatusReconciler::new(store.clone(), services.vms.clone());

    Fixture {
        cloud,
        store,
        manager,
        gc,
        reconciler,
        _shutdown: shutdown,
        _templates: templates,
    }
}

async fn running_cluster(f: &Fixture, name: &str, size: u32) -> ClusterRecord {
    let created = f
        .manager
        .create_cluster(&CreateClusterRequest {
            name: name.to_string(),
            zone_id: "zone-1".to_string(),
            service_offering_id: "small".to_string(),
            owner: Owner {
                account_id: "acct-1".to_string(),
                domain_id: "root".to_string(),
            },
            size,
            ..Default::default()
        })
        .await
        .unwrap();
    f.manager.start_cluster(&created.id, true).await.unwrap()
}

fn state_of(f: &Fixture, id: &str) -> ClusterState {
    f.store.get_cluster(id).unwrap().unwrap().state
}

// ── Status reconciler ──────────────────────────────────────────

#[tokio::test]
async fn healthy_clusters_are_left_alone() {
    let f = fixture().await;
    let running = running_cluster(&f, "up", 2).await;
    let stopped = running_cluster(&f, "down", 1).await;
    f.manager.stop_cluster(&stopped.id).await.unwrap();

    let report = f.reconciler.reconcile().await.unwrap();
    assert!(report.is_empty(), "{report:?}");
    assert_eq!(state_of(&f, &running.id), ClusterState::Running);
    assert_eq!(state_of(&f, &stopped.id), ClusterState::Stopped);
    assert!(
        f.reconciler
            .is_desired_state(&running, ClusterState::Running)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn stopped_vm_in_running_cluster_raises_alert_then_recovers() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 2).await;
    let node = f.store.list_vms(&cluster.id).unwrap()[1].clone();

    f.cloud.set_vm_state(&node.vm_id, VmState::Stopped).await.unwrap();
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.faulted, vec![cluster.id.clone()]);
    assert!(report.recovered.is_empty());
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Alert);

    // Still broken: stays in Alert.
    let report = f.reconciler.reconcile().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Alert);

    f.cloud.set_vm_state(&node.vm_id, VmState::Running).await.unwrap();
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.recovered, vec![cluster.id.clone()]);
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Running);
}

#[tokio::test]
async fn started_vm_in_stopped_cluster_raises_alert() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 1).await;
    f.manager.stop_cluster(&cluster.id).await.unwrap();
    let master = f.store.list_vms(&cluster.id).unwrap()[0].clone();

    f.cloud.set_vm_state(&master.vm_id, VmState::Running).await.unwrap();
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.faulted, vec![cluster.id.clone()]);
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Alert);
}

#[tokio::test]
async fn missing_mapping_counts_as_drift() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 2).await;
    f.store.remove_vm(&cluster.id, 2).unwrap();

    assert!(
        !f.reconciler
            .is_desired_state(&cluster, ClusterState::Running)
            .await
            .unwrap()
    );
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.faulted, vec![cluster.id.clone()]);
}

#[tokio::test]
async fn failed_warm_start_recovers_once_api_answers() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 1).await;
    f.manager.stop_cluster(&cluster.id).await.unwrap();
    f.cloud.set_api_reachable(false).await;
    assert!(f.manager.start_cluster(&cluster.id, false).await.is_err());
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Alert);

    // Every VM is running, so the reconciler restores the cluster.
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.recovered, vec![cluster.id.clone()]);
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Running);
}

#[tokio::test]
async fn only_running_and_stopped_are_desired_states() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 1).await;
    assert!(
        !f.reconciler
            .is_desired_state(&cluster, ClusterState::Scaling)
            .await
            .unwrap()
    );
}

/// Leave a cluster in Recovering, as a recovery interrupted between its two
/// transitions would.
fn strand_in_recovering(f: &Fixture, id: &str) {
    let machine = ClusterStateMachine::new(f.store.clone());
    machine.transition(id, ClusterEvent::FaultsDetected).unwrap();
    machine.transition(id, ClusterEvent::RecoveryRequested).unwrap();
    assert_eq!(state_of(f, id), ClusterState::Recovering);
}

#[tokio::test]
async fn stranded_recovery_completes_when_healthy() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 2).await;
    strand_in_recovering(&f, &cluster.id);

    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.recovered, vec![cluster.id.clone()]);
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Running);
}

#[tokio::test]
async fn stranded_recovery_falls_back_to_alert() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 1).await;
    strand_in_recovering(&f, &cluster.id);
    let node = f.store.list_vms(&cluster.id).unwrap()[1].vm_id.clone();
    f.cloud.set_vm_state(&node, VmState::Stopped).await.unwrap();

    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.faulted, vec![cluster.id.clone()]);
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Alert);

    // The next run treats it like any other alert.
    f.cloud.set_vm_state(&node, VmState::Running).await.unwrap();
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.recovered, vec![cluster.id.clone()]);
    assert_eq!(state_of(&f, &cluster.id), ClusterState::Running);
}

// ── Garbage collector ──────────────────────────────────────────

#[tokio::test]
async fn gc_finishes_deferred_teardown() {
    let f = fixture().await;
    let cluster = running_cluster(&f, "demo", 1).await;
    f.cloud.fail_network_destroy(true).await;
    let outcome = f.manager.delete_cluster(&cluster.id).await.unwrap();
    assert!(matches!(outcome, TeardownOutcome::Deferred { .. }));

    let report = f.gc.sweep().await.unwrap();
    assert_eq!(report.deferred, vec![cluster.id.clone()]);
    assert_eq!(f.store.list_gc_pending().unwrap().len(), 1);

    f.cloud.fail_network_destroy(false).await;
    let report = f.gc.sweep().await.unwrap();
    assert_eq!(report.completed, vec![cluster.id.clone()]);
    assert!(f.store.list_gc_pending().unwrap().is_empty());
    let record = f.store.get_cluster(&cluster.id).unwrap().unwrap();
    assert_eq!(record.state, ClusterState::Destroyed);
    assert!(record.is_removed());

    assert!(f.gc.sweep().await.unwrap().is_empty());
}

#[tokio::test]
async fn gc_isolates_stuck_clusters() {
    let f = fixture().await;
    let stuck = running_cluster(&f, "stuck", 1).await;
    let flaky = running_cluster(&f, "flaky", 1).await;

    let stuck_vm = f.store.list_vms(&stuck.id).unwrap()[1].vm_id.clone();
    f.cloud.fail_vm_destroy(&stuck_vm, true).await;
    f.cloud.fail_network_destroy(true).await;
    f.manager.delete_cluster(&stuck.id).await.unwrap();
    f.manager.delete_cluster(&flaky.id).await.unwrap();
    f.cloud.fail_network_destroy(false).await;

    let report = f.gc.sweep().await.unwrap();
    assert_eq!(report.deferred, vec![stuck.id.clone()]);
    assert_eq!(report.completed, vec![flaky.id.clone()]);

    f.cloud.fail_vm_destroy(&stuck_vm, false).await;
    let report = f.gc.sweep().await.unwrap();
    assert_eq!(report.completed, vec![stuck.id.clone()]);
    assert!(f.cloud.live_vms().await.is_empty());
}

// ── Scheduler ──────────────────────────────────────────────────

#[tokio::test]
async fn scheduled_sweeps_raise_alerts_and_collect_garbage() {
    let f = fixture().await;
    let drifting = running_cluster(&f, "drifting", 1).await;
    let doomed = running_cluster(&f, "doomed", 1).await;

    f.cloud.fail_network_destroy(true).await;
    f.manager.delete_cluster(&doomed.id).await.unwrap();
    f.cloud.fail_network_destroy(false).await;
    let node = f.store.list_vms(&drifting.id).unwrap()[1].vm_id.clone();
    f.cloud.set_vm_state(&node, VmState::Stopped).await.unwrap();

    let sweeps = SweepsConfig {
        gc_interval: Duration::from_millis(10),
        gc_initial_delay: Duration::from_millis(1),
        reconcile_interval: Duration::from_millis(10),
        reconcile_initial_delay: Duration::from_millis(1),
        lock_wait: Duration::from_millis(50),
    };
    let scheduler = SweepScheduler::from_config(&sweeps, f.gc.clone(), f.reconciler.clone());
    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop().await;

    assert_eq!(state_of(&f, &drifting.id), ClusterState::Alert);
    assert!(f.store.get_cluster(&doomed.id).unwrap().unwrap().is_removed());
}
