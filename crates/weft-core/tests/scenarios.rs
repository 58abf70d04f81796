//! Whole-cluster scenarios over the in-memory substrate.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use weft_core::app::{
    AssignmentMap, AssignmentStore, Config, EngineState, Instance, InstanceContext,
    RunningInstance, TaskRegistry, WorkerMembership,
};
use weft_core::domain::{Content, Layout, TaskUuid, WorkerId};
use weft_core::impls::{InMemoryCluster, InMemoryExecutor, InMemoryStore};
use weft_core::ports::CoordinationStore;

const SESSION_TIMEOUT: Duration = Duration::from_millis(600);
const DEADLINE: Duration = Duration::from_secs(5);

struct Node {
    running: RunningInstance,
    store: Arc<InMemoryStore>,
    executor: InMemoryExecutor,
}

async fn start(cluster: &InMemoryCluster, id: &str, tolerance: usize) -> Node {
    let ctx = InstanceContext::new(Config {
        instance_id: id.to_string(),
        session_timeout_ms: SESSION_TIMEOUT.as_millis() as u64,
        rebalance_tolerance: tolerance,
        ..Config::default()
    })
    .unwrap();
    let store = Arc::new(cluster.connect().await);
    let executor = InMemoryExecutor::new();
    let running = Instance::new(ctx, store.clone(), store.clone(), Arc::new(executor.clone()))
        .start()
        .await
        .unwrap();
    Node {
        running,
        store,
        executor,
    }
}

/// Producer and observer on their own session.
struct Outside {
    registry: TaskRegistry,
    assignments: AssignmentStore,
}

async fn outside(cluster: &InMemoryCluster) -> Outside {
    let store = Arc::new(cluster.connect().await);
    Outside {
        registry: TaskRegistry::new(store.clone(), Layout::default()),
        assignments: AssignmentStore::new(store, Layout::default()),
    }
}

impl Outside {
    async fn submit(&self, ids: &[&str]) {
        for id in ids {
            self.registry
                .submit(&t(id), &Content::from(format!("payload-{id}").as_str()))
                .await
                .unwrap();
        }
    }

    /// Wait until `check` holds for the assignment snapshot; returns it.
    async fn wait_for(&self, check: impl Fn(&AssignmentMap) -> bool) -> AssignmentMap {
        let mut last = AssignmentMap::new();
        let reached = tokio::time::timeout(DEADLINE, async {
            loop {
                last = self.assignments.snapshot().await.unwrap();
                if check(&last) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "condition not reached, last snapshot: {last:?}");
        last
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(DEADLINE, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

fn w(id: &str) -> WorkerId {
    WorkerId::parse(id).unwrap()
}

fn t(id: &str) -> TaskUuid {
    TaskUuid::parse(id).unwrap()
}

fn loads(map: &AssignmentMap) -> BTreeMap<String, usize> {
    map.iter()
        .map(|(worker, tasks)| (worker.to_string(), tasks.len()))
        .collect()
}

fn total(map: &AssignmentMap) -> usize {
    map.values().map(|tasks| tasks.len()).sum()
}

/// Every held task appears once and carries its registry content.
fn assert_consistent(map: &AssignmentMap) {
    let mut seen = BTreeMap::new();
    for (worker, tasks) in map {
        for (uuid, content) in tasks {
            assert_eq!(
                content,
                &Content::from(format!("payload-{uuid}").as_str()),
                "content of {uuid} changed"
            );
            assert!(
                seen.insert(uuid.clone(), worker.clone()).is_none(),
                "{uuid} assigned twice"
            );
        }
    }
}

#[tokio::test]
async fn added_task_lands_on_the_single_worker_and_runs() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let w1 = start(&cluster, "W1", 1).await;
    let outside = outside(&cluster).await;

    outside
        .registry
        .submit(&t("T1"), &Content::from("payload1"))
        .await
        .unwrap();

    let map = outside.wait_for(|map| total(map) == 1).await;
    assert_eq!(map[&w("W1")][&t("T1")], Content::from("payload1"));
    eventually(|| {
        let executor = w1.executor.clone();
        async move { executor.is_running(&t("T1")).await }
    })
    .await;
    assert_eq!(w1.running.engine_state().await, EngineState::Leader);

    w1.running.shutdown().await;
}

#[tokio::test]
async fn removed_task_is_unassigned_and_stopped() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let w1 = start(&cluster, "W1", 1).await;
    let outside = outside(&cluster).await;
    outside.submit(&["T1"]).await;
    outside.wait_for(|map| total(map) == 1).await;

    outside.registry.cancel(&t("T1")).await.unwrap();

    outside.wait_for(|map| total(map) == 0).await;
    eventually(|| {
        let executor = w1.executor.clone();
        async move { executor.running().await.is_empty() }
    })
    .await;

    w1.running.shutdown().await;
}

#[tokio::test]
async fn joining_worker_takes_half_of_the_load() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let w1 = start(&cluster, "W1", 1).await;
    let outside = outside(&cluster).await;
    outside.submit(&["T1", "T2", "T3", "T4"]).await;
    outside.wait_for(|map| total(map) == 4).await;

    let w2 = start(&cluster, "W2", 1).await;

    let map = outside
        .wait_for(|map| map.get(&w("W2")).is_some_and(|tasks| tasks.len() == 2))
        .await;
    assert_eq!(loads(&map), BTreeMap::from([("W1".to_string(), 2), ("W2".to_string(), 2)]));
    assert_consistent(&map);

    w2.running.shutdown().await;
    w1.running.shutdown().await;
}

#[tokio::test]
async fn crashed_leader_work_moves_to_the_survivor() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    // wide tolerance keeps all four tasks on W1 when W2 joins
    let w1 = start(&cluster, "W1", 10).await;
    let outside = outside(&cluster).await;
    outside.submit(&["T1", "T2", "T3", "T4"]).await;
    outside.wait_for(|map| total(map) == 4).await;
    let w2 = start(&cluster, "W2", 10).await;
    let map = outside.wait_for(|map| map.contains_key(&w("W1"))).await;
    assert_eq!(map[&w("W1")].len(), 4);

    w1.store.crash();
    w1.running.halt().await;

    let map = outside
        .wait_for(|map| {
            !map.contains_key(&w("W1")) && map.get(&w("W2")).is_some_and(|t| t.len() == 4)
        })
        .await;
    assert_eq!(total(&map), 4);
    assert_consistent(&map);
    assert_eq!(w2.running.engine_state().await, EngineState::Leader);
    eventually(|| {
        let executor = w2.executor.clone();
        async move { executor.running().await.len() == 4 }
    })
    .await;

    w2.running.shutdown().await;
}

#[tokio::test]
async fn expired_follower_leaves_no_dangling_assignments() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let w1 = start(&cluster, "W1", 1).await;
    let w2 = start(&cluster, "W2", 1).await;
    let w3 = start(&cluster, "W3", 1).await;
    let outside = outside(&cluster).await;
    outside.submit(&["T1", "T2", "T3", "T4", "T5", "T6"]).await;
    outside
        .wait_for(|map| total(map) == 6 && map.get(&w("W3")).is_some_and(|t| t.len() == 2))
        .await;

    cluster.expire_session(w3.store.session_id()).await;
    w3.running.halt().await;

    let map = outside
        .wait_for(|map| !map.contains_key(&w("W3")) && total(map) == 6)
        .await;
    assert_eq!(loads(&map), BTreeMap::from([("W1".to_string(), 3), ("W2".to_string(), 3)]));
    assert_consistent(&map);

    w2.running.shutdown().await;
    w1.running.shutdown().await;
}

#[tokio::test]
async fn existing_tasks_are_picked_up_on_cold_start() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let outside = outside(&cluster).await;
    outside.submit(&["T1", "T2", "T3"]).await;

    let w1 = start(&cluster, "W1", 1).await;

    let map = outside.wait_for(|map| total(map) == 3).await;
    assert_consistent(&map);
    let mine = w1.running.status().my_assignments().await.unwrap();
    assert_eq!(mine, vec![t("T1"), t("T2"), t("T3")]);

    w1.running.shutdown().await;
}

#[tokio::test]
async fn duplicate_registration_is_not_fatal() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let first = start(&cluster, "W1", 1).await;
    let second = start(&cluster, "W1", 1).await;

    let observer = WorkerMembership::new(Arc::new(cluster.connect().await), Layout::default());
    let live = observer.list_live_workers().await.unwrap();
    assert_eq!(live.into_iter().collect::<Vec<_>>(), vec![w("W1")]);

    second.running.shutdown().await;
    first.running.shutdown().await;
}

#[tokio::test]
async fn only_the_elected_instance_writes_after_handover() {
    let cluster = InMemoryCluster::new(SESSION_TIMEOUT);
    let w1 = start(&cluster, "W1", 1).await;
    let w2 = start(&cluster, "W2", 1).await;
    let outside = outside(&cluster).await;

    // W1 leaves gracefully; W2 takes over
    w1.running.shutdown().await;
    eventually(|| {
        let status = w2.running.status();
        async move {
            status
                .current_leader()
                .await
                .unwrap()
                .is_some_and(|leader| leader.id == "W2")
        }
    })
    .await;

    outside.submit(&["T1", "T2"]).await;
    let map = outside.wait_for(|map| total(map) == 2).await;
    assert_eq!(loads(&map), BTreeMap::from([("W2".to_string(), 2)]));
    assert_eq!(w2.running.engine_state().await, EngineState::Leader);

    w2.running.shutdown().await;
}
