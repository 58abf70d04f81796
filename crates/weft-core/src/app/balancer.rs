//! Balancer - 割り当て計画を立てる純粋関数群
//!
//! substrate には触らず、スナップショットから「やること」（Action の列）だけを計算します。
//! 実際の書き込み（と fencing）は LeaderEngine が行います。
//!
//! # ポリシー
//! - 配置先: 生存 worker のうち割り当て数が最小のもの。同数なら worker id が最小のもの
//! - 参加時の再配分: 参加した worker との差が `tolerance` 以下になるまで、
//!   最も負荷の高い worker（同数なら id 最小）から、その worker の先頭（uuid 順）のタスクを移す
//! - 生存 worker が持っているタスクは二重に割り当てない

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{Content, TaskUuid, WorkerId};

use super::assignments::AssignmentMap;

/// One step of an assignment plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Assign {
        worker: WorkerId,
        uuid: TaskUuid,
        content: Content,
    },
    /// Create under `to`, then delete under `from`. Content is copied as-is.
    Move {
        uuid: TaskUuid,
        from: WorkerId,
        to: WorkerId,
        content: Content,
    },
    Unassign {
        worker: WorkerId,
        uuid: TaskUuid,
    },
    /// Delete the empty `/assignments/{worker}` node of a dead worker.
    DropSubtree {
        worker: WorkerId,
    },
}

/// Working copy of the live part of the assignment store.
struct Model {
    /// live worker -> held tasks
    held: BTreeMap<WorkerId, BTreeMap<TaskUuid, Content>>,
    actions: Vec<Action>,
}

impl Model {
    fn new(live: &BTreeSet<WorkerId>, assignments: &AssignmentMap) -> Self {
        let held = live
            .iter()
            .map(|worker| {
                let tasks = assignments.get(worker).cloned().unwrap_or_default();
                (worker.clone(), tasks)
            })
            .collect();
        Self {
            held,
            actions: Vec::new(),
        }
    }

    fn least_loaded(&self) -> Option<WorkerId> {
        // min_by_key は同値なら先頭を返す = id 最小
        self.held
            .iter()
            .min_by_key(|(_, tasks)| tasks.len())
            .map(|(worker, _)| worker.clone())
    }

    fn is_held(&self, uuid: &TaskUuid) -> bool {
        self.held.values().any(|tasks| tasks.contains_key(uuid))
    }

    fn assign(&mut self, uuid: &TaskUuid, content: &Content) -> bool {
        let Some(worker) = self.least_loaded() else {
            return false;
        };
        self.held
            .entry(worker.clone())
            .or_default()
            .insert(uuid.clone(), content.clone());
        self.actions.push(Action::Assign {
            worker,
            uuid: uuid.clone(),
            content: content.clone(),
        });
        true
    }

    /// Remove registry-less entries and live duplicates (first holder wins).
    fn prune_live(&mut self, tasks: &BTreeMap<TaskUuid, Content>) {
        let mut seen = BTreeSet::new();
        for (worker, held) in self.held.iter_mut() {
            held.retain(|uuid, _| {
                let keep = tasks.contains_key(uuid) && seen.insert(uuid.clone());
                if !keep {
                    self.actions.push(Action::Unassign {
                        worker: worker.clone(),
                        uuid: uuid.clone(),
                    });
                }
                keep
            });
        }
    }

    /// Hand the tasks of a dead worker to live ones, then drop its subtree.
    fn evacuate(
        &mut self,
        dead: &WorkerId,
        entries: &BTreeMap<TaskUuid, Content>,
        tasks: &BTreeMap<TaskUuid, Content>,
    ) {
        for (uuid, content) in entries {
            let target = if tasks.contains_key(uuid) && !self.is_held(uuid) {
                self.least_loaded()
            } else {
                None
            };
            match target {
                Some(to) => {
                    self.held
                        .entry(to.clone())
                        .or_default()
                        .insert(uuid.clone(), content.clone());
                    self.actions.push(Action::Move {
                        uuid: uuid.clone(),
                        from: dead.clone(),
                        to,
                        content: content.clone(),
                    });
                }
                None => self.actions.push(Action::Unassign {
                    worker: dead.clone(),
                    uuid: uuid.clone(),
                }),
            }
        }
        self.actions.push(Action::DropSubtree {
            worker: dead.clone(),
        });
    }

    fn assign_orphans(&mut self, tasks: &BTreeMap<TaskUuid, Content>) {
        for (uuid, content) in tasks {
            if !self.is_held(uuid) && !self.assign(uuid, content) {
                // no live worker at all
                break;
            }
        }
    }

    fn rebalance_toward(&mut self, joined: &WorkerId, tolerance: usize) {
        if !self.held.contains_key(joined) {
            return;
        }
        loop {
            let joined_load = self.held[joined].len();
            // 最大負荷の donor（同数なら id 最小）
            let donor = self
                .held
                .iter()
                .filter(|(worker, _)| *worker != joined)
                .fold(None::<(&WorkerId, usize)>, |best, (worker, tasks)| match best {
                    Some((_, load)) if load >= tasks.len() => best,
                    _ => Some((worker, tasks.len())),
                })
                .map(|(worker, load)| (worker.clone(), load));

            let Some((donor, donor_load)) = donor else {
                break;
            };
            if donor_load <= joined_load + tolerance {
                break;
            }
            let Some((uuid, content)) = self
                .held
                .get_mut(&donor)
                .and_then(|tasks| tasks.pop_first())
            else {
                break;
            };
            self.held
                .entry(joined.clone())
                .or_default()
                .insert(uuid.clone(), content.clone());
            self.actions.push(Action::Move {
                uuid,
                from: donor,
                to: joined.clone(),
                content,
            });
        }
    }
}

/// Current load of every live worker (workers without a subtree count as 0).
pub fn loads(live: &BTreeSet<WorkerId>, assignments: &AssignmentMap) -> BTreeMap<WorkerId, usize> {
    live.iter()
        .map(|worker| {
            let load = assignments.get(worker).map(|tasks| tasks.len()).unwrap_or(0);
            (worker.clone(), load)
        })
        .collect()
}

/// Least-loaded live worker; ties go to the lowest id.
pub fn pick_target(live: &BTreeSet<WorkerId>, assignments: &AssignmentMap) -> Option<WorkerId> {
    Model::new(live, assignments).least_loaded()
}

/// A task appeared in the registry.
///
/// Nothing to do when a live worker already holds it (replayed snapshot) or
/// when there is no live worker yet.
pub fn plan_task_added(
    uuid: &TaskUuid,
    content: &Content,
    live: &BTreeSet<WorkerId>,
    assignments: &AssignmentMap,
) -> Vec<Action> {
    if Model::new(live, assignments).is_held(uuid) {
        return Vec::new();
    }
    pick_target(live, assignments)
        .map(|worker| Action::Assign {
            worker,
            uuid: uuid.clone(),
            content: content.clone(),
        })
        .into_iter()
        .collect()
}

/// A worker joined: place orphaned tasks, then shift load toward it.
pub fn plan_worker_joined(
    joined: &WorkerId,
    tasks: &BTreeMap<TaskUuid, Content>,
    live: &BTreeSet<WorkerId>,
    assignments: &AssignmentMap,
    tolerance: usize,
) -> Vec<Action> {
    let mut model = Model::new(live, assignments);
    model.assign_orphans(tasks);
    model.rebalance_toward(joined, tolerance);
    model.actions
}

/// A worker's liveness marker is gone: redistribute its assignments.
pub fn plan_worker_lost(
    dead: &WorkerId,
    tasks: &BTreeMap<TaskUuid, Content>,
    live: &BTreeSet<WorkerId>,
    assignments: &AssignmentMap,
) -> Vec<Action> {
    let mut model = Model::new(live, assignments);
    let entries = assignments.get(dead).cloned().unwrap_or_default();
    model.evacuate(dead, &entries, tasks);
    model.actions
}

/// Full corrective delta after acquiring leadership.
pub fn plan_reconcile(
    tasks: &BTreeMap<TaskUuid, Content>,
    live: &BTreeSet<WorkerId>,
    assignments: &AssignmentMap,
) -> Vec<Action> {
    let mut model = Model::new(live, assignments);
    model.prune_live(tasks);
    for (worker, entries) in assignments {
        if !live.contains(worker) {
            model.evacuate(worker, entries, tasks);
        }
    }
    model.assign_orphans(tasks);
    model.actions
}
