//! Reconstruction Planner.
//!
//! Planning is a pure function of an inspection snapshot, so every worker
//! observing the same state computes the same winner and the same jobs.
use frugalos_ring::{FragmentSlot, PartitionId, StoragePolicy};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::ReconstructorConfig;
use crate::fragment::{FragmentMeta, FragmentState, ObjectVersion};
use crate::inspector::Inspection;

/// What a job does to its target slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobAction {
    /// Marks an already matching non-durable fragment durable.
    ConfirmDurable,

    /// Rebuilds the fragment from other fragments and commits it.
    Rebuild,
}
impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            JobAction::ConfirmDurable => write!(f, "confirm_durable"),
            JobAction::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// A unit of repair work, consumed within the cycle that planned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// 対象パーティション。
    pub partition: PartitionId,

    /// 対象オブジェクト。
    pub object: String,

    /// 収束先のバージョン。
    pub version: ObjectVersion,

    /// 書き込むフラグメントのメタデータの雛形 (最新のメタデータを保持する)。
    pub template: FragmentMeta,

    /// 修復対象のスロット。
    pub target: FragmentSlot,

    /// 復元に用いるソース群 (優先度順)。
    ///
    /// `ConfirmDurable`の場合は空。
    pub sources: Vec<FragmentSlot>,

    /// 実行内容。
    pub action: JobAction,
}
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}, {}, {})",
            self.action, self.partition, self.object, self.target
        )
    }
}

/// Why some repair was postponed to a later cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// Fewer decodable sources than the decode minimum.
    InsufficientSources {
        /// 取得可能な (重複のない) ソースフラグメントの数。
        available: usize,

        /// 復元に必要なフラグメント数 (`data_fragments`)。
        required: usize,
    },

    /// Not enough fragments of the winning version to confirm it yet.
    AwaitingDurable {
        /// 勝者バージョンのフラグメントの数 (判定対象に応じて永続化済みのもの、または全て)。
        available: usize,

        /// 確定に必要な数 (`durable_quorum`または`provisional_quorum`)。
        required: usize,
    },
}

/// Repair that could not be planned in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferral {
    /// 対象オブジェクト。
    pub object: String,

    /// 対象スロット (オブジェクト全体の場合は`None`)。
    pub target: Option<FragmentSlot>,

    /// 理由。
    pub reason: DeferReason,
}

/// The jobs of a partition, confirmations first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// 実行すべきジョブ群。
    pub jobs: Vec<Job>,

    /// 先送りされた修復。
    pub deferrals: Vec<Deferral>,
}
impl Plan {
    /// Returns `true` if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.deferrals.is_empty()
    }
}

/// The version the fragments of an object must converge to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    /// 勝者バージョン。
    pub version: ObjectVersion,

    /// 勝者バージョンのうち、最新のメタデータを持つフラグメント。
    pub template: FragmentMeta,

    /// 勝者バージョンの永続フラグメント数。
    pub durable_count: usize,

    /// 勝者バージョンのフラグメント総数。
    pub total_count: usize,
}
impl Winner {
    /// Returns `true` if at least one durable fragment attests the version.
    pub fn is_durable(&self) -> bool {
        self.durable_count > 0
    }
}

/// Selects the winning version of an object.
///
/// The newest durable version wins; ties on the timestamp prefer the version
/// attested durable by more slots, then the larger etag. Without any durable
/// fragment, the newest non-durable version is the provisional winner.
pub fn select_winner(states: &[(FragmentSlot, FragmentState)]) -> Option<Winner> {
    let mut groups: BTreeMap<ObjectVersion, (usize, usize)> = BTreeMap::new();
    for meta in states.iter().filter_map(|(_, s)| s.meta()) {
        let counts = groups.entry(meta.version()).or_insert((0, 0));
        if meta.durable {
            counts.0 += 1;
        }
        counts.1 += 1;
    }

    let any_durable = groups.values().any(|&(durable, _)| durable > 0);
    let (version, (durable_count, total_count)) = groups
        .into_iter()
        .filter(|&(_, (durable, _))| !any_durable || durable > 0)
        .max_by(|(v0, c0), (v1, c1)| {
            let key = |c: &(usize, usize)| if any_durable { c.0 } else { c.1 };
            (v0.timestamp, key(c0), &v0.etag).cmp(&(v1.timestamp, key(c1), &v1.etag))
        })?;
    let template = states
        .iter()
        .filter_map(|(_, s)| s.meta())
        .filter(|m| m.is_version(&version))
        .max_by_key(|m| (m.metadata_version, m.durable, m.fragment_index))?
        .clone();
    Some(Winner {
        version,
        template,
        durable_count,
        total_count,
    })
}

/// Reconstruction Planner.
#[derive(Debug, Clone)]
pub struct Planner {
    partition: PartitionId,
    decode_minimum: usize,
    durable_quorum: usize,
    provisional_quorum: usize,
}
impl Planner {
    /// Makes a new `Planner` for a partition of `policy`.
    pub fn new(partition: PartitionId, policy: &StoragePolicy, config: &ReconstructorConfig) -> Self {
        Planner {
            partition,
            decode_minimum: policy.decode_minimum(),
            durable_quorum: config.durable_quorum.max(1),
            provisional_quorum: config
                .provisional_quorum(policy.decode_minimum(), policy.fragments()),
        }
    }

    /// Plans the repair of every object observed in the inspection.
    ///
    /// Only slots whose index is in `scope` become job targets.
    pub fn plan(&self, inspection: &Inspection, scope: &BTreeSet<usize>) -> Plan {
        let mut plan = Plan::default();
        for object in inspection.objects() {
            let states = inspection.states_of(object);
            let object_plan = self.plan_object(object, &states, scope);
            plan.jobs.extend(object_plan.jobs);
            plan.deferrals.extend(object_plan.deferrals);
        }

        // 安価な永続化確定を再構築より先に行う
        plan.jobs.sort_by_key(|j| j.action);
        plan
    }

    /// Plans the repair of one object from its per-slot states.
    pub fn plan_object(
        &self,
        object: &str,
        states: &[(FragmentSlot, FragmentState)],
        scope: &BTreeSet<usize>,
    ) -> Plan {
        let mut plan = Plan::default();
        let winner = match select_winner(states) {
            None => return plan,
            Some(winner) => winner,
        };
        let in_scope = |slot: &FragmentSlot| scope.contains(&slot.index);

        if !winner.is_durable() {
            if winner.total_count < self.provisional_quorum {
                plan.deferrals.push(Deferral {
                    object: object.to_owned(),
                    target: None,
                    reason: DeferReason::AwaitingDurable {
                        available: winner.total_count,
                        required: self.provisional_quorum,
                    },
                });
                return plan;
            }
            for (slot, state) in states.iter().filter(|(slot, _)| in_scope(slot)) {
                if state.meta().map_or(false, |m| self.is_confirmable(m, &winner)) {
                    let job = self.job(object, &winner, slot, Vec::new(), JobAction::ConfirmDurable);
                    plan.jobs.push(job);
                }
            }
            return plan;
        }

        let mut rebuild_targets = Vec::new();
        for (slot, state) in states.iter().filter(|(slot, _)| in_scope(slot)) {
            match *state {
                FragmentState::Absent | FragmentState::Unreachable => rebuild_targets.push(slot),
                FragmentState::Present(ref m) => {
                    if m.timestamp > winner.version.timestamp {
                        // 書き込み途中の新しいバージョン
                        continue;
                    }
                    if !m.is_version(&winner.version)
                        || m.metadata_version < winner.template.metadata_version
                    {
                        rebuild_targets.push(slot);
                    } else if !m.durable {
                        if winner.durable_count >= self.durable_quorum {
                            let action = JobAction::ConfirmDurable;
                            plan.jobs.push(self.job(object, &winner, slot, Vec::new(), action));
                        } else {
                            plan.deferrals.push(Deferral {
                                object: object.to_owned(),
                                target: Some(slot.clone()),
                                reason: DeferReason::AwaitingDurable {
                                    available: winner.durable_count,
                                    required: self.durable_quorum,
                                },
                            });
                        }
                    }
                }
            }
        }

        let confirmed = plan.jobs.iter().map(|j| j.target.index).collect::<BTreeSet<_>>();
        let durable_sources = states.iter().filter(|(_, s)| {
            s.meta()
                .map_or(false, |m| m.durable && m.is_version(&winner.version))
        });
        let pending_sources = states
            .iter()
            .filter(|(slot, _)| confirmed.contains(&slot.index));
        let sources = durable_sources
            .chain(pending_sources)
            .map(|(slot, _)| slot)
            .collect::<Vec<_>>();

        for target in rebuild_targets {
            let sources = sources
                .iter()
                .filter(|s| s.index != target.index)
                .map(|&s| s.clone())
                .collect::<Vec<_>>();
            if sources.len() < self.decode_minimum {
                plan.deferrals.push(Deferral {
                    object: object.to_owned(),
                    target: Some(target.clone()),
                    reason: DeferReason::InsufficientSources {
                        available: sources.len(),
                        required: self.decode_minimum,
                    },
                });
            } else {
                plan.jobs.push(self.job(object, &winner, target, sources, JobAction::Rebuild));
            }
        }
        plan
    }

    fn is_confirmable(&self, meta: &FragmentMeta, winner: &Winner) -> bool {
        !meta.durable
            && meta.is_version(&winner.version)
            && meta.metadata_version >= winner.template.metadata_version
    }

    fn job(
        &self,
        object: &str,
        winner: &Winner,
        target: &FragmentSlot,
        sources: Vec<FragmentSlot>,
        action: JobAction,
    ) -> Job {
        Job {
            partition: self.partition,
            object: object.to_owned(),
            version: winner.version.clone(),
            template: winner.template.clone(),
            target: target.clone(),
            sources,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frugalos_ring::{Node, PolicyId};
    use std::collections::BTreeMap;

    use crate::fragment::Timestamp;

    fn slot(index: usize) -> FragmentSlot {
        FragmentSlot {
            index,
            node: Node {
                id: format!("node{}", index),
                addr: ([127, 0, 0, 1], 14000 + index as u16).into(),
                device: "dev".to_owned(),
            },
        }
    }

    fn meta(index: usize, timestamp: u64, etag: &str, durable: bool) -> FragmentState {
        FragmentState::Present(FragmentMeta {
            object: "foo".to_owned(),
            fragment_index: index,
            timestamp: Timestamp(timestamp),
            etag: etag.to_owned(),
            metadata: BTreeMap::new(),
            metadata_version: Timestamp(timestamp),
            durable,
            content_length: 3,
        })
    }

    fn planner() -> Planner {
        let policy = track_try_unwrap!(StoragePolicy::new(PolicyId(0), "ec4+2", 4, 2));
        Planner::new(
            PartitionId::new(PolicyId(0), 0),
            &policy,
            &ReconstructorConfig::default(),
        )
    }

    fn all() -> BTreeSet<usize> {
        (0..6).collect()
    }

    fn states(states: Vec<FragmentState>) -> Vec<(FragmentSlot, FragmentState)> {
        states
            .into_iter()
            .enumerate()
            .map(|(i, s)| (slot(i), s))
            .collect()
    }

    #[test]
    fn missing_fragments_are_rebuilt() {
        let states = states(vec![
            FragmentState::Absent,
            meta(1, 10, "a", true),
            meta(2, 10, "a", true),
            meta(3, 10, "a", true),
            meta(4, 10, "a", true),
            FragmentState::Unreachable,
        ]);
        let plan = planner().plan_object("foo", &states, &all());
        assert!(plan.deferrals.is_empty());
        assert_eq!(plan.jobs.len(), 2);
        assert!(plan.jobs.iter().all(|j| j.action == JobAction::Rebuild));
        assert_eq!(plan.jobs[0].target.index, 0);
        assert_eq!(plan.jobs[1].target.index, 5);
        let sources = plan.jobs[0]
            .sources
            .iter()
            .map(|s| s.index)
            .collect::<Vec<_>>();
        assert_eq!(sources, [1, 2, 3, 4]);
    }

    #[test]
    fn stale_and_mismatched_fragments_are_rebuilt() {
        let states = states(vec![
            meta(0, 5, "old", true),
            meta(1, 10, "b", true),
            meta(2, 10, "b", true),
            meta(3, 10, "b", true),
            meta(4, 10, "b", true),
            meta(5, 10, "a", true),
        ]);
        let plan = planner().plan_object("foo", &states, &all());
        let targets = plan.jobs.iter().map(|j| j.target.index).collect::<Vec<_>>();
        assert_eq!(targets, [0, 5]);
        assert_eq!(plan.jobs[0].version.etag, "b");
    }

    #[test]
    fn ties_prefer_more_durable_then_larger_etag() {
        let states0 = states(vec![
            meta(0, 10, "z", true),
            meta(1, 10, "a", true),
            meta(2, 10, "a", true),
            FragmentState::Absent,
        ]);
        assert_eq!(select_winner(&states0).map(|w| w.version.etag), Some("a".to_owned()));

        let states1 = states(vec![meta(0, 10, "a", true), meta(1, 10, "b", true)]);
        assert_eq!(select_winner(&states1).map(|w| w.version.etag), Some("b".to_owned()));

        let states2 = states(vec![meta(0, 10, "z", false), meta(1, 9, "a", true)]);
        assert_eq!(select_winner(&states2).map(|w| w.version.etag), Some("a".to_owned()));
    }

    #[test]
    fn non_durable_fragments_are_confirmed_first() {
        let states = states(vec![
            FragmentState::Absent,
            FragmentState::Absent,
            meta(2, 10, "a", false),
            meta(3, 10, "a", true),
            meta(4, 10, "a", true),
            meta(5, 10, "a", true),
        ]);
        let plan = planner().plan_object("foo", &states, &all());
        assert!(plan.deferrals.is_empty());
        let actions = plan.jobs.iter().map(|j| j.action).collect::<Vec<_>>();
        assert_eq!(
            actions,
            [JobAction::ConfirmDurable, JobAction::Rebuild, JobAction::Rebuild]
        );
        assert!(plan.jobs[0].sources.is_empty());

        // 確定予定のフラグメントもソースになる
        let sources = plan.jobs[1]
            .sources
            .iter()
            .map(|s| s.index)
            .collect::<Vec<_>>();
        assert_eq!(sources, [3, 4, 5, 2]);
    }

    #[test]
    fn insufficient_sources_are_deferred() {
        let states = states(vec![
            FragmentState::Absent,
            FragmentState::Absent,
            FragmentState::Absent,
            meta(3, 10, "a", true),
            meta(4, 10, "a", true),
            meta(5, 10, "a", true),
        ]);
        let plan = planner().plan_object("foo", &states, &all());
        assert!(plan.jobs.is_empty());
        assert_eq!(plan.deferrals.len(), 3);
        assert_eq!(
            plan.deferrals[0].reason,
            DeferReason::InsufficientSources {
                available: 3,
                required: 4
            }
        );
    }

    #[test]
    fn provisional_winner_is_confirmed_not_rebuilt() {
        let states = states(vec![
            FragmentState::Absent,
            meta(1, 10, "a", false),
            meta(2, 10, "a", false),
            meta(3, 10, "a", false),
            meta(4, 10, "a", false),
            meta(5, 10, "a", false),
        ]);
        let plan = planner().plan_object("foo", &states, &all());
        assert_eq!(plan.jobs.len(), 5);
        assert!(plan
            .jobs
            .iter()
            .all(|j| j.action == JobAction::ConfirmDurable));

        let few = states[..3].to_vec();
        let plan = planner().plan_object("foo", &few, &all());
        assert!(plan.jobs.is_empty());
        assert_eq!(
            plan.deferrals[0].reason,
            DeferReason::AwaitingDurable {
                available: 2,
                required: 5
            }
        );
    }

    #[test]
    fn in_flight_writes_are_left_alone() {
        let states = states(vec![
            meta(0, 20, "new", false),
            meta(1, 10, "a", true),
            meta(2, 10, "a", true),
            meta(3, 10, "a", true),
            meta(4, 10, "a", true),
            meta(5, 10, "a", true),
        ]);
        let plan = planner().plan_object("foo", &states, &all());
        assert!(plan.is_empty());
    }

    #[test]
    fn stale_metadata_is_rebuilt() {
        let mut states = states(vec![
            meta(0, 10, "a", true),
            meta(1, 10, "a", true),
            meta(2, 10, "a", true),
            meta(3, 10, "a", true),
            meta(4, 10, "a", true),
            meta(5, 10, "a", true),
        ]);
        if let FragmentState::Present(ref mut m) = states[4].1 {
            m.metadata_version = Timestamp(15);
            m.metadata.insert("color".to_owned(), "red".to_owned());
        }
        let plan = planner().plan_object("foo", &states, &all());
        assert_eq!(plan.jobs.len(), 5);
        assert!(plan.jobs.iter().all(|j| j.target.index != 4));
        assert_eq!(plan.jobs[0].template.metadata_version, Timestamp(15));
        assert_eq!(plan.jobs[0].template.metadata["color"], "red");
    }

    #[test]
    fn targets_are_limited_to_scope() {
        let states = states(vec![
            FragmentState::Absent,
            meta(1, 10, "a", true),
            meta(2, 10, "a", true),
            meta(3, 10, "a", true),
            FragmentState::Absent,
            meta(5, 10, "a", true),
        ]);
        let scope = vec![5, 0, 1].into_iter().collect();
        let plan = planner().plan_object("foo", &states, &scope);
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].target.index, 0);
        assert_eq!(plan.jobs[0].action, JobAction::Rebuild);
    }

    #[test]
    fn planning_is_deterministic() {
        let states = states(vec![
            FragmentState::Absent,
            meta(1, 10, "a", true),
            meta(2, 10, "b", true),
            meta(3, 10, "b", true),
            meta(4, 10, "b", true),
            meta(5, 10, "b", true),
        ]);
        let p0 = planner().plan_object("foo", &states, &all());
        let mut reversed = states.clone();
        reversed.reverse();
        let p1 = planner().plan_object("foo", &reversed, &all());
        assert_eq!(
            p0.jobs.iter().map(|j| (j.target.index, j.action)).collect::<BTreeSet<_>>(),
            p1.jobs.iter().map(|j| (j.target.index, j.action)).collect::<BTreeSet<_>>()
        );
        assert_eq!(p0.jobs.len(), 2);
        assert!(p0.jobs.iter().all(|j| j.version.etag == "b"));
    }
}
