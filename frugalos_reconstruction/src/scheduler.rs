//! Cycle Scheduler.
use frugalos_ring::{
    fallback_chain, partners_of, FragmentSlot, PartitionId, RingResolver, StoragePolicy,
};
use futures::future::{self, Loop};
use futures::{Async, Future, Poll};
use slog::Logger;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::codec::ErasureCodec;
use crate::config::ReconstructorConfig;
use crate::executor::{Executor, JobOutcome, JobReport};
use crate::inspector::{Inspection, Inspector};
use crate::metrics::ReconstructorMetrics;
use crate::planner::{DeferReason, Deferral, Job, Planner};
use crate::store::{DurabilityPreference, FragmentStore};
use crate::util::{BoxFuture, Phase};
use crate::{Error, Result};

/// The final state of a partition in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionState {
    /// Nothing is left to repair.
    Converged,

    /// Some jobs succeeded and some work is left.
    PartiallyRepaired,

    /// No progress was made; the next cycle retries.
    Deferred,
}
impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PartitionState::Converged => write!(f, "converged"),
            PartitionState::PartiallyRepaired => write!(f, "partially_repaired"),
            PartitionState::Deferred => write!(f, "deferred"),
        }
    }
}

/// The progress of a partition within a cycle.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionStage {
    Pending,
    Inspecting,
    Planning,
    Executing,
    Finished(PartitionState),
}

/// The outcome of one partition in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    /// 対象パーティション。
    pub partition: PartitionId,

    /// 最終状態。
    pub state: PartitionState,

    /// 前回から変化がなかったため計画を省略したかどうか。
    pub skipped: bool,

    /// 応答しなかったスロットのインデックス群。
    pub unreachable: Vec<usize>,

    /// 実行したジョブの結果。
    pub jobs: Vec<JobReport>,

    /// 先送りされた修復。
    pub deferrals: Vec<Deferral>,
}
impl PartitionReport {
    /// Returns the number of jobs that ended with `outcome`.
    pub fn count_jobs(&self, outcome: JobOutcome) -> usize {
        self.jobs.iter().filter(|j| j.outcome == outcome).count()
    }
}

/// The outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    /// このワーカーでの通し番号 (1始まり)。
    pub cycle: usize,

    /// パーティション毎の結果 (パーティション順)。
    pub partitions: Vec<PartitionReport>,

    /// 所要時間。
    pub elapsed: Duration,
}
impl CycleSummary {
    /// Returns `true` if every partition converged.
    pub fn is_converged(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| p.state == PartitionState::Converged)
    }

    /// Returns the number of partitions that ended in `state`.
    pub fn count(&self, state: PartitionState) -> usize {
        self.partitions.iter().filter(|p| p.state == state).count()
    }

    /// Returns the number of jobs that ended with `outcome`.
    pub fn count_jobs(&self, outcome: JobOutcome) -> usize {
        self.partitions.iter().map(|p| p.count_jobs(outcome)).sum()
    }
}

/// Computes the slots a worker on `node_id` is responsible for.
///
/// That is the node's own fragment indices and their partners. For each
/// partner that did not answer, the next reachable index of the fallback
/// chain is added so that the repair of other fragments still proceeds.
pub fn worker_scope(node_id: &str, inspection: &Inspection) -> BTreeSet<usize> {
    let mut scope = BTreeSet::new();
    for local in inspection.slots.iter().filter(|s| s.slot.node.id == node_id) {
        let origin = local.slot.index;
        scope.insert(origin);

        let partners = partners_of(origin, &inspection.slots);
        let down = partners
            .iter()
            .filter(|&&p| !inspection.is_reachable(p))
            .count();
        scope.extend(partners);
        scope.extend(
            fallback_chain(origin, &inspection.slots)
                .into_iter()
                .filter(|&i| inspection.is_reachable(i))
                .take(down),
        );
    }
    scope
}

/// The reconstruction worker of a storage node.
#[derive(Clone)]
pub struct Reconstructor {
    inner: Arc<Inner>,
}
struct Inner {
    logger: Logger,
    node_id: String,
    resolver: Arc<dyn RingResolver>,
    store: Arc<dyn FragmentStore>,
    codec: Arc<dyn ErasureCodec>,
    config: ReconstructorConfig,
    metrics: ReconstructorMetrics,
    fingerprints: Mutex<HashMap<PartitionId, u64>>,
    cycles: AtomicUsize,
}
impl Reconstructor {
    /// Makes a new `Reconstructor` instance.
    ///
    /// Fails if a policy of the local partitions can not be resolved or is
    /// not supported by the codec.
    pub fn new(
        logger: Logger,
        node_id: &str,
        resolver: Arc<dyn RingResolver>,
        store: Arc<dyn FragmentStore>,
        codec: Arc<dyn ErasureCodec>,
        config: ReconstructorConfig,
        metrics: ReconstructorMetrics,
    ) -> Result<Self> {
        let policies = resolver
            .local_partitions(node_id)
            .into_iter()
            .map(|p| p.policy)
            .collect::<BTreeSet<_>>();
        for policy in policies {
            let policy = track!(resolver.policy(policy).map_err(Error::from))?;
            track!(codec.check(&policy))?;
        }
        let logger = logger.new(o!("node" => node_id.to_owned()));
        Ok(Reconstructor {
            inner: Arc::new(Inner {
                logger,
                node_id: node_id.to_owned(),
                resolver,
                store,
                codec,
                config,
                metrics,
                fingerprints: Mutex::new(HashMap::new()),
                cycles: AtomicUsize::new(0),
            }),
        })
    }

    /// Returns the identifier of the local node.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Returns the settings.
    pub fn config(&self) -> &ReconstructorConfig {
        &self.inner.config
    }

    /// Runs one pass over every local partition.
    ///
    /// At most `partition_concurrency` partitions are processed at the same
    /// time, and nothing is sent to storage nodes until the returned future
    /// is polled. Failures of individual partitions are reported in the
    /// summary; only ring resolution errors fail the cycle.
    pub fn run_once(&self) -> BoxFuture<CycleSummary> {
        match track!(self.pending_partitions()) {
            Err(e) => Box::new(future::err(e)),
            Ok(pending) => Box::new(RunCycle::new(self.clone(), pending)),
        }
    }

    /// Runs up to `max_cycles` cycles, stopping as soon as every partition converged.
    pub fn run_cycles(&self, max_cycles: usize) -> BoxFuture<Vec<CycleSummary>> {
        let this = self.clone();
        let future = future::loop_fn(Vec::new(), move |mut summaries: Vec<CycleSummary>| {
            this.run_once().map(move |summary| {
                let converged = summary.is_converged();
                summaries.push(summary);
                if converged || summaries.len() >= max_cycles {
                    Loop::Break(summaries)
                } else {
                    Loop::Continue(summaries)
                }
            })
        });
        Box::new(future)
    }

    /// Runs cycles until convergence, bounded by the configured `max_cycles`.
    pub fn run_until_converged(&self) -> BoxFuture<Vec<CycleSummary>> {
        self.run_cycles(self.inner.config.max_cycles.max(1))
    }

    fn pending_partitions(&self) -> Result<VecDeque<PendingPartition>> {
        let resolver = &self.inner.resolver;
        let mut pending = VecDeque::new();
        for partition in resolver.local_partitions(&self.inner.node_id) {
            let policy = track!(resolver.policy(partition.policy).map_err(Error::from))?;
            let slots = track!(resolver.slots(partition).map_err(Error::from))?;
            pending.push_back((partition, policy, slots));
        }
        Ok(pending)
    }

    fn known_fingerprint(&self, partition: PartitionId) -> Option<u64> {
        let fingerprints = self.inner.fingerprints.lock().ok()?;
        fingerprints.get(&partition).cloned()
    }

    fn update_fingerprint(&self, partition: PartitionId, fingerprint: Option<u64>) {
        if let Ok(mut fingerprints) = self.inner.fingerprints.lock() {
            if let Some(fingerprint) = fingerprint {
                fingerprints.insert(partition, fingerprint);
            } else {
                fingerprints.remove(&partition);
            }
        }
    }
}
impl fmt::Debug for Reconstructor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Reconstructor {{ node_id: {:?}, .. }}", self.inner.node_id)
    }
}

type PendingPartition = (PartitionId, StoragePolicy, Vec<FragmentSlot>);

/// A cycle over the local partitions.
///
/// 実行中の`PartitionTask`は高々`concurrency`個で、空きが出るたびに次の
/// パーティションのタスクを生成する (検査はタスク生成時に始まる)。
struct RunCycle {
    reconstructor: Reconstructor,
    cycle: usize,
    concurrency: usize,
    started_at: Option<Instant>,
    pending: VecDeque<PendingPartition>,
    running: Vec<PartitionTask>,
    finished: Vec<PartitionReport>,
}
impl RunCycle {
    fn new(reconstructor: Reconstructor, pending: VecDeque<PendingPartition>) -> Self {
        let cycle = reconstructor.inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let concurrency = reconstructor.inner.config.partition_concurrency.max(1);
        RunCycle {
            reconstructor,
            cycle,
            concurrency,
            started_at: None,
            pending,
            running: Vec::new(),
            finished: Vec::new(),
        }
    }

    fn admit(&mut self) {
        while self.running.len() < self.concurrency {
            if let Some((partition, policy, slots)) = self.pending.pop_front() {
                let task = PartitionTask::new(self.reconstructor.clone(), partition, policy, slots);
                self.running.push(task);
            } else {
                break;
            }
        }
    }

    fn summarize(&mut self, started_at: Instant) -> CycleSummary {
        let mut partitions = mem::replace(&mut self.finished, Vec::new());
        partitions.sort_by_key(|p| p.partition);
        let elapsed = started_at.elapsed();
        let summary = CycleSummary {
            cycle: self.cycle,
            partitions,
            elapsed,
        };

        let inner = &self.reconstructor.inner;
        inner.metrics.cycles_total.increment();
        inner
            .metrics
            .cycle_duration_seconds
            .observe(prometrics::timestamp::duration_to_seconds(elapsed));
        info!(
            inner.logger,
            "Reconstruction cycle finished: cycle={}, converged={}, partially_repaired={}, deferred={}, jobs_done={}, elapsed={:?}",
            self.cycle,
            summary.count(PartitionState::Converged),
            summary.count(PartitionState::PartiallyRepaired),
            summary.count(PartitionState::Deferred),
            summary.count_jobs(JobOutcome::Done),
            elapsed
        );
        summary
    }
}
impl Future for RunCycle {
    type Item = CycleSummary;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let started_at = match self.started_at {
            Some(t) => t,
            None => {
                info!(
                    self.reconstructor.inner.logger,
                    "Starts reconstruction cycle: cycle={}, partitions={}",
                    self.cycle,
                    self.pending.len()
                );
                let now = Instant::now();
                self.started_at = Some(now);
                now
            }
        };
        loop {
            self.admit();
            let mut progressed = false;
            let mut i = 0;
            while i < self.running.len() {
                if let Async::Ready(report) = track!(self.running[i].poll())? {
                    self.running.swap_remove(i);
                    self.finished.push(report);
                    progressed = true;
                } else {
                    i += 1;
                }
            }
            if self.running.is_empty() && self.pending.is_empty() {
                return Ok(Async::Ready(self.summarize(started_at)));
            }
            if !progressed {
                return Ok(Async::NotReady);
            }
        }
    }
}

enum Planned {
    Skipped,
    Nothing,
    Jobs(Vec<Job>),
}

/// Inspects, plans and repairs a single partition.
struct PartitionTask {
    reconstructor: Reconstructor,
    logger: Logger,
    partition: PartitionId,
    policy: StoragePolicy,
    stage: PartitionStage,
    unreachable: Vec<usize>,
    deferrals: Vec<Deferral>,
    phase: Phase<BoxFuture<Inspection>, BoxFuture<Vec<JobReport>>>,
}
impl PartitionTask {
    fn new(
        reconstructor: Reconstructor,
        partition: PartitionId,
        policy: StoragePolicy,
        slots: Vec<FragmentSlot>,
    ) -> Self {
        let logger = reconstructor
            .inner
            .logger
            .new(o!("partition" => partition.to_string()));
        let inner = &reconstructor.inner;
        let inspector = Inspector::new(
            logger.clone(),
            inner.store.clone(),
            inner.config.inspect_timeout,
            inner.metrics.clone(),
        );
        let phase = Phase::A(inspector.inspect(
            partition,
            &slots,
            DurabilityPreference::IncludeNonDurable,
        ));
        let mut task = PartitionTask {
            reconstructor,
            logger,
            partition,
            policy,
            stage: PartitionStage::Pending,
            unreachable: Vec::new(),
            deferrals: Vec::new(),
            phase,
        };
        task.transit(PartitionStage::Inspecting);
        task
    }

    fn transit(&mut self, stage: PartitionStage) {
        debug!(self.logger, "{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn handle_inspection(&mut self, inspection: &Inspection) -> Planned {
        self.transit(PartitionStage::Planning);
        let reconstructor = self.reconstructor.clone();
        let config = reconstructor.config();
        self.unreachable = inspection
            .slots
            .iter()
            .filter(|s| !s.is_reachable())
            .map(|s| s.slot.index)
            .collect();

        let fingerprint = inspection.fingerprint();
        if config.skip_unchanged_partitions
            && reconstructor.known_fingerprint(self.partition) == Some(fingerprint)
        {
            debug!(self.logger, "Unchanged since the last cycle");
            reconstructor.inner.metrics.skipped_partitions_total.increment();
            return Planned::Skipped;
        }

        let scope = worker_scope(reconstructor.node_id(), inspection);
        let planner = Planner::new(self.partition, &self.policy, config);
        let plan = planner.plan(inspection, &scope);
        for d in &plan.deferrals {
            if let DeferReason::InsufficientSources { available, required } = d.reason {
                reconstructor
                    .inner
                    .metrics
                    .insufficient_redundancy_total
                    .increment();
                warn!(
                    self.logger,
                    "Insufficient redundancy: object={}, target={:?}, available={}, required={}",
                    d.object,
                    d.target.as_ref().map(|t| t.index),
                    available,
                    required
                );
            }
        }

        let unchanged = plan.is_empty() && inspection.is_complete();
        if config.skip_unchanged_partitions {
            let fingerprint = Some(fingerprint).filter(|_| unchanged);
            reconstructor.update_fingerprint(self.partition, fingerprint);
        }
        self.deferrals = plan.deferrals;
        if plan.jobs.is_empty() {
            Planned::Nothing
        } else {
            Planned::Jobs(plan.jobs)
        }
    }

    fn finish(&mut self, jobs: Vec<JobReport>, skipped: bool) -> PartitionReport {
        let done = jobs.iter().filter(|j| j.outcome == JobOutcome::Done).count();
        let state = if done == jobs.len() && self.deferrals.is_empty() {
            PartitionState::Converged
        } else if done > 0 {
            PartitionState::PartiallyRepaired
        } else {
            PartitionState::Deferred
        };
        self.transit(PartitionStage::Finished(state));
        self.reconstructor.inner.metrics.partition_finished(state);
        if state != PartitionState::Converged || !jobs.is_empty() {
            info!(
                self.logger,
                "Partition {}: jobs={}, done={}, deferrals={}, unreachable={:?}",
                state,
                jobs.len(),
                done,
                self.deferrals.len(),
                self.unreachable
            );
        }
        PartitionReport {
            partition: self.partition,
            state,
            skipped,
            unreachable: self.unreachable.clone(),
            jobs,
            deferrals: self.deferrals.clone(),
        }
    }
}
impl Future for PartitionTask {
    type Item = PartitionReport;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        while let Async::Ready(phase) = track!(self.phase.poll())? {
            let next = match phase {
                Phase::A(inspection) => match self.handle_inspection(&inspection) {
                    Planned::Skipped => return Ok(Async::Ready(self.finish(Vec::new(), true))),
                    Planned::Nothing => return Ok(Async::Ready(self.finish(Vec::new(), false))),
                    Planned::Jobs(jobs) => {
                        self.transit(PartitionStage::Executing);
                        let inner = &self.reconstructor.inner;
                        let executor = Executor::new(
                            self.logger.clone(),
                            inner.store.clone(),
                            inner.codec.clone(),
                            self.policy.clone(),
                            inner.config.clone(),
                            inner.metrics.clone(),
                        );
                        Phase::B(executor.execute_all(jobs))
                    }
                },
                Phase::B(jobs) => return Ok(Async::Ready(self.finish(jobs, false))),
            };
            self.phase = next;
        }
        Ok(Async::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibers::Spawn;
    use std::thread;
    use trackable::result::TestResult;

    use crate::test_util::tests::{run_cycle, CallKind, TestObject, TestSystem};
    use crate::ErrorKind;

    fn converge(system: &TestSystem, object: &TestObject, max_cycles: usize) -> Result<usize> {
        let workers = track!(system.workers())?;
        for cycle in 1..=max_cycles {
            track!(run_cycle(&workers))?;
            if system.assert_converged(object).is_ok() {
                return Ok(cycle);
            }
        }
        track_panic!(ErrorKind::Other, "Not converged within {} cycles", max_cycles);
    }

    fn report_of(summary: &CycleSummary, object: &TestObject) -> PartitionReport {
        let report = summary
            .partitions
            .iter()
            .find(|p| p.partition == object.partition);
        report
            .cloned()
            .unwrap_or_else(|| panic!("No report: {}", object.partition))
    }

    #[test]
    fn worker_scope_covers_partners_and_fallbacks() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);

        let inspection = track!(system.inspect(&object))?;
        let scope = worker_scope(&slots[0].node.id, &inspection);
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), [0, 1, 5]);

        system.cluster.set_unreachable(&slots[1].node, true);
        system.cluster.set_unreachable(&slots[2].node, true);
        let inspection = track!(system.inspect(&object))?;
        let scope = worker_scope(&slots[0].node.id, &inspection);
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), [0, 1, 3, 5]);

        // 両隣が落ちていればチェーンの先頭から二つ
        system.cluster.set_unreachable(&slots[1].node, false);
        system.cluster.set_unreachable(&slots[4].node, true);
        let inspection = track!(system.inspect(&object))?;
        let scope = worker_scope(&slots[3].node.id, &inspection);
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), [0, 1, 2, 3, 4]);

        let scope = worker_scope("unknown", &inspection);
        assert!(scope.is_empty());
        Ok(())
    }

    #[test]
    fn tolerable_losses_converge_in_one_cycle() -> TestResult {
        let cases: &[&[usize]] = &[&[0], &[0, 5], &[0, 4], &[1, 3]];
        for deleted in cases {
            let system = track!(TestSystem::new(4, 2))?;
            let object = track!(system.put_object("foo", b"Hello World!"))?;
            let slots = system.slots(&object);
            for &i in deleted.iter() {
                system.cluster.delete_fragment(&slots[i].node, &object);
            }
            let cycles = track!(converge(&system, &object, 1), "deleted={:?}", deleted)?;
            assert_eq!(cycles, 1);
        }
        Ok(())
    }

    #[test]
    fn non_durable_fragments_are_confirmed_without_transfer() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        for slot in system.slots(&object) {
            system.cluster.drop_durable(&slot.node, &object);
        }
        system.cluster.clear_calls();

        assert_eq!(track!(converge(&system, &object, 1))?, 1);
        let calls = system.cluster.calls();
        assert!(calls.iter().all(|c| c.kind == CallKind::List || c.kind == CallKind::Commit));
        assert_eq!(calls.iter().filter(|c| c.kind == CallKind::Commit).count(), 6);
        Ok(())
    }

    #[test]
    fn mixed_losses_converge_within_bounded_cycles() -> TestResult {
        let cases: &[(&[usize], &[usize], usize)] = &[
            (&[0, 1], &[2], 2),
            (&[0, 2], &[1, 3, 5], 3),
            (&[0], &[1, 2, 4, 5], 3),
        ];
        for &(deleted, non_durable, bound) in cases {
            let system = track!(TestSystem::new(4, 2))?;
            let object = track!(system.put_object("foo", b"Hello World!"))?;
            let slots = system.slots(&object);
            for &i in deleted {
                system.cluster.delete_fragment(&slots[i].node, &object);
            }
            for &i in non_durable {
                system.cluster.drop_durable(&slots[i].node, &object);
            }
            track!(
                converge(&system, &object, bound),
                "deleted={:?}, non_durable={:?}",
                deleted,
                non_durable
            )?;
        }
        Ok(())
    }

    #[test]
    fn unreachable_partner_is_bypassed_and_repaired_later() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[1].node, &object);
        system.cluster.delete_fragment(&slots[2].node, &object);
        system.cluster.set_unreachable(&slots[1].node, true);

        let worker = track!(system.reconstructor(&slots[0].node.id))?;
        let summary = track!(fibers_global::execute(worker.run_once()))?;
        let report = report_of(&summary, &object);
        assert_eq!(report.state, PartitionState::PartiallyRepaired);
        assert_eq!(report.unreachable, [1]);
        assert_eq!(report.count_jobs(JobOutcome::Done), 1);
        assert_eq!(report.count_jobs(JobOutcome::Deferred), 1);
        assert!(system.cluster.fragment(&slots[2].node, &object).is_some());

        system.cluster.set_unreachable(&slots[1].node, false);
        let summary = track!(fibers_global::execute(worker.run_once()))?;
        assert_eq!(report_of(&summary, &object).state, PartitionState::Converged);
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn partner_down_rebuild_follows_the_fallback_chain() -> TestResult {
        for &(primary, partner) in &[(3, 4), (3, 2), (5, 4), (5, 0), (0, 1)] {
            let system = track!(TestSystem::new(4, 2))?;
            let object = track!(system.put_object("foo", b"bar"))?;
            let slots = system.slots(&object);

            // リング順で最初の、primary でも partner でもないスロット
            let failed = (0..slots.len())
                .find(|&i| i != primary && i != partner)
                .unwrap_or_else(|| panic!("primary={}, partner={}", primary, partner));
            system.cluster.delete_fragment(&slots[failed].node, &object);
            system.cluster.set_unreachable(&slots[partner].node, true);

            let worker = track!(system.reconstructor(&slots[primary].node.id))?;
            track!(fibers_global::execute(worker.run_once()))?;

            let fragment = system
                .cluster
                .fragment(&slots[failed].node, &object)
                .unwrap_or_else(|| panic!("primary={}, partner={}", primary, partner));
            assert_eq!(fragment.meta, object.template.for_index(failed, true));
            assert_eq!(fragment.payload, object.payloads[failed]);
        }
        Ok(())
    }

    #[test]
    fn insufficient_redundancy_is_deferred() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        for slot in &slots[..3] {
            system.cluster.delete_fragment(&slot.node, &object);
        }
        system.cluster.clear_calls();

        let workers = track!(system.workers())?;
        for summary in track!(run_cycle(&workers))? {
            let report = report_of(&summary, &object);
            if report.deferrals.is_empty() {
                continue;
            }
            assert_eq!(report.state, PartitionState::Deferred);
            assert!(report.deferrals.iter().all(|d| match d.reason {
                DeferReason::InsufficientSources { available, required } => {
                    available == 3 && required == 4
                }
                _ => false,
            }));
        }
        assert!(system.metrics.insufficient_redundancy_total.value() >= 3.0);
        assert!(system
            .cluster
            .calls()
            .iter()
            .all(|c| c.kind == CallKind::List));
        Ok(())
    }

    #[test]
    fn few_non_durable_fragments_are_left_alone() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        for slot in &slots[..2] {
            system.cluster.delete_fragment(&slot.node, &object);
        }
        for slot in &slots[2..] {
            system.cluster.drop_durable(&slot.node, &object);
        }

        let workers = track!(system.workers())?;
        track!(run_cycle(&workers))?;
        for slot in &slots[2..] {
            let fragment = system.cluster.fragment(&slot.node, &object);
            assert_eq!(fragment.map(|f| f.meta.durable), Some(false));
        }
        assert!(system.cluster.fragment(&slots[0].node, &object).is_none());
        Ok(())
    }

    #[test]
    fn unchanged_partitions_are_skipped() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[4].node, &object);

        let workers = track!(system.workers())?;
        track!(run_cycle(&workers))?;
        track!(system.assert_converged(&object))?;
        track!(run_cycle(&workers))?;

        system.cluster.clear_calls();
        let summaries = track!(run_cycle(&workers))?;
        assert!(summaries
            .iter()
            .all(|s| s.is_converged() && s.partitions.iter().all(|p| p.skipped)));
        assert!(system
            .cluster
            .calls()
            .iter()
            .all(|c| c.kind == CallKind::List));
        track!(system.assert_converged(&object))?;

        // 変化があれば再び計画される
        system.cluster.delete_fragment(&slots[3].node, &object);
        let summaries = track!(run_cycle(&workers))?;
        assert!(summaries.iter().any(|s| !report_of(s, &object).skipped));
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn partitions_are_inspected_as_they_are_admitted() -> TestResult {
        let mut system = track!(TestSystem::new(4, 2))?;
        system.config.partition_concurrency = 1;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        let fragments = slots.len();
        let partitions = system.rings.local_partitions(&slots[0].node.id).len();
        assert!(partitions > 1);

        let worker = track!(system.reconstructor(&slots[0].node.id))?;
        system.cluster.clear_calls();
        let future = worker.run_once();
        assert!(system.cluster.calls().is_empty());

        // 応答しないノードがいる間は、次のパーティションの検査は始まらない
        system.cluster.set_stalled(&slots[5].node, true);
        let lists = |system: &TestSystem| {
            system
                .cluster
                .calls()
                .iter()
                .filter(|c| c.kind == CallKind::List)
                .count()
        };
        let monitor = fibers_global::handle().spawn_monitor(future);
        thread::sleep(Duration::from_millis(50));
        assert!(lists(&system) <= fragments);

        let summary = track!(fibers_global::execute(monitor.map_err(Error::from)))?;
        assert_eq!(summary.partitions.len(), partitions);
        assert_eq!(lists(&system), partitions * fragments);
        Ok(())
    }

    #[test]
    fn run_cycles_stops_once_converged() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[1].node, &object);
        system.cluster.set_conflict(&slots[1].node, true);

        let worker = track!(system.reconstructor(&slots[0].node.id))?;
        let summaries = track!(fibers_global::execute(worker.run_until_converged()))?;
        assert_eq!(summaries.len(), system.config.max_cycles);
        assert!(summaries
            .iter()
            .all(|s| s.count(PartitionState::Deferred) == 1));

        system.cluster.set_conflict(&slots[1].node, false);
        let summaries = track!(fibers_global::execute(worker.run_cycles(5)))?;
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].is_converged());
        assert_eq!(summaries[0].cycle, system.config.max_cycles + 1);
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn reads_succeed_throughout_repair() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"Hello World!"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[0].node, &object);
        system.cluster.delete_fragment(&slots[4].node, &object);

        for worker in track!(system.workers())? {
            let read = track!(system.read(&object))?;
            assert_eq!(read.content, object.content);
            track!(fibers_global::execute(worker.run_once()))?;
        }
        let read = track!(system.read(&object))?;
        assert_eq!(read.content, object.content);
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn metadata_updates_converge() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let updated = system.post_metadata(&object, "color", "blue", &[0, 1, 2]);

        assert_eq!(track!(converge(&system, &updated, 1))?, 1);
        let read = track!(system.read(&updated))?;
        assert_eq!(read.meta.metadata.get("color").map(|v| v.as_str()), Some("blue"));
        Ok(())
    }

    #[test]
    fn multiple_objects_converge_together() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let mut objects = Vec::new();
        for i in 0..8 {
            let object = track!(system.put_object(&format!("object-{}", i), b"data"))?;
            let slots = system.slots(&object);
            system.cluster.delete_fragment(&slots[i % 6].node, &object);
            if i % 3 == 0 {
                system.cluster.drop_durable(&slots[(i + 2) % 6].node, &object);
            }
            objects.push(object);
        }

        let workers = track!(system.workers())?;
        track!(run_cycle(&workers))?;
        for object in &objects {
            track!(system.assert_converged(object))?;
        }
        Ok(())
    }
}
