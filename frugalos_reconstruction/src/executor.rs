//! Rebuild Executor.
use frugalos_ring::StoragePolicy;
use futures::future::{self, Loop};
use futures::{Async, Future, Poll};
use slog::Logger;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::codec::ErasureCodec;
use crate::collect::CollectFragments;
use crate::config::ReconstructorConfig;
use crate::fragment::{append_checksum, Fragment};
use crate::metrics::ReconstructorMetrics;
use crate::planner::{Job, JobAction};
use crate::store::{DurabilityPreference, FragmentStore};
use crate::util::{with_timeout, BoxFuture, Phase4};
use crate::{Error, ErrorKind};

/// The outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    /// The target converged.
    Done,

    /// A transient condition blocked the job; the next cycle retries it.
    Deferred,

    /// The job failed for a non-transient reason.
    Failed,
}
impl JobOutcome {
    fn from_error(e: &Error) -> Self {
        if e.kind().is_retryable() || *e.kind() == ErrorKind::NotFound {
            JobOutcome::Deferred
        } else {
            JobOutcome::Failed
        }
    }
}
impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            JobOutcome::Done => write!(f, "done"),
            JobOutcome::Deferred => write!(f, "deferred"),
            JobOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// The record of an executed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// 実行したジョブ。
    pub job: Job,

    /// 結果。
    pub outcome: JobOutcome,

    /// 失敗・延期の原因となったエラーの種類。
    pub error: Option<ErrorKind>,
}

/// Rebuild Executor.
#[derive(Clone)]
pub struct Executor {
    logger: Logger,
    store: Arc<dyn FragmentStore>,
    codec: Arc<dyn ErasureCodec>,
    policy: StoragePolicy,
    config: ReconstructorConfig,
    metrics: ReconstructorMetrics,
}
impl Executor {
    /// Makes a new `Executor` for the partitions of `policy`.
    pub fn new(
        logger: Logger,
        store: Arc<dyn FragmentStore>,
        codec: Arc<dyn ErasureCodec>,
        policy: StoragePolicy,
        config: ReconstructorConfig,
        metrics: ReconstructorMetrics,
    ) -> Self {
        Executor {
            logger,
            store,
            codec,
            policy,
            config,
            metrics,
        }
    }

    /// Executes a job; the returned future never fails.
    pub fn execute(&self, job: Job) -> BoxFuture<JobReport> {
        let future = match job.action {
            JobAction::ConfirmDurable => self.confirm(&job),
            JobAction::Rebuild => self.rebuild(&job),
        };
        let logger = self.logger.new(o!("job" => job.to_string()));
        let metrics = self.metrics.clone();
        Box::new(future.then(move |result| {
            let (outcome, error) = match result {
                Ok(()) => {
                    info!(logger, "Job completed: version={}", job.version);
                    (JobOutcome::Done, None)
                }
                Err(e) => {
                    let outcome = JobOutcome::from_error(&e);
                    if *e.kind() == ErrorKind::InsufficientSources {
                        metrics.insufficient_redundancy_total.increment();
                        warn!(logger, "Insufficient redundancy: {}", e);
                    } else if outcome == JobOutcome::Deferred {
                        info!(logger, "Job deferred: {}", e);
                    } else {
                        warn!(logger, "Job failed: {}", e);
                    }
                    (outcome, Some(*e.kind()))
                }
            };
            metrics.job_finished(job.action, outcome);
            Ok(JobReport {
                job,
                outcome,
                error,
            })
        }))
    }

    /// Executes jobs one by one, in order.
    ///
    /// A fragment whose confirmation failed is removed from the sources of
    /// the subsequent rebuilds.
    pub fn execute_all(&self, jobs: Vec<Job>) -> BoxFuture<Vec<JobReport>> {
        let this = self.clone();
        let future = future::loop_fn(
            (jobs.into_iter(), Vec::new(), BTreeSet::new()),
            move |(mut jobs, mut reports, mut unconfirmed)| -> BoxFuture<_> {
                let mut job = match jobs.next() {
                    None => return Box::new(future::ok(Loop::Break(reports))),
                    Some(job) => job,
                };
                let object = job.object.clone();
                job.sources
                    .retain(|s| !unconfirmed.contains(&(object.clone(), s.index)));
                Box::new(this.execute(job).map(move |report| {
                    if report.job.action == JobAction::ConfirmDurable
                        && report.outcome != JobOutcome::Done
                    {
                        unconfirmed.insert((report.job.object.clone(), report.job.target.index));
                    }
                    reports.push(report);
                    Loop::Continue((jobs, reports, unconfirmed))
                }))
            },
        );
        Box::new(future)
    }

    fn confirm(&self, job: &Job) -> BoxFuture<()> {
        let future = self.store.commit_durable(
            &job.target.node,
            job.partition,
            &job.object,
            job.target.index,
            &job.version,
        );
        with_timeout(future, self.config.commit_timeout)
    }

    fn rebuild(&self, job: &Job) -> BoxFuture<()> {
        let collect = CollectFragments::new(
            self.logger.clone(),
            self.store.clone(),
            self.metrics.clone(),
            job.partition,
            &job.object,
            job.version.clone(),
            job.sources.clone(),
            self.policy.decode_minimum(),
            DurabilityPreference::IncludeNonDurable,
            self.config.fetch_timeout,
        );
        match track!(collect) {
            Err(e) => Box::new(future::err(e)),
            Ok(collect) => Box::new(Rebuild {
                executor: self.clone(),
                job: job.clone(),
                phase: Phase4::A(collect),
            }),
        }
    }
}

/// Fetches sources, reconstructs the target fragment, writes it non-durable
/// and finally commits it durable.
struct Rebuild {
    executor: Executor,
    job: Job,
    phase: Phase4<CollectFragments, BoxFuture<Vec<u8>>, BoxFuture<()>, BoxFuture<()>>,
}
impl Future for Rebuild {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        while let Async::Ready(phase) = track!(self.phase.poll())? {
            let job = &self.job;
            let executor = &self.executor;
            let next = match phase {
                Phase4::A(fragments) => {
                    let target = job.target.index;
                    Phase4::B(executor.codec.reconstruct(&executor.policy, target, fragments))
                }
                Phase4::B(mut payload) => {
                    append_checksum(&mut payload);
                    let fragment = Fragment {
                        meta: job.template.for_index(job.target.index, false),
                        payload,
                    };
                    let future = executor.store.put_fragment(
                        &job.target.node,
                        job.partition,
                        fragment,
                        false,
                    );
                    Phase4::C(with_timeout(future, executor.config.commit_timeout))
                }
                Phase4::C(()) => {
                    let future = executor.store.commit_durable(
                        &job.target.node,
                        job.partition,
                        &job.object,
                        job.target.index,
                        &job.version,
                    );
                    Phase4::D(with_timeout(future, executor.config.commit_timeout))
                }
                Phase4::D(()) => return Ok(Async::Ready(())),
            };
            self.phase = next;
        }
        Ok(Async::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackable::result::TestResult;

    use crate::planner::Planner;
    use crate::test_util::tests::{CallKind, TestObject, TestSystem};

    fn plan(system: &TestSystem, object: &TestObject) -> Vec<Job> {
        let planner = Planner::new(object.partition, &system.policy, &system.config);
        let inspection = track_try_unwrap!(system.inspect(object));
        let scope = (0..system.policy.fragments()).collect::<BTreeSet<_>>();
        planner.plan(&inspection, &scope).jobs
    }

    #[test]
    fn rebuild_restores_a_durable_fragment() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[0].node, &object);

        let jobs = plan(&system, &object);
        assert_eq!(jobs.len(), 1);
        let reports = track!(fibers_global::execute(system.executor().execute_all(jobs)))?;
        assert_eq!(reports[0].outcome, JobOutcome::Done);
        track!(system.assert_converged(&object))?;

        let puts = system
            .cluster
            .calls()
            .into_iter()
            .filter(|c| c.kind == CallKind::Put)
            .collect::<Vec<_>>();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].node, slots[0].node.id);
        Ok(())
    }

    #[test]
    fn rebuild_is_idempotent() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[2].node, &object);

        let jobs = plan(&system, &object);
        let executor = system.executor();
        let first = track!(fibers_global::execute(executor.execute_all(jobs.clone())))?;
        let after_first = system.cluster.fragment(&slots[2].node, &object);

        let second = track!(fibers_global::execute(executor.execute_all(jobs)))?;
        assert_eq!(first[0].outcome, JobOutcome::Done);
        assert_eq!(second[0].outcome, JobOutcome::Done);
        assert_eq!(system.cluster.fragment(&slots[2].node, &object), after_first);
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn partial_non_durable_artifact_is_overwritten() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);

        let mut meta = object.template.for_index(0, false);
        meta.timestamp.0 -= 1;
        let partial = Fragment {
            meta,
            payload: b"garbage".to_vec(),
        };
        system
            .cluster
            .store_fragment(&slots[0].node, object.partition, partial);

        let jobs = plan(&system, &object);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].action, JobAction::Rebuild);
        let reports = track!(fibers_global::execute(system.executor().execute_all(jobs)))?;
        assert_eq!(reports[0].outcome, JobOutcome::Done);
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn corrupt_sources_are_skipped() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[0].node, &object);
        system.cluster.corrupt_fragment(&slots[2].node, &object);

        let jobs = plan(&system, &object);
        let reports = track!(fibers_global::execute(system.executor().execute_all(jobs)))?;
        assert_eq!(reports[0].outcome, JobOutcome::Done);
        assert_eq!(system.metrics.corrupt_sources_total.value(), 1.0);
        assert!(system.cluster.fragment(&slots[0].node, &object).is_some());
        Ok(())
    }

    #[test]
    fn confirmation_transfers_no_payload() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.drop_durable(&slots[3].node, &object);

        let jobs = plan(&system, &object);
        system.cluster.clear_calls();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].action, JobAction::ConfirmDurable);
        let reports = track!(fibers_global::execute(system.executor().execute_all(jobs)))?;
        assert_eq!(reports[0].outcome, JobOutcome::Done);

        let calls = system.cluster.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, CallKind::Commit);
        track!(system.assert_converged(&object))?;
        Ok(())
    }

    #[test]
    fn conflicts_and_unreachable_targets_are_deferred() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[0].node, &object);
        system.cluster.delete_fragment(&slots[1].node, &object);

        let jobs = plan(&system, &object);
        system.cluster.set_conflict(&slots[0].node, true);
        system.cluster.set_unreachable(&slots[1].node, true);
        let reports = track!(fibers_global::execute(system.executor().execute_all(jobs)))?;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == JobOutcome::Deferred));
        assert_eq!(reports[0].error, Some(ErrorKind::ConflictOnCommit));
        assert_eq!(reports[1].error, Some(ErrorKind::Unreachable));
        Ok(())
    }

    #[test]
    fn failed_confirmation_is_not_used_as_source() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"bar"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[0].node, &object);
        system.cluster.delete_fragment(&slots[1].node, &object);
        system.cluster.drop_durable(&slots[2].node, &object);

        let jobs = plan(&system, &object);
        assert_eq!(jobs.len(), 3);
        system.cluster.set_conflict(&slots[2].node, true);
        let reports = track!(fibers_global::execute(system.executor().execute_all(jobs)))?;
        let outcomes = reports.iter().map(|r| r.outcome).collect::<Vec<_>>();
        assert_eq!(
            outcomes,
            [JobOutcome::Deferred, JobOutcome::Deferred, JobOutcome::Deferred]
        );
        assert_eq!(reports[1].error, Some(ErrorKind::InsufficientSources));
        Ok(())
    }
}
