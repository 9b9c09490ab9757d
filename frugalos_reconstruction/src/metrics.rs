//! Metrics for `frugalos_reconstruction`.
use prometrics::metrics::{Counter, CounterBuilder, Histogram, HistogramBuilder};

use crate::executor::JobOutcome;
use crate::planner::JobAction;
use crate::scheduler::PartitionState;
use crate::Result;

#[derive(Debug, Clone)]
pub(crate) struct JobMetrics {
    done_total: Counter,
    deferred_total: Counter,
    failed_total: Counter,
}
impl JobMetrics {
    fn new(action: &'static str) -> Result<Self> {
        let counter = |outcome: &'static str| {
            track!(CounterBuilder::new("jobs_total")
                .namespace("frugalos")
                .subsystem("reconstructor")
                .help("Number of executed reconstruction jobs")
                .label("action", action)
                .label("outcome", outcome)
                .default_registry()
                .finish())
        };
        Ok(JobMetrics {
            done_total: track!(counter("done"))?,
            deferred_total: track!(counter("deferred"))?,
            failed_total: track!(counter("failed"))?,
        })
    }

    fn counter(&self, outcome: JobOutcome) -> &Counter {
        match outcome {
            JobOutcome::Done => &self.done_total,
            JobOutcome::Deferred => &self.deferred_total,
            JobOutcome::Failed => &self.failed_total,
        }
    }
}

/// Prometheus metrics of the reconstructor.
///
/// Every instance shares the counters of the default registry.
#[derive(Debug, Clone)]
pub struct ReconstructorMetrics {
    pub(crate) cycles_total: Counter,
    pub(crate) cycle_duration_seconds: Histogram,
    pub(crate) converged_partitions_total: Counter,
    pub(crate) partially_repaired_partitions_total: Counter,
    pub(crate) deferred_partitions_total: Counter,
    pub(crate) skipped_partitions_total: Counter,
    pub(crate) confirm_jobs: JobMetrics,
    pub(crate) rebuild_jobs: JobMetrics,
    pub(crate) unreachable_probes_total: Counter,
    pub(crate) corrupt_sources_total: Counter,
    pub(crate) insufficient_redundancy_total: Counter,
}
impl ReconstructorMetrics {
    /// Makes a new `ReconstructorMetrics` instance.
    pub fn new() -> Result<Self> {
        let cycles_total = track!(CounterBuilder::new("cycles_total")
            .namespace("frugalos")
            .subsystem("reconstructor")
            .help("Number of completed reconstruction cycles")
            .default_registry()
            .finish())?;
        let cycle_duration_seconds = track!(HistogramBuilder::new("cycle_duration_seconds")
            .namespace("frugalos")
            .subsystem("reconstructor")
            .help("Reconstruction cycle duration")
            .bucket(0.01)
            .bucket(0.1)
            .bucket(1.0)
            .bucket(10.0)
            .bucket(60.0)
            .bucket(300.0)
            .bucket(1800.0)
            .bucket(3600.0)
            .default_registry()
            .finish())?;
        let partitions = |state: &'static str| {
            track!(CounterBuilder::new("partitions_total")
                .namespace("frugalos")
                .subsystem("reconstructor")
                .help("Number of processed partitions by final state")
                .label("state", state)
                .default_registry()
                .finish())
        };
        let converged_partitions_total = track!(partitions("converged"))?;
        let partially_repaired_partitions_total = track!(partitions("partially_repaired"))?;
        let deferred_partitions_total = track!(partitions("deferred"))?;
        let skipped_partitions_total = track!(CounterBuilder::new("skipped_partitions_total")
            .namespace("frugalos")
            .subsystem("reconstructor")
            .help("Number of partitions skipped because nothing changed")
            .default_registry()
            .finish())?;
        let unreachable_probes_total = track!(CounterBuilder::new("unreachable_probes_total")
            .namespace("frugalos")
            .subsystem("reconstructor")
            .help("Number of node inspections that ended as unreachable")
            .default_registry()
            .finish())?;
        let corrupt_sources_total = track!(CounterBuilder::new("corrupt_sources_total")
            .namespace("frugalos")
            .subsystem("reconstructor")
            .help("Number of fetched fragments that failed the integrity check")
            .default_registry()
            .finish())?;
        let insufficient_redundancy_total =
            track!(CounterBuilder::new("insufficient_redundancy_total")
                .namespace("frugalos")
                .subsystem("reconstructor")
                .help("Number of rebuilds deferred for lack of decodable sources")
                .default_registry()
                .finish())?;
        Ok(ReconstructorMetrics {
            cycles_total,
            cycle_duration_seconds,
            converged_partitions_total,
            partially_repaired_partitions_total,
            deferred_partitions_total,
            skipped_partitions_total,
            confirm_jobs: track!(JobMetrics::new("confirm_durable"))?,
            rebuild_jobs: track!(JobMetrics::new("rebuild"))?,
            unreachable_probes_total,
            corrupt_sources_total,
            insufficient_redundancy_total,
        })
    }

    pub(crate) fn job_finished(&self, action: JobAction, outcome: JobOutcome) {
        let jobs = match action {
            JobAction::ConfirmDurable => &self.confirm_jobs,
            JobAction::Rebuild => &self.rebuild_jobs,
        };
        jobs.counter(outcome).increment();
    }

    pub(crate) fn partition_finished(&self, state: PartitionState) {
        match state {
            PartitionState::Converged => self.converged_partitions_total.increment(),
            PartitionState::PartiallyRepaired => {
                self.partially_repaired_partitions_total.increment()
            }
            PartitionState::Deferred => self.deferred_partitions_total.increment(),
        }
    }
}
