//! Read-only probing of the fragments a partition's nodes hold.
use frugalos_ring::{FragmentSlot, Node, PartitionId};
use futures::future::{self, Future};
use siphasher::sip::SipHasher;
use slog::Logger;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::fragment::{FragmentMeta, FragmentState};
use crate::metrics::ReconstructorMetrics;
use crate::store::{DurabilityPreference, FragmentStore};
use crate::util::{with_timeout, BoxFuture};
use crate::ErrorKind;

/// The listing a node returned, or the fact that it could not be probed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeListing {
    /// The node answered.
    Listed(Vec<FragmentMeta>),

    /// The node is down, overloaded or too slow.
    Unreachable,
}

/// The result of probing one fragment slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotInspection {
    /// 対象スロット。
    pub slot: FragmentSlot,

    /// 調査結果。
    pub listing: NodeListing,
}
impl SlotInspection {
    /// Returns `true` if the node answered.
    pub fn is_reachable(&self) -> bool {
        self.listing != NodeListing::Unreachable
    }

    /// Returns the state of `object` in this slot.
    ///
    /// Fragments with another index (e.g., left by a topology change) are ignored.
    pub fn state_of(&self, object: &str) -> FragmentState {
        match self.listing {
            NodeListing::Unreachable => FragmentState::Unreachable,
            NodeListing::Listed(ref metas) => metas
                .iter()
                .find(|m| m.object == object && m.fragment_index == self.slot.index)
                .map_or(FragmentState::Absent, |m| FragmentState::Present(m.clone())),
        }
    }
}

/// The per-slot results of probing every node of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Inspection {
    /// 対象パーティション。
    pub partition: PartitionId,

    /// スロット毎の結果 (フラグメントインデックス順)。
    pub slots: Vec<SlotInspection>,
}
impl Inspection {
    /// Returns the keys of every object observed in the partition.
    pub fn objects(&self) -> BTreeSet<&str> {
        self.slots
            .iter()
            .filter_map(|s| match s.listing {
                NodeListing::Listed(ref metas) => Some(metas),
                NodeListing::Unreachable => None,
            })
            .flat_map(|metas| metas.iter().map(|m| m.object.as_str()))
            .collect()
    }

    /// Returns the per-slot states of `object`, ordered by fragment index.
    pub fn states_of(&self, object: &str) -> Vec<(FragmentSlot, FragmentState)> {
        self.slots
            .iter()
            .map(|s| (s.slot.clone(), s.state_of(object)))
            .collect()
    }

    /// Returns `true` if the node holding `index` answered.
    pub fn is_reachable(&self, index: usize) -> bool {
        self.slots
            .iter()
            .any(|s| s.slot.index == index && s.is_reachable())
    }

    /// Returns `true` if every node answered.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(SlotInspection::is_reachable)
    }

    /// A digest of the observed state, used to detect unchanged partitions.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = SipHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Fragment Inspector.
#[derive(Clone)]
pub struct Inspector {
    logger: Logger,
    store: Arc<dyn FragmentStore>,
    timeout: Duration,
    metrics: ReconstructorMetrics,
}
impl Inspector {
    /// Makes a new `Inspector` instance.
    pub fn new(
        logger: Logger,
        store: Arc<dyn FragmentStore>,
        timeout: Duration,
        metrics: ReconstructorMetrics,
    ) -> Self {
        Inspector {
            logger,
            store,
            timeout,
            metrics,
        }
    }

    /// Lists the fragments a node holds in `partition`.
    ///
    /// The returned future never fails: an absent partition is an empty
    /// listing and any other failure (timeout included) is `Unreachable`.
    pub fn inspect_node(
        &self,
        node: &Node,
        partition: PartitionId,
        preference: DurabilityPreference,
    ) -> BoxFuture<NodeListing> {
        let logger = self.logger.new(o!("node" => node.to_string()));
        let metrics = self.metrics.clone();
        let future = with_timeout(
            self.store.list_fragments(node, partition, preference),
            self.timeout,
        );
        Box::new(future.then(move |result| {
            let listing = match result {
                Ok(metas) => {
                    let metas = metas
                        .into_iter()
                        .filter(|m| m.durable || preference == DurabilityPreference::IncludeNonDurable)
                        .collect();
                    NodeListing::Listed(metas)
                }
                Err(ref e) if *e.kind() == ErrorKind::NotFound => NodeListing::Listed(Vec::new()),
                Err(e) => {
                    debug!(logger, "Cannot inspect {}: {}", partition, e);
                    metrics.unreachable_probes_total.increment();
                    NodeListing::Unreachable
                }
            };
            Ok(listing)
        }))
    }

    /// Probes every slot concurrently; a slow node does not stall its siblings.
    pub fn inspect(
        &self,
        partition: PartitionId,
        slots: &[FragmentSlot],
        preference: DurabilityPreference,
    ) -> BoxFuture<Inspection> {
        let futures = slots
            .iter()
            .map(|slot| {
                let slot = slot.clone();
                self.inspect_node(&slot.node, partition, preference)
                    .map(move |listing| SlotInspection { slot, listing })
            })
            .collect::<Vec<_>>();
        Box::new(future::join_all(futures).map(move |slots| Inspection { partition, slots }))
    }
}
