//! Decode-on-read path that keeps working while fragments are being repaired.
use frugalos_ring::{PolicyId, RingResolver, StoragePolicy};
use futures::future;
use futures::{Async, Future, Poll};
use slog::Logger;
use std::sync::Arc;
use trackable::error::ErrorKindExt;

use crate::codec::ErasureCodec;
use crate::collect::CollectFragments;
use crate::config::ReconstructorConfig;
use crate::fragment::{etag_of, FragmentMeta};
use crate::inspector::{Inspection, Inspector};
use crate::metrics::ReconstructorMetrics;
use crate::planner::{select_winner, Winner};
use crate::store::{DurabilityPreference, FragmentStore};
use crate::util::{BoxFuture, Phase3};
use crate::{Error, ErrorKind};

/// The content of an object and its latest metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectContent {
    /// 最新のメタデータを持つフラグメントのメタデータ。
    pub meta: FragmentMeta,

    /// 復号された内容。
    pub content: Vec<u8>,
}

/// Reads objects by decoding their durable fragments.
#[derive(Clone)]
pub struct DegradedRead {
    logger: Logger,
    resolver: Arc<dyn RingResolver>,
    store: Arc<dyn FragmentStore>,
    codec: Arc<dyn ErasureCodec>,
    config: ReconstructorConfig,
    metrics: ReconstructorMetrics,
}
impl DegradedRead {
    /// Makes a new `DegradedRead` instance.
    pub fn new(
        logger: Logger,
        resolver: Arc<dyn RingResolver>,
        store: Arc<dyn FragmentStore>,
        codec: Arc<dyn ErasureCodec>,
        config: ReconstructorConfig,
        metrics: ReconstructorMetrics,
    ) -> Self {
        DegradedRead {
            logger,
            resolver,
            store,
            codec,
            config,
            metrics,
        }
    }

    /// Reads an object.
    ///
    /// Succeeds as long as the decode minimum of durable fragments of the
    /// newest version is reachable.
    pub fn read(&self, policy: PolicyId, object: &str) -> BoxFuture<ObjectContent> {
        let resolved = track!(self.resolver.policy(policy).map_err(Error::from)).and_then(|p| {
            let (partition, slots) =
                track!(self.resolver.nodes_for(policy, object).map_err(Error::from))?;
            Ok((p, partition, slots))
        });
        let (policy, partition, slots) = match resolved {
            Err(e) => return Box::new(future::err(e)),
            Ok(resolved) => resolved,
        };
        let inspector = Inspector::new(
            self.logger.clone(),
            self.store.clone(),
            self.config.inspect_timeout,
            self.metrics.clone(),
        );
        let inspect = inspector.inspect(partition, &slots, DurabilityPreference::DurableOnly);
        Box::new(DegradedGet {
            reader: self.clone(),
            policy,
            object: object.to_owned(),
            winner: None,
            phase: Phase3::A(inspect),
        })
    }
}

struct DegradedGet {
    reader: DegradedRead,
    policy: StoragePolicy,
    object: String,
    winner: Option<Winner>,
    phase: Phase3<BoxFuture<Inspection>, CollectFragments, BoxFuture<Vec<u8>>>,
}
impl Future for DegradedGet {
    type Item = ObjectContent;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        while let Async::Ready(phase) = track!(self.phase.poll())? {
            let next = match phase {
                Phase3::A(inspection) => {
                    let states = inspection.states_of(&self.object);
                    let winner = track_assert_some!(
                        select_winner(&states),
                        ErrorKind::NotFound,
                        "No durable fragment: object={}",
                        self.object
                    );
                    let sources = states
                        .into_iter()
                        .filter(|(_, s)| s.meta().map_or(false, |m| m.is_version(&winner.version)))
                        .map(|(slot, _)| slot)
                        .collect();
                    let reader = &self.reader;
                    let collect = track!(CollectFragments::new(
                        reader.logger.clone(),
                        reader.store.clone(),
                        reader.metrics.clone(),
                        inspection.partition,
                        &self.object,
                        winner.version.clone(),
                        sources,
                        self.policy.decode_minimum(),
                        DurabilityPreference::DurableOnly,
                        reader.config.fetch_timeout,
                    ))?;
                    self.winner = Some(winner);
                    Phase3::B(collect)
                }
                Phase3::B(fragments) => {
                    Phase3::C(self.reader.codec.decode(&self.policy, fragments))
                }
                Phase3::C(content) => {
                    let winner = track_assert_some!(self.winner.take(), ErrorKind::Other);
                    if etag_of(&content) != winner.version.etag {
                        let cause = format!("Etag mismatch: object={}", self.object);
                        return Err(track!(Error::from(ErrorKind::CorruptSource.cause(cause))));
                    }
                    return Ok(Async::Ready(ObjectContent {
                        meta: winner.template,
                        content,
                    }));
                }
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

    use crate::test_util::tests::TestSystem;

    #[test]
    fn read_survives_tolerable_losses() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"hello"))?;
        let slots = system.slots(&object);
        system.cluster.delete_fragment(&slots[0].node, &object);
        system.cluster.set_unreachable(&slots[3].node, true);

        let read = track!(system.read(&object))?;
        assert_eq!(read.content, b"hello");
        assert_eq!(read.meta.etag, object.version.etag);

        system.cluster.drop_durable(&slots[5].node, &object);
        let e = system.read(&object).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::InsufficientSources);
        Ok(())
    }

    #[test]
    fn missing_object_is_not_found() -> TestResult {
        let system = track!(TestSystem::new(4, 2))?;
        let object = track!(system.put_object("foo", b"hello"))?;
        for slot in system.slots(&object) {
            system.cluster.delete_fragment(&slot.node, &object);
        }
        let e = system.read(&object).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::NotFound);
        Ok(())
    }
}
