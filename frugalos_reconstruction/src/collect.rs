use frugalos_ring::{FragmentSlot, PartitionId};
use futures::{Async, Future, Poll};
use slog::Logger;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use trackable::error::ErrorKindExt;

use crate::codec::IndexedFragment;
use crate::fragment::{verify_and_remove_checksum, ObjectVersion};
use crate::metrics::ReconstructorMetrics;
use crate::store::{DurabilityPreference, FragmentStore};
use crate::util::{with_timeout, BoxFuture};
use crate::{Error, ErrorKind, Result};

/// Fetches just enough source fragments to decode an object.
///
/// Sources are tried in order; a source that is absent, unreachable or
/// corrupted is replaced by the next spare one.
pub struct CollectFragments {
    logger: Logger,
    store: Arc<dyn FragmentStore>,
    metrics: ReconstructorMetrics,
    partition: PartitionId,
    version: ObjectVersion,
    object: String,
    preference: DurabilityPreference,
    timeout: Duration,
    futures: Vec<(usize, BoxFuture<Vec<u8>>)>,
    fragments: Vec<IndexedFragment>,
    required: usize,
    spares: Vec<FragmentSlot>,
}
impl CollectFragments {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        store: Arc<dyn FragmentStore>,
        metrics: ReconstructorMetrics,
        partition: PartitionId,
        object: &str,
        version: ObjectVersion,
        sources: Vec<FragmentSlot>,
        required: usize,
        preference: DurabilityPreference,
        timeout: Duration,
    ) -> Result<Self> {
        let mut spares = sources;
        spares.reverse();
        let mut this = CollectFragments {
            logger,
            store,
            metrics,
            partition,
            version,
            object: object.to_owned(),
            preference,
            timeout,
            futures: Vec::new(),
            fragments: Vec::new(),
            required,
            spares,
        };
        track!(this.fill_shortage_from_spare())?;
        Ok(this)
    }

    fn fill_shortage_from_spare(&mut self) -> Result<()> {
        while self.futures.len() + self.fragments.len() < self.required {
            let slot = track!(self.spares.pop().ok_or_else(|| {
                let cause = format!(
                    "There are no enough fragments (Detail: futures.len({}) + fragments.len({}) < required({}))",
                    self.futures.len(),
                    self.fragments.len(),
                    self.required
                );
                Error::from(ErrorKind::InsufficientSources.cause(cause))
            }))?;
            debug!(
                self.logger,
                "[CollectFragments({},{},{}/{})] candidate={}",
                self.spares.len(),
                self.futures.len(),
                self.fragments.len(),
                self.required,
                slot
            );

            let version = self.version.clone();
            let index = slot.index;
            let metrics = self.metrics.clone();
            let future = self
                .store
                .get_fragment(&slot.node, self.partition, &self.object, index, self.preference)
                .and_then(move |mut fragment| {
                    let meta = &fragment.meta;
                    if !meta.is_version(&version) || meta.fragment_index != index {
                        metrics.corrupt_sources_total.increment();
                        let cause = format!(
                            "Unexpected fragment: index={}, version={}",
                            meta.fragment_index,
                            meta.version()
                        );
                        return Err(track!(Error::from(ErrorKind::CorruptSource.cause(cause))));
                    }
                    if let Err(e) = track!(verify_and_remove_checksum(&mut fragment.payload)) {
                        metrics.corrupt_sources_total.increment();
                        return Err(e);
                    }
                    Ok(fragment.payload)
                });
            self.futures.push((index, with_timeout(future, self.timeout)));
        }
        Ok(())
    }
}
impl Future for CollectFragments {
    type Item = Vec<IndexedFragment>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let mut i = 0;
        while i < self.futures.len() {
            match track!(self.futures[i].1.poll()) {
                Err(e) => {
                    let _ = self.futures.swap_remove(i);
                    if *e.kind() == ErrorKind::CorruptSource {
                        warn!(self.logger, "[CollectFragments] Corrupted fragment: {}", e);
                    } else {
                        debug!(self.logger, "[CollectFragments] Error: {}", e);
                    }
                    track!(self.fill_shortage_from_spare(), "Last error: {}", e)?;
                }
                Ok(Async::NotReady) => {
                    i += 1;
                }
                Ok(Async::Ready(payload)) => {
                    let (index, _) = self.futures.swap_remove(i);
                    self.fragments.push((index, payload));
                }
            }
        }
        if self.fragments.len() >= self.required {
            return Ok(Async::Ready(mem::replace(&mut self.fragments, Vec::new())));
        }
        Ok(Async::NotReady)
    }
}
