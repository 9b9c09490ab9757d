//! The erasure coding seam.
//!
//! 符号化の計算そのものは`ecpool`のスレッドプールに委譲する。
use ecpool::replica::ReplicaCoder;
use ecpool::{BuildCoder, ErasureCoderPool};
use frugalos_ring::StoragePolicy;
use futures::{future, Future};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use trackable::error::ErrorKindExt;

use crate::util::BoxFuture;
use crate::{Error, ErrorKind, Result};

#[cfg(unix)]
use ecpool::liberasurecode::LibErasureCoderBuilder;

/// A fragment payload (checksum removed) with its index.
pub type IndexedFragment = (usize, Vec<u8>);

/// An erasure coding implementation.
///
/// The coding math is external; the reconstructor only relies on this contract.
pub trait ErasureCodec: Send + Sync + 'static {
    /// Fails if the codec can not serve `policy`.
    fn check(&self, policy: &StoragePolicy) -> Result<()>;

    /// Encodes `content` into `policy.fragments()` fragments ordered by index.
    fn encode(&self, policy: &StoragePolicy, content: Vec<u8>) -> BoxFuture<Vec<Vec<u8>>>;

    /// Decodes the original content from at least `policy.decode_minimum()`
    /// distinct fragments.
    fn decode(&self, policy: &StoragePolicy, fragments: Vec<IndexedFragment>) -> BoxFuture<Vec<u8>>;

    /// Rebuilds the fragment with index `target` from the given fragments.
    fn reconstruct(
        &self,
        policy: &StoragePolicy,
        target: usize,
        fragments: Vec<IndexedFragment>,
    ) -> BoxFuture<Vec<u8>>;
}

/// `ecpool`のコーダプールを用いた`ErasureCodec`の実装。
///
/// プールはデータ数とパリティ数の組ごとに遅延生成され、以後は共有される。
pub struct PooledCodec<B: BuildCoder> {
    name: &'static str,
    builder: fn(NonZeroUsize, NonZeroUsize) -> B,
    pools: Mutex<HashMap<(usize, usize), ErasureCoderPool<B>>>,
}
impl PooledCodec<ReplicaCoder> {
    /// 入力を複製するだけのコーダを使う`PooledCodec`を生成する。
    ///
    /// テストや検証用途向け。
    pub fn replica() -> Self {
        Self::new("replica", |data, parity| ReplicaCoder::new(data, parity))
    }
}
#[cfg(unix)]
impl PooledCodec<LibErasureCoderBuilder> {
    /// `liberasurecode`を使う`PooledCodec`を生成する。
    pub fn liberasurecode() -> Self {
        Self::new("liberasurecode", |data, parity| {
            LibErasureCoderBuilder::new(data, parity)
        })
    }
}
impl<B: BuildCoder> PooledCodec<B> {
    fn new(name: &'static str, builder: fn(NonZeroUsize, NonZeroUsize) -> B) -> Self {
        PooledCodec {
            name,
            builder,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the name of the underlying coder.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn pool(&self, policy: &StoragePolicy) -> Result<ErasureCoderPool<B>> {
        let key = (
            policy.data_fragments as usize,
            policy.parity_fragments as usize,
        );
        let data = track_assert_some!(
            NonZeroUsize::new(key.0),
            ErrorKind::InvalidInput,
            "policy={}",
            policy.name
        );
        let parity = track_assert_some!(
            NonZeroUsize::new(key.1),
            ErrorKind::InvalidInput,
            "policy={}",
            policy.name
        );

        let mut pools = track!(self
            .pools
            .lock()
            .map_err(|e| Error::from(ErrorKind::Other.cause(e.to_string()))))?;
        let pool = pools
            .entry(key)
            .or_insert_with(|| ErasureCoderPool::new((self.builder)(data, parity)));
        Ok(pool.clone())
    }

    fn sources(policy: &StoragePolicy, fragments: Vec<IndexedFragment>) -> Result<Vec<Vec<u8>>> {
        let distinct = fragments
            .into_iter()
            .filter(|(i, _)| *i < policy.fragments())
            .collect::<BTreeMap<_, _>>();
        track_assert!(
            distinct.len() >= policy.decode_minimum(),
            ErrorKind::InsufficientSources,
            "{} distinct fragments are given but {} are needed",
            distinct.len(),
            policy.decode_minimum()
        );
        Ok(distinct.into_iter().map(|(_, bytes)| bytes).collect())
    }
}
impl<B: BuildCoder> ErasureCodec for PooledCodec<B> {
    fn check(&self, policy: &StoragePolicy) -> Result<()> {
        track!(policy.validate().map_err(Error::from))?;
        track!(self.pool(policy))?;
        Ok(())
    }

    fn encode(&self, policy: &StoragePolicy, content: Vec<u8>) -> BoxFuture<Vec<Vec<u8>>> {
        match track!(self.pool(policy)) {
            Err(e) => Box::new(future::err(e)),
            Ok(pool) => Box::new(
                pool.encode(content)
                    .map_err(|e| track!(Error::from(e))),
            ),
        }
    }

    fn decode(&self, policy: &StoragePolicy, fragments: Vec<IndexedFragment>) -> BoxFuture<Vec<u8>> {
        let result = track!(self.pool(policy))
            .and_then(|pool| track!(Self::sources(policy, fragments)).map(|s| (pool, s)));
        match result {
            Err(e) => Box::new(future::err(e)),
            Ok((pool, sources)) => Box::new(
                pool.decode(sources)
                    .map_err(|e| track!(Error::from(e))),
            ),
        }
    }

    fn reconstruct(
        &self,
        policy: &StoragePolicy,
        target: usize,
        fragments: Vec<IndexedFragment>,
    ) -> BoxFuture<Vec<u8>> {
        if target >= policy.fragments() {
            let e = ErrorKind::InvalidInput.cause(format!("No such fragment index: {}", target));
            return Box::new(future::err(track!(Error::from(e))));
        }
        let result = track!(self.pool(policy))
            .and_then(|pool| track!(Self::sources(policy, fragments)).map(|s| (pool, s)));
        match result {
            Err(e) => Box::new(future::err(e)),
            Ok((pool, sources)) => Box::new(
                pool.reconstruct(target, sources)
                    .map_err(|e| track!(Error::from(e))),
            ),
        }
    }
}
impl<B: BuildCoder> fmt::Debug for PooledCodec<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PooledCodec {{ name: {:?} }}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frugalos_ring::PolicyId;
    use trackable::result::TestResult;

    fn policy() -> StoragePolicy {
        track_try_unwrap!(StoragePolicy::new(PolicyId(0), "ec4+2", 4, 2))
    }

    #[test]
    fn reconstruct_works() -> TestResult {
        let codec = PooledCodec::replica();
        let content = b"hello world".to_vec();
        let fragments = track!(fibers_global::execute(
            codec.encode(&policy(), content.clone())
        ))?;
        assert_eq!(fragments.len(), 6);

        let sources = fragments
            .iter()
            .cloned()
            .enumerate()
            .skip(2)
            .collect::<Vec<_>>();
        let rebuilt = track!(fibers_global::execute(
            codec.reconstruct(&policy(), 1, sources.clone())
        ))?;
        assert_eq!(rebuilt, fragments[1]);

        let decoded = track!(fibers_global::execute(codec.decode(&policy(), sources)))?;
        assert_eq!(decoded, content);
        Ok(())
    }

    #[test]
    fn decode_requires_distinct_fragments() -> TestResult {
        let codec = PooledCodec::replica();
        let fragments = track!(fibers_global::execute(
            codec.encode(&policy(), b"foo".to_vec())
        ))?;
        let sources = vec![
            (0, fragments[0].clone()),
            (0, fragments[0].clone()),
            (1, fragments[1].clone()),
            (2, fragments[2].clone()),
        ];
        let e = fibers_global::execute(codec.decode(&policy(), sources))
            .err()
            .unwrap();
        assert_eq!(*e.kind(), ErrorKind::InsufficientSources);
        Ok(())
    }

    #[test]
    fn pools_are_shared_per_shape() -> TestResult {
        let codec = PooledCodec::replica();
        let other = track_try_unwrap!(StoragePolicy::new(PolicyId(1), "ec2+1", 2, 1));
        track!(codec.check(&policy()))?;
        track!(codec.check(&policy()))?;
        track!(codec.check(&other))?;
        assert_eq!(codec.pools.lock().unwrap().len(), 2);

        let fragments = track!(fibers_global::execute(
            codec.encode(&other, b"bar".to_vec())
        ))?;
        assert_eq!(fragments.len(), 3);
        Ok(())
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        let codec = PooledCodec::replica();
        let e = fibers_global::execute(codec.reconstruct(&policy(), 6, Vec::new()))
            .err()
            .unwrap();
        assert_eq!(*e.kind(), ErrorKind::InvalidInput);
    }
}
