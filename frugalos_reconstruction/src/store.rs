//! The storage node API consumed by the reconstructor.
use frugalos_ring::{Node, PartitionId};

use crate::fragment::{Fragment, FragmentMeta, ObjectVersion};
use crate::util::BoxFuture;

/// Which fragments a read may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurabilityPreference {
    /// Only durable fragments are visible.
    DurableOnly,

    /// Non-durable (uncommitted) fragments are visible too.
    IncludeNonDurable,
}
impl Default for DurabilityPreference {
    fn default() -> Self {
        DurabilityPreference::DurableOnly
    }
}

/// A storage node API.
///
/// Implementations must report unreachable or overloaded nodes with
/// `ErrorKind::Unreachable`, absent fragments with `ErrorKind::NotFound`,
/// and writes rejected because of a concurrent state change with
/// `ErrorKind::ConflictOnCommit`.
pub trait FragmentStore: Send + Sync + 'static {
    /// Lists the fragments that `node` holds in `partition`.
    ///
    /// An empty or unknown partition yields an empty list.
    fn list_fragments(
        &self,
        node: &Node,
        partition: PartitionId,
        preference: DurabilityPreference,
    ) -> BoxFuture<Vec<FragmentMeta>>;

    /// Reads a fragment, payload included.
    fn get_fragment(
        &self,
        node: &Node,
        partition: PartitionId,
        object: &str,
        fragment_index: usize,
        preference: DurabilityPreference,
    ) -> BoxFuture<Fragment>;

    /// Writes a fragment.
    ///
    /// Writing a fragment identical to the stored one is a no-op, and a
    /// non-durable fragment of an older attempt is overwritten.
    fn put_fragment(
        &self,
        node: &Node,
        partition: PartitionId,
        fragment: Fragment,
        durable: bool,
    ) -> BoxFuture<()>;

    /// Marks the already stored fragment of `version` durable.
    ///
    /// No payload is transferred.
    fn commit_durable(
        &self,
        node: &Node,
        partition: PartitionId,
        object: &str,
        fragment_index: usize,
        version: &ObjectVersion,
    ) -> BoxFuture<()>;
}
