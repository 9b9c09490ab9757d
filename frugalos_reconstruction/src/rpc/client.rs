use fibers_rpc::client::ClientServiceHandle;
use fibers_rpc::Call;
use frugalos_ring::{Node, PartitionId};
use futures::Future;

use super::{
    CommitDurableRequest, CommitDurableRpc, GetFragmentRequest, GetFragmentRpc,
    ListFragmentsRequest, ListFragmentsRpc, PutFragmentRequest, PutFragmentRpc, RemoteResult,
};
use crate::fragment::{Fragment, FragmentMeta, ObjectVersion};
use crate::store::{DurabilityPreference, FragmentStore};
use crate::util::BoxFuture;
use crate::Error;

/// A `FragmentStore` which talks to remote storage nodes over RPC.
#[derive(Clone)]
pub struct RpcFragmentStore {
    rpc_service: ClientServiceHandle,
}
impl RpcFragmentStore {
    /// Makes a new `RpcFragmentStore` instance.
    pub fn new(rpc_service: ClientServiceHandle) -> Self {
        RpcFragmentStore { rpc_service }
    }
}

fn into_box_future<F, T>(future: F) -> BoxFuture<T>
where
    F: Future<Item = RemoteResult<T>, Error = fibers_rpc::Error> + Send + 'static,
    T: Send + 'static,
{
    Box::new(
        future
            .map_err(|e| track!(Error::from(e)))
            .and_then(|result| result.map_err(|e| track!(Error::from(e)))),
    )
}

impl FragmentStore for RpcFragmentStore {
    fn list_fragments(
        &self,
        node: &Node,
        partition: PartitionId,
        preference: DurabilityPreference,
    ) -> BoxFuture<Vec<FragmentMeta>> {
        let request = ListFragmentsRequest {
            device: node.device.clone(),
            partition,
            preference,
        };
        into_box_future(ListFragmentsRpc::client(&self.rpc_service).call(node.addr, request))
    }

    fn get_fragment(
        &self,
        node: &Node,
        partition: PartitionId,
        object: &str,
        fragment_index: usize,
        preference: DurabilityPreference,
    ) -> BoxFuture<Fragment> {
        let request = GetFragmentRequest {
            device: node.device.clone(),
            partition,
            object: object.to_owned(),
            fragment_index,
            preference,
        };
        into_box_future(GetFragmentRpc::client(&self.rpc_service).call(node.addr, request))
    }

    fn put_fragment(
        &self,
        node: &Node,
        partition: PartitionId,
        fragment: Fragment,
        durable: bool,
    ) -> BoxFuture<()> {
        let request = PutFragmentRequest {
            device: node.device.clone(),
            partition,
            fragment,
            durable,
        };
        into_box_future(PutFragmentRpc::client(&self.rpc_service).call(node.addr, request))
    }

    fn commit_durable(
        &self,
        node: &Node,
        partition: PartitionId,
        object: &str,
        fragment_index: usize,
        version: &ObjectVersion,
    ) -> BoxFuture<()> {
        let request = CommitDurableRequest {
            device: node.device.clone(),
            partition,
            object: object.to_owned(),
            fragment_index,
            version: version.clone(),
        };
        into_box_future(CommitDurableRpc::client(&self.rpc_service).call(node.addr, request))
    }
}
