use fibers_rpc::server::{HandleCall, Reply, ServerBuilder};
use frugalos_ring::Node;
use futures::Future;
use std::collections::HashMap;
use std::sync::Arc;
use trackable::error::ErrorKindExt;

use super::{
    CommitDurableRequest, CommitDurableRpc, GetFragmentRequest, GetFragmentRpc,
    ListFragmentsRequest, ListFragmentsRpc, PutFragmentRequest, PutFragmentRpc, RemoteError,
};
use crate::store::FragmentStore;
use crate::{Error, ErrorKind, Result};

macro_rules! rpc_try {
    ($expr:expr) => {
        match $expr {
            Err(e) => return Reply::done(Err(RemoteError::from(track!(e)))),
            Ok(v) => v,
        }
    };
}

/// Serves the fragments of the local devices over RPC.
#[derive(Clone)]
pub struct FragmentStoreRpcServer {
    store: Arc<dyn FragmentStore>,
    nodes: Arc<HashMap<String, Node>>,
}
impl FragmentStoreRpcServer {
    /// Registers the RPC handlers which serve `nodes` backed by `store`.
    pub fn register<I>(store: Arc<dyn FragmentStore>, nodes: I, builder: &mut ServerBuilder)
    where
        I: IntoIterator<Item = Node>,
    {
        let nodes = nodes
            .into_iter()
            .map(|n| (n.device.clone(), n))
            .collect::<HashMap<_, _>>();
        let this = FragmentStoreRpcServer {
            store,
            nodes: Arc::new(nodes),
        };
        builder.add_call_handler::<ListFragmentsRpc, _>(this.clone());
        builder.add_call_handler::<GetFragmentRpc, _>(this.clone());
        builder.add_call_handler::<PutFragmentRpc, _>(this.clone());
        builder.add_call_handler::<CommitDurableRpc, _>(this);
    }

    fn node(&self, device: &str) -> Result<&Node> {
        self.nodes.get(device).ok_or_else(|| {
            let e: Error = ErrorKind::NotFound
                .cause(format!("Unknown device: {:?}", device))
                .into();
            e
        })
    }
}
impl HandleCall<ListFragmentsRpc> for FragmentStoreRpcServer {
    fn handle_call(&self, req: ListFragmentsRequest) -> Reply<ListFragmentsRpc> {
        let node = rpc_try!(self.node(&req.device));
        let future = self
            .store
            .list_fragments(node, req.partition, req.preference);
        Reply::future(future.map_err(RemoteError::from).then(Ok))
    }
}
impl HandleCall<GetFragmentRpc> for FragmentStoreRpcServer {
    fn handle_call(&self, req: GetFragmentRequest) -> Reply<GetFragmentRpc> {
        let node = rpc_try!(self.node(&req.device));
        let future = self.store.get_fragment(
            node,
            req.partition,
            &req.object,
            req.fragment_index,
            req.preference,
        );
        Reply::future(future.map_err(RemoteError::from).then(Ok))
    }
}
impl HandleCall<PutFragmentRpc> for FragmentStoreRpcServer {
    fn handle_call(&self, req: PutFragmentRequest) -> Reply<PutFragmentRpc> {
        let node = rpc_try!(self.node(&req.device));
        let future = self
            .store
            .put_fragment(node, req.partition, req.fragment, req.durable);
        Reply::future(future.map_err(RemoteError::from).then(Ok))
    }
}
impl HandleCall<CommitDurableRpc> for FragmentStoreRpcServer {
    fn handle_call(&self, req: CommitDurableRequest) -> Reply<CommitDurableRpc> {
        let node = rpc_try!(self.node(&req.device));
        let future = self.store.commit_durable(
            node,
            req.partition,
            &req.object,
            req.fragment_index,
            &req.version,
        );
        Reply::future(future.map_err(RemoteError::from).then(Ok))
    }
}
