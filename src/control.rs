//! 稼働中のデーモンを操作するための RPC。
use bytecodec::bincode_codec::{BincodeDecoder, BincodeEncoder};
use fibers_rpc::client::ClientServiceHandle;
use fibers_rpc::server::{HandleCall, Reply, ServerBuilder as RpcServerBuilder};
use fibers_rpc::{Call, ProcedureId};
use frugalos_reconstruction::rpc::{RemoteError, RemoteResult};
use frugalos_reconstruction::{CycleSummary, JobOutcome, PartitionState, ReconstructorServiceHandle};
use futures::Future;
use std::net::SocketAddr;

use crate::Error;

/// The digest of a reconstruction cycle.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDigest {
    pub cycle: usize,
    pub partitions: usize,
    pub converged: usize,
    pub partially_repaired: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub jobs_done: usize,
    pub jobs_deferred: usize,
    pub jobs_failed: usize,
    pub elapsed_millis: u64,
}
impl<'a> From<&'a CycleSummary> for CycleDigest {
    fn from(f: &'a CycleSummary) -> Self {
        let elapsed = f.elapsed;
        CycleDigest {
            cycle: f.cycle,
            partitions: f.partitions.len(),
            converged: f.count(PartitionState::Converged),
            partially_repaired: f.count(PartitionState::PartiallyRepaired),
            deferred: f.count(PartitionState::Deferred),
            skipped: f.partitions.iter().filter(|p| p.skipped).count(),
            jobs_done: f.count_jobs(JobOutcome::Done),
            jobs_deferred: f.count_jobs(JobOutcome::Deferred),
            jobs_failed: f.count_jobs(JobOutcome::Failed),
            elapsed_millis: elapsed.as_secs() * 1000 + u64::from(elapsed.subsec_millis()),
        }
    }
}

/// Runs a reconstruction cycle right now.
#[derive(Debug)]
pub struct RunCycleRpc;
impl Call for RunCycleRpc {
    const ID: ProcedureId = ProcedureId(0x000B_1000);
    const NAME: &'static str = "frugalos.reconstructor.run_cycle";

    type Req = ();
    type ReqEncoder = BincodeEncoder<Self::Req>;
    type ReqDecoder = BincodeDecoder<Self::Req>;

    type Res = RemoteResult<CycleDigest>;
    type ResEncoder = BincodeEncoder<Self::Res>;
    type ResDecoder = BincodeDecoder<Self::Res>;
}

/// Stops the daemon after the running cycle.
#[derive(Debug)]
pub struct StopRpc;
impl Call for StopRpc {
    const ID: ProcedureId = ProcedureId(0x000B_1001);
    const NAME: &'static str = "frugalos.reconstructor.stop";

    type Req = ();
    type ReqEncoder = BincodeEncoder<Self::Req>;
    type ReqDecoder = BincodeDecoder<Self::Req>;

    type Res = RemoteResult<()>;
    type ResEncoder = BincodeEncoder<Self::Res>;
    type ResDecoder = BincodeDecoder<Self::Res>;
}

#[derive(Clone)]
pub(crate) struct ControlServer {
    service: ReconstructorServiceHandle,
}
impl ControlServer {
    pub fn register(service: ReconstructorServiceHandle, builder: &mut RpcServerBuilder) {
        let this = ControlServer { service };
        builder.add_call_handler::<RunCycleRpc, _>(this.clone());
        builder.add_call_handler::<StopRpc, _>(this);
    }
}
impl HandleCall<RunCycleRpc> for ControlServer {
    fn handle_call(&self, _: ()) -> Reply<RunCycleRpc> {
        let future = self.service.run_once();
        Reply::future(
            future
                .map(|summary| CycleDigest::from(&summary))
                .map_err(RemoteError::from)
                .then(Ok),
        )
    }
}
impl HandleCall<StopRpc> for ControlServer {
    fn handle_call(&self, _: ()) -> Reply<StopRpc> {
        self.service.stop();
        Reply::done(Ok(()))
    }
}

/// Asks the daemon at `rpc_addr` to run a cycle.
pub fn run_cycle(
    rpc_service: &ClientServiceHandle,
    rpc_addr: SocketAddr,
) -> impl Future<Item = CycleDigest, Error = Error> {
    RunCycleRpc::client(rpc_service)
        .call(rpc_addr, ())
        .map_err(|e| track!(Error::from(e)))
        .and_then(|result| result.map_err(|e| track!(Error::from(e))))
}

/// Asks the daemon at `rpc_addr` to stop.
pub fn stop(
    rpc_service: &ClientServiceHandle,
    rpc_addr: SocketAddr,
) -> impl Future<Item = (), Error = Error> {
    StopRpc::client(rpc_service)
        .call(rpc_addr, ())
        .map_err(|e| track!(Error::from(e)))
        .and_then(|result| result.map_err(|e| track!(Error::from(e))))
}
