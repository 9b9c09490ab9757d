//! RPC transport of the storage node API.
use bytecodec::bincode_codec::{BincodeDecoder, BincodeEncoder};
use fibers_rpc::{Call, ProcedureId};
use frugalos_ring::PartitionId;
use std::fmt;
use trackable::error::ErrorKindExt;

use crate::fragment::{Fragment, FragmentMeta, ObjectVersion};
use crate::store::DurabilityPreference;
use crate::{Error, ErrorKind};

pub use self::client::RpcFragmentStore;
pub use self::server::FragmentStoreRpcServer;

mod client;
mod server;

/// The result type carried by every response.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// The kind of an error returned by a remote storage node.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    NotFound,
    Unavailable,
    Conflict,
    Corrupted,
    InvalidInput,
    Other,
}

/// An error returned by a remote storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// エラーの種類。
    pub kind: RemoteErrorKind,

    /// エラーの詳細。
    pub reason: String,
}
impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}
impl From<Error> for RemoteError {
    fn from(f: Error) -> Self {
        let kind = match *f.kind() {
            ErrorKind::NotFound => RemoteErrorKind::NotFound,
            ErrorKind::Unreachable => RemoteErrorKind::Unavailable,
            ErrorKind::ConflictOnCommit => RemoteErrorKind::Conflict,
            ErrorKind::CorruptSource => RemoteErrorKind::Corrupted,
            ErrorKind::InvalidInput => RemoteErrorKind::InvalidInput,
            ErrorKind::InsufficientSources | ErrorKind::Other => RemoteErrorKind::Other,
        };
        RemoteError {
            kind,
            reason: f.to_string(),
        }
    }
}
impl From<RemoteError> for Error {
    fn from(f: RemoteError) -> Self {
        let kind = match f.kind {
            RemoteErrorKind::NotFound => ErrorKind::NotFound,
            RemoteErrorKind::Unavailable => ErrorKind::Unreachable,
            RemoteErrorKind::Conflict => ErrorKind::ConflictOnCommit,
            RemoteErrorKind::Corrupted => ErrorKind::CorruptSource,
            RemoteErrorKind::InvalidInput => ErrorKind::InvalidInput,
            RemoteErrorKind::Other => ErrorKind::Other,
        };
        kind.cause(f.reason).into()
    }
}

/// `ListFragmentsRpc`の要求。
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFragmentsRequest {
    pub device: String,
    pub partition: PartitionId,
    pub preference: DurabilityPreference,
}

/// `GetFragmentRpc`の要求。
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFragmentRequest {
    pub device: String,
    pub partition: PartitionId,
    pub object: String,
    pub fragment_index: usize,
    pub preference: DurabilityPreference,
}

/// `PutFragmentRpc`の要求。
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutFragmentRequest {
    pub device: String,
    pub partition: PartitionId,
    pub fragment: Fragment,
    pub durable: bool,
}

/// `CommitDurableRpc`の要求。
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDurableRequest {
    pub device: String,
    pub partition: PartitionId,
    pub object: String,
    pub fragment_index: usize,
    pub version: ObjectVersion,
}

/// Lists the fragments of a partition.
#[derive(Debug)]
pub struct ListFragmentsRpc;
impl Call for ListFragmentsRpc {
    const ID: ProcedureId = ProcedureId(0x000B_0000);
    const NAME: &'static str = "frugalos.reconstruction.fragment.list";

    type Req = ListFragmentsRequest;
    type ReqEncoder = BincodeEncoder<Self::Req>;
    type ReqDecoder = BincodeDecoder<Self::Req>;

    type Res = RemoteResult<Vec<FragmentMeta>>;
    type ResEncoder = BincodeEncoder<Self::Res>;
    type ResDecoder = BincodeDecoder<Self::Res>;
}

/// Reads a fragment.
#[derive(Debug)]
pub struct GetFragmentRpc;
impl Call for GetFragmentRpc {
    const ID: ProcedureId = ProcedureId(0x000B_0001);
    const NAME: &'static str = "frugalos.reconstruction.fragment.get";

    type Req = GetFragmentRequest;
    type ReqEncoder = BincodeEncoder<Self::Req>;
    type ReqDecoder = BincodeDecoder<Self::Req>;

    type Res = RemoteResult<Fragment>;
    type ResEncoder = BincodeEncoder<Self::Res>;
    type ResDecoder = BincodeDecoder<Self::Res>;
}

/// Writes a fragment.
#[derive(Debug)]
pub struct PutFragmentRpc;
impl Call for PutFragmentRpc {
    const ID: ProcedureId = ProcedureId(0x000B_0002);
    const NAME: &'static str = "frugalos.reconstruction.fragment.put";

    type Req = PutFragmentRequest;
    type ReqEncoder = BincodeEncoder<Self::Req>;
    type ReqDecoder = BincodeDecoder<Self::Req>;

    type Res = RemoteResult<()>;
    type ResEncoder = BincodeEncoder<Self::Res>;
    type ResDecoder = BincodeDecoder<Self::Res>;
}

/// Marks a stored fragment durable.
#[derive(Debug)]
pub struct CommitDurableRpc;
impl Call for CommitDurableRpc {
    const ID: ProcedureId = ProcedureId(0x000B_0003);
    const NAME: &'static str = "frugalos.reconstruction.fragment.commit_durable";

    type Req = CommitDurableRequest;
    type ReqEncoder = BincodeEncoder<Self::Req>;
    type ReqDecoder = BincodeDecoder<Self::Req>;

    type Res = RemoteResult<()>;
    type ResEncoder = BincodeEncoder<Self::Res>;
    type ResDecoder = BincodeDecoder<Self::Res>;
}
