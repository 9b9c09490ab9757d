use fibers::sync::oneshot::MonitorError;
use std::io;
use std::sync::mpsc::RecvError;
use trackable::error::TrackableError;
use trackable::error::{ErrorKind as TrackableErrorKind, ErrorKindExt};

/// エラーの種類。
///
/// `Other`と`InvalidInput`以外は、いずれも単一のジョブやノードの結果を
/// 劣化させるのみで、サイクル全体を中断させることはない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// フラグメントが存在しない。
    NotFound,

    /// ノードに到達できない (過負荷・ダウン・タイムアウト)。
    Unreachable,

    /// 復元に必要な数のソースフラグメントが得られない。
    InsufficientSources,

    /// 並行する状態変化により書き込みが拒否された。
    ConflictOnCommit,

    /// 取得したフラグメントが整合性検査に失敗した。
    CorruptSource,

    /// 入力が不正。
    InvalidInput,

    /// その他のエラー。
    Other,
}
impl ErrorKind {
    /// Returns `true` if the outcome should be retried on the next cycle.
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorKind::Unreachable | ErrorKind::ConflictOnCommit | ErrorKind::InsufficientSources => {
                true
            }
            _ => false,
        }
    }
}
impl TrackableErrorKind for ErrorKind {}

/// クレート固有の`Error`型。
#[derive(Debug, Clone, TrackableError)]
pub struct Error(TrackableError<ErrorKind>);
impl From<io::Error> for Error {
    fn from(f: io::Error) -> Self {
        ErrorKind::Other.cause(f).into()
    }
}
impl From<RecvError> for Error {
    fn from(f: RecvError) -> Self {
        ErrorKind::Unreachable.cause(f).into()
    }
}
impl From<ecpool::Error> for Error {
    fn from(f: ecpool::Error) -> Self {
        let kind = match *f.kind() {
            ecpool::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        kind.takes_over(f).into()
    }
}
impl From<fibers_rpc::Error> for Error {
    fn from(f: fibers_rpc::Error) -> Self {
        let kind = match *f.kind() {
            fibers_rpc::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            fibers_rpc::ErrorKind::Unavailable | fibers_rpc::ErrorKind::Timeout => {
                ErrorKind::Unreachable
            }
            fibers_rpc::ErrorKind::Other => ErrorKind::Other,
        };
        kind.takes_over(f).into()
    }
}
impl From<frugalos_ring::Error> for Error {
    fn from(f: frugalos_ring::Error) -> Self {
        let kind = match *f.kind() {
            frugalos_ring::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            frugalos_ring::ErrorKind::Unresolvable | frugalos_ring::ErrorKind::Other => {
                ErrorKind::Other
            }
        };
        kind.takes_over(f).into()
    }
}
impl From<prometrics::Error> for Error {
    fn from(f: prometrics::Error) -> Self {
        ErrorKind::Other.takes_over(f).into()
    }
}
impl<E: Into<Error>> From<MonitorError<E>> for Error {
    fn from(f: MonitorError<E>) -> Self {
        match f {
            MonitorError::Aborted => ErrorKind::Other.cause("monitor aborted").into(),
            MonitorError::Failed(e) => e.into(),
        }
    }
}
