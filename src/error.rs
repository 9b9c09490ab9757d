use fibers::sync::oneshot::MonitorError;
use fibers_http_server;
use fibers_rpc;
use frugalos_reconstruction;
use frugalos_reconstruction::rpc::RemoteError;
use frugalos_ring;
use prometrics;
use serde_yaml;
use std;
use std::io;
use trackable::error::TrackableError;
use trackable::error::{ErrorKind as TrackableErrorKind, ErrorKindExt};

/// クレート固有の`Error`型。
#[derive(Debug, Clone, TrackableError)]
pub struct Error(TrackableError<ErrorKind>);
impl From<io::Error> for Error {
    fn from(f: io::Error) -> Self {
        ErrorKind::Other.cause(f).into()
    }
}
impl From<serde_yaml::Error> for Error {
    fn from(f: serde_yaml::Error) -> Self {
        ErrorKind::InvalidInput.cause(f).into()
    }
}
impl From<frugalos_reconstruction::Error> for Error {
    fn from(f: frugalos_reconstruction::Error) -> Self {
        let kind = match *f.kind() {
            frugalos_reconstruction::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            frugalos_reconstruction::ErrorKind::Unreachable => ErrorKind::Unavailable,
            _ => ErrorKind::Other,
        };
        kind.takes_over(f).into()
    }
}
impl From<frugalos_ring::Error> for Error {
    fn from(f: frugalos_ring::Error) -> Self {
        let kind = match *f.kind() {
            frugalos_ring::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        kind.takes_over(f).into()
    }
}
impl From<RemoteError> for Error {
    fn from(f: RemoteError) -> Self {
        Error::from(frugalos_reconstruction::Error::from(f))
    }
}
impl From<MonitorError<Error>> for Error {
    fn from(f: MonitorError<Error>) -> Self {
        f.unwrap_or_else(|| {
            ErrorKind::Other
                .cause("Monitor channel disconnected")
                .into()
        })
    }
}
impl From<MonitorError<frugalos_reconstruction::Error>> for Error {
    fn from(f: MonitorError<frugalos_reconstruction::Error>) -> Self {
        match f {
            MonitorError::Failed(e) => Error::from(e),
            MonitorError::Aborted => ErrorKind::Other
                .cause("Monitor channel disconnected")
                .into(),
        }
    }
}
impl From<std::sync::mpsc::RecvError> for Error {
    fn from(f: std::sync::mpsc::RecvError) -> Self {
        ErrorKind::Other.cause(f).into()
    }
}
impl From<fibers_http_server::Error> for Error {
    fn from(f: fibers_http_server::Error) -> Self {
        ErrorKind::Other.takes_over(f).into()
    }
}
impl From<prometrics::Error> for Error {
    fn from(f: prometrics::Error) -> Self {
        ErrorKind::Other.takes_over(f).into()
    }
}
impl From<fibers_rpc::Error> for Error {
    fn from(f: fibers_rpc::Error) -> Self {
        let kind = match *f.kind() {
            fibers_rpc::ErrorKind::Unavailable | fibers_rpc::ErrorKind::Timeout => {
                ErrorKind::Unavailable
            }
            _ => ErrorKind::Other,
        };
        kind.takes_over(f).into()
    }
}
impl From<std::net::AddrParseError> for Error {
    fn from(f: std::net::AddrParseError) -> Self {
        ErrorKind::InvalidInput.cause(f).into()
    }
}
impl From<std::num::ParseIntError> for Error {
    fn from(f: std::num::ParseIntError) -> Self {
        ErrorKind::InvalidInput.cause(f).into()
    }
}

/// エラーの種類。
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unavailable,
    Other,
}
impl TrackableErrorKind for ErrorKind {}
