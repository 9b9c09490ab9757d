use fibers::time::timer::{self, Timeout};
use futures::{Async, Future, Poll};
use std::time::Duration;
use trackable::error::ErrorKindExt;

use crate::{Error, ErrorKind};

#[derive(Debug)]
pub(crate) enum Phase<A, B> {
    A(A),
    B(B),
}
impl<A, B> Future for Phase<A, B>
where
    A: Future<Error = Error>,
    B: Future<Error = Error>,
{
    type Item = Phase<A::Item, B::Item>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self {
            Phase::A(f) => track!(f.poll()).map(|t| t.map(Phase::A)),
            Phase::B(f) => track!(f.poll()).map(|t| t.map(Phase::B)),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Phase3<A, B, C> {
    A(A),
    B(B),
    C(C),
}
impl<A, B, C> Future for Phase3<A, B, C>
where
    A: Future<Error = Error>,
    B: Future<Error = Error>,
    C: Future<Error = Error>,
{
    type Item = Phase3<A::Item, B::Item, C::Item>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self {
            Phase3::A(f) => track!(f.poll()).map(|t| t.map(Phase3::A)),
            Phase3::B(f) => track!(f.poll()).map(|t| t.map(Phase3::B)),
            Phase3::C(f) => track!(f.poll()).map(|t| t.map(Phase3::C)),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Phase4<A, B, C, D> {
    A(A),
    B(B),
    C(C),
    D(D),
}
impl<A, B, C, D> Future for Phase4<A, B, C, D>
where
    A: Future<Error = Error>,
    B: Future<Error = Error>,
    C: Future<Error = Error>,
    D: Future<Error = Error>,
{
    type Item = Phase4<A::Item, B::Item, C::Item, D::Item>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self {
            Phase4::A(f) => track!(f.poll()).map(|t| t.map(Phase4::A)),
            Phase4::B(f) => track!(f.poll()).map(|t| t.map(Phase4::B)),
            Phase4::C(f) => track!(f.poll()).map(|t| t.map(Phase4::C)),
            Phase4::D(f) => track!(f.poll()).map(|t| t.map(Phase4::D)),
        }
    }
}

/// このクレートで使われる`Future`のボックス化された型。
pub type BoxFuture<T> = Box<dyn Future<Item = T, Error = Error> + Send + 'static>;

/// Bounds a remote call; expiry is reported as `ErrorKind::Unreachable`.
#[derive(Debug)]
pub(crate) struct WithTimeout<F> {
    future: F,
    timeout: Timeout,
    duration: Duration,
}
impl<F: Future<Error = Error>> WithTimeout<F> {
    pub(crate) fn new(future: F, duration: Duration) -> Self {
        WithTimeout {
            future,
            timeout: timer::timeout(duration),
            duration,
        }
    }
}
impl<F: Future<Error = Error>> Future for WithTimeout<F> {
    type Item = F::Item;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        if let Async::Ready(item) = track!(self.future.poll())? {
            return Ok(Async::Ready(item));
        }
        if let Async::Ready(()) = track!(self.timeout.poll().map_err(Error::from))? {
            let e = ErrorKind::Unreachable.cause(format!("Timeout: {:?}", self.duration));
            return Err(track!(Error::from(e)));
        }
        Ok(Async::NotReady)
    }
}

pub(crate) fn with_timeout<F>(future: F, duration: Duration) -> BoxFuture<F::Item>
where
    F: Future<Error = Error> + Send + 'static,
{
    Box::new(WithTimeout::new(future, duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use trackable::result::TestResult;

    #[test]
    fn with_timeout_works() -> TestResult {
        let f = with_timeout(future::ok::<_, Error>(3), Duration::from_secs(1));
        assert_eq!(track!(fibers_global::execute(f))?, 3);

        let f = with_timeout(future::empty::<(), Error>(), Duration::from_millis(10));
        let e = fibers_global::execute(f).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::Unreachable);
        Ok(())
    }
}
