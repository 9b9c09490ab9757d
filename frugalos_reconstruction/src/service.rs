//! Continuous reconstruction.
use fibers::sync::{mpsc, oneshot};
use fibers::time::timer::{self, Timeout};
use futures::{Async, Future, Poll, Stream};
use slog::Logger;
use std::mem;
use trackable::error::ErrorKindExt;

use crate::scheduler::{CycleSummary, Reconstructor};
use crate::util::BoxFuture;
use crate::{Error, ErrorKind, Result};

type Reply = oneshot::Monitored<CycleSummary, Error>;

/// A service which runs a reconstruction cycle, sleeps for
/// `cycle_interval` and repeats.
///
/// Cycles can also be triggered manually through a `ReconstructorServiceHandle`.
pub struct ReconstructorService {
    logger: Logger,
    reconstructor: Reconstructor,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    timeout: Option<Timeout>,
    running: Option<BoxFuture<CycleSummary>>,
    waiters: Vec<Reply>,
    stopping: bool,
}
impl ReconstructorService {
    /// Makes a new `ReconstructorService` instance.
    ///
    /// The first cycle starts immediately.
    pub fn new(logger: Logger, reconstructor: Reconstructor) -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        ReconstructorService {
            logger,
            reconstructor,
            command_tx,
            command_rx,
            timeout: None,
            running: None,
            waiters: Vec::new(),
            stopping: false,
        }
    }

    /// Returns a handle of the service.
    pub fn handle(&self) -> ReconstructorServiceHandle {
        ReconstructorServiceHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::RunOnce(reply) => {
                self.waiters.push(reply);
                if self.running.is_none() {
                    self.start_cycle();
                }
            }
            Command::Stop => {
                info!(self.logger, "Stop requested");
                self.stopping = true;
            }
        }
    }

    fn start_cycle(&mut self) {
        self.timeout = None;
        self.running = Some(self.reconstructor.run_once());
    }

    fn finish_cycle(&mut self, result: Result<CycleSummary>) {
        let waiters = mem::replace(&mut self.waiters, Vec::new());
        for reply in waiters {
            reply.exit(result.clone());
        }
        self.timeout = Some(timer::timeout(self.reconstructor.config().cycle_interval));
    }
}
impl Future for ReconstructorService {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        while let Async::Ready(command) = self.command_rx.poll().unwrap_or(Async::Ready(None)) {
            match command {
                Some(command) => self.handle_command(command),
                None => break,
            }
        }

        loop {
            if self.stopping && self.running.is_none() {
                info!(self.logger, "Reconstructor service stopped");
                return Ok(Async::Ready(()));
            }
            if let Some(mut future) = self.running.take() {
                match track!(future.poll()) {
                    Ok(Async::NotReady) => {
                        self.running = Some(future);
                        return Ok(Async::NotReady);
                    }
                    Ok(Async::Ready(summary)) => self.finish_cycle(Ok(summary)),
                    Err(e) => {
                        error!(self.logger, "Reconstruction cycle aborted: {}", e);
                        self.finish_cycle(Err(e.clone()));
                        return Err(e);
                    }
                }
                continue;
            }
            match self.timeout.poll().map_err(Error::from) {
                Ok(Async::NotReady) => return Ok(Async::NotReady),
                Ok(Async::Ready(_)) | Err(_) => self.start_cycle(),
            }
        }
    }
}

/// A handle to operate a `ReconstructorService`.
#[derive(Clone)]
pub struct ReconstructorServiceHandle {
    command_tx: mpsc::Sender<Command>,
}
impl ReconstructorServiceHandle {
    /// Triggers a cycle and waits for its summary.
    ///
    /// If a cycle is already running, its summary is returned instead.
    pub fn run_once(&self) -> BoxFuture<CycleSummary> {
        let (reply, monitor) = oneshot::monitor();
        if self.command_tx.send(Command::RunOnce(reply)).is_err() {
            let e = ErrorKind::Other.cause("Reconstructor service is not running");
            return Box::new(futures::future::err(track!(Error::from(e))));
        }
        Box::new(monitor.map_err(|e| track!(Error::from(e))))
    }

    /// Stops the service after the running cycle, if any.
    pub fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop);
    }
}

enum Command {
    RunOnce(Reply),
    Stop,
}
