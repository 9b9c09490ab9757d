//! 再構築ワーカープロセスを起動したり操作するための機能を提供するモジュール。
use fibers::executor::ThreadPoolExecutorHandle;
use fibers::{Executor, Spawn, ThreadPoolExecutor};
use fibers_http_server::metrics::{MetricsHandler, WithMetrics};
use fibers_http_server::{Server as HttpServer, ServerBuilder as HttpServerBuilder};
use fibers_rpc;
use fibers_rpc::client::{
    ClientService as RpcService, ClientServiceBuilder as RpcServiceBuilder, ClientServiceHandle,
};
use fibers_rpc::server::ServerBuilder as RpcServerBuilder;
use frugalos_reconstruction::rpc::RpcFragmentStore;
use frugalos_reconstruction::{
    CycleSummary, Reconstructor, ReconstructorMetrics, ReconstructorService,
};
use frugalos_ring::RingResolver;
use futures::{Async, Future, Poll};
use prometrics;
use slog::{self, Drain, Logger};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::DaemonConfig;
use crate::control::{self, CycleDigest, ControlServer};
use crate::{Error, Result};

/// 再構築ワーカーを常駐させるためのデーモン。
pub struct ReconstructorDaemon {
    logger: Logger,
    executor: ThreadPoolExecutor,
    service: ReconstructorService,
    rpc_server_builder: RpcServerBuilder,
    http_server_builder: Option<HttpServerBuilder>,
    rpc_service: RpcService,
}
impl ReconstructorDaemon {
    /// Makes a new `ReconstructorDaemon` which repairs the partitions of `node_id`.
    pub fn new(logger: Logger, node_id: &str, config: &DaemonConfig) -> Result<Self> {
        let logger = Logger::root(
            slog::Duplicate::new(logger, track!(LogMetrics::new())?).fuse(),
            o!(),
        );

        let executor = track!(
            ThreadPoolExecutor::with_thread_count(config.executor_threads).map_err(Error::from)
        )?;
        let rpc_service = RpcServiceBuilder::new()
            .logger(logger.clone())
            .finish(executor.handle());

        let reconstructor = track!(build_reconstructor(
            &logger,
            node_id,
            config,
            rpc_service.handle()
        ))?;
        let service = ReconstructorService::new(logger.clone(), reconstructor);

        let mut rpc_server_builder = RpcServerBuilder::new(config.rpc_server_bind_addr);
        rpc_server_builder.logger(logger.clone());
        ControlServer::register(service.handle(), &mut rpc_server_builder);

        let http_server_builder = if let Some(addr) = config.http_server_bind_addr {
            let mut builder = HttpServerBuilder::new(addr);
            builder.logger(logger.clone());
            track!(builder.add_handler(WithMetrics::new(MetricsHandler)))?;
            Some(builder)
        } else {
            None
        };

        Ok(ReconstructorDaemon {
            logger,
            executor,
            service,
            rpc_server_builder,
            http_server_builder,
            rpc_service,
        })
    }

    /// 各種サーバを起動して、再構築サイクルを繰り返し実行する。
    ///
    /// この呼び出しは`StopRpc`を受け取るまでブロッキングするので注意。
    pub fn run(self) -> Result<()> {
        track!(register_prometheus_metrics())?;

        let mut executor = self.executor;
        let handle = executor.handle();
        info!(self.logger, "Starts reconstructor daemon");
        let runner = DaemonRunner {
            service: self.service,
            rpc_server: self.rpc_server_builder.finish(handle.clone()),
            http_server: self.http_server_builder.map(|b| b.finish(handle.clone())),
            rpc_service: self.rpc_service,
        };
        let monitor = handle.spawn_monitor(runner);
        let result = track!(executor.run_fiber(monitor).map_err(Error::from))?;
        track!(result.map_err(Error::from))?;
        info!(self.logger, "Reconstructor daemon stopped");
        Ok(())
    }
}

struct DaemonRunner {
    service: ReconstructorService,
    rpc_server: fibers_rpc::server::Server<ThreadPoolExecutorHandle>,
    http_server: Option<HttpServer>,
    rpc_service: RpcService,
}
impl Future for DaemonRunner {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        if let Some(ref mut http_server) = self.http_server {
            track!(http_server.poll())?;
        }
        track!(self.rpc_server.poll())?;
        track!(self.rpc_service.poll())?;
        if track!(self.service.poll())?.is_ready() {
            return Ok(Async::Ready(()));
        }
        Ok(Async::NotReady)
    }
}

fn build_reconstructor(
    logger: &Logger,
    node_id: &str,
    config: &DaemonConfig,
    rpc_service: ClientServiceHandle,
) -> Result<Reconstructor> {
    let rings = track!(config.load_rings())?;
    let codec = track!(config.build_codec())?;
    if rings.local_partitions(node_id).is_empty() {
        warn!(logger, "The node owns no partition: node={}", node_id);
    }

    let store = Arc::new(RpcFragmentStore::new(rpc_service));
    let metrics = track!(ReconstructorMetrics::new())?;
    let reconstructor = track!(Reconstructor::new(
        logger.clone(),
        node_id,
        Arc::new(rings),
        store,
        codec,
        config.reconstructor.clone(),
        metrics,
    ))?;
    Ok(reconstructor)
}

fn register_prometheus_metrics() -> Result<()> {
    prometrics::default_registry().register(prometrics::metrics::ProcessMetricsCollector::new());
    let version = track!(prometrics::metrics::GaugeBuilder::new("build")
        .namespace("frugalos")
        .subsystem("reconstructor")
        .label("version", env!("CARGO_PKG_VERSION"))
        .initial_value(1.0)
        .default_registry()
        .finish())?;
    mem::forget(version);
    Ok(())
}

struct LogMetrics {
    debugs: prometrics::metrics::Counter,
    infos: prometrics::metrics::Counter,
    warnings: prometrics::metrics::Counter,
    errors: prometrics::metrics::Counter,
    criticals: prometrics::metrics::Counter,
}
impl LogMetrics {
    fn new() -> Result<Self> {
        fn counter(level: &str) -> Result<prometrics::metrics::Counter> {
            let counter = track!(prometrics::metrics::CounterBuilder::new("records_total")
                .namespace("log")
                .label("level", level)
                .default_registry()
                .finish())?;
            Ok(counter)
        }
        Ok(LogMetrics {
            debugs: track!(counter("debug"))?,
            infos: track!(counter("info"))?,
            warnings: track!(counter("warning"))?,
            errors: track!(counter("error"))?,
            criticals: track!(counter("critical"))?,
        })
    }
}
impl Drain for LogMetrics {
    type Ok = ();
    type Err = ();
    fn log(
        &self,
        record: &slog::Record,
        _values: &slog::OwnedKVList,
    ) -> ::std::result::Result<Self::Ok, Self::Err> {
        use slog::Level;
        match record.level() {
            Level::Trace => {}
            Level::Debug => self.debugs.increment(),
            Level::Info => self.infos.increment(),
            Level::Warning => self.warnings.increment(),
            Level::Error => self.errors.increment(),
            Level::Critical => self.criticals.increment(),
        }
        Ok(())
    }
}

/// デーモンを起動せずに、最大`cycles`回の再構築サイクルをその場で実行する。
///
/// 全パーティションが収束した時点で終了する。
pub fn run_cycles(
    logger: &Logger,
    node_id: &str,
    config: &DaemonConfig,
    cycles: usize,
) -> Result<Vec<CycleSummary>> {
    let mut executor = track!(
        ThreadPoolExecutor::with_thread_count(config.executor_threads).map_err(Error::from)
    )?;
    let rpc_service = RpcServiceBuilder::new()
        .logger(logger.clone())
        .finish(executor.handle());
    let reconstructor = track!(build_reconstructor(
        logger,
        node_id,
        config,
        rpc_service.handle()
    ))?;
    spawn_rpc_service(&executor, logger, rpc_service);

    let fiber = executor.spawn_monitor(reconstructor.run_cycles(cycles));
    let result = track!(executor.run_fiber(fiber).map_err(Error::from))?;
    let summaries = track!(result.map_err(Error::from))?;
    Ok(summaries)
}

/// 指定されたアドレスで稼働しているデーモンに、再構築サイクルの即時実行を依頼する。
pub fn request_cycle(logger: &Logger, rpc_addr: SocketAddr) -> Result<CycleDigest> {
    info!(logger, "Requests a reconstruction cycle");
    let digest = track!(call_daemon(logger, |rpc_service| {
        control::run_cycle(rpc_service, rpc_addr)
    }))?;
    info!(logger, "The reconstruction cycle has finished: {:?}", digest);
    Ok(digest)
}

/// 指定されたアドレスで稼働しているデーモンを停止する。
pub fn stop(logger: &Logger, rpc_addr: SocketAddr) -> Result<()> {
    info!(logger, "Starts stopping the reconstructor daemon");
    track!(call_daemon(logger, |rpc_service| control::stop(
        rpc_service,
        rpc_addr
    )))?;
    info!(logger, "The reconstructor daemon will stop after the running cycle");
    Ok(())
}

fn call_daemon<F, G, T>(logger: &Logger, f: F) -> Result<T>
where
    F: FnOnce(&ClientServiceHandle) -> G,
    G: Future<Item = T, Error = Error> + Send + 'static,
    T: Send + 'static,
{
    let mut executor = track!(ThreadPoolExecutor::with_thread_count(1).map_err(Error::from))?;
    let rpc_service = RpcServiceBuilder::new()
        .logger(logger.clone())
        .finish(executor.handle());
    let future = f(&rpc_service.handle());
    spawn_rpc_service(&executor, logger, rpc_service);

    let fiber = executor.spawn_monitor(future);
    let result = track!(executor.run_fiber(fiber).map_err(Error::from))?;
    track!(result.map_err(Error::from))
}

fn spawn_rpc_service(executor: &ThreadPoolExecutor, logger: &Logger, rpc_service: RpcService) {
    let logger = logger.clone();
    executor.spawn(rpc_service.map_err(move |e| {
        error!(logger, "RPC client service failed: {}", e);
    }));
}
