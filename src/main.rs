extern crate clap;
extern crate frugalos_reconstructor;
extern crate frugalos_ring;
extern crate hostname;
#[macro_use]
extern crate slog;
extern crate sloggers;
#[macro_use]
extern crate trackable;

use clap::{App, Arg, ArgMatches, SubCommand};
use frugalos_reconstructor::config::DaemonConfig;
use frugalos_reconstructor::daemon::{self, ReconstructorDaemon};
use frugalos_ring::partners_of;
use sloggers::Build;
use std::net::{SocketAddr, ToSocketAddrs};
use trackable::error::Failure;

fn main() {
    let matches = App::new("frugalos_reconstructor")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(
            SubCommand::with_name("run")
                .arg(config_arg())
                .arg(node_id_arg()),
        ).subcommand(
            SubCommand::with_name("once")
                .arg(config_arg())
                .arg(node_id_arg())
                .arg(
                    Arg::with_name("CYCLES")
                        .help("Sets the maximum number of cycles (the default is `reconstructor.max_cycles`)")
                        .long("cycles")
                        .takes_value(true),
                ),
        ).subcommand(SubCommand::with_name("trigger").arg(rpc_addr_arg()))
        .subcommand(SubCommand::with_name("stop").arg(rpc_addr_arg()))
        .subcommand(
            SubCommand::with_name("partners")
                .arg(
                    Arg::with_name("FRAGMENTS")
                        .long("fragments")
                        .takes_value(true)
                        .required(true),
                ).arg(
                    Arg::with_name("INDEX")
                        .long("index")
                        .takes_value(true)
                        .required(true),
                ),
        ).arg(
            Arg::with_name("LOGLEVEL")
                .short("l")
                .long("loglevel")
                .takes_value(true)
                .possible_values(&["debug", "info", "warning"])
                .default_value("info"),
        ).arg(
            Arg::with_name("LOGFILE")
                .long("logfile")
                .takes_value(true),
        ).arg(
            Arg::with_name("MAX_CONCURRENT_LOGS")
                .long("max_concurrent_logs")
                .takes_value(true)
                .default_value("4096"),
        ).get_matches();

    // Logger
    let loglevel = match matches.value_of("LOGLEVEL").unwrap() {
        "debug" => sloggers::types::Severity::Debug,
        "info" => sloggers::types::Severity::Info,
        "warning" => sloggers::types::Severity::Warning,
        _ => unreachable!(),
    };
    let max_concurrent_logs = track_try_unwrap!(
        matches
            .value_of("MAX_CONCURRENT_LOGS")
            .unwrap()
            .parse()
            .map_err(Failure::from_error)
    );
    let logger_builder = if let Some(filepath) = matches.value_of("LOGFILE") {
        let mut builder = sloggers::file::FileLoggerBuilder::new(filepath);
        builder.level(loglevel);
        builder.channel_size(max_concurrent_logs);
        sloggers::LoggerBuilder::File(builder)
    } else {
        let mut builder = sloggers::terminal::TerminalLoggerBuilder::new();
        builder.level(loglevel);
        builder.channel_size(max_concurrent_logs);
        sloggers::LoggerBuilder::Terminal(builder)
    };

    // SubCommands
    if let Some(matches) = matches.subcommand_matches("run") {
        // RUN DAEMON
        let config = track_try_unwrap!(DaemonConfig::load(matches.value_of("CONFIG").unwrap()));
        let node_id = get_node_id(matches, &config);

        let logger = track_try_unwrap!(logger_builder.build());
        let logger = logger.new(o!("node" => node_id.clone()));
        let daemon = track_try_unwrap!(ReconstructorDaemon::new(logger, &node_id, &config));
        track_try_unwrap!(daemon.run());

        // NOTE: ログ出力(非同期)用に少し待機
        std::thread::sleep(std::time::Duration::from_millis(100));
    } else if let Some(matches) = matches.subcommand_matches("once") {
        // RUN CYCLES IN FOREGROUND
        let config = track_try_unwrap!(DaemonConfig::load(matches.value_of("CONFIG").unwrap()));
        let node_id = get_node_id(matches, &config);
        let cycles = if let Some(cycles) = matches.value_of("CYCLES") {
            track_try_unwrap!(cycles.parse().map_err(Failure::from_error))
        } else {
            config.reconstructor.max_cycles
        };

        let logger = track_try_unwrap!(logger_builder.build());
        let logger = logger.new(o!("node" => node_id.clone()));
        let summaries = track_try_unwrap!(daemon::run_cycles(&logger, &node_id, &config, cycles));
        let converged = summaries.last().map_or(true, |s| s.is_converged());
        info!(
            logger,
            "Finished {} cycle(s): converged={}",
            summaries.len(),
            converged
        );

        std::thread::sleep(std::time::Duration::from_millis(100));
        if !converged {
            std::process::exit(2);
        }
    } else if let Some(matches) = matches.subcommand_matches("trigger") {
        // TRIGGER A CYCLE
        let logger = track_try_unwrap!(logger_builder.build());
        let rpc_addr = get_rpc_addr(matches);
        let logger = logger.new(o!("rpc_addr" => rpc_addr.to_string()));
        let digest = track_try_unwrap!(daemon::request_cycle(&logger, rpc_addr));
        println!("{:?}", digest);

        std::thread::sleep(std::time::Duration::from_millis(100));
    } else if let Some(matches) = matches.subcommand_matches("stop") {
        // STOP DAEMON
        let logger = track_try_unwrap!(logger_builder.build());
        let rpc_addr = get_rpc_addr(matches);
        let logger = logger.new(o!("rpc_addr" => rpc_addr.to_string()));
        track_try_unwrap!(daemon::stop(&logger, rpc_addr));

        std::thread::sleep(std::time::Duration::from_millis(100));
    } else if let Some(matches) = matches.subcommand_matches("partners") {
        // SHOW PARTNERS
        let fragments: usize = track_try_unwrap!(track_any_err!(matches
            .value_of("FRAGMENTS")
            .unwrap()
            .parse()));
        let index: usize =
            track_try_unwrap!(track_any_err!(matches.value_of("INDEX").unwrap().parse()));
        let slots = vec![(); fragments];
        let partners = partners_of(index, &slots)
            .into_iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>();
        println!("{}", partners.join(" "));
    } else {
        println!("Usage: {}", matches.usage());
        std::process::exit(1);
    }
}

fn config_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("CONFIG")
        .help("Sets the path of the YAML configuration file")
        .long("config")
        .takes_value(true)
        .required(true)
}

fn node_id_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("NODE_ID")
        .help(
            "Sets the identifier of this node \
             (the default is `node` in the configuration file or the hostname of this machine)",
        ).long("node")
        .takes_value(true)
}

fn rpc_addr_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("RPC_ADDR")
        .long("rpc-addr")
        .takes_value(true)
        .default_value("127.0.0.1:14300")
}

fn get_node_id(matches: &ArgMatches, config: &DaemonConfig) -> String {
    if let Some(node_id) = matches
        .value_of("NODE_ID")
        .map(|v| v.to_string())
        .or_else(|| config.node.clone())
        .or_else(hostname::get_hostname)
    {
        node_id
    } else {
        println!("[ERROR] Must set either the `node` argument or the `node` configuration");
        std::process::exit(1);
    }
}

fn get_rpc_addr(matches: &ArgMatches) -> SocketAddr {
    let mut rpc_addrs = track_try_unwrap!(track_any_err!(matches
        .value_of("RPC_ADDR")
        .unwrap()
        .to_socket_addrs()));
    rpc_addrs.nth(0).expect("No available TCP address")
}
