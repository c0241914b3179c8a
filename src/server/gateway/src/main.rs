// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Running this binary is the primary way of using the gateway. It parses
//! the command line options, loads the configuration, and launches the core
//! threads.

#[macro_use]
extern crate logger;

use backtrace::Backtrace;
use clap::{Arg, Command};
use config::GatewayConfig;
use fastcgi_gateway::Gateway;
use metriken::*;
use server::supported_backends;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{}", s);
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "A FastCGI application gateway. It speaks the FastCGI record \
            protocol to a front-end web server over TCP or a supervisor-passed \
            unix socket, or serves HTTP directly for development, and runs \
            the application handler over fully reassembled requests.",
        )
        .arg(
            Arg::new("stats")
                .short('s')
                .long("stats")
                .help("List all metrics in stats")
                .num_args(0)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("backends")
                .short('b')
                .long("backends")
                .help("List the supported transport backends")
                .num_args(0)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("CONFIG")
                .help("Server configuration file")
                .index(1),
        )
        .arg(
            Arg::new("print-config")
                .help("List all options in config")
                .long("config")
                .short('c')
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // output stats descriptions and exit if the `stats` option was provided
    if matches.get_flag("stats") {
        println!("{:<31} {:<15} DESCRIPTION", "NAME", "TYPE");

        let mut metrics = Vec::new();

        for metric in &metriken::metrics() {
            let any = match metric.as_any() {
                Some(any) => any,
                None => {
                    continue;
                }
            };

            if any.downcast_ref::<Counter>().is_some() {
                metrics.push(format!("{:<31} counter", metric.name()));
            } else if any.downcast_ref::<Gauge>().is_some() {
                metrics.push(format!("{:<31} gauge", metric.name()));
            } else {
                continue;
            }
        }

        metrics.sort();
        for metric in metrics {
            println!("{}", metric);
        }
        std::process::exit(0);
    }

    if matches.get_flag("backends") {
        for backend in supported_backends() {
            println!("{}", backend);
        }
        std::process::exit(0);
    }

    // load config from file
    let config = if let Some(file) = matches.get_one::<String>("CONFIG") {
        debug!("loading config: {}", file);
        match GatewayConfig::load(file) {
            Ok(c) => c,
            Err(error) => {
                eprintln!("error loading config file: {file}\n{error}");
                std::process::exit(1);
            }
        }
    } else {
        Default::default()
    };

    if matches.get_flag("print-config") {
        config.print();
        std::process::exit(0);
    }

    // launch the gateway
    match Gateway::new(config) {
        Ok(gateway) => gateway.wait(),
        Err(e) => {
            eprintln!("error launching gateway: {}", e);
            std::process::exit(1);
        }
    }
}
