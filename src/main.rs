/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{info, warn};
use signal_hook::{consts::TERM_SIGNALS, iterator::Signals};

use flow_sniffer::{
    capture::{self, Libpcap},
    config::Config,
    store::RedisConnector,
    utils::logger,
    Sniffer, StopReason,
};

/// Counts bytes per IPv4 address pair into redis
#[derive(Parser)]
#[clap(name = "flow-sniffer")]
struct Opts {
    /// Capture interface, the first device libpcap reports by default
    #[clap(short, long)]
    interface: Option<String>,

    /// Exit after this many packets, 0 for unbounded
    #[clap(short = 'c', long = "count")]
    count: Option<u64>,

    /// Specify config file location
    #[clap(short = 'f', long)]
    config_file: Option<String>,

    /// Display the version
    #[clap(short, long, action = ArgAction::SetTrue)]
    version: bool,

    /// Capture filter expression
    expression: Vec<String>,
}

fn run(opts: Opts) -> Result<()> {
    let mut config = match opts.config_file.as_ref() {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("load config file {}", path))?,
        None => Config::default(),
    };
    let replaced_filter =
        config.merge_command_line(opts.interface, opts.count, &opts.expression);
    config.validate()?;

    let _logger_handle =
        logger::init(&config.log_level, &config.log_file).context("init logger")?;
    if let Some(filter) = replaced_filter {
        warn!("filter {:?} from config file replaced by command line", filter);
    }
    info!(
        "{} {} {} starting",
        env!("AGENT_NAME"),
        env!("REVISION"),
        env!("COMMIT_DATE")
    );

    let mut signals = Signals::new(TERM_SIGNALS).context("register signal handler")?;
    let signals_handle = signals.handle();

    let mut source = Libpcap::open(
        &config.interface,
        config.snap_len,
        config.promiscuous,
        config.capture_timeout,
    )?;
    source.set_filter(&config.filter)?;
    info!("capturing on {}", source.device());
    let connector = RedisConnector::new(&config.store)?;

    let mut sniffer = Sniffer::new(config, Arc::new(connector));
    sniffer.start(Box::new(source))?;

    let stop_handle = sniffer.stop_handle();
    let signal_thread = thread::Builder::new()
        .name("signal".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                stop_handle.notify(StopReason::Signal(signal));
            }
        })
        .context("spawn signal thread")?;

    let reason = sniffer.wait();
    info!("stopping on {:?}", reason);
    let result = sniffer.stop();
    signals_handle.close();
    let _ = signal_thread.join();
    Ok(result?)
}

fn main() {
    let opts = Opts::parse();
    if opts.version {
        println!("{} {}", env!("REVISION"), env!("COMMIT_DATE"));
        println!("{}", env!("AGENT_NAME"));
        println!("{}", capture::lib_version());
        return;
    }
    if let Err(e) = run(opts) {
        eprintln!("{}: {:#}", env!("AGENT_NAME"), e);
        process::exit(1);
    }
}
