#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

extern crate chrono;
extern crate clap;
extern crate daemonize;
extern crate fern;
extern crate libc;
extern crate nom;
extern crate tokio;
extern crate toml;

use clap::Parser;
use std::path::Path;
use std::str::FromStr;

#[macro_use]
mod macros;

mod cli;
mod config;
mod daesock;
mod ntp;

const DEFAULT_CONFIG: &str = "config.toml";

/// Initialize Logging Subsystem
fn logging(cfg: &config::Log) -> Result<(), fern::InitError> {
  let level = log::LevelFilter::from_str(&cfg.level).unwrap_or_else(|_| {
    println!("That isn't a valid loglevel. Valid loglevels:{}{}{}{}{}{}",
             "\n\tOFF",
             "\n\tERROR",
             "\n\tWARN",
             "\n\tINFO",
             "\n\tDEBUG",
             "\n\tTRACE");
    std::process::exit(1);
  });

  let mut dispatch = fern::Dispatch::new()
    .format(|out, msg, record| {
      out.finish(format_args!("{} [{}] {}", record.level(), chrono::Local::now().to_rfc3339(), msg))
    })
    .level(level)
    .chain(std::io::stderr());

  // If specified, log to a file
  if let Some(ref filename) = cfg.file {
    dispatch = dispatch.chain(fern::log_file(filename)?);
  }

  dispatch.apply()?;
  Ok(())
}

/// Read the named configuration file, or the default one if it exists.
fn load_config(args: &cli::Args) -> Result<config::Config, config::ConfigError> {
  match args.config {
    Some(ref path) => config::Config::read(path),
    None if Path::new(DEFAULT_CONFIG).exists() => config::Config::read(DEFAULT_CONFIG),
    None => Ok(config::Config::default()),
  }
}

fn main() {
  let args = cli::Args::parse();

  // Apply configuration
  let mut cfg = load_config(&args).unwrap_or_else(|err| {
    println!("{}", err);
    std::process::exit(1);
  });
  args.apply(&mut cfg);

  // Init logging
  logging(&cfg.log).unwrap_or_else(|err| {
    println!("Couldn't initialize logging: {}", err);
    std::process::exit(1);
  });

  let delay = cfg.clock.delay;
  let clock = ntp::Clock::new(delay).unwrap_or_else(|| fatal!("A delay of {} seconds is out of range", delay));
  if delay != 0 {
    info!("Reporting times offset by {} seconds.", delay);
  }

  // daemonize if supported and enabled
  // we get the lock on udp port 123 here, while we're still root
  let socket = if let Some(daemon) = cfg.daemon {
    debug!("Daemonizing");
    daesock::daemonize(daemon, cfg.network).unwrap_or_else(|err| fatal!("{}", err))
  } else {
    if cfg!(unix) && unsafe { libc::geteuid() } == 0 {
      warn!("Running as root without daemonization. This is a bad idea!");
      warn!("Enable daemonization in the configuration by adding a [daemon] section.");
    }
    daesock::get_socket(&cfg.network).unwrap_or_else(|err| fatal!("Couldn't bind to port: {}", err))
  };

  // the runtime's threads must not exist before daemonize forks
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .unwrap_or_else(|err| fatal!("Couldn't start runtime: {}", err));

  let server_cfg = cfg.server;
  runtime.block_on(async move {
    let responder = ntp::Responder::new(socket, clock, &server_cfg)
      .unwrap_or_else(|err| fatal!("Couldn't register socket: {}", err));
    trace!("Bound to {}",
           responder.local_addr().unwrap_or_else(|err| fatal!("{}", err)));
    info!("Now listening for clients...");
    responder.run().await
  })
}
