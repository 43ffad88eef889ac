use clap::Parser;
use std::path::PathBuf;
use super::config::Config;

#[derive(Debug, Parser)]
#[command(author, version, about)]
/// Command line flags. Anything given here overrides the configuration file.
pub struct Args {
  /// Configuration file [default: config.toml, if present]
  #[arg(short, long)]
  pub config: Option<PathBuf>,
  /// Seconds added to every time reported to clients
  #[arg(short, long, allow_hyphen_values = true)]
  pub delay: Option<i64>,
  /// UDP port to listen on
  #[arg(short, long)]
  pub port: Option<u16>,
  /// Address to bind to
  #[arg(short, long)]
  pub bind: Option<String>,
}

impl Args {
  pub fn apply(&self, cfg: &mut Config) {
    if let Some(delay) = self.delay {
      cfg.clock.delay = delay;
    }
    if let Some(port) = self.port {
      cfg.network.port = port;
    }
    if let Some(ref bind) = self.bind {
      cfg.network.ip = bind.clone();
    }
  }
}
