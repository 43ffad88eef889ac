use std::{error, fmt, io};
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

#[derive(Debug)]
/// Combined error type for configuration errors.
pub enum ConfigError {
  Io(io::Error),
  Parse(toml::de::Error),
  /// A value that parsed but can't be used.
  Invalid(&'static str),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ConfigError::Io(ref err) => write!(f, "Couldn't read config: {}", err),
      ConfigError::Parse(ref err) => write!(f, "Couldn't parse config: {}", err),
      ConfigError::Invalid(reason) => write!(f, "Invalid config: {}", reason),
    }
  }
}

impl error::Error for ConfigError {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match *self {
      ConfigError::Io(ref err) => Some(err),
      ConfigError::Parse(ref err) => Some(err),
      ConfigError::Invalid(_) => None,
    }
  }
}

impl From<io::Error> for ConfigError {
  fn from(err: io::Error) -> ConfigError {
    ConfigError::Io(err)
  }
}

impl From<toml::de::Error> for ConfigError {
  fn from(err: toml::de::Error) -> ConfigError {
    ConfigError::Parse(err)
  }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// Configuration relating to the network.
pub struct Network {
  /// Address to bind to.
  pub ip: String,
  pub port: u16,
}

impl Default for Network {
  fn default() -> Network {
    Network {
      ip: "localhost".to_owned(),
      port: super::ntp::PORT,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// Configuration relating to the reported time.
pub struct Clock {
  /// Seconds added to every timestamp sent to clients. May be negative.
  pub delay: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// Configuration relating to request handling.
pub struct Server {
  /// Replies that may be in flight at once. Requests beyond this are dropped.
  pub workers: usize,
}

impl Default for Server {
  fn default() -> Server {
    Server { workers: 20 }
  }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// Configuration relating to the logging subsystem,
pub struct Log {
  pub level: String,
  pub file: Option<String>,
}

impl Default for Log {
  fn default() -> Log {
    Log { level: "info".to_owned(), file: None }
  }
}

#[derive(Debug, Default, Deserialize)]
/// Configuration relating to daemonization.
pub struct Daemon {
  pub pid_file: Option<String>,
  pub working_directory: Option<String>,
  pub user: Option<String>,
  pub user_id: Option<u32>,
  pub group: Option<String>,
  pub group_id: Option<u32>,
  pub umask: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// General configuration superstructure.
pub struct Config {
  /// Configuration relating to the network.
  pub network: Network,
  /// Configuration relating to the reported time.
  pub clock: Clock,
  /// Configuration relating to request handling.
  pub server: Server,
  /// Configuration relating to the logging subsystem,
  pub log: Log,
  /// Configuration relating to daemonization.
  pub daemon: Option<Daemon>,
}

impl Config {
  /// Read configuration from a file.
  pub fn read<P: AsRef<Path>>(filename: P) -> Result<Config, ConfigError> {
    let mut config_text = String::new();
    File::open(filename)?.read_to_string(&mut config_text)?;
    Config::parse(&config_text)
  }

  pub fn parse(config_text: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(config_text)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.server.workers == 0 {
      return Err(ConfigError::Invalid("server.workers must be at least 1"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_uses_defaults() {
    let cfg = Config::parse("").unwrap();
    assert_eq!(cfg.network.ip, "localhost");
    assert_eq!(cfg.network.port, 123);
    assert_eq!(cfg.clock.delay, 0);
    assert_eq!(cfg.server.workers, 20);
    assert_eq!(cfg.log.level, "info");
    assert!(cfg.daemon.is_none());
  }

  #[test]
  fn full_file() {
    let cfg = Config::parse(r#"
      [network]
      ip = "0.0.0.0"
      port = 1123

      [clock]
      delay = -30

      [server]
      workers = 4

      [log]
      level = "debug"
      file = "sntpd.log"

      [daemon]
      pid_file = "/run/sntpd.pid"
      user = "ntp"
      umask = 0o027
    "#).unwrap();

    assert_eq!(cfg.network.ip, "0.0.0.0");
    assert_eq!(cfg.network.port, 1123);
    assert_eq!(cfg.clock.delay, -30);
    assert_eq!(cfg.server.workers, 4);
    assert_eq!(cfg.log.file.as_deref(), Some("sntpd.log"));
    let daemon = cfg.daemon.unwrap();
    assert_eq!(daemon.user.as_deref(), Some("ntp"));
    assert_eq!(daemon.umask, Some(0o027));
    assert!(daemon.group.is_none());
  }

  #[test]
  fn bad_port_is_a_parse_error() {
    match Config::parse("[network]\nport = 70000\n") {
      Err(ConfigError::Parse(_)) => {}
      other => panic!("expected a parse error, got {:?}", other),
    }
  }

  #[test]
  fn zero_workers_rejected() {
    match Config::parse("[server]\nworkers = 0\n") {
      Err(ConfigError::Invalid(_)) => {}
      other => panic!("expected an invalid config error, got {:?}", other),
    }
  }

  #[test]
  fn missing_file_is_an_io_error() {
    match Config::read("/nonexistent/sntpd.toml") {
      Err(ConfigError::Io(_)) => {}
      other => panic!("expected an io error, got {:?}", other),
    }
  }
}
