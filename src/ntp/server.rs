use chrono::Utc;
use std::{cmp, error, fmt, io, net};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::time::{self, Duration};
use super::pkt::NTPPacket;
use super::timestamp::{time_to_ntp, NTPTimestamp};
use super::MAX_PACKET_LENGTH;
use crate::config;

/// How long the main loop waits for a datagram before checking in again.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long a worker waits for the socket to accept its reply.
const WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest artificial delay accepted, one NTP era.
const MAX_DELAY: i64 = 1 << 32;

#[derive(Debug)]
/// Reasons a reply wasn't sent.
pub enum ReplyError {
  /// The socket didn't become writable in time.
  WriteTimeout,
  Io(io::Error),
}

impl fmt::Display for ReplyError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ReplyError::WriteTimeout => write!(f, "Socket wasn't writable within {:?}", WRITE_TIMEOUT),
      ReplyError::Io(ref err) => write!(f, "Couldn't send reply: {}", err),
    }
  }
}

impl error::Error for ReplyError {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match *self {
      ReplyError::WriteTimeout => None,
      ReplyError::Io(ref err) => Some(err),
    }
  }
}

impl From<io::Error> for ReplyError {
  fn from(err: io::Error) -> ReplyError {
    ReplyError::Io(err)
  }
}

impl From<time::error::Elapsed> for ReplyError {
  fn from(_: time::error::Elapsed) -> ReplyError {
    ReplyError::WriteTimeout
  }
}

#[derive(Clone, Copy, Debug)]
/// The wall clock, shifted by a fixed number of seconds.
pub struct Clock {
  offset: chrono::Duration,
}

impl Clock {
  /// Returns `None` if the delay is more than an era in either direction.
  pub fn new(delay: i64) -> Option<Clock> {
    if !(-MAX_DELAY..=MAX_DELAY).contains(&delay) {
      return None;
    }
    Some(Clock { offset: chrono::Duration::seconds(delay) })
  }

  pub fn now(&self) -> NTPTimestamp {
    NTPTimestamp::from(time_to_ntp(Utc::now() + self.offset))
  }
}

/// A request waiting for its reply.
struct Exchange {
  request: Vec<u8>,
  rec: NTPTimestamp,
  from: SocketAddr,
}

/// Answers SNTP requests on a single socket.
pub struct Responder {
  socket: Arc<UdpSocket>,
  clock: Clock,
  /// One permit per reply allowed in flight.
  workers: Arc<Semaphore>,
}

impl Responder {
  /// Take over a bound socket. Must be called from within a tokio runtime.
  pub fn new(socket: net::UdpSocket, clock: Clock, server_cfg: &config::Server) -> io::Result<Responder> {
    socket.set_nonblocking(true)?;
    Ok(Responder {
      socket: Arc::new(UdpSocket::from_std(socket)?),
      clock,
      workers: Arc::new(Semaphore::new(server_cfg.workers)),
    })
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  /// Serve forever. Errors from individual receives are logged and skipped.
  pub async fn run(&self) {
    loop {
      if let Err(err) = self.inner_loop().await {
        error!("Couldn't receive: {}", err);
      }
    }
  }

  /// Wait one poll interval for a datagram and hand it to a worker.
  pub async fn inner_loop(&self) -> io::Result<()> {
    match time::timeout(POLL_INTERVAL, self.socket.readable()).await {
      Ok(ready) => ready?,
      Err(_) => return Ok(()),
    }

    let mut buf = [0u8; MAX_PACKET_LENGTH];
    let (bytes, from) = match self.socket.try_recv_from(&mut buf) {
      Ok(received) => received,
      Err(ref err) if is_idle(err) => return Ok(()),
      Err(err) => return Err(err),
    };
    // stamped here, so time spent waiting for a worker isn't hidden from the client
    let rec = self.clock.now();
    debug!("Connected: {}", from);

    // never wait for a worker; a busy server drops the request and the client retries
    let permit = match Arc::clone(&self.workers).try_acquire_owned() {
      Ok(permit) => permit,
      Err(err) => {
        warn!("Dropping request from {}: {}", from, err);
        return Ok(());
      }
    };

    let exchange = Exchange { request: buf[..bytes].to_vec(), rec, from };
    let socket = Arc::clone(&self.socket);
    let clock = self.clock;
    tokio::spawn(async move {
      respond(&socket, clock, exchange).await;
      drop(permit);
    });
    Ok(())
  }
}

fn is_idle(err: &io::Error) -> bool {
  matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted)
}

async fn respond(socket: &UdpSocket, clock: Clock, exchange: Exchange) {
  match reply(socket, clock, &exchange).await {
    Ok(xmt) => trace!("Replied to {} at {}", exchange.from, xmt),
    Err(ReplyError::WriteTimeout) => debug!("Gave up replying to {}: socket not writable", exchange.from),
    Err(err) => warn!("Reply to {} failed: {}", exchange.from, err),
  }
}

/// Send the reply for `exchange`, returning its transmit timestamp.
async fn reply(socket: &UdpSocket, clock: Clock, exchange: &Exchange) -> Result<NTPTimestamp, ReplyError> {
  time::timeout(WRITE_TIMEOUT, socket.writable()).await??;
  // never report leaving before arriving, even if the wall clock steps back
  let xmt = cmp::max(clock.now(), exchange.rec);

  let request = match NTPPacket::decode(&exchange.request) {
    Ok(pkt) => {
      pkt.inspect(exchange.from);
      pkt
    }
    Err(err) => {
      warn!("{} from {}, answering with defaults", err, exchange.from);
      NTPPacket::default()
    }
  };

  let response = NTPPacket::reply(&request, exchange.rec, xmt);
  socket.send_to(&response.encode(), exchange.from).await?;
  Ok(xmt)
}
