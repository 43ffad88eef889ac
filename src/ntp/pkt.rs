use nom::bits::{bits, complete::take};
use nom::error::Error;
use nom::number::complete::{be_i32, be_i8, be_u32, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use std::{error, fmt};
use super::timestamp::{NTPTimestamp, parse_timestamp};
use super::HEADER_LENGTH;

/// Leap indicator for a clock that is not synchronized.
const LEAP_UNSYNCHRONIZED: u8 = 3;

/// Reference identifier for an uncalibrated local clock.
const LOCAL_REFID: [u8; 4] = *b"LOCL";

// Both carry a binary point between bits 15 and 16.
type FixedInt32 = i32;
type FixedUInt32 = u32;

#[derive(Debug, Eq, PartialEq)]
/// Error type for packets that can't be decoded.
pub enum PacketError {
  /// Fewer bytes than a full header were received.
  Truncated(usize),
  /// The header couldn't be unpacked.
  Malformed,
}

impl fmt::Display for PacketError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      PacketError::Truncated(len) => {
        write!(f, "Packet too short ({} of {} bytes)", len, HEADER_LENGTH)
      }
      PacketError::Malformed => write!(f, "Malformed packet header"),
    }
  }
}

impl error::Error for PacketError {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// Network Time Protocol Packet header
pub struct NTPPacket {
  /// 2-bit field warning of leap seconds
  pub leap: u8,
  /// 3-bit integer describing current protocol version
  pub version: u8,
  /// 3-bit integer representing the mode
  pub mode: NTPMode,
  /// Indicates server stratum, or 0 for unspecified.
  pub stratum: u8,
  /// Max interval between successive messages, as exponent of 2, in seconds
  pub poll: u8,
  /// System clock precision, as exponent of 2, in seconds
  pub precision: i8,
  /// Total round-trip delay to primary reference source, in seconds.
  pub rootdelay: FixedInt32,
  /// Maximum error due to clock freq tolerance, in seconds.
  pub rootdisp: FixedUInt32,
  /// Reference ID identifying reference source.
  pub refid: [u8; 4],
  /// Last time system clock set or corrected
  pub reference_timestamp: NTPTimestamp,
  /// Time when request departed client for server
  pub org: NTPTimestamp,
  /// Time when request arrived at server or reply arrived at client
  pub rec: NTPTimestamp,
  /// Time when request departed client or reply departed server
  pub xmt: NTPTimestamp,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// NTP packet modes
pub enum NTPMode {
  Reserved = 0,
  SymmetricActive = 1,
  SymmetricPassive = 2,
  Client = 3,
  Server = 4,
  Broadcast = 5,
  NTPControl = 6,
  ReservedPrivate = 7,
}

impl From<u8> for NTPMode {
  /// Only the low three bits are significant.
  fn from(mode: u8) -> NTPMode {
    match mode & 0x7 {
      0 => NTPMode::Reserved,
      1 => NTPMode::SymmetricActive,
      2 => NTPMode::SymmetricPassive,
      3 => NTPMode::Client,
      4 => NTPMode::Server,
      5 => NTPMode::Broadcast,
      6 => NTPMode::NTPControl,
      _ => NTPMode::ReservedPrivate,
    }
  }
}

fn parse_livemo(input: &[u8]) -> IResult<&[u8], (u8, u8, u8)> {
  bits::<_, _, Error<(&[u8], usize)>, _, _>(tuple((
    take(2usize), // leap
    take(3usize), // version
    take(3usize), // mode
  )))(input)
}

fn parse(input: &[u8]) -> IResult<&[u8], NTPPacket> {
  let (input, (leap, version, mode)) = parse_livemo(input)?;
  let (input, stratum) = be_u8(input)?;
  let (input, poll) = be_u8(input)?;
  let (input, precision) = be_i8(input)?;
  let (input, rootdelay) = be_i32(input)?;
  let (input, rootdisp) = be_u32(input)?;
  let (input, refid) = be_u32(input)?;
  let (input, reference_timestamp) = parse_timestamp(input)?;
  let (input, org) = parse_timestamp(input)?;
  let (input, rec) = parse_timestamp(input)?;
  let (input, xmt) = parse_timestamp(input)?;

  Ok((input, NTPPacket {
    leap,
    version,
    mode: NTPMode::from(mode),
    stratum,
    poll,
    precision,
    rootdelay,
    rootdisp,
    refid: refid.to_be_bytes(),
    reference_timestamp,
    org,
    rec,
    xmt,
  }))
}

impl Default for NTPPacket {
  /// A bare client request, used in place of one that couldn't be decoded.
  fn default() -> NTPPacket {
    NTPPacket {
      leap: 0,
      version: super::VERSION,
      mode: NTPMode::Client,
      stratum: 0,
      poll: 0,
      precision: 0,
      rootdelay: 0,
      rootdisp: 0,
      refid: [0; 4],
      reference_timestamp: NTPTimestamp::default(),
      org: NTPTimestamp::default(),
      rec: NTPTimestamp::default(),
      xmt: NTPTimestamp::default(),
    }
  }
}

impl NTPPacket {
  /// Decode the fixed header at the start of `buf`. Anything after it
  /// (extension fields, a MAC) is ignored.
  pub fn decode(buf: &[u8]) -> Result<NTPPacket, PacketError> {
    if buf.len() < HEADER_LENGTH {
      return Err(PacketError::Truncated(buf.len()));
    }

    match parse(buf) {
      Ok((ext, pkt)) => {
        if !ext.is_empty() {
          trace!("Ignoring {} bytes after the header", ext.len());
        }
        Ok(pkt)
      }
      Err(_) => Err(PacketError::Malformed),
    }
  }

  /// Serialize into the fixed big-endian header layout.
  pub fn encode(&self) -> [u8; HEADER_LENGTH] {
    let mut buf = [0u8; HEADER_LENGTH];

    buf[0] = (self.leap & 0x3) << 6 | (self.version & 0x7) << 3 | self.mode as u8;
    buf[1] = self.stratum;
    buf[2] = self.poll;
    buf[3] = self.precision as u8;
    buf[4..8].copy_from_slice(&self.rootdelay.to_be_bytes());
    buf[8..12].copy_from_slice(&self.rootdisp.to_be_bytes());
    buf[12..16].copy_from_slice(&self.refid);
    buf[16..24].copy_from_slice(&self.reference_timestamp.to_bytes());
    buf[24..32].copy_from_slice(&self.org.to_bytes());
    buf[32..40].copy_from_slice(&self.rec.to_bytes());
    buf[40..48].copy_from_slice(&self.xmt.to_bytes());

    buf
  }

  /// Build the server reply to `request`, received at `rec` and sent at `xmt`.
  pub fn reply(request: &NTPPacket, rec: NTPTimestamp, xmt: NTPTimestamp) -> NTPPacket {
    NTPPacket {
      leap: LEAP_UNSYNCHRONIZED,
      version: request.version,
      mode: NTPMode::Server,
      stratum: 0,
      poll: request.poll,
      precision: 0,
      rootdelay: 0,
      rootdisp: 0,
      refid: LOCAL_REFID,
      reference_timestamp: xmt,
      org: request.xmt,
      rec,
      xmt,
    }
  }

  /// Log anything unusual about a request. Nothing is rejected; the reply
  /// is built regardless.
  pub fn inspect<T: fmt::Display>(&self, from: T) {
    if self.version != super::VERSION {
      debug!("Packet from {} has version {}, but our version is {}.", from, self.version, super::VERSION);
    }

    match self.mode {
      NTPMode::Client => {}
      mode => warn!("Packet from {} has unexpected mode {:?}", from, mode),
    }

    if self.stratum > super::MAXSTRAT {
      warn!("Packet from {} at stratum {}, which is greater than the maximum stratum of {}.", from, self.stratum, super::MAXSTRAT);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// An ntpdate-style v4 client request.
  fn client_request() -> [u8; HEADER_LENGTH] {
    let mut buf = [0u8; HEADER_LENGTH];
    buf[0] = 0x23; // leap 0, version 4, mode 3
    buf[2] = 6;
    buf[3] = 0xec; // -20
    buf[40..48].copy_from_slice(&[0xe8, 0x1c, 0x2b, 0x40, 0x12, 0x34, 0x56, 0x78]);
    buf
  }

  fn sample() -> NTPPacket {
    NTPPacket {
      leap: 2,
      version: 3,
      mode: NTPMode::Broadcast,
      stratum: 2,
      poll: 10,
      precision: -23,
      rootdelay: -0x1_8000,
      rootdisp: 0xdead_beef,
      refid: [192, 168, 1, 1],
      reference_timestamp: NTPTimestamp { seconds: 1, fraction: 2 },
      org: NTPTimestamp { seconds: 3, fraction: 4 },
      rec: NTPTimestamp { seconds: 5, fraction: 6 },
      xmt: NTPTimestamp { seconds: u32::MAX, fraction: u32::MAX },
    }
  }

  #[test]
  fn decode_client_request() {
    let pkt = NTPPacket::decode(&client_request()).unwrap();
    assert_eq!(pkt.leap, 0);
    assert_eq!(pkt.version, 4);
    assert_eq!(pkt.mode, NTPMode::Client);
    assert_eq!(pkt.poll, 6);
    assert_eq!(pkt.precision, -20);
    assert_eq!(pkt.xmt, NTPTimestamp { seconds: 0xe81c_2b40, fraction: 0x1234_5678 });
  }

  #[test]
  fn layout() {
    let buf = sample().encode();
    assert_eq!(buf[0], 0b10_011_101);
    assert_eq!(buf[1..4], [2, 10, 0xe9]);
    assert_eq!(buf[4..8], [0xff, 0xfe, 0x80, 0x00]);
    assert_eq!(buf[8..12], [0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(buf[12..16], [192, 168, 1, 1]);
    assert_eq!(buf[16..24], [0, 0, 0, 1, 0, 0, 0, 2]);
    assert_eq!(buf[40..48], [0xff; 8]);
  }

  #[test]
  fn decode_inverts_encode() {
    let pkt = sample();
    assert_eq!(NTPPacket::decode(&pkt.encode()), Ok(pkt));
  }

  #[test]
  fn encode_inverts_decode() {
    let mut buf = [0u8; HEADER_LENGTH];
    for (i, byte) in buf.iter_mut().enumerate() {
      *byte = (i as u8).wrapping_mul(37).wrapping_add(11);
    }
    assert_eq!(NTPPacket::decode(&buf).unwrap().encode(), buf);
  }

  #[test]
  fn every_mode_decodes() {
    for mode in 0..8u8 {
      let mut buf = [0u8; HEADER_LENGTH];
      buf[0] = 0xf8 | mode;
      let pkt = NTPPacket::decode(&buf).unwrap();
      assert_eq!(pkt.leap, 3);
      assert_eq!(pkt.version, 7);
      assert_eq!(pkt.mode as u8, mode);
    }
  }

  #[test]
  fn trailing_bytes_ignored() {
    let mut buf = client_request().to_vec();
    buf.extend_from_slice(&[0xaa; 20]);
    assert_eq!(NTPPacket::decode(&buf), NTPPacket::decode(&client_request()));
  }

  #[test]
  fn short_packet() {
    assert_eq!(NTPPacket::decode(&[0x23; 47]), Err(PacketError::Truncated(47)));
    assert_eq!(NTPPacket::decode(&[]), Err(PacketError::Truncated(0)));
  }

  #[test]
  fn reply_echoes_request() {
    let request = NTPPacket::decode(&client_request()).unwrap();
    let rec = NTPTimestamp { seconds: 100, fraction: 1 };
    let xmt = NTPTimestamp { seconds: 100, fraction: 2 };
    let reply = NTPPacket::reply(&request, rec, xmt);

    assert_eq!(reply.leap, 3);
    assert_eq!(reply.version, 4);
    assert_eq!(reply.mode, NTPMode::Server);
    assert_eq!(reply.stratum, 0);
    assert_eq!(reply.poll, 6);
    assert_eq!(reply.precision, 0);
    assert_eq!(reply.refid, *b"LOCL");
    assert_eq!(reply.reference_timestamp, xmt);
    assert_eq!(reply.org, request.xmt);
    assert_eq!(reply.rec, rec);
    assert_eq!(reply.xmt, xmt);
    assert_eq!(reply.encode()[0], 0xe4);
  }

  #[test]
  fn reply_to_default_request() {
    let reply = NTPPacket::reply(&NTPPacket::default(), NTPTimestamp::default(), NTPTimestamp::default());
    assert_eq!(reply.version, 4);
    assert_eq!(reply.poll, 0);
    assert_eq!(reply.org, NTPTimestamp::default());
  }
}
