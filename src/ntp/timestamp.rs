use chrono::{DateTime, SecondsFormat, Utc};
use nom::number::complete::be_u32;
use nom::sequence::tuple;
use nom::IResult;
use std::fmt;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
pub const EPOCH_OFFSET: i64 = 2_208_988_800;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
/// 64-bit NTP timestamp: seconds since 1900 and a 2^-32 second fraction.
pub struct NTPTimestamp {
  pub seconds: u32,
  pub fraction: u32,
}

impl NTPTimestamp {
  /// Builds a timestamp from a Unix time split into whole seconds and
  /// nanoseconds, rounding the fraction to the nearest 2^-32 s.
  ///
  /// Seconds outside the current era wrap modulo 2^32.
  pub fn from_unix(secs: i64, nanos: u32) -> NTPTimestamp {
    let nanos = u64::from(nanos.min(NANOS_PER_SECOND as u32 - 1));
    let fraction = ((nanos << 32) + NANOS_PER_SECOND / 2) / NANOS_PER_SECOND;
    let seconds = secs.wrapping_add(EPOCH_OFFSET) as u32;

    NTPTimestamp::from((u64::from(seconds) << 32).wrapping_add(fraction))
  }

  /// Converts back to a UTC time, assuming the first NTP era.
  pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
    let nanos = (u64::from(self.fraction) * NANOS_PER_SECOND + (1 << 31)) >> 32;
    let (secs, nanos) = if nanos >= NANOS_PER_SECOND {
      (i64::from(self.seconds) + 1, 0)
    } else {
      (i64::from(self.seconds), nanos as u32)
    };

    DateTime::from_timestamp(secs - EPOCH_OFFSET, nanos)
  }

  pub fn to_bytes(&self) -> [u8; 8] {
    u64::from(*self).to_be_bytes()
  }
}

impl From<u64> for NTPTimestamp {
  fn from(raw: u64) -> NTPTimestamp {
    NTPTimestamp {
      seconds: (raw >> 32) as u32,
      fraction: raw as u32,
    }
  }
}

impl From<NTPTimestamp> for u64 {
  fn from(ts: NTPTimestamp) -> u64 {
    (u64::from(ts.seconds) << 32) | u64::from(ts.fraction)
  }
}

impl From<DateTime<Utc>> for NTPTimestamp {
  fn from(time: DateTime<Utc>) -> NTPTimestamp {
    NTPTimestamp::from_unix(time.timestamp(), time.timestamp_subsec_nanos())
  }
}

impl fmt::Display for NTPTimestamp {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self.to_datetime() {
      Some(time) => write!(f, "{}", time.to_rfc3339_opts(SecondsFormat::Nanos, true)),
      None => write!(f, "{:#018x}", u64::from(*self)),
    }
  }
}

/// Converts a wall-clock time to its 64-bit NTP fixed-point value.
pub fn time_to_ntp(time: DateTime<Utc>) -> u64 {
  NTPTimestamp::from(time).into()
}

pub fn parse_timestamp(input: &[u8]) -> IResult<&[u8], NTPTimestamp> {
  let (input, (seconds, fraction)) = tuple((be_u32, be_u32))(input)?;
  Ok((input, NTPTimestamp { seconds, fraction }))
}
