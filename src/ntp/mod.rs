mod pkt;
mod server;
mod timestamp;

pub use self::server::{Clock, Responder};

/// NTP Port Number
pub const PORT: u16 = 123;

/// NTP Version Number
pub const VERSION: u8 = 4;

/// maximum stratum number
pub const MAXSTRAT: u8 = 16;

/// Length of the fixed packet header, without extension fields
pub const HEADER_LENGTH: usize = 48;

/// The maximum datagram length that will be read.
pub const MAX_PACKET_LENGTH: usize = 1024;
