//! SOCKS5 proxying: wire constants, the protocol engine, and the relay.

pub mod relay;
pub mod socks5;

/// Protocol version byte.
pub const VER: u8 = 0x05;
/// Username/password sub-negotiation version byte.
pub const AUTH_VER: u8 = 0x01;

/// Authentication methods.
pub const METHOD_NOAUTH: u8 = 0x00;
pub const METHOD_USRPASS: u8 = 0x02;
pub const METHOD_UNACCEPTABLE: u8 = 0xff;

/// Commands. Only CONNECT is implemented.
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP: u8 = 0x03;

/// Address types.
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Reply codes.
pub const REP_SUCCESS: u8 = 0x00;
pub const REP_FAILURE: u8 = 0x01;
pub const REP_HOSTUNREACH: u8 = 0x04;
pub const REP_REFUSED: u8 = 0x05;
pub const REP_TTLEXPIRED: u8 = 0x06;
pub const REP_CMDUNSUPPORTED: u8 = 0x07;
pub const REP_ATYPUNSUPPORTED: u8 = 0x08;

/// Generic error status for malformed frames (outside the reply-code space).
pub const STATUS_ERROR: u8 = 0xff;

/// Reply lengths per bound-address family.
pub const REPLY_LEN_IPV4: usize = 10;
pub const REPLY_LEN_IPV6: usize = 22;
