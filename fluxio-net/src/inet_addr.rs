//! IPv4 `"a.b.c.d:port"` address type.
//!
//! Based on `zest/net/inet_addr.h`/`.cc`'s `InetAddress`, scoped down to IPv4 only —
//! formatting for other address families isn't needed here, and the acceptor and
//! connection both just need a concrete address type to hand back.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::NetError;

/// An IPv4 socket address, parsed from or rendered as `"a.b.c.d:port"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InetAddr(SocketAddrV4);

impl InetAddr {
    #[must_use]
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    /// Parses `"a.b.c.d:port"`, splitting on the first `:`. Fails (non-fatally, per
    /// spec.md §6) on anything else — multiple colons, a non-numeric port, or an
    /// unparseable IPv4 octet string.
    pub fn parse(s: &str) -> Result<Self, NetError> {
        let (ip_part, port_part) =
            s.split_once(':').ok_or_else(|| NetError::MalformedAddress(s.to_string()))?;
        let ip: Ipv4Addr = ip_part.parse().map_err(|_| NetError::MalformedAddress(s.to_string()))?;
        let port: u16 = port_part.parse().map_err(|_| NetError::MalformedAddress(s.to_string()))?;
        Ok(Self(SocketAddrV4::new(ip, port)))
    }

    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.0.port()
    }

    #[must_use]
    pub fn to_socket_addr_v4(&self) -> SocketAddrV4 {
        self.0
    }

    /// Sanity-checks a peer address accepted off a listener. Zest's acceptor closes and
    /// skips a peer that fails this check; an unspecified IP or port `0` can never be a
    /// legitimate peer address, so both are excluded here.
    #[must_use]
    pub fn check(&self) -> bool {
        !self.0.ip().is_unspecified() && self.0.port() != 0
    }
}

impl From<SocketAddrV4> for InetAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl std::fmt::Display for InetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0.ip(), self.0.port())
    }
}

#[cfg(test)]
mod tests {
    use super::InetAddr;

    #[test]
    fn parses_valid_address() {
        let addr = InetAddr::parse("127.0.0.1:12345").unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 12345);
        assert_eq!(addr.to_string(), "127.0.0.1:12345");
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(InetAddr::parse("not-an-address").is_err());
        assert!(InetAddr::parse("127.0.0.1").is_err());
        assert!(InetAddr::parse("127.0.0.1:notaport").is_err());
    }

    #[test]
    fn check_rejects_unspecified() {
        let addr = InetAddr::parse("0.0.0.0:80").unwrap();
        assert!(!addr.check());
        let addr = InetAddr::parse("10.0.0.1:80").unwrap();
        assert!(addr.check());
    }

    #[test]
    fn check_rejects_port_zero() {
        let addr = InetAddr::parse("10.0.0.1:0").unwrap();
        assert!(!addr.check());
    }
}
