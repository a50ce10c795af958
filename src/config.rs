use std::time::Duration;

use bon::Builder;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);

/// Configuration for connection behavior.
///
/// ```
/// use std::time::Duration;
///
/// use resilient_websocket::config::{Config, Proxy};
///
/// let config = Config::builder()
///     .heartbeat_interval(Duration::from_secs(10))
///     .proxy(Proxy::socks5("127.0.0.1", 1080))
///     .build();
///
/// assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between liveness probes while connected. The first probe is sent as soon
    /// as the connection becomes ready.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    heartbeat_interval: Duration,
    /// Tunnel the TCP stream through this proxy. Unset means a direct connection.
    proxy: Option<Proxy>,
    /// Disable Nagle's algorithm on direct connections.
    #[builder(default = true)]
    disable_nagle: bool,
}

impl Config {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    #[must_use]
    pub fn disable_nagle(&self) -> bool {
        self.disable_nagle
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Proxy the transport should tunnel through.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    /// SOCKS5 proxy without authentication
    Socks5 { host: String, port: u16 },
}

impl Proxy {
    pub fn socks5<S: Into<String>>(host: S, port: u16) -> Self {
        Self::Socks5 {
            host: host.into(),
            port,
        }
    }

    /// `host:port` of the proxy itself.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Socks5 { host, port } => format!("{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_heartbeat_is_thirty_seconds() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn proxy_is_inert_by_default() {
        let config = Config::default();

        assert!(config.proxy().is_none());
        assert!(config.disable_nagle());
    }

    #[test]
    fn socks5_address() {
        let proxy = Proxy::socks5("192.168.1.6", 8889);
        assert_eq!(proxy.address(), "192.168.1.6:8889");
    }
}
