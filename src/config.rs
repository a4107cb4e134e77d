use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Requests announcing a larger `Content-Length` are rejected.
    pub max_content_length: usize,
    /// Upper bound on a single poll while spinning.
    pub poll_timeout: Duration,
    /// Accepted sockets beyond this are dropped immediately.
    pub max_connections: usize,
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            poll_timeout: Duration::from_millis(100),
            max_connections: 1024,
            events_capacity: 1024,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> ServerConfig {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> ServerConfig {
        self.max_content_length = max_content_length;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> ServerConfig {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> ServerConfig {
        self.max_connections = max_connections;
        self
    }

    pub fn with_events_capacity(mut self, events_capacity: usize) -> ServerConfig {
        self.events_capacity = events_capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll timeout must not be zero".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max connections must not be zero".to_string()));
        }
        if self.events_capacity == 0 {
            return Err(Error::Config("events capacity must not be zero".to_string()));
        }
        Ok(())
    }
}

pub struct ClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(30),
            user_agent: concat!("xmlrpc-httpd/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(config.max_content_length, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());

        assert_eq!(ClientConfig::default().timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate() {
        let config = ServerConfig::default().with_poll_timeout(Duration::from_secs(0));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ServerConfig::default().with_max_connections(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
