//! Errors raised while hosting the HTTP listener.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for API server operations.
pub type ApiServerResult<T> = std::result::Result<T, ApiServerError>;

/// Errors raised while binding or serving the API.
#[derive(Debug, Error)]
pub enum ApiServerError {
    /// The listener could not claim its address.
    #[error("failed to bind api listener on {addr}")]
    Bind {
        /// Address attempted.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The accept loop stopped before a shutdown signal arrived.
    #[error("api server terminated unexpectedly")]
    Serve {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl ApiServerError {
    /// Whether another process already holds the listen address.
    #[must_use]
    pub fn is_address_in_use(&self) -> bool {
        matches!(self, Self::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn bind_error_names_the_address() -> anyhow::Result<()> {
        let bind = ApiServerError::Bind {
            addr: "0.0.0.0:5000".parse()?,
            source: io::Error::new(io::ErrorKind::AddrInUse, "busy"),
        };
        assert_eq!(bind.to_string(), "failed to bind api listener on 0.0.0.0:5000");
        assert!(bind.is_address_in_use());
        assert!(bind.source().is_some());

        let serve = ApiServerError::Serve {
            source: io::Error::new(io::ErrorKind::BrokenPipe, "lost"),
        };
        assert_eq!(serve.to_string(), "api server terminated unexpectedly");
        assert!(!serve.is_address_in_use());
        Ok(())
    }
}
