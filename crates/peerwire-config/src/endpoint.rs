//! Dialable peer endpoints.
//!
//! Endpoints appear in configuration files as tagged tables
//! (`{ transport = "tcp", host = "...", port = 4100 }`) and on the command
//! line as URLs. A bare `host:port` is accepted as TCP shorthand so
//! bootstrap lists stay short.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Address a peer listens on or can be dialled at.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// TCP host and port. IPv6 hosts are stored without brackets.
    Tcp { host: String, port: u16 },
    /// Filesystem path of a Unix domain socket.
    Unix { path: Utf8PathBuf },
}

impl SocketEndpoint {
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')) {
            Some(inner) => inner.to_owned(),
            None => host,
        };
        Self::Tcp { host, port }
    }

    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Socket path for Unix endpoints.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        if let Self::Unix { path } = self {
            Some(path)
        } else {
            None
        }
    }

    /// Replaces the port of a TCP endpoint; Unix endpoints come back as-is.
    ///
    /// Listeners bound to port `0` advertise the kernel-assigned port this way.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        match self {
            Self::Tcp { host, .. } => Self::Tcp {
                host: host.clone(),
                port,
            },
            Self::Unix { .. } => self.clone(),
        }
    }

    /// Resolves a TCP endpoint. Unix endpoints resolve to nothing.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error when the host name cannot be looked up.
    pub fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        let Self::Tcp { host, port } = self else {
            return Ok(Vec::new());
        };
        Ok((host.as_str(), *port).to_socket_addrs()?.collect())
    }

    /// Creates the owner-only directory a Unix socket will be bound in.
    ///
    /// TCP endpoints need no preparation.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::SocketDirectory`] when the path has no parent
    /// or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), EndpointError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .ok_or_else(|| EndpointError::SocketDirectory {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"),
            })?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);

        match builder.create(parent) {
            Err(source) if source.kind() != io::ErrorKind::AlreadyExists => {
                Err(EndpointError::SocketDirectory {
                    path: parent.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }

    fn parse_url(input: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(input).map_err(|source| EndpointError::Url {
            input: input.to_owned(),
            source,
        })?;
        let invalid = |reason| EndpointError::Invalid {
            input: input.to_owned(),
            reason,
        };
        match url.scheme() {
            "tcp" => {
                let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
                let port = url.port().ok_or_else(|| invalid("missing port"))?;
                Ok(Self::tcp(host, port))
            }
            "unix" if url.path().is_empty() => Err(invalid("missing socket path")),
            "unix" => Ok(Self::unix(url.path())),
            _ => Err(invalid("scheme must be tcp or unix")),
        }
    }

    fn parse_shorthand(input: &str) -> Result<Self, EndpointError> {
        let invalid = |reason| EndpointError::Invalid {
            input: input.to_owned(),
            reason,
        };
        let (host, port) = input.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse().map_err(|_| invalid("port is not a number"))?;
        Ok(Self::tcp(host, port))
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(formatter, "unix://{path}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = EndpointError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.contains("://") {
            Self::parse_url(input)
        } else {
            Self::parse_shorthand(input)
        }
    }
}

/// Errors raised while parsing or preparing a [`SocketEndpoint`].
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid endpoint '{input}': {reason}")]
    Invalid { input: String, reason: &'static str },
    #[error("invalid endpoint '{input}': {source}")]
    Url {
        input: String,
        #[source]
        source: url::ParseError,
    },
    /// The directory holding a Unix socket could not be created.
    #[error("cannot prepare socket directory '{path}': {source}")]
    SocketDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}
