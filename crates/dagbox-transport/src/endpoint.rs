//! Endpoint naming for transport sockets.

use std::fmt;
use std::fs::DirBuilder;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Declarative address of a transport endpoint.
///
/// The text form follows the `scheme://name` convention: `inproc://jobs`,
/// `ipc:///run/dagbox/bus.sock`, `tcp://127.0.0.1:5670`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// In-process exchange identified by name. Cheapest option when every
    /// component lives in one process.
    Inproc { name: String },
    /// Unix domain socket endpoint, for multiple processes on one host.
    Ipc { path: PathBuf },
    /// TCP socket endpoint, for peers across the network.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// Builds an in-process endpoint.
    #[must_use]
    pub fn inproc(name: impl Into<String>) -> Self {
        Self::Inproc { name: name.into() }
    }

    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn ipc(path: impl Into<PathBuf>) -> Self {
        Self::Ipc { path: path.into() }
    }

    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the socket path when the endpoint is a Unix domain socket.
    #[must_use]
    pub fn ipc_path(&self) -> Option<&Path> {
        match self {
            Self::Ipc { path } => Some(path),
            _ => None,
        }
    }

    /// Ensures the socket's parent directory exists with restrictive
    /// permissions. A no-op for non-ipc endpoints.
    pub fn prepare_filesystem(&self) -> Result<(), EndpointPreparationError> {
        let Some(path) = self.ipc_path() else {
            return Ok(());
        };
        let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
            return Err(EndpointPreparationError::MissingParent {
                path: path.to_path_buf(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        match builder.create(parent) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(EndpointPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            }),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inproc { name } => write!(formatter, "inproc://{name}"),
            Self::Ipc { path } => write!(formatter, "ipc://{}", path.display()),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "inproc" => {
                let name = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingName(input.to_string()))?;
                Ok(Self::inproc(name))
            }
            "ipc" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(EndpointParseError::MissingIpcPath(input.to_string()));
                }
                Ok(Self::ipc(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingHost(input.to_string()))?;
                let port = url
                    .port()
                    .ok_or_else(|| EndpointParseError::MissingPort(input.to_string()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(EndpointParseError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Errors encountered while parsing an [`Endpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was not recognised.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// In-process exchange name was missing.
    #[error("missing in-process exchange name in '{0}'")]
    MissingName(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingIpcPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing socket directories.
#[derive(Debug, Error)]
pub enum EndpointPreparationError {
    /// Socket path lacks a parent directory.
    #[error("socket path '{path}' has no parent directory", path = .path.display())]
    MissingParent { path: PathBuf },
    /// Failed to create the socket directory.
    #[error("failed to create socket directory '{path}': {source}", path = .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
