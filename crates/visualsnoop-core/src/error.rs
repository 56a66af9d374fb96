use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the VisualSnoop client.
#[derive(Debug, Error)]
pub enum Error {
    /// The handshake did not yield a collection id. Displays the server's
    /// message verbatim when one was sent.
    #[error("{0}")]
    CollectionResolution(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("missing credentials: {0} is not configured")]
    MissingCredentials(&'static str),
    #[error("failed to read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("invalid JSON response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unable to sign request: {0}")]
    Signing(String),
}

impl Error {
    pub const UNRESOLVED_COLLECTION: &'static str = "Unable to get Collection ID";

    pub fn unresolved_collection() -> Self {
        Error::CollectionResolution(Self::UNRESOLVED_COLLECTION.to_string())
    }

    /// True for failures raised before the request reached the server.
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Connect(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Error::Connect(err)
        } else if err.is_timeout() {
            Error::Timeout(err)
        } else {
            Error::Http(err)
        }
    }
}
