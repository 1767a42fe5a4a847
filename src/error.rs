use thiserror::Error;

/// Failure of the provider call; the only error a caller of the fan-out ever sees.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    StatusError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Parsing failed: {0}")]
    ParsingError(String),
}

/// Failure of the log tap. Logged and dropped by the router.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TagError {
    #[error("Empty tag value")]
    Empty,
}

/// Startup or listener failure of the HTTP service.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Failed to build search client: {0}")]
    Client(#[from] SearchError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}
