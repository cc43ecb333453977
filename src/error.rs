use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// UPnP action error codes as defined by the ContentDirectory spec.
pub const UPNP_E_INVALID_ACTION: u16 = 401;
pub const UPNP_E_INVALID_ARGS: u16 = 402;
pub const UPNP_E_NO_SUCH_OBJECT: u16 = 701;
pub const UPNP_E_ACTION_FAILED: u16 = 501;

/// An error that is reported back to a control point as a SOAP fault.
#[derive(Error, Debug, Clone)]
#[error("UPnP error {code}: {message}")]
pub struct UpnpError {
    pub code: u16,
    pub message: String,
}

impl UpnpError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::new(UPNP_E_INVALID_ACTION, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(UPNP_E_INVALID_ARGS, message)
    }

    pub fn no_such_object(message: impl Into<String>) -> Self {
        Self::new(UPNP_E_NO_SUCH_OBJECT, message)
    }

    pub fn action_failed(message: impl Into<String>) -> Self {
        Self::new(UPNP_E_ACTION_FAILED, message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database schema error: {0}")]
    Schema(String),

    #[error("database is from a newer version (db_version {found}, supported up to {supported})")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("object not found")]
    NotFound,

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("session expired")]
    SessionExpired,

    #[error("server shutdown in progress")]
    ShuttingDown,

    #[error("invalid range header")]
    InvalidRange,

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Upnp(#[from] UpnpError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other(message.into())
    }
}

/// Conversion used by the plain HTTP endpoints (media serving); SOAP
/// endpoints render faults through the envelope instead.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::SessionExpired => StatusCode::FORBIDDEN,
            Error::Upnp(ref e) if e.code == UPNP_E_NO_SUCH_OBJECT => StatusCode::NOT_FOUND,
            Error::Upnp(ref e) if e.code == UPNP_E_INVALID_ARGS => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
