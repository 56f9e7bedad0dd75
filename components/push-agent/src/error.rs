/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub use log::{debug, info, warn};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type ApiResult<T> = std::result::Result<T, PushAgentApiError>;

/// The errors handed back to consumers of [`crate::NotificationAgent`] and
/// [`crate::DeviceRegistrationService`].
#[derive(Debug, thiserror::Error)]
pub enum PushAgentApiError {
    /// The host platform lacks a background agent, push or notification support.
    #[error("Unsupported platform: {reason}")]
    Unsupported { reason: String },

    /// The user has not granted notification permission.
    #[error("Notification permission not granted: {reason}")]
    PermissionNotGranted { reason: String },

    /// The push transport could not give us a token.
    #[error("Push token unavailable: {reason}")]
    TokenUnavailable { reason: String },

    /// The backend registry rejected or failed a call.
    #[error("Registration failed: {reason}")]
    Registration { reason: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    #[error("Unexpected error: {reason}")]
    UnexpectedError { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Platform lacks required capability: {0}")]
    Unsupported(String),

    #[error("Notification permission denied")]
    PermissionDenied,

    /// The permission prompt was dismissed without a decision.
    #[error("Notification permission request dismissed")]
    PermissionDismissed,

    #[error("Push token acquisition failed: {0}")]
    TokenAcquisition(String),

    /// A Client communication error
    #[error("Communication Error: {0:?}")]
    CommunicationError(String),

    /// An error returned from the registration server
    #[error("Communication Server Error ({status}): {message}")]
    CommunicationServerError { status: u16, message: String },

    /// The network fetch itself failed (offline, DNS, refused connection).
    #[error("Network fetch failed: {0}")]
    NetworkError(String),

    #[error("Unexpected HTTP status {0} from {1}")]
    UnexpectedStatus(u16, String),

    /// A persisted rate limit refused the call.
    #[error("Too many {0} calls, try again later")]
    RateLimited(String),

    #[error("Device registrar used before init() or after dispose()")]
    NotInitialized,

    #[error("Invalid push payload: {0}")]
    InvalidPayload(String),

    #[error("Cannot move background agent from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Host platform error: {0}")]
    HostError(String),

    #[error("Storage Error: {0:?}")]
    StorageError(String),

    #[error("Error executing SQL: {0}")]
    StorageSqlError(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0:?}")]
    UrlParseError(#[from] url::ParseError),

    /// An unspecified general error has occurred
    #[error("General Error: {0:?}")]
    GeneralError(String),
}

/// How an internal error gets converted to a public one, and what gets logged on the way.
pub struct ErrorHandling<E> {
    pub err: E,
    log_level: Option<log::Level>,
}

impl<E> ErrorHandling<E> {
    /// Just convert the error without logging.
    pub fn convert(err: E) -> Self {
        Self {
            err,
            log_level: None,
        }
    }

    pub fn log_info(self) -> Self {
        self.log(log::Level::Info)
    }

    pub fn log_warning(self) -> Self {
        self.log(log::Level::Warn)
    }

    /// For errors which point at a bug or a broken environment rather than a user or network condition.
    pub fn log_error(self) -> Self {
        self.log(log::Level::Error)
    }

    fn log(mut self, level: log::Level) -> Self {
        self.log_level = Some(level);
        self
    }
}

pub trait GetErrorHandling {
    type ExternalError;

    fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError>;
}

/// Convert an internal error to its public form, logging it as its handling asks.
pub fn convert_log_error<IE, EE>(e: IE) -> EE
where
    IE: GetErrorHandling<ExternalError = EE> + std::error::Error,
{
    let handling = e.get_error_handling();
    if let Some(level) = handling.log_level {
        log::log!(level, "{}", e);
    }
    handling.err
}

impl GetErrorHandling for Error {
    type ExternalError = PushAgentApiError;

    fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError> {
        let reason = self.to_string();
        match self {
            Error::Unsupported(_) => {
                ErrorHandling::convert(PushAgentApiError::Unsupported { reason }).log_info()
            }
            Error::PermissionDenied | Error::PermissionDismissed => {
                ErrorHandling::convert(PushAgentApiError::PermissionNotGranted { reason })
                    .log_info()
            }
            Error::TokenAcquisition(_) => {
                ErrorHandling::convert(PushAgentApiError::TokenUnavailable { reason })
                    .log_warning()
            }
            Error::CommunicationError(_)
            | Error::CommunicationServerError { .. }
            | Error::UnexpectedStatus(..) => {
                ErrorHandling::convert(PushAgentApiError::Registration { reason }).log_warning()
            }
            Error::RateLimited(_) => {
                ErrorHandling::convert(PushAgentApiError::Registration { reason }).log_info()
            }
            Error::NetworkError(_) | Error::HttpError(_) => {
                ErrorHandling::convert(PushAgentApiError::Network { reason }).log_warning()
            }
            Error::StorageError(_) | Error::StorageSqlError(_) => {
                ErrorHandling::convert(PushAgentApiError::Storage { reason }).log_error()
            }
            _ => ErrorHandling::convert(PushAgentApiError::UnexpectedError { reason }).log_error(),
        }
    }
}

impl From<Error> for PushAgentApiError {
    fn from(e: Error) -> Self {
        convert_log_error(e)
    }
}
