use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("tool `{tool}` is missing required parameters: {}", missing.join(", "))]
    MissingParameters { tool: String, missing: Vec<String> },
    #[error("action `{action}` is not supported by `{tool}`")]
    UnsupportedAction { tool: String, action: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("sign-in required: {0}")]
    Authentication(String),
    #[error("upstream call failed: {0}")]
    Integration(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// What a chat surface may show for a failed turn, tagged with the session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("rejected request in session {session_id}: {detail}")]
    Rejected { detail: String, session_id: String },
    #[error("upstream unavailable in session {session_id}: {detail}")]
    Unavailable { detail: String, session_id: String },
    #[error("internal failure in session {session_id}: {detail}")]
    Internal { detail: String, session_id: String },
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl ApplicationError {
    pub fn into_interface(self, session_id: impl Into<String>) -> InterfaceError {
        let session_id = session_id.into();
        match self {
            Self::Domain(error) => {
                InterfaceError::Rejected { detail: error.to_string(), session_id }
            }
            Self::Authentication(detail) | Self::Integration(detail) => {
                InterfaceError::Unavailable { detail, session_id }
            }
            Self::Configuration(detail) => InterfaceError::Internal { detail, session_id },
        }
    }
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => {
                "That request could not be routed to a directory tool. Rephrase it and try again."
            }
            Self::Unavailable { .. } => {
                "The directory or language model service did not respond. Try again shortly."
            }
            Self::Internal { .. } => {
                "dirpilot is misconfigured; check the effective config with `dirpilot config`."
            }
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Rejected { session_id, .. }
            | Self::Unavailable { session_id, .. }
            | Self::Internal { session_id, .. } => session_id,
        }
    }
}
