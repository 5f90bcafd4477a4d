use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Slot values keyed by parameter name. Every value travels as a string.
pub type Parameters = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOrigin {
    Classifier,
    Rules,
}

impl ResolutionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Rules => "rules",
        }
    }
}

/// A resolved intent to call one catalog tool.
///
/// Requests from the rule path carry confidence `1.0` and skip the
/// confidence gate; classifier requests are gated by the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    pub parameters: Parameters,
    pub confidence: f64,
    pub origin: ResolutionOrigin,
}

impl ToolInvocationRequest {
    pub fn from_classifier(
        tool_name: impl Into<String>,
        parameters: Parameters,
        confidence: f64,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            confidence,
            origin: ResolutionOrigin::Classifier,
        }
    }

    pub fn from_rules(tool_name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            confidence: 1.0,
            origin: ResolutionOrigin::Rules,
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Non-blank value of a slot.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str).filter(|value| !value.trim().is_empty())
    }
}

/// Outcome of one remote call attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvocationResult {
    Success { body: String },
    RemoteError { status: u16, body: String },
    TransportError { cause: String },
    Unauthenticated { reason: String },
    Unauthorized,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RemoteError { .. } => "remote_error",
            Self::TransportError { .. } => "transport_error",
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for InvocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { body } => write!(f, "success ({} bytes)", body.len()),
            Self::RemoteError { status, .. } => {
                write!(f, "remote service returned status {status}")
            }
            Self::TransportError { cause } => write!(f, "transport failure: {cause}"),
            Self::Unauthenticated { reason } => write!(f, "not authenticated: {reason}"),
            Self::Unauthorized => write!(f, "remote service rejected the credential (401)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InvocationResult, Parameters, ResolutionOrigin, ToolInvocationRequest};

    #[test]
    fn rule_requests_are_fully_confident() {
        let request = ToolInvocationRequest::from_rules("GetB2CUsers", Parameters::new())
            .with_parameter("action", "all");

        assert_eq!(request.origin, ResolutionOrigin::Rules);
        assert_eq!(request.confidence, 1.0);
        assert_eq!(request.parameter("action"), Some("all"));
    }

    #[test]
    fn blank_parameters_read_as_absent() {
        let request = ToolInvocationRequest::from_classifier("ManageRoles", Parameters::new(), 0.9)
            .with_parameter("appName", "   ");

        assert_eq!(request.parameter("appName"), None);
        assert_eq!(request.parameter("username"), None);
    }

    #[test]
    fn unauthorized_display_mentions_status() {
        assert!(InvocationResult::Unauthorized.to_string().contains("401"));
        assert_eq!(
            InvocationResult::TransportError { cause: "timeout".to_string() }.kind(),
            "transport_error"
        );
    }
}
