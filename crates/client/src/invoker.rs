use std::time::{Duration, Instant};

use dirpilot_core::config::RemoteConfig;
use dirpilot_core::{CallClass, Credential, InvocationResult, Parameters, ToolDefinition};
use reqwest::header::AUTHORIZATION;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvokerError {
    #[error("invalid remote base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Issues one HTTP call per invocation against the directory service.
///
/// No retries and no result caching: two identical calls hit the service
/// twice.
#[derive(Clone, Debug)]
pub struct RemoteInvoker {
    client: reqwest::Client,
    base_url: String,
    read_timeout: Duration,
    simple_timeout: Duration,
}

impl RemoteInvoker {
    pub fn new(
        base_url: &str,
        read_timeout: Duration,
        simple_timeout: Duration,
    ) -> Result<Self, InvokerError> {
        let trimmed = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&trimmed).map_err(|error| InvokerError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: error.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| InvokerError::Client(error.to_string()))?;
        Ok(Self { client, base_url: trimmed, read_timeout, simple_timeout })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, InvokerError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.read_timeout_secs),
            Duration::from_secs(config.simple_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout_for(&self, call_class: CallClass) -> Duration {
        match call_class {
            CallClass::Read => self.read_timeout,
            CallClass::Simple => self.simple_timeout,
        }
    }

    /// Route plus declared parameters, in declaration order, form-encoded.
    /// Parameters the tool does not declare are never sent.
    pub fn request_url(
        &self,
        tool: &ToolDefinition,
        parameters: &Parameters,
    ) -> Result<Url, InvokerError> {
        let raw = format!("{}{}", self.base_url, tool.route.path);
        let mut url = Url::parse(&raw).map_err(|error| InvokerError::InvalidBaseUrl {
            url: raw.clone(),
            reason: error.to_string(),
        })?;

        let pairs: Vec<(&str, &str)> = tool
            .parameters
            .iter()
            .filter_map(|parameter| {
                parameters
                    .get(parameter.name)
                    .map(|value| value.trim())
                    .filter(|value| !value.is_empty())
                    .map(|value| (parameter.name, value))
            })
            .collect();

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        Ok(url)
    }

    pub async fn invoke(
        &self,
        tool: &ToolDefinition,
        parameters: &Parameters,
        credential: &Credential,
    ) -> InvocationResult {
        let url = match self.request_url(tool, parameters) {
            Ok(url) => url,
            Err(error) => return InvocationResult::TransportError { cause: error.to_string() },
        };
        let timeout = self.timeout_for(tool.route.call_class);
        let started = Instant::now();

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, credential.bearer_header())
            .timeout(timeout)
            .send()
            .await;

        let result = match response {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(body) => classify(status, body),
                    Err(error) => transport_failure(&error, timeout),
                }
            }
            Err(error) => transport_failure(&error, timeout),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            InvocationResult::Success { body } => info!(
                event_name = "client.invoke.completed",
                tool_name = tool.name,
                path = tool.route.path,
                body_len = body.len(),
                elapsed_ms,
                "remote call succeeded"
            ),
            InvocationResult::RemoteError { status, body } => warn!(
                event_name = "client.invoke.remote_error",
                tool_name = tool.name,
                path = tool.route.path,
                status,
                body = %body,
                elapsed_ms,
                "remote call returned an error status"
            ),
            other => warn!(
                event_name = "client.invoke.failed",
                tool_name = tool.name,
                path = tool.route.path,
                result = other.kind(),
                detail = %other,
                elapsed_ms,
                "remote call failed"
            ),
        }

        result
    }
}

fn classify(status: StatusCode, body: String) -> InvocationResult {
    if status.is_success() {
        InvocationResult::Success { body }
    } else if status == StatusCode::UNAUTHORIZED {
        InvocationResult::Unauthorized
    } else {
        InvocationResult::RemoteError { status: status.as_u16(), body }
    }
}

fn transport_failure(error: &reqwest::Error, timeout: Duration) -> InvocationResult {
    if error.is_timeout() {
        let cause = format!("request timed out after {}ms", timeout.as_millis());
        InvocationResult::TransportError { cause }
    } else {
        InvocationResult::TransportError { cause: error.to_string() }
    }
}
