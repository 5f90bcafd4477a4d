use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dirpilot_client::{
    AuthSession, AuthStatus, CredentialOutcome, CredentialProvider, RemoteInvoker,
};
use dirpilot_core::config::AgentConfig;
use dirpilot_core::fallback::simulate;
use dirpilot_core::{
    ApplicationError, ChatMessage, CompletionClient, CompletionError, DomainError, FallbackReason,
    InvocationResult, ToolCatalog, ToolDefinition, ToolInvocationRequest,
};
use thiserror::Error;
use tokio::sync::Mutex as SessionLock;
use tracing::{info, warn};

use crate::conversation::{ConversationTranscript, PendingTurn};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::resolver::{IntentResolver, Resolution};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a directory administration assistant. You help \
    users look up users, applications and application roles, and manage role assignments. When a \
    tool result is provided, answer from it. If the result is marked as simulated, say plainly \
    that it is simulated data and that the live service could not be used. Never claim a change \
    was applied unless the tool result confirms it.";

const FORMAT_INSTRUCTION: &str = "Present the tool result above to the user in a clear, readable \
    form. Do not add records that are not in it.";

const SIMULATED_INSTRUCTION: &str = "The live call did not complete, so the data above is \
    SIMULATED. Present it to the user, state clearly that it is simulated, and mention why the \
    live call failed.";

const MUTATION_INSTRUCTION: &str = "The requested change was NOT applied. Tell the user it failed \
    and why; do not describe it as done.";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("the request did not finish within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        ApplicationError::Integration(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub confidence_threshold: f64,
    pub turn_timeout: Duration,
    pub system_prompt: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            turn_timeout: Duration::from_secs(90),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            ..Self::default()
        }
    }
}

type SessionFactory = Arc<dyn Fn() -> AuthSession + Send + Sync>;

struct Session {
    transcript: ConversationTranscript,
    auth: AuthSession,
}

struct TurnOutcome {
    context: Option<ChatMessage>,
    reply: String,
}

enum ToolStep {
    None,
    Clarify(String),
    Context(ChatMessage),
}

/// Runs turns: resolve, gate, acquire a credential, invoke or simulate, then
/// complete. Turns on one session are serialized; sessions run in parallel.
pub struct AgentRuntime {
    catalog: Arc<ToolCatalog>,
    resolver: IntentResolver,
    guardrails: GuardrailPolicy,
    credentials: CredentialProvider,
    invoker: RemoteInvoker,
    completion: Arc<dyn CompletionClient>,
    settings: RuntimeSettings,
    sessions: Mutex<HashMap<String, Arc<SessionLock<Session>>>>,
    new_auth: SessionFactory,
}

impl AgentRuntime {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        completion: Arc<dyn CompletionClient>,
        credentials: CredentialProvider,
        invoker: RemoteInvoker,
        settings: RuntimeSettings,
    ) -> Self {
        let resolver = IntentResolver::new(catalog.clone(), completion.clone());
        let guardrails = GuardrailPolicy::new(settings.confidence_threshold);
        Self {
            catalog,
            resolver,
            guardrails,
            credentials,
            invoker,
            completion,
            settings,
            sessions: Mutex::new(HashMap::new()),
            new_auth: Arc::new(AuthSession::signed_out),
        }
    }

    /// Authentication state given to sessions created on first use.
    pub fn with_session_factory(
        mut self,
        factory: impl Fn() -> AuthSession + Send + Sync + 'static,
    ) -> Self {
        self.new_auth = Arc::new(factory);
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Starts or replaces a session with the given authentication state.
    pub fn open_session(&self, session_id: &str, auth: AuthSession) {
        let transcript = ConversationTranscript::new(self.settings.system_prompt.as_str());
        let session = Session { transcript, auth };
        self.registry().insert(session_id.to_string(), Arc::new(SessionLock::new(session)));
    }

    /// Drops a session and its transcript. A turn already holding the session
    /// finishes on its own handle. Returns whether the session existed.
    pub fn close_session(&self, session_id: &str) -> bool {
        let closed = self.registry().remove(session_id).is_some();
        if closed {
            info!(event_name = "agent.session.closed", session_id, "session closed");
        }
        closed
    }

    pub fn session_count(&self) -> usize {
        self.registry().len()
    }

    pub async fn respond(&self, session_id: &str, utterance: &str) -> String {
        let handle = self.session(session_id);
        let mut session = handle.lock().await;
        let Session { transcript, auth } = &mut *session;

        info!(
            event_name = "agent.turn.started",
            session_id,
            utterance_len = utterance.len(),
            "turn started"
        );
        let started = Instant::now();

        let turn = self.run_turn(session_id, transcript.messages(), auth, utterance);
        let outcome = match tokio::time::timeout(self.settings.turn_timeout, turn).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TurnError::Timeout(self.settings.turn_timeout)),
        };

        let mut pending = PendingTurn::new();
        pending.push(ChatMessage::user(utterance));
        let reply = match outcome {
            Ok(TurnOutcome { context, reply }) => {
                if let Some(context) = context {
                    pending.push(context);
                }
                info!(
                    event_name = "agent.turn.completed",
                    session_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn completed"
                );
                reply
            }
            Err(error) => {
                let reply =
                    format!("I encountered an error while processing your request: {error}");
                let failure = ApplicationError::from(error).into_interface(session_id);
                warn!(
                    event_name = "agent.turn.failed",
                    session_id,
                    error = %failure,
                    user_message = failure.user_message(),
                    "turn aborted"
                );
                reply
            }
        };
        pending.push(ChatMessage::assistant(reply.as_str()));
        transcript.commit(pending);

        reply
    }

    pub async fn reset(&self, session_id: &str) {
        if let Some(handle) = self.existing(session_id) {
            handle.lock().await.transcript.reset();
            info!(event_name = "agent.session.reset", session_id, "transcript reset");
        }
    }

    pub async fn message_count(&self, session_id: &str) -> usize {
        match self.existing(session_id) {
            Some(handle) => handle.lock().await.transcript.message_count(),
            None => 0,
        }
    }

    pub async fn snapshot(&self, session_id: &str) -> Vec<ChatMessage> {
        match self.existing(session_id) {
            Some(handle) => handle.lock().await.transcript.snapshot(),
            None => vec![ChatMessage::system(self.settings.system_prompt.as_str())],
        }
    }

    pub async fn sign_out(&self, session_id: &str) {
        if let Some(handle) = self.existing(session_id) {
            handle.lock().await.auth.sign_out();
            info!(event_name = "agent.session.signed_out", session_id, "session signed out");
        }
    }

    pub async fn auth_status(&self, session_id: &str) -> AuthStatus {
        match self.existing(session_id) {
            Some(handle) => self.credentials.status(&handle.lock().await.auth),
            None => self.credentials.status(&(self.new_auth)()),
        }
    }

    async fn run_turn(
        &self,
        session_id: &str,
        history: &[ChatMessage],
        auth: &mut AuthSession,
        utterance: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let context = match self.tool_step(session_id, auth, utterance).await {
            ToolStep::Clarify(message) => return Ok(TurnOutcome { context: None, reply: message }),
            ToolStep::Context(message) => Some(message),
            ToolStep::None => None,
        };

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(utterance));
        messages.extend(context.iter().cloned());

        let reply = self.completion.complete(&messages).await?;
        Ok(TurnOutcome { context, reply })
    }

    async fn tool_step(
        &self,
        session_id: &str,
        auth: &mut AuthSession,
        utterance: &str,
    ) -> ToolStep {
        let request = match self.resolver.resolve(utterance).await {
            Resolution::Invoke(request) => request,
            Resolution::NoCall => return ToolStep::None,
        };
        let Ok(tool) = self.catalog.lookup(&request.tool_name) else {
            warn!(
                event_name = "agent.turn.unknown_tool",
                session_id,
                tool_name = %request.tool_name,
                "resolved tool missing from catalog"
            );
            return ToolStep::None;
        };

        match self.guardrails.evaluate(&request, tool) {
            GuardrailDecision::Allow => {}
            GuardrailDecision::Skip { reason_code, confidence } => {
                info!(
                    event_name = "agent.turn.tool_skipped",
                    session_id,
                    tool_name = tool.name,
                    reason_code,
                    confidence,
                    "tool call skipped"
                );
                return ToolStep::None;
            }
            GuardrailDecision::Clarify { reason_code, user_message, missing } => {
                let error = DomainError::MissingParameters {
                    tool: tool.name.to_string(),
                    missing: missing.iter().map(|name| name.to_string()).collect(),
                };
                info!(
                    event_name = "agent.turn.clarification",
                    session_id,
                    tool_name = tool.name,
                    reason_code,
                    error = %error,
                    "asking for missing parameters"
                );
                return ToolStep::Clarify(user_message);
            }
            GuardrailDecision::Degrade { reason_code, fallback } => {
                if let FallbackReason::InvalidAction { action } = &fallback {
                    let error = DomainError::UnsupportedAction {
                        tool: tool.name.to_string(),
                        action: action.clone(),
                    };
                    info!(
                        event_name = "agent.turn.degraded",
                        session_id,
                        tool_name = tool.name,
                        reason_code,
                        error = %error,
                        "request not sent"
                    );
                } else {
                    info!(
                        event_name = "agent.turn.degraded",
                        session_id,
                        tool_name = tool.name,
                        reason_code,
                        "request not sent"
                    );
                }
                return ToolStep::Context(simulated_context(tool, &request, fallback));
            }
        }

        info!(
            event_name = "agent.turn.tool_selected",
            session_id,
            tool_name = tool.name,
            origin = request.origin.as_str(),
            confidence = request.confidence,
            "invoking tool"
        );

        let result = match self.credentials.acquire(auth).await {
            CredentialOutcome::Ready(credential) => {
                self.invoker.invoke(tool, &request.parameters, &credential).await
            }
            CredentialOutcome::Unauthenticated { reason } => {
                InvocationResult::Unauthenticated { reason }
            }
        };

        match result {
            InvocationResult::Success { body } => {
                let context =
                    format!("Tool Result ({}): {body}\n\n{FORMAT_INSTRUCTION}", tool.name);
                ToolStep::Context(ChatMessage::tool_context(context))
            }
            failure => {
                let reason = FallbackReason::from_result(&failure).unwrap_or_else(|| {
                    FallbackReason::TransportError { cause: failure.to_string() }
                });
                warn!(
                    event_name = "agent.turn.fallback",
                    session_id,
                    tool_name = tool.name,
                    result = failure.kind(),
                    "serving simulated result"
                );
                ToolStep::Context(simulated_context(tool, &request, reason))
            }
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionLock<Session>>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn existing(&self, session_id: &str) -> Option<Arc<SessionLock<Session>>> {
        self.registry().get(session_id).cloned()
    }

    fn session(&self, session_id: &str) -> Arc<SessionLock<Session>> {
        self.registry()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let transcript = ConversationTranscript::new(self.settings.system_prompt.as_str());
                Arc::new(SessionLock::new(Session { transcript, auth: (self.new_auth)() }))
            })
            .clone()
    }
}

fn simulated_context(
    tool: &ToolDefinition,
    request: &ToolInvocationRequest,
    reason: FallbackReason,
) -> ChatMessage {
    let rejected = matches!(reason, FallbackReason::InvalidAction { .. });
    let instruction = if tool.is_mutation(request) || rejected {
        MUTATION_INSTRUCTION
    } else {
        SIMULATED_INSTRUCTION
    };
    let payload = simulate(tool, request, reason);
    ChatMessage::tool_context(format!(
        "Tool Result ({}) [SIMULATED: {}]: {}\n\n{instruction}",
        payload.tool_name,
        payload.reason.describe(),
        payload.render()
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dirpilot_core::{ApplicationError, CompletionError};

    use super::{RuntimeSettings, TurnError};

    #[test]
    fn turn_errors_surface_as_integration_failures() {
        let error: ApplicationError = TurnError::Timeout(Duration::from_millis(250)).into();
        assert!(matches!(
            error,
            ApplicationError::Integration(ref message) if message.contains("250ms")
        ));

        let status = CompletionError::Status { status: 503, body: "busy".to_string() };
        let error: ApplicationError = TurnError::from(status).into();
        assert!(error.to_string().contains("503"));
    }

    #[test]
    fn settings_follow_agent_config() {
        let config =
            dirpilot_core::config::AgentConfig { confidence_threshold: 0.8, turn_timeout_secs: 12 };
        let settings = RuntimeSettings::from_config(&config);

        assert!((settings.confidence_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(settings.turn_timeout, Duration::from_secs(12));
        assert!(settings
            .system_prompt
            .starts_with("You are a directory administration assistant."));
    }
}
