//! Agent runtime - turns chat messages into directory tool calls
//!
//! This crate is the orchestration layer of dirpilot. For each turn it:
//! - Resolves the utterance to a catalog tool, through the language model
//!   classifier or, when that answer is unusable, through keyword rules
//! - Normalizes legacy tool names and gates the request on confidence and
//!   required parameters
//! - Acquires the session's credential and invokes the remote service
//! - Replaces any failed call with a labeled simulated result
//! - Appends the turn to the session transcript and asks the model for the
//!   reply
//!
//! # Key Types
//!
//! - `AgentRuntime` - session registry and turn pipeline (see `runtime`)
//! - `IntentResolver` - classifier prompt and parsing, rule fallback
//! - `GuardrailPolicy` - confidence gate and clarification requests
//! - `ConversationTranscript` - ordered per-session message log
//!
//! # Safety Principle
//!
//! The model only picks a tool and fills slots. Whether a call runs, and
//! whether a change happened, is decided by the gate and the remote service.
//! A simulated mutation is always reported as not applied.

pub mod conversation;
pub mod guardrails;
pub mod resolver;
pub mod rules;
pub mod runtime;
pub mod tools;

pub use conversation::{ConversationTranscript, PendingTurn};
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use resolver::{IntentResolver, Resolution, ResolveError};
pub use runtime::{AgentRuntime, RuntimeSettings, TurnError, DEFAULT_SYSTEM_PROMPT};
