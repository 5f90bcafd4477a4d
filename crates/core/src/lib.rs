pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod fallback;
pub mod llm;

pub use catalog::{
    CallClass, CatalogError, Effect, ParameterIssue, ToolAction, ToolCatalog, ToolDefinition,
    ToolParameter, ToolRoute,
};
pub use domain::credential::Credential;
pub use domain::invocation::{InvocationResult, Parameters, ResolutionOrigin, ToolInvocationRequest};
pub use domain::message::{ChatMessage, ChatRole};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use fallback::{FallbackPayload, FallbackReason};
pub use llm::{CompletionClient, CompletionError};
