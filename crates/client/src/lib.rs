//! HTTP-facing adapters: user credentials, the directory service invoker and
//! the chat completion client.

pub mod completion;
pub mod credential;
pub mod invoker;

pub use completion::HttpCompletionClient;
pub use credential::{
    decode_expiry, AcquiredToken, AuthSession, AuthStatus, CredentialOutcome, CredentialProvider,
    OAuthRefreshTokenSource, StaticTokenSource, TokenError, TokenSource, UserContext,
};
pub use invoker::{InvokerError, RemoteInvoker};
