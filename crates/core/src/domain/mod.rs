pub mod credential;
pub mod invocation;
pub mod message;
