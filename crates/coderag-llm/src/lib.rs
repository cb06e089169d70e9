//! Embedding and completion capabilities behind backend-agnostic traits.
//!
//! Callers depend on [`Embedder`] and [`Completer`] only. Concrete backends
//! (Ollama, OpenAI-compatible HTTP APIs, a test mock) are chosen at
//! construction time through [`any::AnyProvider`].

pub mod any;
pub mod compatible;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;
pub mod retry;

pub use error::LlmError;
pub use provider::{Completer, Embedder, Message, Role};
pub use retry::RetryPolicy;
