//! Question answering over an indexed source tree.
//!
//! [`Agent::answer`] embeds the question, retrieves the closest chunks and
//! asks the model to answer from those chunks alone, citing the files used.

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod synthesizer;

pub use agent::{Agent, AgentConfig};
pub use bootstrap::{App, create_provider, open_index};
pub use config::{Config, ConfigError};
pub use error::{AgentError, GenerationError};
pub use synthesizer::{AnswerRecord, Citation, Synthesizer, SynthesizerConfig};
