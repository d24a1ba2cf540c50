use thiserror::Error;

pub use super::generation::PreprocessorError;
pub use super::storage::PersistenceError;

/// Why a single agent failed within a cycle. Never escapes the pipeline:
/// each variant is logged and the pipeline moves on to the next agent.
///
/// Connectivity failures (`TransportError`) are not agent failures: a failed
/// listing or download is logged inside the transport pipeline and retried
/// on the next cycle.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent '{agent}' is misconfigured: {reason}")]
    Configuration { agent: String, reason: String },

    #[error(transparent)]
    Preprocessor(#[from] PreprocessorError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl AgentError {
    pub fn configuration(agent: &str, reason: impl Into<String>) -> Self {
        AgentError::Configuration {
            agent: agent.to_string(),
            reason: reason.into(),
        }
    }

    /// Short category label used in log lines.
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Configuration { .. } => "configuration",
            AgentError::Preprocessor(_) => "preprocessor",
            AgentError::Persistence(_) => "persistence",
        }
    }
}
