use questgen_model::ModelError;
use thiserror::Error;

/// Configuration errors surfaced while searching.
///
/// Search-local rejections (invalid partial program, failed constraint,
/// rejection sampling, degenerate relation) are not errors; they only drop a
/// branch. Anything here means the template or metadata is corrupt.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("template node {0} has not been expanded yet but is used as an input")]
    UnmappedNode(usize),

    #[error("composite template node {0} has no resolved side inputs")]
    MissingMacroParams(usize),

    #[error("placeholder `{0}` is not bound to an attribute")]
    UnboundPlaceholder(String),

    #[error("invalid engine configuration: {0}")]
    Config(String),
}
