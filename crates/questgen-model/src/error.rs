use thiserror::Error;

/// Load-time and shape errors for scenes, metadata and templates.
///
/// All of these describe corrupt input rather than a search outcome, so callers
/// treat them as fatal.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized constraint kind `{0}`")]
    UnknownConstraint(String),

    #[error("constraint `{kind}` expects {expected}")]
    ConstraintShape {
        kind: String,
        expected: &'static str,
    },

    #[error("constraint refers to template node {0}, which does not exist")]
    NodeOutOfRange(usize),

    #[error("template node {index} (`{op}`) is malformed: {reason}")]
    MalformedNode {
        index: usize,
        op: String,
        reason: String,
    },

    #[error("template node {index} takes node {input} as input, which does not precede it")]
    ForwardReference { index: usize, input: usize },

    #[error("template has no nodes")]
    EmptyTemplate,

    #[error("template has no text variants")]
    NoText,

    #[error("text placeholder `{0}` is not a side input of any node")]
    UndeclaredTextPlaceholder(String),

    #[error("`{0}` is not a placeholder (expected `<Letters>` or `<LettersN>`)")]
    BadPlaceholder(String),

    #[error("placeholder `{0}` does not name any attribute")]
    UnknownPlaceholder(String),

    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),

    #[error("metadata: {0}")]
    Metadata(String),

    #[error("scene `{scene}`: {reason}")]
    Scene { scene: String, reason: String },
}
