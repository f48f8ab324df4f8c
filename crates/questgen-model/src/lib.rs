//! Questgen data model
//!
//! Read-only inputs of the template-instantiation engine:
//!
//! - [`scene`]: the scene graph (objects, relationship tables, derived indices)
//! - [`metadata`]: attribute domains, placeholder tokens, function output types
//! - [`template`]: question templates with closed node and constraint variants
//! - [`synonyms`]: value → alternate literal table used when rendering text
//!
//! Everything here is validated at load time: a template that deserializes
//! successfully has no forward references, no unknown constraint kinds and no
//! undeclared text placeholders.

pub mod error;
pub mod metadata;
pub mod scene;
pub mod synonyms;
pub mod template;

pub use error::ModelError;
pub use metadata::{AttributeSpec, FunctionSpec, Metadata, OutputType, PositionalAttribute};
pub use scene::{ObjectId, Scene, SceneObject};
pub use synonyms::Synonyms;
pub use template::{
    placeholders_in_text, Constraint, MacroKind, MacroParams, MacroSuffix, ParamBindings,
    Placeholder, Template, TemplateNode,
};
