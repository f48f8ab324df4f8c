//! Question templates.
//!
//! A template is a program skeleton (a chain of nodes whose inputs refer to
//! earlier nodes), one or more text patterns sharing the skeleton's
//! placeholders, and a set of declarative constraints over the placeholders.
//!
//! Template JSON follows the CLEVR layout:
//!
//! ```json
//! {
//!   "text": ["How many <Z> <C> <M> <S>s are there?"],
//!   "nodes": [
//!     { "type": "scene", "inputs": [] },
//!     { "type": "filter_count", "inputs": [0], "side_inputs": ["<Z>", "<C>", "<M>", "<S>"] }
//!   ],
//!   "constraints": [{ "type": "NULL", "params": ["<Z>"] }]
//! }
//! ```
//!
//! Node JSON is an open record; here it becomes the closed [`TemplateNode`]
//! variant during deserialization, so malformed shapes and unknown constraint
//! kinds fail at load time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ModelError;
use crate::metadata::Metadata;

// ============================================================================
// Placeholders
// ============================================================================

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<([A-Za-z]+)(\d*)>").expect("placeholder regex"))
}

/// A parameter slot such as `<C2>`: the letters select the attribute (through
/// the metadata token `<C>`), the digits distinguish repeated slots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placeholder {
    letters: String,
}

impl Placeholder {
    pub fn parse(name: &str) -> Result<Self, ModelError> {
        let caps = placeholder_pattern()
            .captures(name)
            .filter(|c| c.get(0).map(|m| m.as_str()) == Some(name))
            .ok_or_else(|| ModelError::BadPlaceholder(name.to_string()))?;
        Ok(Self {
            letters: caps[1].to_string(),
        })
    }

    /// The metadata token for this slot's attribute, e.g. `<C>` for `<C2>`.
    pub fn base_token(&self) -> String {
        format!("<{}>", self.letters)
    }
}

/// All placeholder occurrences in a piece of template text.
pub fn placeholders_in_text(text: &str) -> impl Iterator<Item = &str> {
    placeholder_pattern().find_iter(text).map(|m| m.as_str())
}

// ============================================================================
// Nodes
// ============================================================================

/// Trailing primitive appended after a macro's filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacroSuffix {
    None,
    Unique,
    NotUnique,
    Count,
    Exist,
}

impl MacroSuffix {
    pub fn op(self) -> Option<&'static str> {
        match self {
            MacroSuffix::None => None,
            MacroSuffix::Unique => Some("unique"),
            MacroSuffix::NotUnique => Some("not_unique"),
            MacroSuffix::Count => Some("count"),
            MacroSuffix::Exist => Some("exist"),
        }
    }
}

/// `filter*` / `relate_filter*` composite node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacroKind {
    pub relate: bool,
    pub suffix: MacroSuffix,
}

impl MacroKind {
    pub fn parse(op: &str) -> Option<Self> {
        let (relate, rest) = match op.strip_prefix("relate_") {
            Some(rest) => (true, rest),
            None => (false, op),
        };
        let suffix = match rest {
            "filter" => MacroSuffix::None,
            "filter_unique" => MacroSuffix::Unique,
            "filter_not_unique" => MacroSuffix::NotUnique,
            "filter_count" => MacroSuffix::Count,
            "filter_exist" => MacroSuffix::Exist,
            _ => return None,
        };
        Some(Self { relate, suffix })
    }

    pub fn name(self) -> String {
        let base = match self.suffix.op() {
            Some(op) => format!("filter_{op}"),
            None => "filter".to_string(),
        };
        if self.relate {
            format!("relate_{base}")
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    /// A primitive with no side inputs (`scene`, `unique`, `count`, ...).
    Plain { op: String, inputs: Vec<usize> },
    /// A primitive with exactly one side-input placeholder.
    Parameterized {
        op: String,
        inputs: Vec<usize>,
        param: String,
    },
    /// A composite node expanded into a primitive chain during search.
    Macro {
        kind: MacroKind,
        input: usize,
        params: Vec<String>,
    },
}

impl TemplateNode {
    pub fn op(&self) -> String {
        match self {
            TemplateNode::Plain { op, .. } | TemplateNode::Parameterized { op, .. } => op.clone(),
            TemplateNode::Macro { kind, .. } => kind.name(),
        }
    }

    pub fn inputs(&self) -> &[usize] {
        match self {
            TemplateNode::Plain { inputs, .. } | TemplateNode::Parameterized { inputs, .. } => {
                inputs
            }
            TemplateNode::Macro { input, .. } => std::slice::from_ref(input),
        }
    }

    pub fn params(&self) -> &[String] {
        match self {
            TemplateNode::Plain { .. } => &[],
            TemplateNode::Parameterized { param, .. } => std::slice::from_ref(param),
            TemplateNode::Macro { params, .. } => params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeRecord {
    #[serde(rename = "type")]
    op: String,
    #[serde(default)]
    inputs: Vec<usize>,
    #[serde(default, alias = "value_inputs")]
    side_inputs: Vec<String>,
}

impl NodeRecord {
    fn into_node(self, index: usize) -> Result<TemplateNode, ModelError> {
        if let Some(&input) = self.inputs.iter().find(|&&i| i >= index) {
            return Err(ModelError::ForwardReference { index, input });
        }
        let malformed = |reason: &str| ModelError::MalformedNode {
            index,
            op: self.op.clone(),
            reason: reason.to_string(),
        };

        if let Some(kind) = MacroKind::parse(&self.op) {
            let [input] = self.inputs[..] else {
                return Err(malformed("composite nodes take exactly one input"));
            };
            if self.side_inputs.is_empty() {
                return Err(malformed("composite nodes need at least one side input"));
            }
            return Ok(TemplateNode::Macro {
                kind,
                input,
                params: self.side_inputs,
            });
        }

        match self.side_inputs.len() {
            0 => Ok(TemplateNode::Plain {
                op: self.op,
                inputs: self.inputs,
            }),
            1 => {
                let param = self.side_inputs.into_iter().next().unwrap_or_default();
                Ok(TemplateNode::Parameterized {
                    op: self.op,
                    inputs: self.inputs,
                    param,
                })
            }
            _ => Err(malformed("more than one side input on a non-composite node")),
        }
    }
}

// ============================================================================
// Constraints
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Both placeholders bound to the same value is a violation.
    Neq(String, String),
    /// The placeholder must hold its attribute's unset value.
    Null(String),
    /// The placeholder must not hold its attribute's unset value.
    NotNull(String),
    /// Two template nodes must not produce equal outputs.
    OutNeq(usize, usize),
}

#[derive(Debug, Deserialize)]
struct ConstraintRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Vec<Value>,
}

impl ConstraintRecord {
    fn into_constraint(self, node_count: usize) -> Result<Constraint, ModelError> {
        let shape = |expected: &'static str| ModelError::ConstraintShape {
            kind: self.kind.clone(),
            expected,
        };
        let names = || -> Option<Vec<String>> {
            self.params
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect()
        };
        let indices = || -> Option<Vec<usize>> {
            self.params
                .iter()
                .map(|v| v.as_u64().map(|i| i as usize))
                .collect()
        };

        let constraint = match self.kind.as_str() {
            "NEQ" => match names().as_deref() {
                Some([a, b]) => Constraint::Neq(a.clone(), b.clone()),
                _ => return Err(shape("two placeholder names")),
            },
            "NULL" => match names().as_deref() {
                Some([p]) => Constraint::Null(p.clone()),
                _ => return Err(shape("one placeholder name")),
            },
            "NOT_NULL" => match names().as_deref() {
                Some([p]) => Constraint::NotNull(p.clone()),
                _ => return Err(shape("one placeholder name")),
            },
            "OUT_NEQ" => match indices().as_deref() {
                Some(&[i, j]) => {
                    if let Some(&bad) = [i, j].iter().find(|&&n| n >= node_count) {
                        return Err(ModelError::NodeOutOfRange(bad));
                    }
                    Constraint::OutNeq(i, j)
                }
                _ => return Err(shape("two template node indices")),
            },
            other => return Err(ModelError::UnknownConstraint(other.to_string())),
        };
        Ok(constraint)
    }
}

// ============================================================================
// Template
// ============================================================================

#[derive(Debug, Deserialize)]
struct TemplateFile {
    text: Vec<String>,
    nodes: Vec<NodeRecord>,
    #[serde(default)]
    constraints: Vec<ConstraintRecord>,
    #[serde(default)]
    nullable: Option<Vec<String>>,
    #[serde(default)]
    disabled: bool,
}

/// Placeholder lookups derived from a template and the metadata, computed on
/// first use and cached on the template.
#[derive(Debug, Clone, Default)]
pub struct ParamBindings {
    attributes: BTreeMap<String, String>,
    nullable: BTreeMap<String, bool>,
    macros: BTreeMap<usize, MacroParams>,
}

/// Side inputs of one composite node, split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroParams {
    /// Placeholder bound to the relationship name (relate macros only).
    pub relation: Option<String>,
    /// `(placeholder, attribute)` pairs ordered by attribute name.
    pub filters: Vec<(String, String)>,
}

impl MacroParams {
    pub fn attributes(&self) -> Vec<String> {
        self.filters.iter().map(|(_, attr)| attr.clone()).collect()
    }
}

impl ParamBindings {
    pub fn attribute(&self, placeholder: &str) -> Option<&str> {
        self.attributes.get(placeholder).map(String::as_str)
    }

    pub fn is_nullable(&self, placeholder: &str) -> bool {
        self.nullable.get(placeholder).copied().unwrap_or(false)
    }

    pub fn macro_params(&self, node: usize) -> Option<&MacroParams> {
        self.macros.get(&node)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "TemplateFile")]
pub struct Template {
    texts: Vec<String>,
    nodes: Vec<TemplateNode>,
    constraints: Vec<Constraint>,
    nullable: Option<Vec<String>>,
    disabled: bool,
    bindings: OnceLock<ParamBindings>,
}

impl TryFrom<TemplateFile> for Template {
    type Error = ModelError;

    fn try_from(file: TemplateFile) -> Result<Self, Self::Error> {
        let nodes = file
            .nodes
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_node(i))
            .collect::<Result<Vec<_>, _>>()?;
        let constraints = file
            .constraints
            .into_iter()
            .map(|c| c.into_constraint(nodes.len()))
            .collect::<Result<Vec<_>, _>>()?;
        Template::new(file.text, nodes, constraints, file.nullable, file.disabled)
    }
}

impl Template {
    pub fn new(
        texts: Vec<String>,
        nodes: Vec<TemplateNode>,
        constraints: Vec<Constraint>,
        nullable: Option<Vec<String>>,
        disabled: bool,
    ) -> Result<Self, ModelError> {
        match nodes.first() {
            None => return Err(ModelError::EmptyTemplate),
            Some(TemplateNode::Plain { inputs, .. }) if inputs.is_empty() => {}
            Some(other) => {
                return Err(ModelError::MalformedNode {
                    index: 0,
                    op: other.op(),
                    reason: "the first node must be a plain root node".to_string(),
                })
            }
        }
        if texts.is_empty() {
            return Err(ModelError::NoText);
        }

        let declared: BTreeSet<&str> = nodes
            .iter()
            .flat_map(|n| n.params())
            .map(String::as_str)
            .collect();
        for text in &texts {
            if let Some(missing) = placeholders_in_text(text).find(|p| !declared.contains(p)) {
                return Err(ModelError::UndeclaredTextPlaceholder(missing.to_string()));
            }
        }

        Ok(Self {
            texts,
            nodes,
            constraints,
            nullable,
            disabled,
            bindings: OnceLock::new(),
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_value(value: Value) -> Result<Self, ModelError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn final_op(&self) -> String {
        self.nodes.last().map(TemplateNode::op).unwrap_or_default()
    }

    /// True when the skeleton itself (not a macro expansion) contains `relate`.
    pub fn has_raw_relate(&self) -> bool {
        self.nodes.iter().any(|n| {
            matches!(n,
                TemplateNode::Plain { op, .. } | TemplateNode::Parameterized { op, .. }
                    if op == "relate")
        })
    }

    /// Whether a filter on `attribute` may be left unspecified.
    ///
    /// Templates without an explicit `nullable` list allow every attribute but
    /// the primary one. The positional attribute is always allowed: it only
    /// disambiguates within a group.
    pub fn is_attribute_nullable(&self, attribute: &str, metadata: &Metadata) -> bool {
        if metadata.positional().map(|p| p.attribute.as_str()) == Some(attribute) {
            return true;
        }
        match &self.nullable {
            Some(list) => list.iter().any(|a| a == attribute),
            None => !metadata.is_primary(attribute),
        }
    }

    pub fn bindings(&self, metadata: &Metadata) -> Result<&ParamBindings, ModelError> {
        if let Some(bindings) = self.bindings.get() {
            return Ok(bindings);
        }
        let computed = self.compute_bindings(metadata)?;
        Ok(self.bindings.get_or_init(|| computed))
    }

    fn compute_bindings(&self, metadata: &Metadata) -> Result<ParamBindings, ModelError> {
        let mut out = ParamBindings::default();

        for node in &self.nodes {
            for name in node.params() {
                let token = Placeholder::parse(name)?.base_token();
                let attribute = metadata
                    .attribute_for_placeholder(&token)
                    .ok_or_else(|| ModelError::UnknownPlaceholder(name.clone()))?;
                out.nullable.insert(
                    name.clone(),
                    self.is_attribute_nullable(attribute, metadata),
                );
                out.attributes.insert(name.clone(), attribute.to_string());
            }
        }

        let relation_attribute = metadata.relation_attribute();
        for (index, node) in self.nodes.iter().enumerate() {
            let TemplateNode::Macro { kind, params, .. } = node else {
                continue;
            };
            let malformed = |reason: String| ModelError::MalformedNode {
                index,
                op: kind.name(),
                reason,
            };

            let mut split = MacroParams::default();
            for name in params {
                let attribute = out.attributes.get(name).cloned().unwrap_or_default();
                if attribute == relation_attribute {
                    if !kind.relate {
                        return Err(malformed(format!(
                            "relationship placeholder {name} on a non-relate node"
                        )));
                    }
                    if split.relation.replace(name.clone()).is_some() {
                        return Err(malformed("more than one relationship placeholder".into()));
                    }
                } else {
                    if split.filters.iter().any(|(_, a)| *a == attribute) {
                        return Err(malformed(format!("attribute `{attribute}` filtered twice")));
                    }
                    split.filters.push((name.clone(), attribute));
                }
            }
            if kind.relate && split.relation.is_none() {
                return Err(malformed("relate node without a relationship placeholder".into()));
            }
            split.filters.sort_by(|a, b| a.1.cmp(&b.1));
            out.macros.insert(index, split);
        }

        Ok(out)
    }
}
