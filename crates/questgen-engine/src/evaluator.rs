//! Program evaluation.
//!
//! The search treats evaluation as an oracle: given a node sequence and a
//! scene it returns every node's output, with `None` standing for the invalid
//! sentinel. [`SceneEvaluator`] is the reference implementation over
//! [`Scene`]; callers with their own executor implement [`ProgramEvaluator`].

use std::fmt;

use questgen_model::{ObjectId, Scene};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Programs and values
// ============================================================================

/// One concrete (always primitive) node of an instantiated program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramNode {
    #[serde(rename = "type")]
    pub op: String,
    pub inputs: Vec<usize>,
    #[serde(default)]
    pub value_inputs: Vec<String>,
}

impl ProgramNode {
    pub fn new(op: impl Into<String>, inputs: Vec<usize>) -> Self {
        Self {
            op: op.into(),
            inputs,
            value_inputs: Vec::new(),
        }
    }

    pub fn with_value(op: impl Into<String>, inputs: Vec<usize>, value: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            inputs,
            value_inputs: vec![value.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Attribute(String),
    Object(ObjectId),
    ObjectSet(RoaringBitmap),
}

/// Ordered, hashable form of a final output, used to key answer counters and
/// reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Bool(bool),
    Integer(i64),
    Text(String),
    Object(ObjectId),
    Objects(Vec<ObjectId>),
}

impl From<&Value> for Answer {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Answer::Bool(*b),
            Value::Integer(i) => Answer::Integer(*i),
            Value::Attribute(s) => Answer::Text(s.clone()),
            Value::Object(o) => Answer::Object(*o),
            Value::ObjectSet(set) => Answer::Objects(set.iter().collect()),
        }
    }
}

impl Answer {
    /// Booleans become "yes"/"no"; everything else is unchanged.
    pub fn lexical(self) -> Answer {
        match self {
            Answer::Bool(true) => Answer::Text("yes".to_string()),
            Answer::Bool(false) => Answer::Text("no".to_string()),
            other => other,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Bool(b) => write!(f, "{b}"),
            Answer::Integer(i) => write!(f, "{i}"),
            Answer::Text(s) => f.write_str(s),
            Answer::Object(o) => write!(f, "#{o}"),
            Answer::Objects(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| format!("#{id}")).collect();
                write!(f, "{{{}}}", ids.join(", "))
            }
        }
    }
}

/// Per-node outputs of one program run; `None` is the invalid sentinel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    outputs: Vec<Option<Value>>,
}

impl Evaluation {
    pub fn new(outputs: Vec<Option<Value>>) -> Self {
        Self { outputs }
    }

    pub fn outputs(&self) -> &[Option<Value>] {
        &self.outputs
    }

    pub fn output(&self, node: usize) -> Option<&Value> {
        self.outputs.get(node).and_then(Option::as_ref)
    }

    /// The final node's output, `None` when it is invalid.
    pub fn answer(&self) -> Option<&Value> {
        self.outputs.last().and_then(Option::as_ref)
    }
}

// ============================================================================
// Oracles
// ============================================================================

pub trait ProgramEvaluator {
    fn evaluate(&self, program: &[ProgramNode], scene: &Scene) -> Evaluation;
}

pub trait DegeneracyOracle {
    /// Whether the question's relational premise is vacuous on this scene.
    fn is_degenerate(&self, program: &[ProgramNode], scene: &Scene, answer: &Value) -> bool;
}

/// Reference evaluator for the primitive vocabulary:
///
/// `scene`, `filter_<attr>`, `relate`, `unique`, `not_unique`, `count`,
/// `exist`, `query_<attr>`, `same_<attr>`, `equal_<attr>`, `equal_integer`,
/// `less_than`, `greater_than`, `equal_object`, `union`, `intersect`.
///
/// Unknown operations, type mismatches and invalid inputs all evaluate to the
/// invalid sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneEvaluator;

impl ProgramEvaluator for SceneEvaluator {
    fn evaluate(&self, program: &[ProgramNode], scene: &Scene) -> Evaluation {
        let mut outputs: Vec<Option<Value>> = Vec::with_capacity(program.len());
        for node in program {
            let inputs: Option<Vec<&Value>> = node
                .inputs
                .iter()
                .map(|&i| outputs.get(i).and_then(Option::as_ref))
                .collect();
            let output = inputs.and_then(|inputs| eval_node(node, &inputs, scene));
            outputs.push(output);
        }
        Evaluation::new(outputs)
    }
}

fn all_objects(scene: &Scene) -> RoaringBitmap {
    scene.object_ids().collect()
}

fn eval_node(node: &ProgramNode, inputs: &[&Value], scene: &Scene) -> Option<Value> {
    let value = node.value_inputs.first().map(String::as_str);
    let op = node.op.as_str();

    match (op, inputs) {
        ("scene", []) => return Some(Value::ObjectSet(all_objects(scene))),
        ("unique", [Value::ObjectSet(set)]) => {
            return (set.len() == 1).then(|| Value::Object(set.min().unwrap_or_default()));
        }
        ("not_unique", [Value::ObjectSet(set)]) => {
            return (set.len() > 1).then(|| Value::ObjectSet(set.clone()));
        }
        ("count", [Value::ObjectSet(set)]) => return Some(Value::Integer(set.len() as i64)),
        ("exist", [Value::ObjectSet(set)]) => return Some(Value::Bool(!set.is_empty())),
        ("relate", [Value::Object(anchor)]) => {
            let relation = value?;
            if !scene.has_relation(relation) {
                return None;
            }
            let related = scene.related(relation, *anchor).iter().copied().collect();
            return Some(Value::ObjectSet(related));
        }
        ("union", [Value::ObjectSet(a), Value::ObjectSet(b)]) => {
            return Some(Value::ObjectSet(a | b))
        }
        ("intersect", [Value::ObjectSet(a), Value::ObjectSet(b)]) => {
            return Some(Value::ObjectSet(a & b))
        }
        ("equal_integer", [Value::Integer(a), Value::Integer(b)]) => {
            return Some(Value::Bool(a == b))
        }
        ("less_than", [Value::Integer(a), Value::Integer(b)]) => return Some(Value::Bool(a < b)),
        ("greater_than", [Value::Integer(a), Value::Integer(b)]) => {
            return Some(Value::Bool(a > b))
        }
        ("equal_object", [Value::Object(a), Value::Object(b)]) => {
            return Some(Value::Bool(a == b))
        }
        _ => {}
    }

    if let Some(attribute) = op.strip_prefix("filter_") {
        let [Value::ObjectSet(set)] = inputs else {
            return None;
        };
        let matching: RoaringBitmap = scene.objects_with(attribute, value?).iter().copied().collect();
        return Some(Value::ObjectSet(set & &matching));
    }
    if let Some(attribute) = op.strip_prefix("query_") {
        let [Value::Object(id)] = inputs else {
            return None;
        };
        let found = scene.object(*id)?.get(attribute)?;
        return Some(Value::Attribute(found.to_string()));
    }
    if let Some(attribute) = op.strip_prefix("same_") {
        let [Value::Object(id)] = inputs else {
            return None;
        };
        let own = scene.object(*id)?.get(attribute)?;
        let mut same: RoaringBitmap = scene.objects_with(attribute, own).iter().copied().collect();
        same.remove(*id);
        return Some(Value::ObjectSet(same));
    }
    if op.starts_with("equal_") {
        if let [Value::Attribute(a), Value::Attribute(b)] = inputs {
            return Some(Value::Bool(a == b));
        }
    }
    None
}

/// A question is degenerate when replacing any of its `relate` nodes with a
/// `scene` node leaves the answer unchanged: the relation filtered nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelateDegeneracy<E = SceneEvaluator> {
    evaluator: E,
}

impl<E: ProgramEvaluator> RelateDegeneracy<E> {
    pub fn new(evaluator: E) -> Self {
        Self { evaluator }
    }
}

impl RelateDegeneracy<SceneEvaluator> {
    pub const fn with_scene_evaluator() -> Self {
        Self {
            evaluator: SceneEvaluator,
        }
    }
}

impl<E: ProgramEvaluator> DegeneracyOracle for RelateDegeneracy<E> {
    fn is_degenerate(&self, program: &[ProgramNode], scene: &Scene, answer: &Value) -> bool {
        program.iter().enumerate().any(|(idx, node)| {
            if node.op != "relate" {
                return false;
            }
            let mut probe = program.to_vec();
            probe[idx] = ProgramNode::new("scene", Vec::new());
            self.evaluator.evaluate(&probe, scene).answer() == Some(answer)
        })
    }
}
