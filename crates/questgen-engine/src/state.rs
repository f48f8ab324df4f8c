//! Search states.
//!
//! A state is an immutable snapshot: the concrete program built so far, the
//! placeholder bindings, and where each expanded template node landed in the
//! program. Successors are built from a parent through [`Successor`] and never
//! share mutable data with it.

use std::collections::BTreeMap;

use crate::evaluator::ProgramNode;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchState {
    nodes: Vec<ProgramNode>,
    values: BTreeMap<String, String>,
    /// `input_map[t]` is the concrete node holding template node `t`'s output.
    input_map: Vec<usize>,
}

impl SearchState {
    /// The state holding only the template's root node.
    pub fn root(op: &str) -> Self {
        Self {
            nodes: vec![ProgramNode::new(op, Vec::new())],
            values: BTreeMap::new(),
            input_map: vec![0],
        }
    }

    pub fn nodes(&self) -> &[ProgramNode] {
        &self.nodes
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn value(&self, placeholder: &str) -> Option<&str> {
        self.values.get(placeholder).map(String::as_str)
    }

    /// Index of the next template node to expand.
    pub fn cursor(&self) -> usize {
        self.input_map.len()
    }

    pub fn concrete_index(&self, template_node: usize) -> Option<usize> {
        self.input_map.get(template_node).copied()
    }

    pub fn successor(&self) -> Successor<'_> {
        Successor {
            parent: self,
            nodes: Vec::new(),
            values: self.values.clone(),
        }
    }
}

/// Builder for the state that follows a parent once one more template node is
/// expanded.
#[derive(Debug)]
pub struct Successor<'a> {
    parent: &'a SearchState,
    nodes: Vec<ProgramNode>,
    values: BTreeMap<String, String>,
}

impl Successor<'_> {
    /// Append a concrete node; returns its index in the full program.
    pub fn push(&mut self, op: impl Into<String>, inputs: Vec<usize>, value: Option<String>) -> usize {
        let node = match value {
            Some(value) => ProgramNode::with_value(op, inputs, value),
            None => ProgramNode::new(op, inputs),
        };
        self.nodes.push(node);
        self.parent.nodes.len() + self.nodes.len() - 1
    }

    pub fn bind(&mut self, placeholder: &str, value: impl Into<String>) {
        self.values.insert(placeholder.to_string(), value.into());
    }

    /// Record `output` as the expanded template node's result.
    pub fn finish(self, output: usize) -> SearchState {
        let mut nodes = Vec::with_capacity(self.parent.nodes.len() + self.nodes.len());
        nodes.extend_from_slice(&self.parent.nodes);
        nodes.extend(self.nodes);
        let mut input_map = self.parent.input_map.clone();
        input_map.push(output);
        SearchState {
            nodes,
            values: self.values,
            input_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successors_do_not_touch_the_parent() {
        let root = SearchState::root("scene");
        let mut next = root.successor();
        let filter = next.push("filter_color", vec![0], Some("red".into()));
        let unique = next.push("unique", vec![filter], None);
        next.bind("<C>", "red");
        let child = next.finish(unique);

        assert_eq!(root.nodes().len(), 1);
        assert_eq!(root.value("<C>"), None);
        assert_eq!(root.cursor(), 1);

        assert_eq!(child.nodes().len(), 3);
        assert_eq!(child.value("<C>"), Some("red"));
        assert_eq!(child.cursor(), 2);
        assert_eq!(child.concrete_index(1), Some(2));
        assert_eq!(child.nodes()[2].inputs, vec![1]);
    }
}
