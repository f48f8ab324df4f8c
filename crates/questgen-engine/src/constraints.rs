//! Constraint Validator.
//!
//! Checks a template's declarative constraints against a (possibly partial)
//! search state and the evaluated outputs of its program. A constraint that
//! mentions something not yet bound or not yet expanded holds vacuously.

use questgen_model::{Constraint, Metadata, ParamBindings, Template};

use crate::evaluator::Evaluation;
use crate::state::SearchState;

#[derive(Debug, Clone, Copy)]
pub struct ConstraintValidator<'a> {
    constraints: &'a [Constraint],
    bindings: &'a ParamBindings,
    metadata: &'a Metadata,
}

impl<'a> ConstraintValidator<'a> {
    pub fn new(template: &'a Template, bindings: &'a ParamBindings, metadata: &'a Metadata) -> Self {
        Self {
            constraints: template.constraints(),
            bindings,
            metadata,
        }
    }

    pub fn validate(&self, state: &SearchState, evaluation: &Evaluation) -> bool {
        self.first_violation(state, evaluation).is_none()
    }

    pub fn first_violation(
        &self,
        state: &SearchState,
        evaluation: &Evaluation,
    ) -> Option<&'a Constraint> {
        self.constraints
            .iter()
            .find(|c| !self.holds(c, state, evaluation))
    }

    fn holds(&self, constraint: &Constraint, state: &SearchState, evaluation: &Evaluation) -> bool {
        match constraint {
            Constraint::Neq(a, b) => match (state.value(a), state.value(b)) {
                (Some(x), Some(y)) => x != y,
                _ => true,
            },
            Constraint::Null(p) => state
                .value(p)
                .map_or(true, |v| v == self.unset_value(p)),
            Constraint::NotNull(p) => state
                .value(p)
                .map_or(true, |v| v != self.unset_value(p)),
            Constraint::OutNeq(i, j) => {
                let (Some(i), Some(j)) = (state.concrete_index(*i), state.concrete_index(*j))
                else {
                    return true;
                };
                evaluation.output(i) != evaluation.output(j)
            }
        }
    }

    fn unset_value(&self, placeholder: &str) -> &'a str {
        self.bindings
            .attribute(placeholder)
            .map_or("", |attribute| self.metadata.unset_value(attribute))
    }
}
