//! Template Expansion Engine.
//!
//! Depth-first backtracking over [`SearchState`]s. Each popped state is
//! evaluated on the scene and checked against the template's constraints;
//! complete states then pass through rejection sampling and the degeneracy
//! oracle, incomplete ones expand the next template node into successors that
//! are pushed in random order.
//!
//! ```text
//! pop ─► evaluate ─► constraints ─► complete? ─► duplicate / sampling / degenerate ─► accept
//!                                      │
//!                                      └─► expand cursor node ─► shuffle ─► push
//! ```
//!
//! When the stack runs dry after a rejection and the instance target is not
//! met, the search reseeds from the root up to `max_retries` times.

use std::collections::BTreeMap;
use std::fmt;

use questgen_model::{
    Constraint, MacroKind, MacroParams, MacroSuffix, Metadata, ModelError, ParamBindings, Template,
    TemplateNode,
};
use rand::seq::SliceRandom;
use rand::Rng;
use roaring::RoaringBitmap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::constraints::ConstraintValidator;
use crate::counters::AnswerCounters;
use crate::error::EngineError;
use crate::evaluator::{Answer, DegeneracyOracle, Evaluation, ProgramEvaluator, Value};
use crate::filter_options::{add_empty_filter_options, find_filter_options, FilterKey};
use crate::relate_options::{find_relate_filter_options, RelateMode};
use crate::sampling::{self, SamplingVerdict};
use crate::scene_index::SceneIndex;
use crate::state::SearchState;

/// Everything one search reads but never mutates.
#[derive(Clone, Copy)]
pub struct SearchContext<'a> {
    pub scene_index: &'a SceneIndex<'a>,
    pub template: &'a Template,
    pub metadata: &'a Metadata,
    pub config: &'a EngineConfig,
    pub evaluator: &'a dyn ProgramEvaluator,
    pub oracle: &'a dyn DegeneracyOracle,
}

/// A complete instantiation that passed every gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub state: SearchState,
    pub answer: Answer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub popped: usize,
    pub rejected: usize,
    pub retries: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub accepted: Vec<Accepted>,
    pub stats: SearchStats,
}

#[derive(Debug)]
enum Rejection<'a> {
    InvalidProgram,
    Constraint(&'a Constraint),
    Duplicate,
    Sampling(SamplingVerdict),
    Degenerate,
    DeadEnd,
}

impl fmt::Display for Rejection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidProgram => f.write_str("partial program evaluates to invalid"),
            Rejection::Constraint(c) => write!(f, "constraint {c:?} violated"),
            Rejection::Duplicate => f.write_str("instantiation already accepted"),
            Rejection::Sampling(verdict) => write!(f, "rejection sampling: {verdict}"),
            Rejection::Degenerate => f.write_str("relational premise is degenerate"),
            Rejection::DeadEnd => f.write_str("node has no candidate expansions"),
        }
    }
}

pub fn search<R: Rng + ?Sized>(
    ctx: &SearchContext<'_>,
    counters: &mut AnswerCounters,
    rng: &mut R,
) -> Result<SearchOutcome, EngineError> {
    let template = ctx.template;
    let scene = ctx.scene_index.scene();
    let bindings = template.bindings(ctx.metadata)?;
    let validator = ConstraintValidator::new(template, bindings, ctx.metadata);
    let target = ctx.config.search.max_instances;
    let max_retries = ctx.config.search.max_retries;

    let root = template
        .nodes()
        .first()
        .map(|node| SearchState::root(&node.op()))
        .ok_or(ModelError::EmptyTemplate)?;

    let mut outcome = SearchOutcome::default();
    let mut stack = vec![root.clone()];
    let mut rejected_since_seed = false;

    let reject = |stats: &mut SearchStats, state: &SearchState, why: Rejection<'_>| {
        stats.rejected += 1;
        debug!(
            scene = %scene.filename,
            cursor = state.cursor(),
            nodes = state.nodes().len(),
            "skipping: {why}"
        );
    };

    loop {
        let Some(state) = stack.pop() else {
            let short = target.is_some_and(|t| outcome.accepted.len() < t);
            if rejected_since_seed && short && outcome.stats.retries < max_retries {
                outcome.stats.retries += 1;
                rejected_since_seed = false;
                debug!(retry = outcome.stats.retries, "search exhausted; reseeding from the root");
                stack.push(root.clone());
                continue;
            }
            break;
        };
        outcome.stats.popped += 1;

        let evaluation = ctx.evaluator.evaluate(state.nodes(), scene);
        let Some(output) = evaluation.answer() else {
            reject(&mut outcome.stats, &state, Rejection::InvalidProgram);
            rejected_since_seed = true;
            continue;
        };
        if let Some(constraint) = validator.first_violation(&state, &evaluation) {
            reject(&mut outcome.stats, &state, Rejection::Constraint(constraint));
            rejected_since_seed = true;
            continue;
        }

        if state.cursor() == template.nodes().len() {
            let answer = Answer::from(output);
            if outcome.accepted.iter().any(|a| a.state == state) {
                reject(&mut outcome.stats, &state, Rejection::Duplicate);
                rejected_since_seed = true;
                continue;
            }
            counters.register(&answer);
            let verdict = sampling::check(counters, &answer, &ctx.config.sampling);
            if !verdict.is_accept() {
                reject(&mut outcome.stats, &state, Rejection::Sampling(verdict));
                rejected_since_seed = true;
                continue;
            }
            if template.has_raw_relate() && ctx.oracle.is_degenerate(state.nodes(), scene, output) {
                reject(&mut outcome.stats, &state, Rejection::Degenerate);
                rejected_since_seed = true;
                continue;
            }

            counters.record(&answer);
            debug!(answer = %answer, "accepted instantiation");
            outcome.accepted.push(Accepted { state, answer });
            if target.is_some_and(|t| outcome.accepted.len() >= t) {
                break;
            }
            continue;
        }

        let mut successors = expand(ctx, bindings, &state, &evaluation, rng)?;
        if successors.is_empty() {
            reject(&mut outcome.stats, &state, Rejection::DeadEnd);
            rejected_since_seed = true;
            continue;
        }
        successors.shuffle(rng);
        stack.extend(successors);
    }

    debug!(
        scene = %scene.filename,
        accepted = outcome.accepted.len(),
        popped = outcome.stats.popped,
        rejected = outcome.stats.rejected,
        retries = outcome.stats.retries,
        "search finished"
    );
    Ok(outcome)
}

fn remap(state: &SearchState, inputs: &[usize]) -> Result<Vec<usize>, EngineError> {
    inputs
        .iter()
        .map(|&i| state.concrete_index(i).ok_or(EngineError::UnmappedNode(i)))
        .collect()
}

/// Successors of `state` for the template node at its cursor.
fn expand<R: Rng + ?Sized>(
    ctx: &SearchContext<'_>,
    bindings: &ParamBindings,
    state: &SearchState,
    evaluation: &Evaluation,
    rng: &mut R,
) -> Result<Vec<SearchState>, EngineError> {
    let cursor = state.cursor();
    let Some(node) = ctx.template.nodes().get(cursor) else {
        return Ok(Vec::new());
    };

    match node {
        TemplateNode::Plain { op, inputs } => {
            let mut next = state.successor();
            let index = next.push(op.as_str(), remap(state, inputs)?, None);
            Ok(vec![next.finish(index)])
        }
        TemplateNode::Parameterized { op, inputs, param } => {
            let attribute = bindings
                .attribute(param)
                .ok_or_else(|| EngineError::UnboundPlaceholder(param.clone()))?;
            let inputs = remap(state, inputs)?;
            let successors = ctx
                .metadata
                .values(attribute)?
                .iter()
                .map(|value| {
                    let mut next = state.successor();
                    let index = next.push(op.as_str(), inputs.clone(), Some(value.clone()));
                    next.bind(param, value.as_str());
                    next.finish(index)
                })
                .collect();
            Ok(successors)
        }
        TemplateNode::Macro { kind, input, .. } => {
            let params = bindings
                .macro_params(cursor)
                .ok_or(EngineError::MissingMacroParams(cursor))?;
            let input = state
                .concrete_index(*input)
                .ok_or(EngineError::UnmappedNode(*input))?;
            let Some(value) = evaluation.output(input) else {
                return Ok(Vec::new());
            };
            if kind.relate {
                Ok(expand_relate(ctx, bindings, state, *kind, params, input, value, rng))
            } else {
                expand_filter(ctx, bindings, state, *kind, params, input, value, rng)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn expand_filter<R: Rng + ?Sized>(
    ctx: &SearchContext<'_>,
    bindings: &ParamBindings,
    state: &SearchState,
    kind: MacroKind,
    params: &MacroParams,
    input: usize,
    value: &Value,
    rng: &mut R,
) -> Result<Vec<SearchState>, EngineError> {
    let candidates = match value {
        Value::ObjectSet(set) => set.clone(),
        Value::Object(id) => RoaringBitmap::from_iter([*id]),
        _ => return Ok(Vec::new()),
    };
    let attributes = params.attributes();
    let nullable: Vec<bool> = params
        .filters
        .iter()
        .map(|(placeholder, _)| bindings.is_nullable(placeholder))
        .collect();

    let index = ctx.scene_index.filter_index(&attributes);
    let mut options = find_filter_options(&index, &candidates, &nullable);
    let singletons = |options: &BTreeMap<FilterKey, RoaringBitmap>| {
        options.values().filter(|objects| objects.len() == 1).count()
    };
    let empties = match kind.suffix {
        MacroSuffix::None => {
            let everything: FilterKey = vec![None; attributes.len()];
            options.remove(&everything);
            singletons(&options)
        }
        MacroSuffix::Unique => {
            options.retain(|_, objects| objects.len() == 1);
            0
        }
        MacroSuffix::NotUnique => {
            options.retain(|_, objects| objects.len() > 1);
            0
        }
        MacroSuffix::Count => singletons(&options),
        MacroSuffix::Exist => options.len(),
    };
    if empties > 0 {
        add_empty_filter_options(&mut options, ctx.metadata, &attributes, &nullable, empties, rng)?;
    }

    let filters: Vec<&(String, String)> = params.filters.iter().collect();
    Ok(options
        .keys()
        .map(|key| build_chain(ctx.metadata, state, kind, input, None, &filters, key))
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn expand_relate<R: Rng + ?Sized>(
    ctx: &SearchContext<'_>,
    bindings: &ParamBindings,
    state: &SearchState,
    kind: MacroKind,
    params: &MacroParams,
    input: usize,
    value: &Value,
    rng: &mut R,
) -> Vec<SearchState> {
    let (Value::Object(anchor), Some(relation_placeholder)) = (value, params.relation.as_deref())
    else {
        return Vec::new();
    };
    let filters: Vec<&(String, String)> = params
        .filters
        .iter()
        .filter(|(_, attribute)| !attribute.starts_with("relate"))
        .collect();
    let attributes: Vec<String> = filters.iter().map(|(_, a)| a.clone()).collect();
    let nullable: Vec<bool> = filters
        .iter()
        .map(|(placeholder, _)| bindings.is_nullable(placeholder))
        .collect();

    let mode = match kind.suffix {
        MacroSuffix::Unique => RelateMode::Unique,
        MacroSuffix::NotUnique => RelateMode::NotUnique,
        MacroSuffix::Count | MacroSuffix::Exist => RelateMode::All { include_zero: true },
        MacroSuffix::None => RelateMode::All { include_zero: false },
    };
    let options = find_relate_filter_options(
        *anchor,
        ctx.scene_index,
        &attributes,
        &nullable,
        mode,
        ctx.config.relate.trivial_fraction,
        rng,
    );

    options
        .iter()
        .map(|option| {
            build_chain(
                ctx.metadata,
                state,
                kind,
                input,
                Some((relation_placeholder, option.relation.as_str())),
                &filters,
                &option.key,
            )
        })
        .collect()
}

/// `[relate] filter_<attr>* [suffix]` for one option key. Wildcard positions
/// bind their placeholder to the attribute's unset value and emit no node.
fn build_chain(
    metadata: &Metadata,
    state: &SearchState,
    kind: MacroKind,
    input: usize,
    relation: Option<(&str, &str)>,
    filters: &[&(String, String)],
    key: &FilterKey,
) -> SearchState {
    let mut next = state.successor();
    let mut current = input;

    if let Some((placeholder, relation)) = relation {
        current = next.push("relate", vec![current], Some(relation.to_string()));
        next.bind(placeholder, relation);
    }
    for ((placeholder, attribute), value) in filters.iter().map(|f| (&f.0, &f.1)).zip(key) {
        match value {
            Some(value) => {
                current = next.push(format!("filter_{attribute}"), vec![current], Some(value.clone()));
                next.bind(placeholder, value.as_str());
            }
            None => next.bind(placeholder, metadata.unset_value(attribute)),
        }
    }
    if let Some(op) = kind.suffix.op() {
        current = next.push(op, vec![current], None);
    }
    next.finish(current)
}
