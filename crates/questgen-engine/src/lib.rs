//! Questgen engine
//!
//! Constrained template instantiation: a depth-first backtracking search that
//! expands question templates against a scene, validates partial programs by
//! evaluating them, keeps the answer distribution flat by rejection sampling,
//! and renders accepted instantiations into text.
//!
//! Components, leaf to root:
//!
//! - [`filter_options`]: masked attribute tuple → matching objects, per scene
//! - [`relate_options`]: relationship × filter pairs around an anchor object
//! - [`constraints`]: `NEQ` / `NULL` / `NOT_NULL` / `OUT_NEQ` checks
//! - [`search`]: the expansion engine, with [`sampling`] gates and
//!   [`counters`]
//! - [`render`]: synonym substitution, optional segments, "other" agreement
//!
//! The program evaluator and degeneracy oracle are traits
//! ([`ProgramEvaluator`], [`DegeneracyOracle`]); [`SceneEvaluator`] and
//! [`RelateDegeneracy`] are the reference implementations.

pub mod config;
pub mod constraints;
pub mod counters;
pub mod error;
pub mod evaluator;
pub mod filter_options;
pub mod relate_options;
pub mod render;
pub mod sampling;
pub mod scene_index;
pub mod search;
pub mod state;

use questgen_model::{Metadata, Scene, Synonyms, Template};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

pub use config::{
    CounterConfig, EngineConfig, RelateConfig, RenderConfig, SamplingConfig, SearchConfig,
};
pub use constraints::ConstraintValidator;
pub use counters::{AnswerCounters, CounterBook};
pub use error::EngineError;
pub use evaluator::{
    Answer, DegeneracyOracle, Evaluation, ProgramEvaluator, ProgramNode, RelateDegeneracy,
    SceneEvaluator, Value,
};
pub use filter_options::{add_empty_filter_options, find_filter_options, FilterKey, FilterOptionIndex};
pub use relate_options::{find_relate_filter_options, RelateMode, RelateOption};
pub use render::TextRenderer;
pub use sampling::SamplingVerdict;
pub use scene_index::SceneIndex;
pub use search::{Accepted, SearchContext, SearchOutcome, SearchStats};
pub use state::SearchState;

static SCENE_EVALUATOR: SceneEvaluator = SceneEvaluator;
static RELATE_DEGENERACY: RelateDegeneracy = RelateDegeneracy::with_scene_evaluator();

/// One rendered question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuestion {
    pub text: String,
    pub program: Vec<ProgramNode>,
    pub answer: Answer,
}

/// Shared inputs for instantiating many templates over many scenes.
#[derive(Clone, Copy)]
pub struct Generator<'a> {
    metadata: &'a Metadata,
    synonyms: &'a Synonyms,
    config: &'a EngineConfig,
    evaluator: &'a dyn ProgramEvaluator,
    oracle: &'a dyn DegeneracyOracle,
}

impl<'a> Generator<'a> {
    /// A generator using the reference evaluator and degeneracy oracle.
    pub fn new(metadata: &'a Metadata, synonyms: &'a Synonyms, config: &'a EngineConfig) -> Self {
        Self {
            metadata,
            synonyms,
            config,
            evaluator: &SCENE_EVALUATOR,
            oracle: &RELATE_DEGENERACY,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn ProgramEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_oracle(mut self, oracle: &'a dyn DegeneracyOracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Run the search for one (scene, template) pair without rendering.
    pub fn search<R: Rng + ?Sized>(
        &self,
        scene_index: &SceneIndex<'_>,
        template: &Template,
        counters: &mut AnswerCounters,
        rng: &mut R,
    ) -> Result<SearchOutcome, EngineError> {
        let ctx = SearchContext {
            scene_index,
            template,
            metadata: self.metadata,
            config: self.config,
            evaluator: self.evaluator,
            oracle: self.oracle,
        };
        search::search(&ctx, counters, rng)
    }

    /// Search, then render every accepted instantiation.
    ///
    /// Zero questions is a valid outcome: some templates never fire on some
    /// scenes.
    pub fn instantiate<R: Rng + ?Sized>(
        &self,
        scene_index: &SceneIndex<'_>,
        template: &Template,
        counters: &mut AnswerCounters,
        rng: &mut R,
    ) -> Result<Vec<GeneratedQuestion>, EngineError> {
        let outcome = self.search(scene_index, template, counters, rng)?;
        let renderer = TextRenderer::new(self.metadata, self.synonyms, &self.config.render);

        let mut questions = Vec::with_capacity(outcome.accepted.len());
        for Accepted { state, answer } in outcome.accepted {
            let text = renderer.render(template, state.values(), rng)?;
            debug!(question = %text, answer = %answer, "rendered question");
            questions.push(GeneratedQuestion {
                text,
                program: state.nodes().to_vec(),
                answer: answer.lexical(),
            });
        }
        Ok(questions)
    }
}

/// Instantiate one template on one scene with the reference evaluator.
///
/// Builds a scene index that lives only for this call; callers instantiating
/// several templates per scene should share a [`SceneIndex`] through
/// [`Generator::instantiate`] instead.
#[allow(clippy::too_many_arguments)]
pub fn instantiate<R: Rng + ?Sized>(
    scene: &Scene,
    template: &Template,
    metadata: &Metadata,
    counters: &mut AnswerCounters,
    synonyms: &Synonyms,
    max_instances: Option<usize>,
    max_retries: usize,
    rng: &mut R,
) -> Result<Vec<GeneratedQuestion>, EngineError> {
    let config = EngineConfig {
        search: SearchConfig {
            max_instances,
            max_retries,
        },
        ..EngineConfig::default()
    };
    config.validate()?;
    let scene_index = SceneIndex::new(scene, metadata);
    Generator::new(metadata, synonyms, &config).instantiate(&scene_index, template, counters, rng)
}
