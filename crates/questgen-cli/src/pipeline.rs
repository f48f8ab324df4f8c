//! Scene-by-scene generation loop.
//!
//! Templates are keyed by `(file, index)`. Answer counters and template usage
//! counts live in one [`CounterBook`] that is reset every
//! `reset_counts_every` scenes; within a scene templates are tried least-used
//! first so the distribution over templates stays flat.

use anyhow::{anyhow, Context, Result};
use questgen_engine::{AnswerCounters, CounterBook, EngineConfig, Generator, SceneIndex};
use questgen_model::{Metadata, Scene, Synonyms, Template};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::output::QuestionFile;

/// `(template file, position in the file)`.
pub type TemplateKey = (String, usize);

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_scene_file: PathBuf,
    pub metadata_file: PathBuf,
    pub synonyms_json: Option<PathBuf>,
    pub template_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub scene_start_idx: usize,
    pub num_scenes: usize,
    pub templates_per_image: usize,
    pub instances_per_template: usize,
    pub reset_counts_every: usize,
    pub max_retries: Option<usize>,
    pub seed: u64,
    pub time_dfs: bool,
}

pub struct RunSummary {
    pub output: QuestionFile,
    pub scenes: usize,
    pub templates: usize,
    pub skipped_files: usize,
}

#[derive(Debug, Deserialize)]
struct SceneCollection {
    #[serde(default)]
    info: serde_json::Value,
    scenes: Vec<Scene>,
}

pub struct LoadedTemplates {
    pub templates: BTreeMap<TemplateKey, Template>,
    pub skipped_files: usize,
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| anyhow!("failed to read {}: {e}", path.display()))
}

/// Every `*.json` file under `dir`, walked in name order. Files that fail to
/// parse are skipped with a warning; disabled templates are dropped.
pub fn load_templates(dir: &Path) -> Result<LoadedTemplates> {
    if !dir.is_dir() {
        return Err(anyhow!("template directory {} does not exist", dir.display()));
    }

    let mut templates = BTreeMap::new();
    let mut skipped_files = 0;
    let mut disabled = 0;

    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable template directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        let parsed = read(path).and_then(|text| {
            serde_json::from_str::<Vec<Template>>(&text).map_err(anyhow::Error::from)
        });
        let family = match parsed {
            Ok(family) => family,
            Err(e) => {
                warn!(file = %name, error = %e, "could not load template file");
                skipped_files += 1;
                continue;
            }
        };

        for (index, template) in family.into_iter().enumerate() {
            if template.is_disabled() {
                disabled += 1;
                continue;
            }
            templates.insert((name.clone(), index), template);
        }
    }

    info!(
        templates = templates.len(),
        disabled, skipped_files, "read templates from disk"
    );
    Ok(LoadedTemplates {
        templates,
        skipped_files,
    })
}

fn load_config(options: &RunOptions) -> Result<EngineConfig> {
    let mut config = match &options.config {
        Some(path) => EngineConfig::from_json_str(&read(path)?)
            .with_context(|| format!("invalid engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.search.max_instances = Some(options.instances_per_template);
    if let Some(retries) = options.max_retries {
        config.search.max_retries = retries;
    }
    config.validate()?;
    Ok(config)
}

/// Counters for every template, seeded from the output type of its final node.
pub fn counter_book(
    templates: &BTreeMap<TemplateKey, Template>,
    metadata: &Metadata,
    config: &EngineConfig,
) -> Result<CounterBook<TemplateKey>> {
    let mut book = CounterBook::new();
    for (key, template) in templates {
        let counters = AnswerCounters::for_template(template, metadata, &config.counters)
            .with_context(|| format!("template {}#{}", key.0, key.1))?;
        book.insert(key.clone(), counters);
    }
    Ok(book)
}

/// `[start, start + count)`, or everything from `start` when `count` is 0.
fn scene_window(scenes: Vec<Scene>, start: usize, count: usize) -> Vec<Scene> {
    let rest = scenes.into_iter().skip(start);
    if count > 0 {
        rest.take(count).collect()
    } else {
        rest.collect()
    }
}

pub fn run(options: &RunOptions) -> Result<RunSummary> {
    let metadata = Metadata::from_json_str(&read(&options.metadata_file)?)
        .with_context(|| format!("invalid metadata {}", options.metadata_file.display()))?;
    let synonyms = match &options.synonyms_json {
        Some(path) => Synonyms::from_json_str(&read(path)?)
            .with_context(|| format!("invalid synonyms {}", path.display()))?,
        None => Synonyms::new(),
    };
    let config = load_config(options)?;
    let LoadedTemplates {
        templates,
        skipped_files,
    } = load_templates(&options.template_dir)?;

    let collection: SceneCollection = serde_json::from_str(&read(&options.input_scene_file)?)
        .with_context(|| format!("invalid scene file {}", options.input_scene_file.display()))?;
    let scenes = scene_window(
        collection.scenes,
        options.scene_start_idx,
        options.num_scenes,
    );

    let generator = Generator::new(&metadata, &synonyms, &config);
    let mut book = counter_book(&templates, &metadata, &config)?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut output = QuestionFile::new(collection.info);

    for (i, scene) in scenes.iter().enumerate() {
        info!(scene = %scene.filename, "starting scene {} / {}", i + 1, scenes.len());
        if i > 0 && i % options.reset_counts_every == 0 {
            info!("resetting counts");
            book.reset();
        }

        let scene_index = SceneIndex::new(scene, &metadata);
        let mut instantiated = 0;
        for key in book.keys_by_usage() {
            let Some(template) = templates.get(&key) else {
                continue;
            };
            let counters = book
                .answers_mut(&key)
                .ok_or_else(|| anyhow!("no counters for template {}#{}", key.0, key.1))?;

            debug!(file = %key.0, index = key.1, "trying template");
            let started = Instant::now();
            let questions = generator
                .instantiate(&scene_index, template, counters, &mut rng)
                .with_context(|| {
                    format!(
                        "template {}#{} on scene {}",
                        key.0, key.1, scene.filename
                    )
                })?;
            if options.time_dfs {
                debug!(
                    file = %key.0,
                    index = key.1,
                    elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
                    "template search finished"
                );
            }

            if questions.is_empty() {
                debug!(file = %key.0, index = key.1, "no instantiation");
            } else {
                for question in questions {
                    output.push(scene, &key.0, key.1, question);
                }
                instantiated += 1;
                book.record_usage(&key);
            }
            if instantiated >= options.templates_per_image {
                break;
            }
        }
        debug!(
            scene = %scene.filename,
            cached_indexes = scene_index.cached_indexes(),
            instantiated,
            "finished scene"
        );
    }

    Ok(RunSummary {
        output,
        scenes: scenes.len(),
        templates: templates.len(),
        skipped_files,
    })
}
