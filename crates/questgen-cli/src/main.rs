//! Questgen CLI
//!
//! Generates question/program/answer triples for every scene in a scene file:
//! loads metadata, synonyms and a directory of question templates, then runs
//! the template-instantiation engine scene by scene and writes one JSON file.

use anyhow::{anyhow, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

mod output;
mod pipeline;

#[derive(Parser)]
#[command(name = "questgen")]
#[command(
    author,
    version,
    about = "Questgen: constrained question generation over scene graphs"
)]
struct Cli {
    /// Scene file (`{ "info": ..., "scenes": [...] }`).
    #[arg(long, default_value = "scenes.json")]
    input_scene_file: PathBuf,

    /// Attribute domains, placeholder tokens and function signatures.
    #[arg(long, default_value = "metadata.json")]
    metadata_file: PathBuf,

    /// Value → alternate literal table used when rendering text.
    #[arg(long)]
    synonyms_json: Option<PathBuf>,

    /// Directory of `*.json` template files, each a JSON array.
    #[arg(long, default_value = "templates")]
    template_dir: PathBuf,

    #[arg(long, default_value = "questions.json")]
    output_questions_file: PathBuf,

    /// First scene to process; lets generation be split across workers.
    #[arg(long, default_value_t = 0)]
    scene_start_idx: usize,

    /// Number of scenes to process; 0 processes every scene from the start index.
    #[arg(long, default_value_t = 0)]
    num_scenes: usize,

    /// Distinct templates to instantiate per scene.
    #[arg(long, default_value_t = 10)]
    templates_per_image: usize,

    #[arg(long, default_value_t = 1)]
    instances_per_template: usize,

    /// Reset template and answer counts every this many scenes.
    #[arg(long, default_value_t = 250)]
    reset_counts_every: usize,

    /// Override `search.max_retries` from the engine configuration.
    #[arg(long)]
    max_retries: Option<usize>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Engine configuration JSON; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log every search decision.
    #[arg(short, long)]
    verbose: bool,

    /// Log how long each template search took (shown with --verbose).
    #[arg(long)]
    time_dfs: bool,
}

impl Cli {
    fn run_options(&self) -> Result<pipeline::RunOptions> {
        if self.templates_per_image == 0 {
            return Err(anyhow!("--templates-per-image must be positive"));
        }
        if self.reset_counts_every == 0 {
            return Err(anyhow!("--reset-counts-every must be positive"));
        }
        Ok(pipeline::RunOptions {
            input_scene_file: self.input_scene_file.clone(),
            metadata_file: self.metadata_file.clone(),
            synonyms_json: self.synonyms_json.clone(),
            template_dir: self.template_dir.clone(),
            config: self.config.clone(),
            scene_start_idx: self.scene_start_idx,
            num_scenes: self.num_scenes,
            templates_per_image: self.templates_per_image,
            instances_per_template: self.instances_per_template,
            reset_counts_every: self.reset_counts_every,
            max_retries: self.max_retries,
            seed: self.seed,
            time_dfs: self.time_dfs,
        })
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,questgen=debug,questgen_engine=debug,questgen_model=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = cli.run_options()?;
    let summary = pipeline::run(&options)?;
    output::write_questions(&cli.output_questions_file, &summary.output)?;

    eprintln!(
        "{} {} questions from {} scenes ({} templates) {} {}",
        "wrote".green().bold(),
        summary.output.questions.len(),
        summary.scenes,
        summary.templates,
        "→".yellow(),
        cli.output_questions_file.display().to_string().bold()
    );
    if summary.skipped_files > 0 {
        eprintln!(
            "{} skipped {} unreadable template file(s)",
            "info:".yellow().bold(),
            summary.skipped_files
        );
    }
    Ok(())
}
