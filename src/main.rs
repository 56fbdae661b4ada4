use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use agrospec::config::{ConfigParser, Settings};
use agrospec::data::loader::load_structured;
use agrospec::pipeline;
use agrospec::registry::Role;

#[derive(Parser, Debug)]
#[command(name = "agrospec", version, about = "Train models on multispectral field trials")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run format -> sample -> fit -> evaluate for one experiment
    Train {
        /// Experiment TOML; defaults to the file named by DATA_TOML_NAME
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sample table (.parquet, .json or .csv)
        #[arg(short, long)]
        data: PathBuf,

        /// Artifact directory, overriding the save directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the registered identifiers of a component role
    Identifiers {
        /// One of: formatter, splitter, feature-engineer, artifact-logger,
        /// cross-validator, model-method
        role: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut settings = Settings::from_env();

    match cli.command {
        Command::Train { config, data, output } => {
            if let Some(output) = output {
                settings.save_dir = output;
            }
            let config_path = config.unwrap_or_else(|| settings.toml_path());
            let cfg = ConfigParser::from_path(&config_path)
                .with_context(|| format!("loading experiment {}", config_path.display()))?;

            let mut meta_columns = cfg.formatter().classification_labels.clone();
            // stratification columns must stay metadata even when numeric
            if let Some(columns) = cfg.sampler().extra.get("stratify").and_then(|v| v.as_array()) {
                meta_columns.extend(columns.iter().filter_map(|v| v.as_str().map(str::to_string)));
            }
            let samples = load_structured(&data, &meta_columns)?;

            let report = pipeline::train(&settings, &cfg, &samples)?;
            info!("artifacts written to {}", report.output_dir.display());
            println!("partition sizes (train, val, test): {:?}", report.sizes);
            if let Some(score) = report.cv_score {
                println!("cross-validation score: {score:.4}");
            }
            for (name, value) in report.test.iter().chain(&report.train) {
                println!("{name}: {value:.4}");
            }
        }
        Command::Identifiers { role } => {
            let role: Role = role.parse()?;
            for identifier in role.identifiers() {
                println!("{identifier}");
            }
        }
    }
    Ok(())
}
