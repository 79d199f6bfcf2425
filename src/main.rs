use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use medscan_svm::config::{load_config_with_warnings, Config, ConfigFormat};
use medscan_svm::logging::{init_logging, new_correlation_id, LoggingConfig};
use medscan_svm::visualization::{print_metrics, print_patch_votes, print_report, print_training_outcome, HeatmapRenderer};
use medscan_svm::{ClassificationService, DatasetLoader};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medscan")]
#[command(about = "Linear SVM classification and heatmaps for medical images")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from a class-per-directory dataset
    Train {
        /// Dataset root; each subdirectory is one class
        dataset: PathBuf,

        /// Train the patch model instead of the whole-image model
        #[arg(short, long)]
        patch: bool,

        /// Train both models
        #[arg(short, long, conflicts_with = "patch")]
        both: bool,
    },

    /// Classify one image
    Classify {
        image: PathBuf,

        #[arg(short, long)]
        patch: bool,

        /// Include diagnosis text and stored model metrics
        #[arg(short, long)]
        report: bool,
    },

    /// Render a heatmap PNG for one image
    Heatmap {
        image: PathBuf,

        #[arg(short, long)]
        patch: bool,

        /// Output PNG file
        #[arg(short, long, default_value = "heatmap.png")]
        output: PathBuf,

        /// Render the difference against a second image instead
        #[arg(long)]
        compare_to: Option<PathBuf>,
    },

    /// Evaluate a model against a labelled dataset
    Evaluate {
        dataset: PathBuf,

        #[arg(short, long)]
        patch: bool,
    },

    /// Show the stored metrics of a model
    Metrics {
        #[arg(short, long)]
        patch: bool,
    },

    /// Count patch predictions per class for one image
    Votes { image: PathBuf },

    /// Write the default configuration to a file
    InitConfig {
        #[arg(default_value = "medscan.toml")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "toml")]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Toml,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, config_warnings) =
        load_config_with_warnings(cli.config.as_ref().and_then(|p| p.to_str()));
    apply_verbosity(&mut config.logging, cli.verbose);
    init_logging(&config.logging).context("Failed to initialize logging")?;
    new_correlation_id();
    for warning in &config_warnings {
        tracing::warn!("{}", warning);
    }

    if let Commands::InitConfig { output, format } = &cli.command {
        let format = match format {
            Format::Toml => ConfigFormat::Toml,
            Format::Json => ConfigFormat::Json,
        };
        Config::default()
            .save_to_file(output, format)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", output.display(), e))?;
        println!("Default configuration written to {}", output.display());
        return Ok(());
    }

    let service = ClassificationService::with_local_store(config.clone())
        .context("Failed to create the classification service")?;
    service.load_models();

    match cli.command {
        Commands::Train { dataset, patch, both } => {
            let flags: &[bool] = if both { &[false, true] } else if patch { &[true] } else { &[false] };
            for &is_patch in flags {
                let outcome = service
                    .train_from_directory(&dataset, is_patch)
                    .with_context(|| format!("Training failed on {}", dataset.display()))?;
                print_training_outcome(&outcome);
            }
        }
        Commands::Classify { image, patch, report } => {
            if report {
                let report = service
                    .analyze(&image, patch)
                    .with_context(|| format!("Failed to analyze {}", image.display()))?;
                print_report(&report);
            } else {
                let label = service
                    .classify(&image, patch)
                    .with_context(|| format!("Failed to classify {}", image.display()))?;
                let info = ClassificationService::diagnosis_for(label);
                println!("Predicted class: {}", label);
                println!("Diagnosis: {}", info.diagnosis);
            }
        }
        Commands::Heatmap { image, patch, output, compare_to } => {
            let rendered = match compare_to {
                Some(other) => service.generate_difference_heatmap(&image, &other, patch),
                None => service.generate_heatmap(&image, patch),
            }
            .with_context(|| format!("Failed to render a heatmap for {}", image.display()))?;

            let png = HeatmapRenderer::encode_png(&rendered)?;
            std::fs::write(&output, png)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Heatmap saved to {}", output.display());
        }
        Commands::Evaluate { dataset, patch } => {
            let data = DatasetLoader::from_config(&config.dataset)
                .load(&dataset)
                .with_context(|| format!("Failed to load dataset {}", dataset.display()))?;
            let metrics = service.evaluate(&data.images, &data.labels, patch)?;
            print_metrics(&metrics);
        }
        Commands::Metrics { patch } => {
            let metrics = service
                .load_metrics(patch)
                .context("No stored metrics; train the model first")?;
            print_metrics(&metrics);
        }
        Commands::Votes { image } => {
            let votes = service
                .patch_pathologies(&image)
                .with_context(|| format!("Failed to score patches of {}", image.display()))?;
            print_patch_votes(&votes);
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn apply_verbosity(logging: &mut LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => return,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    logging.global_level = level.to_string();
    logging.training_level = level.to_string();
    logging.inference_level = level.to_string();
    logging.storage_level = level.to_string();
}
