//! leafdoc: entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use leafdoc::{DiagnosisEngine, LeafdocError};
use leafdoc_cli::config::{load_engine_config, ConfigOverrides};
use leafdoc_cli::render::render_outcome;

#[derive(Parser)]
#[command(
    name = "leafdoc",
    about = "Diagnose crop diseases from a leaf photo and ask follow-up questions",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Path to the classifier ONNX model.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Path to a newline-separated class label file.
    #[arg(long, global = true)]
    labels: Option<String>,

    /// Path to a disease taxonomy JSON file (defaults to the built-in one).
    #[arg(long, global = true)]
    knowledge: Option<String>,

    /// Run a single pixel encoding (signed_unit, mean_subtracted_channel_swapped, raw_byte_value).
    #[arg(long, global = true)]
    encoding: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a photo and show treatment guidance.
    Diagnose {
        /// Image file (png, jpg, webp, bmp, tiff).
        image: String,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Diagnose a photo, then answer one question about it.
    Ask {
        image: String,
        question: String,
    },

    /// Diagnose a photo, then chat about it interactively.
    Chat { image: String },

    /// List the classifier labels and whether each has a taxonomy entry.
    Labels,

    /// Inspect the disease taxonomy.
    Kb {
        /// Report labels without a canonical-key entry and exit non-zero if any.
        #[arg(long)]
        validate: bool,

        /// Look a label up the way a classification would be.
        #[arg(long)]
        lookup: Option<String>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   leafdoc completions bash > ~/.local/share/bash-completion/completions/leafdoc
    ///   leafdoc completions zsh > ~/.zfunc/_leafdoc
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "leafdoc", &mut std::io::stdout());
        return Ok(());
    }

    let overrides = ConfigOverrides {
        config: cli.config.clone(),
        model: cli.model.clone(),
        labels: cli.labels.clone(),
        knowledge: cli.knowledge.clone(),
        encoding: cli.encoding.clone(),
    };
    let engine = DiagnosisEngine::from_config(load_engine_config(&overrides)?)?;

    match cli.command {
        Commands::Diagnose { image, json } => {
            let outcome = engine.diagnose_file(&image)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{}", render_outcome(&outcome));
            }
        }

        Commands::Ask { image, question } => {
            let outcome = engine.diagnose_file(&image)?;
            let adapter = engine.augmentation_adapter();
            let mut conversation = engine.start_conversation(outcome);
            match engine.ask(&adapter, &mut conversation, &question).await {
                Ok(answer) => println!("{answer}"),
                Err(e @ LeafdocError::AugmentationNotConfigured(_)) => {
                    eprint!("{}", render_outcome(&conversation.outcome));
                    eprintln!();
                    eprintln!("Follow-up unavailable: {e}");
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Chat { image } => {
            let outcome = engine.diagnose_file(&image)?;
            let adapter = engine.augmentation_adapter();
            if !adapter.is_configured() {
                tracing::warn!("No augmentation API key set; questions will not be answered");
            }
            let mut conversation = engine.start_conversation(outcome);
            leafdoc_cli::repl::run(&engine, &adapter, &mut conversation).await?;
        }

        Commands::Labels => {
            for label in engine.labels().iter() {
                let outcome = engine.lookup(label);
                let target = outcome
                    .entry
                    .as_ref()
                    .map(|e| e.name.as_str())
                    .unwrap_or("(no entry)");
                println!("{label:<28} {target}");
            }
        }

        Commands::Kb { validate, lookup } => {
            let kb = engine.knowledge_base();

            if let Some(label) = lookup {
                let outcome = engine.lookup(&label);
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }

            println!("{} entries", kb.len());
            for entry in kb.entries() {
                println!(
                    "  {:<28} {:<26} {}",
                    entry.canonical_key.as_deref().unwrap_or("-"),
                    entry.name,
                    entry.severity
                );
            }

            if validate {
                let unkeyed: Vec<&str> = kb
                    .unkeyed_labels(engine.labels().iter())
                    .into_iter()
                    .filter(|l| !engine.lookup(l).is_healthy())
                    .collect();
                let (resolved, unresolved): (Vec<&str>, Vec<&str>) =
                    unkeyed.into_iter().partition(|l| engine.lookup(l).found);

                if !resolved.is_empty() {
                    println!("Matched by name or alias only: {}", resolved.join(", "));
                }
                if unresolved.is_empty() {
                    println!("Every label resolves to an entry.");
                } else {
                    eprintln!("Labels with no entry: {}", unresolved.join(", "));
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}
