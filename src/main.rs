//! promptgrid CLI - Cross system prompts with user messages and record the replies.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promptgrid::{ChatClient, Config, SystemPromptPipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "promptgrid")]
#[command(version)]
#[command(about = "System prompt experiments against OpenAI-compatible chat endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every system prompt against every user message
    Run {
        /// Path to output JSONL file (defaults to [output].path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSONL file of system prompts, appended after inline ones
        #[arg(short, long)]
        system_prompts: Option<PathBuf>,

        /// JSONL file of user messages, appended after inline ones
        #[arg(short, long)]
        messages: Option<PathBuf>,
    },

    /// Print the conversation matrix without calling the endpoint
    Plan {
        /// JSONL file of system prompts, appended after inline ones
        #[arg(short, long)]
        system_prompts: Option<PathBuf>,

        /// JSONL file of user messages, appended after inline ones
        #[arg(short, long)]
        messages: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# promptgrid configuration file

[endpoint]
# API key (falls back to the variable named by api_key_env)
# api_key = "sk-..."
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
timeout_secs = 120

[experiment]
model = "gpt-4o-mini"
concurrency = 4

[experiment.telemetry]
enabled = false
name = "System Prompt Experiment"

[model_arguments]
temperature = 0.0
max_tokens = 256

[prompts]
system_prompts = [
    "You are a terse assistant.",
    "You are a patient teacher.",
]
human_messages = ["Hi", "Explain recursion."]
# system_prompts_file = "prompts/system.jsonl"
# human_messages_file = "prompts/messages.jsonl"

[output]
path = "output/results.jsonl"
include_failed = true
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;

            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Model: {}", config.experiment.model);
            info!("  Concurrency: {}", config.experiment.concurrency);
            info!(
                "  Inline prompts: {} system x {} user",
                config.prompts.system_prompts.len(),
                config.prompts.human_messages.len()
            );
            info!(
                "  Telemetry: {}",
                if config.experiment.telemetry.enabled {
                    config.experiment.telemetry.name.as_str()
                } else {
                    "disabled"
                }
            );
            return Ok(());
        }

        Commands::Plan {
            system_prompts,
            messages,
        } => {
            let config = load_config(&cli.config)?;
            let inputs = SystemPromptPipeline::resolve_inputs(
                &config.prompts,
                system_prompts.as_deref(),
                messages.as_deref(),
            )?;
            let matrix = SystemPromptPipeline::plan(&inputs);

            for (position, history) in matrix.histories().iter().enumerate() {
                println!(
                    "{position:>4}  [{}] x [{}]",
                    truncate(history.system_prompt().unwrap_or_default(), 40),
                    truncate(history.user_message().unwrap_or_default(), 40)
                );
            }
            println!(
                "\n{} system prompts x {} messages = {} histories ({} distinct)",
                inputs.system_prompts.len(),
                inputs.human_messages.len(),
                matrix.len(),
                matrix.index().len()
            );
        }

        Commands::Run {
            output,
            system_prompts,
            messages,
        } => {
            let config = load_config(&cli.config)?;

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let inputs = SystemPromptPipeline::resolve_inputs(
                &config.prompts,
                system_prompts.as_deref(),
                messages.as_deref(),
            )?;

            let client = Arc::new(ChatClient::from_config(&config.endpoint, api_key)?);
            let pipeline = SystemPromptPipeline::new(config, client);
            let output = output.unwrap_or_else(|| pipeline.default_output());

            let stats = pipeline.run(inputs, &output).await?;

            println!("\n=== System Prompt Experiment Complete ===");
            println!("Trials:      {}", stats.total_trials);
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Success:     {:.1}%", stats.success_rate * 100.0);
            println!("Tokens:      {} in / {} out", stats.input_tokens, stats.output_tokens);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {output:?}");
        }
    }

    Ok(())
}
