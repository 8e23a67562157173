mod call;
mod console;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use parley_core::analysis::{DEFAULT_ANALYSIS_BASE_URL, DEFAULT_ANALYSIS_MODEL};
use parley_core::gateway::DEFAULT_BASE_URL;
use parley_core::presets::{InterviewLanguage, Preset};
use parley_core::prompts::PromptLibrary;
use parley_core::HttpSessionGateway;
use secrecy::SecretString;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::call::{AnalysisOptions, CallOptions};

/// Parley - run voice-agent demo sessions from the terminal
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ProviderArgs {
    /// Voice provider API key
    #[arg(long, env = "ULTRAVOX_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Voice provider REST base URL
    #[arg(long, env = "ULTRAVOX_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a call from a preset and print statuses and transcript
    Call {
        /// Preset to run [drive-thru, interview, viva]
        #[arg(short, long, default_value = "interview")]
        preset: Preset,

        /// Interview language [python, java, javascript, csharp]
        #[arg(short, long)]
        language: Option<String>,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Prompt templates directory
        #[arg(long, env = "PROMPTS_PATH", default_value = "./prompts")]
        prompts: PathBuf,

        /// Maximum call duration in seconds (e.g. 600 or 600s)
        #[arg(long)]
        max_duration: Option<String>,

        /// Fetch the transcript by polling instead of the live data channel
        #[arg(long)]
        poll: bool,

        /// Text message to send once the call is active
        #[arg(long)]
        say: Option<String>,

        /// Analyze the transcript after the call ends
        #[arg(long)]
        analyze: bool,

        /// API key for the analysis completion endpoint
        #[arg(long, env = "ANALYSIS_API_KEY", hide_env_values = true)]
        analysis_key: Option<String>,

        /// OpenAI-compatible base URL for analysis
        #[arg(long, env = "ANALYSIS_BASE_URL", default_value = DEFAULT_ANALYSIS_BASE_URL)]
        analysis_base_url: String,

        /// Model used for analysis
        #[arg(long, env = "ANALYSIS_MODEL", default_value = DEFAULT_ANALYSIS_MODEL)]
        analysis_model: String,
    },

    /// List the available presets
    Presets {
        /// Prompt templates directory
        #[arg(long, env = "PROMPTS_PATH", default_value = "./prompts")]
        prompts: PathBuf,
    },

    /// Check a provider API key and show the account it belongs to
    ValidateKey {
        #[command(flatten)]
        provider: ProviderArgs,
    },
}

fn list_presets(prompts_path: &std::path::Path) {
    let prompts = PromptLibrary::load(prompts_path).unwrap_or_default();
    for name in Preset::NAMES {
        let Ok(preset) = name.parse::<Preset>() else {
            continue;
        };
        let template = if prompts.get(preset.prompt_key()).is_some() {
            "ok"
        } else {
            "missing"
        };
        println!(
            "{name:<12} prompt {}.md ({template}), tools: [{}]",
            preset.prompt_key(),
            preset.tools().join(", ")
        );
    }
    let languages: Vec<&str> = InterviewLanguage::ALL.iter().map(|l| l.id()).collect();
    println!("interview languages: {}", languages.join(", "));
}

async fn validate_key(provider: ProviderArgs) -> Result<()> {
    let gateway = HttpSessionGateway::new(provider.base_url, SecretString::from(provider.api_key));
    let account = gateway.validate_key().await?;
    println!("Key is valid.");
    println!("{}", serde_json::to_string_pretty(&account)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Call {
            preset,
            language,
            provider,
            prompts,
            max_duration,
            poll,
            say,
            analyze,
            analysis_key,
            analysis_base_url,
            analysis_model,
        } => {
            call::run(CallOptions {
                preset,
                language,
                api_key: SecretString::from(provider.api_key),
                base_url: provider.base_url,
                prompts_path: prompts,
                max_duration,
                poll,
                say,
                analysis: analyze.then(|| AnalysisOptions {
                    api_key: analysis_key.map(SecretString::from),
                    base_url: analysis_base_url,
                    model: analysis_model,
                }),
            })
            .await
        }
        Commands::Presets { prompts } => {
            list_presets(&prompts);
            Ok(())
        }
        Commands::ValidateKey { provider } => validate_key(provider).await,
    };

    if let Err(e) = result {
        error!(error = ?e, "Command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
