//! Runs one voice session from a preset until it ends or the user quits.

use crate::console::{ConsoleObserver, format_entry, format_tool_event};
use anyhow::{Context, Result};
use chrono::Utc;
use parley_core::analysis::OpenAICompatibleClient;
use parley_core::call_config::CallMedium;
use parley_core::client_tools::register_builtin;
use parley_core::poller::DEFAULT_POLL_INTERVAL;
use parley_core::presets::{InterviewLanguage, Preset};
use parley_core::prompts::PromptLibrary;
use parley_core::transport::WebSocketTransportFactory;
use parley_core::{
    AnalysisDispatcher, HttpSessionGateway, SessionController, SessionState, ToolRegistry,
    TranscriptPoller,
};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Sample rate requested for the server WebSocket medium.
const SAMPLE_RATE: u32 = 48_000;

pub struct CallOptions {
    pub preset: Preset,
    pub language: Option<String>,
    pub api_key: SecretString,
    pub base_url: String,
    pub prompts_path: PathBuf,
    pub max_duration: Option<String>,
    pub poll: bool,
    pub say: Option<String>,
    pub analysis: Option<AnalysisOptions>,
}

pub struct AnalysisOptions {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
}

/// Applies `--language` to the interview preset; other presets ignore it.
pub fn resolve_preset(preset: Preset, language: Option<&str>) -> Preset {
    match (preset, language) {
        (Preset::Interview { .. }, Some(language)) => Preset::Interview {
            language: InterviewLanguage::parse_or_default(language),
        },
        (preset, _) => preset,
    }
}

/// States after which waiting for the session to become active is over.
fn is_settled(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Active | SessionState::Ended | SessionState::Failed
    )
}

pub async fn run(options: CallOptions) -> Result<()> {
    let prompts = PromptLibrary::load(&options.prompts_path)?;
    let preset = resolve_preset(options.preset, options.language.as_deref());
    let setup = preset.build(&prompts, Utc::now())?;

    let mut call = setup.call.with_medium(CallMedium::ServerWebSocket {
        input_sample_rate: SAMPLE_RATE,
        output_sample_rate: SAMPLE_RATE,
    });
    if let Some(max_duration) = options.max_duration {
        call = call.with_max_duration(max_duration);
    }

    println!("{} | {}", setup.title, setup.overview);

    let tools = ToolRegistry::new();
    let (tool_events, mut tool_rx) = broadcast::channel(32);
    for name in register_builtin(&tools, &setup.tools, &tool_events) {
        warn!(tool = %name, "Preset names a tool with no implementation");
    }
    let tool_printer = tokio::spawn(async move {
        while let Ok(event) = tool_rx.recv().await {
            println!("{}", format_tool_event(&event));
        }
    });

    let gateway = Arc::new(HttpSessionGateway::new(
        options.base_url.clone(),
        options.api_key,
    ));
    let controller = SessionController::new(
        gateway.clone(),
        Arc::new(WebSocketTransportFactory),
        tools,
        Arc::new(ConsoleObserver::new(!options.poll)),
    );

    let call_id = controller.start(call).await?;
    info!(%call_id, preset = %preset, "Session started");

    let poller = options.poll.then(|| {
        TranscriptPoller::spawn(
            gateway.clone(),
            call_id.clone(),
            DEFAULT_POLL_INTERVAL,
            controller.subscribe_state(),
            Arc::new(ConsoleObserver::new(true)),
        )
    });

    let mut state = controller.subscribe_state();
    if let Some(text) = &options.say {
        let reached = state
            .wait_for(|s| is_settled(*s))
            .await
            .map(|s| *s)
            .unwrap_or(SessionState::Failed);
        if reached == SessionState::Active {
            controller.send_text(text).await?;
        } else {
            warn!(state = %reached, "Session never became active; not sending --say text");
        }
    }

    println!("Press Ctrl+C to end the call.");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Ending call on user request");
        }
        _ = state.wait_for(|s| matches!(s, SessionState::Ended | SessionState::Failed)) => {
            info!("Session finished remotely");
        }
    }
    controller.end().await;
    tool_printer.abort();

    let transcript = match poller {
        Some(poller) => poller.stop().await,
        None => controller.transcript(),
    };

    if let Some(analysis) = options.analysis {
        let Some(api_key) = analysis.api_key else {
            warn!("--analyze needs ANALYSIS_API_KEY; skipping analysis");
            return Ok(());
        };
        let client = OpenAICompatibleClient::with_key(
            api_key.expose_secret(),
            &analysis.base_url,
            analysis.model,
        );
        let dispatcher = match prompts.get("analysis_rubric") {
            Some(rubric) => AnalysisDispatcher::with_rubric(Arc::new(client), rubric),
            None => AnalysisDispatcher::new(Arc::new(client)),
        };

        println!("\n--- Transcript ---");
        for entry in &transcript {
            println!("{}", format_entry(entry));
        }
        let result = dispatcher.analyze(&transcript, &setup.analysis_topic).await;
        println!("\n--- Analysis ---\n{}", result.text);
        println!("\n{}", serde_json::to_string_pretty(&result.ratings)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_only_applies_to_interviews() {
        let interview = Preset::Interview {
            language: InterviewLanguage::JavaScript,
        };
        assert_eq!(
            resolve_preset(interview, Some("python")),
            Preset::Interview {
                language: InterviewLanguage::Python
            }
        );
        assert_eq!(resolve_preset(interview, None), interview);
        assert_eq!(resolve_preset(Preset::Viva, Some("python")), Preset::Viva);
    }

    #[tokio::test]
    async fn test_say_wait_ends_when_session_fails_first() {
        let (tx, mut rx) = tokio::sync::watch::channel(SessionState::Connecting);
        tokio::spawn(async move {
            tx.send_replace(SessionState::Failed);
            tx.closed().await;
        });
        let reached = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            rx.wait_for(|s| is_settled(*s)),
        )
        .await
        .unwrap()
        .map(|s| *s)
        .unwrap();
        assert_eq!(reached, SessionState::Failed);
        assert!(!is_settled(SessionState::Connecting));
        assert!(is_settled(SessionState::Active));
    }
}
