//! Post-call transcript analysis through an OpenAI-compatible chat API.
//!
//! The model's answer is free text; scores and the recommendation are
//! scraped from it on a best-effort basis and every score has a default.

use crate::transcript::{Role, TranscriptEntry};
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{error, info};

pub const DEFAULT_ANALYSIS_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_ANALYSIS_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const FALLBACK_ANALYSIS: &str =
    "Failed to analyze the conversation. Please check your API configuration.";
pub const DEFAULT_SCORE: u8 = 60;

/// Rubric used when no template is supplied. `{topic}` is substituted.
pub const DEFAULT_RUBRIC: &str = "You are an expert interview evaluator specializing in technical {topic} interviews.
Analyze the following interview transcript and provide a detailed assessment including:

1. Overall impression of the candidate's performance
2. Technical knowledge assessment (provide a score from 0-100)
3. Communication skills evaluation (provide a score from 0-100)
4. Problem-solving ability (provide a score from 0-100)
5. Areas of strength (bullet points)
6. Areas for improvement (bullet points)
7. Suggested follow-up questions for a future interview
8. Final recommendation (Hire, Consider, or Do Not Recommend)
9. Overall score (0-100)

Format your response with clear sections and bullet points where appropriate.
IMPORTANT: Make sure to include numerical scores (0-100) for technical knowledge, communication skills, problem-solving ability, and overall performance.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single non-streaming chat completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

/// Sampling parameters for the analysis request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_ANALYSIS_MODEL.to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 2048,
        }
    }
}

/// [`CompletionClient`] for any OpenAI-compatible API (Groq by default).
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    settings: CompletionSettings,
}

impl OpenAICompatibleClient {
    pub fn new(config: OpenAIConfig, settings: CompletionSettings) -> Self {
        Self {
            client: Client::with_config(config),
            settings,
        }
    }

    /// Client for `base_url` authenticated with `api_key`.
    pub fn with_key(api_key: &str, base_url: &str, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self::new(
            config,
            CompletionSettings {
                model: model.into(),
                ..Default::default()
            },
        )
    }
}

fn to_request_message(message: ChatMessage) -> Result<ChatCompletionRequestMessage> {
    Ok(match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
    })
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let messages = messages
            .into_iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .messages(messages)
            .temperature(self.settings.temperature)
            .top_p(self.settings.top_p)
            .max_completion_tokens(self.settings.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .context("No response choice from LLM")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Hire,
    Consider,
    #[serde(rename = "Do Not Recommend")]
    DoNotRecommend,
}

impl Recommendation {
    /// Keyword scan of the model's text; `Consider` when nothing matches.
    pub fn scan(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("hire") && !lower.contains("do not hire") {
            Self::Hire
        } else if lower.contains("not recommend") || lower.contains("do not hire") {
            Self::DoNotRecommend
        } else {
            Self::Consider
        }
    }
}

static TECHNICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)technical[^0-9]*([0-9]+)").expect("valid regex"));
static COMMUNICATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)communication[^0-9]*([0-9]+)").expect("valid regex"));
static PROBLEM_SOLVING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)problem[^0-9]*solving[^0-9]*([0-9]+)").expect("valid regex")
});
static OVERALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)overall[^0-9]*([0-9]+)").expect("valid regex"));

/// Scores found in the text, before defaults are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingScan {
    pub technical: Option<u8>,
    pub communication: Option<u8>,
    pub problem_solving: Option<u8>,
    pub overall: Option<u8>,
}

impl RatingScan {
    pub fn scan(text: &str) -> Self {
        Self {
            technical: first_score(&TECHNICAL, text),
            communication: first_score(&COMMUNICATION, text),
            problem_solving: first_score(&PROBLEM_SOLVING, text),
            overall: first_score(&OVERALL, text),
        }
    }
}

/// First labeled number, clamped into `[0, 100]`.
fn first_score(pattern: &Regex, text: &str) -> Option<u8> {
    let digits = pattern.captures(text)?.get(1)?.as_str();
    // Only overflow can make this parse fail, and that is far above 100.
    Some(digits.parse::<u64>().map_or(100, |n| n.min(100) as u8))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ratings {
    pub technical_score: u8,
    pub communication_score: u8,
    pub problem_solving: u8,
    pub overall_score: u8,
    pub recommendation: Recommendation,
}

impl Default for Ratings {
    fn default() -> Self {
        Self {
            technical_score: DEFAULT_SCORE,
            communication_score: DEFAULT_SCORE,
            problem_solving: DEFAULT_SCORE,
            overall_score: DEFAULT_SCORE,
            recommendation: Recommendation::Consider,
        }
    }
}

impl Ratings {
    pub fn extract(text: &str) -> Self {
        let scan = RatingScan::scan(text);
        Self {
            technical_score: scan.technical.unwrap_or(DEFAULT_SCORE),
            communication_score: scan.communication.unwrap_or(DEFAULT_SCORE),
            problem_solving: scan.problem_solving.unwrap_or(DEFAULT_SCORE),
            overall_score: scan.overall.unwrap_or(DEFAULT_SCORE),
            recommendation: Recommendation::scan(text),
        }
    }
}

/// Text of the section headed by `title`, up to the next blank line or
/// capitalized line.
pub fn extract_section(text: &str, title: &str) -> Option<String> {
    let header = Regex::new(&format!(r"{}[:\s]+", regex::escape(title))).ok()?;
    let start = header.find(text)?.end();
    let rest = &text[start..];

    let mut end = rest.len();
    if let Some(blank) = rest.find("\n\n") {
        end = end.min(blank);
    }
    let mut search = 0;
    while let Some(offset) = rest[search..].find('\n') {
        let newline = search + offset;
        if rest[newline + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
        {
            end = end.min(newline);
            break;
        }
        search = newline + 1;
    }

    let section = rest[..end].trim();
    (!section.is_empty()).then(|| section.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub text: String,
    pub ratings: Ratings,
}

impl Analysis {
    pub fn fallback() -> Self {
        Self {
            text: FALLBACK_ANALYSIS.to_string(),
            ratings: Ratings::default(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.text == FALLBACK_ANALYSIS
    }
}

/// Ships a finished transcript and a rubric to the completion API.
#[derive(Clone)]
pub struct AnalysisDispatcher {
    client: Arc<dyn CompletionClient>,
    rubric: String,
}

impl AnalysisDispatcher {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self::with_rubric(client, DEFAULT_RUBRIC)
    }

    pub fn with_rubric(client: Arc<dyn CompletionClient>, rubric: impl Into<String>) -> Self {
        Self {
            client,
            rubric: rubric.into(),
        }
    }

    /// System rubric followed by the non-empty conversation turns.
    pub fn build_messages(&self, entries: &[TranscriptEntry], topic: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new(
            ChatRole::System,
            self.rubric.replace("{topic}", topic),
        )];
        messages.extend(
            entries
                .iter()
                .filter(|entry| !entry.text.trim().is_empty())
                .map(|entry| {
                    let role = match entry.role {
                        Role::Agent => ChatRole::Assistant,
                        Role::User => ChatRole::User,
                    };
                    ChatMessage::new(role, entry.text.clone())
                }),
        );
        messages
    }

    /// Never fails; any error yields the fallback analysis.
    pub async fn analyze(&self, entries: &[TranscriptEntry], topic: &str) -> Analysis {
        let messages = self.build_messages(entries, topic);
        info!(%topic, turns = messages.len() - 1, "Requesting transcript analysis");

        match self.client.complete(messages).await {
            Ok(text) => {
                let ratings = Ratings::extract(&text);
                Analysis { text, ratings }
            }
            Err(e) => {
                error!(error = ?e, "Transcript analysis failed");
                Analysis::fallback()
            }
        }
    }
}
