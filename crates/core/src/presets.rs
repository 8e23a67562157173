//! Ready-made call setups for the demo apps, built from prompt templates.

use crate::call_config::{CallConfiguration, FirstSpeaker};
use crate::client_tools::{
    CAPTURE_INTERVIEW_DATA, HIGHLIGHT_PRODUCT, UPDATE_ORDER, builtin_definition,
};
use crate::prompts::PromptLibrary;
use crate::transcript::Role;
use anyhow::{Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_VOICE_ID: &str = "a0998448-6810-4b44-bc90-ccb69d2a26f5";
pub const EXAMINER_VOICE_ID: &str = "91fa9bcf-93c8-467c-8b29-973720e3f167";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_LANGUAGE_HINT: &str = "en";
pub const DEFAULT_INTERVIEW_LANGUAGE: InterviewLanguage = InterviewLanguage::JavaScript;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewLanguage {
    Python,
    Java,
    JavaScript,
    CSharp,
}

impl InterviewLanguage {
    pub const ALL: [InterviewLanguage; 4] = [
        InterviewLanguage::Python,
        InterviewLanguage::Java,
        InterviewLanguage::JavaScript,
        InterviewLanguage::CSharp,
    ];

    /// Lenient lookup; unsupported languages fall back to JavaScript.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "python" => Self::Python,
            "java" => Self::Java,
            "javascript" | "js" => Self::JavaScript,
            "csharp" | "c#" => Self::CSharp,
            other => {
                warn!(language = %other, "Unsupported interview language, defaulting to JavaScript");
                DEFAULT_INTERVIEW_LANGUAGE
            }
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::JavaScript => "javascript",
            Self::CSharp => "csharp",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::Java => "Java",
            Self::JavaScript => "JavaScript",
            Self::CSharp => "C#",
        }
    }

    pub fn categories(self) -> &'static [&'static str] {
        match self {
            Self::Python => &[
                "Python_Fundamentals",
                "Web_Development",
                "Database",
                "Testing",
                "Python_Ecosystem",
            ],
            Self::Java => &[
                "Java_Fundamentals",
                "Object_Oriented_Programming",
                "Java_Collections",
                "Concurrency",
                "Java_Enterprise",
            ],
            Self::JavaScript => &[
                "JavaScript_Fundamentals",
                "DOM_Manipulation",
                "Async_Programming",
                "Frameworks",
                "Testing",
            ],
            Self::CSharp => &[
                "CSharp_Fundamentals",
                "LINQ",
                "ASP.NET",
                "Entity_Framework",
                "Windows_Forms",
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    DriveThru,
    Interview { language: InterviewLanguage },
    Viva,
}

impl FromStr for Preset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "drive-thru" | "drive_thru" | "drivethru" => Ok(Self::DriveThru),
            "interview" => Ok(Self::Interview {
                language: DEFAULT_INTERVIEW_LANGUAGE,
            }),
            "viva" => Ok(Self::Viva),
            other => bail!("Unknown preset '{other}' (expected drive-thru, interview or viva)"),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriveThru => f.write_str("drive-thru"),
            Self::Interview { language } => write!(f, "interview ({})", language.id()),
            Self::Viva => f.write_str("viva"),
        }
    }
}

/// Everything a host needs to run one of the demos.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetConfig {
    pub title: String,
    pub overview: String,
    pub session_id: String,
    pub call: CallConfiguration,
    /// Built-in client tools the host must register.
    pub tools: Vec<&'static str>,
    /// Topic handed to the analysis rubric after the call.
    pub analysis_topic: String,
}

impl Preset {
    pub const NAMES: [&'static str; 3] = ["drive-thru", "interview", "viva"];

    pub fn prompt_key(self) -> &'static str {
        match self {
            Self::DriveThru => "drive_thru",
            Self::Interview { .. } => "interview",
            Self::Viva => "viva",
        }
    }

    pub fn tools(self) -> Vec<&'static str> {
        match self {
            Self::DriveThru => vec![UPDATE_ORDER, HIGHLIGHT_PRODUCT],
            Self::Interview { .. } => vec![CAPTURE_INTERVIEW_DATA],
            Self::Viva => Vec::new(),
        }
    }

    pub fn build(self, prompts: &PromptLibrary, now: DateTime<Utc>) -> Result<PresetConfig> {
        let date = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let session_id = format!("parley-{}", now.timestamp_millis());

        let (title, overview, topic, system_prompt) = match self {
            Self::DriveThru => (
                "Drive-Thru Order Taker".to_string(),
                "Voice ordering at a fast food drive-thru".to_string(),
                "drive-thru ordering".to_string(),
                prompts.render(self.prompt_key(), &[("date", &date)])?,
            ),
            Self::Interview { language } => {
                let categories = language.categories().join(", ");
                (
                    "Technical Interview".to_string(),
                    format!("{} technical interview practice", language.display_name()),
                    language.display_name().to_string(),
                    prompts.render(
                        self.prompt_key(),
                        &[
                            ("language", language.display_name()),
                            ("categories", &categories),
                            ("date", &date),
                        ],
                    )?,
                )
            }
            Self::Viva => (
                "Medical Viva Voce".to_string(),
                "Oral examination practice for medical students".to_string(),
                "medical".to_string(),
                prompts.render(self.prompt_key(), &[("date", &date)])?,
            ),
        };

        let mut call = CallConfiguration::new(system_prompt).with_temperature(DEFAULT_TEMPERATURE);
        call.language_hint = Some(DEFAULT_LANGUAGE_HINT.to_string());
        call = match self {
            Self::DriveThru => call.with_voice(DEFAULT_VOICE_ID),
            Self::Interview { .. } => call
                .with_voice(DEFAULT_VOICE_ID)
                .with_initial_message(Role::Agent, "Hello! I'm Texika. How are you today?"),
            Self::Viva => {
                let mut call = call
                    .with_voice(EXAMINER_VOICE_ID)
                    .with_first_speaker(FirstSpeaker::Agent);
                call.recording_enabled = Some(true);
                call
            }
        };

        let tools = self.tools();
        for name in &tools {
            if let Some(definition) = builtin_definition(name) {
                call = call.with_selected_tool(definition);
            }
        }

        Ok(PresetConfig {
            title,
            overview,
            session_id,
            call,
            tools,
            analysis_topic: topic,
        })
    }
}
