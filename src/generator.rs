//! Poetry and lyrics generation
//!
//! A [`GenerationRequest`] is validated, turned into a chat [`Prompt`] and
//! handed to a [`Generator`]. The server picks [`HttpGenerator`] when an
//! API key is configured and [`DisabledGenerator`] otherwise.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_THEME_CHARS: usize = 200;
pub const LINES_RANGE: (u32, u32) = (4, 20);
pub const DEFAULT_LINES: u32 = 8;
pub const DURATION_RANGE: (u32, u32) = (30, 300);
pub const DEFAULT_DURATION_SECS: u32 = 120;
pub const TEMPERATURE_RANGE: (f32, f32) = (0.1, 2.0);
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const MAX_TOKENS_RANGE: (u32, u32) = (100, 1000);
pub const DEFAULT_MAX_TOKENS: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("generation is not configured")]
    Disabled,
    #[error("generation timed out after {0} seconds")]
    Timeout(u64),
    #[error("could not reach the generation service: {0}")]
    Transport(String),
    #[error("generation service answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("generation service returned no text")]
    EmptyResponse,
}

impl GenerateError {
    /// Text safe to show on the page
    ///
    /// Service responses and transport details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            GenerateError::Invalid(reason) => reason.clone(),
            GenerateError::Disabled => {
                "Generation is turned off on this server (no API key configured).".to_string()
            }
            GenerateError::Timeout(secs) => format!(
                "The generation service did not answer within {} seconds. Please try again.",
                secs
            ),
            GenerateError::Transport(_) => {
                "The generation service could not be reached. Please try again later.".to_string()
            }
            GenerateError::Status { status, .. } if *status == 401 || *status == 403 => {
                "The generation service rejected the server's API key.".to_string()
            }
            GenerateError::Status { status, .. } if *status == 429 => {
                "The generation service is busy. Please wait a moment and try again.".to_string()
            }
            GenerateError::Status { .. } => {
                "The generation service reported an error. Please try again later.".to_string()
            }
            GenerateError::EmptyResponse => {
                "The generation service returned an empty answer. Please try again.".to_string()
            }
        }
    }
}

/// Unrecognised choice in a form value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownChoice {
    kind: &'static str,
    value: String,
}

macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => ($slug:literal, $label:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Value used in forms and URLs
            pub fn slug(self) -> &'static str {
                match self {
                    $($name::$variant => $slug),+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = UnknownChoice;

            /// Accepts the slug or the label, ignoring case
            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let value = value.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|choice| {
                        choice.slug().eq_ignore_ascii_case(value)
                            || choice.label().eq_ignore_ascii_case(value)
                    })
                    .ok_or_else(|| UnknownChoice {
                        kind: $kind,
                        value: value.to_string(),
                    })
            }
        }
    };
}

choice_enum! {
    /// What to generate
    GenerationKind, "generation mode" {
        Poem => ("poem", "Poetry"),
        Song => ("song", "Music"),
        Fusion => ("fusion", "Poetry + Music"),
    }
}

choice_enum! {
    PoetryForm, "poetry form" {
        Sonnet => ("sonnet", "Sonnet"),
        Ghazal => ("ghazal", "Ghazal"),
        FreeVerse => ("free-verse", "Free Verse"),
        Haiku => ("haiku", "Haiku"),
        Custom => ("custom", "Custom"),
    }
}

choice_enum! {
    MusicStyle, "music style" {
        RabindraSangeet => ("rabindra-sangeet", "Rabindra Sangeet"),
        Folk => ("folk", "Folk"),
        Classical => ("classical", "Classical"),
        Modern => ("modern", "Modern"),
        Fusion => ("fusion", "Fusion"),
    }
}

choice_enum! {
    /// Language of the generated text
    Language, "language" {
        Bengali => ("bengali", "Bengali"),
        English => ("english", "English"),
        Both => ("both", "Both"),
    }
}

impl Language {
    fn instruction(self) -> &'static str {
        match self {
            Language::Bengali => {
                "Write it in Bengali script, without translation or transliteration."
            }
            Language::English => "Write it in English, keeping the imagery of Bengali poetry.",
            Language::Both => {
                "Write it in Bengali script, then give an English translation under the heading \"English\"."
            }
        }
    }
}

impl GenerationKind {
    pub fn uses_form(self) -> bool {
        matches!(self, GenerationKind::Poem | GenerationKind::Fusion)
    }

    pub fn uses_style(self) -> bool {
        matches!(self, GenerationKind::Song | GenerationKind::Fusion)
    }
}

impl PoetryForm {
    fn instruction(self) -> &'static str {
        match self {
            PoetryForm::Sonnet => "a sonnet with a steady metre and rhyme scheme",
            PoetryForm::Ghazal => "a ghazal of couplets that share a refrain",
            PoetryForm::FreeVerse => "a free-verse poem without fixed metre or rhyme",
            PoetryForm::Haiku => "a sequence of haiku-like three-line stanzas",
            PoetryForm::Custom => "a poem in whatever form best suits the theme",
        }
    }
}

impl MusicStyle {
    fn instruction(self) -> &'static str {
        match self {
            MusicStyle::RabindraSangeet => {
                "a song in the manner of Rabindra Sangeet, with sthayi, antara, sanchari and abhog sections"
            }
            MusicStyle::Folk => "a Bengali folk song in the baul or bhatiyali tradition",
            MusicStyle::Classical => "a classical bandish with a short refrain",
            MusicStyle::Modern => "a modern Bengali song (adhunik gaan) with verses and a chorus",
            MusicStyle::Fusion => "a fusion song that blends Bengali tradition with contemporary music",
        }
    }
}

/// Sampling parameters passed to the model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> Result<(), GenerateError> {
        let (low, high) = TEMPERATURE_RANGE;
        if !(low..=high).contains(&self.temperature) {
            return Err(GenerateError::Invalid(format!(
                "Creativity must be between {} and {}.",
                low, high
            )));
        }
        check_range("Max tokens", self.max_tokens, MAX_TOKENS_RANGE)
    }
}

fn check_range(what: &str, value: u32, (low, high): (u32, u32)) -> Result<(), GenerateError> {
    if (low..=high).contains(&value) {
        Ok(())
    } else {
        Err(GenerateError::Invalid(format!(
            "{} must be between {} and {}.",
            what, low, high
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub form: PoetryForm,
    pub style: MusicStyle,
    pub theme: String,
    pub lines: u32,
    pub duration_secs: u32,
    pub raga: String,
    pub tala: String,
    pub language: Language,
    pub settings: ModelSettings,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind) -> Self {
        GenerationRequest {
            kind,
            form: PoetryForm::FreeVerse,
            style: MusicStyle::RabindraSangeet,
            theme: String::new(),
            lines: DEFAULT_LINES,
            duration_secs: DEFAULT_DURATION_SECS,
            raga: String::new(),
            tala: String::new(),
            language: Language::Bengali,
            settings: ModelSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), GenerateError> {
        let theme = self.theme.trim();
        if theme.chars().count() > MAX_THEME_CHARS {
            return Err(GenerateError::Invalid(format!(
                "The theme may be at most {} characters long.",
                MAX_THEME_CHARS
            )));
        }
        if self.kind.uses_form() {
            if self.form == PoetryForm::Custom && theme.is_empty() {
                return Err(GenerateError::Invalid(
                    "A custom poem needs a theme.".to_string(),
                ));
            }
            check_range("Poem length", self.lines, LINES_RANGE)?;
        }
        if self.kind.uses_style() {
            check_range("Duration", self.duration_secs, DURATION_RANGE)?;
        }
        for (what, value) in [("Raga", &self.raga), ("Tala", &self.tala)] {
            if value.trim().chars().count() > MAX_THEME_CHARS {
                return Err(GenerateError::Invalid(format!(
                    "{} may be at most {} characters long.",
                    what, MAX_THEME_CHARS
                )));
            }
        }
        self.settings.validate()
    }

    /// Build the chat prompt for this request
    pub fn prompt(&self) -> Prompt {
        let mut user = String::new();
        let theme = self.theme.trim();

        match self.kind {
            GenerationKind::Poem => {
                user.push_str(&format!(
                    "Write {}, {} lines long.",
                    self.form.instruction(),
                    self.lines
                ));
            }
            GenerationKind::Song => {
                user.push_str(&format!(
                    "Write the lyrics of {}, about {} seconds long when sung.",
                    self.style.instruction(),
                    self.duration_secs
                ));
            }
            GenerationKind::Fusion => {
                user.push_str(&format!(
                    "First write {}, {} lines long, under the heading \"কবিতা\". \
                     Then, under the heading \"গান\", turn it into the lyrics of {}, \
                     about {} seconds long when sung.",
                    self.form.instruction(),
                    self.lines,
                    self.style.instruction(),
                    self.duration_secs
                ));
            }
        }

        user.push(' ');
        user.push_str(self.language.instruction());

        if !theme.is_empty() {
            user.push_str(&format!("\nTheme: {}", theme));
        }
        if self.kind.uses_style() {
            if !self.raga.trim().is_empty() {
                user.push_str(&format!("\nRaga: {}", self.raga.trim()));
            }
            if !self.tala.trim().is_empty() {
                user.push_str(&format!("\nTala: {}", self.tala.trim()));
            }
        }

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

const SYSTEM_PROMPT: &str = "You are a Bengali poet and lyricist steeped in the tradition of \
Rabindranath Tagore. Answer only with the requested text, without commentary.";

/// A chat prompt: system instructions plus the user's request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, GenerateError>> + Send + 'a>>;

/// Something that turns a prompt into text
pub trait Generator: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a Prompt, settings: &'a ModelSettings) -> GenerateFuture<'a>;

    /// Short name for logs and the admin page
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when no API key is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGenerator;

impl Generator for DisabledGenerator {
    fn generate<'a>(&'a self, _prompt: &'a Prompt, _settings: &'a ModelSettings) -> GenerateFuture<'a> {
        Box::pin(async { Err::<String, _>(GenerateError::Disabled) })
    }

    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Always answers with the same text
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    text: String,
}

impl StaticGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        StaticGenerator { text: text.into() }
    }
}

impl Default for StaticGenerator {
    fn default() -> Self {
        StaticGenerator::new(
            "সকালের আলোয় জেগে উঠে\nনতুন দিনের স্বপ্ন নিয়ে\nবাংলার মাটিতে বাঙালির হৃদয়\nগান গায় প্রাণের সুরে",
        )
    }
}

impl Generator for StaticGenerator {
    fn generate<'a>(&'a self, _prompt: &'a Prompt, _settings: &'a ModelSettings) -> GenerateFuture<'a> {
        Box::pin(async move { Ok::<_, GenerateError>(self.text.clone()) })
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(feature = "web")]
pub use remote::{HttpGenerator, generator_for};

#[cfg(feature = "web")]
mod remote {
    use std::sync::Arc;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::{DisabledGenerator, GenerateError, GenerateFuture, Generator, ModelSettings, Prompt};
    use crate::config::LlmConfig;

    /// Client for an OpenAI-compatible chat completions endpoint
    pub struct HttpGenerator {
        client: reqwest::Client,
        endpoint: String,
        api_key: String,
        model: String,
        timeout: Duration,
    }

    #[derive(Serialize)]
    struct ChatRequest<'a> {
        model: &'a str,
        messages: [ChatMessage<'a>; 2],
        temperature: f32,
        max_tokens: u32,
    }

    #[derive(Serialize)]
    struct ChatMessage<'a> {
        role: &'static str,
        content: &'a str,
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        #[serde(default)]
        choices: Vec<ChatChoice>,
    }

    #[derive(Deserialize)]
    struct ChatChoice {
        message: ChatReply,
    }

    #[derive(Deserialize)]
    struct ChatReply {
        #[serde(default)]
        content: Option<String>,
    }

    impl HttpGenerator {
        pub fn new(
            base_url: &str,
            api_key: impl Into<String>,
            model: impl Into<String>,
            timeout: Duration,
        ) -> Result<Self, GenerateError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GenerateError::Transport(e.to_string()))?;

            Ok(HttpGenerator {
                client,
                endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
                api_key: api_key.into(),
                model: model.into(),
                timeout,
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn complete(&self, prompt: &Prompt, settings: &ModelSettings) -> Result<String, GenerateError> {
            let body = ChatRequest {
                model: &self.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: &prompt.system,
                    },
                    ChatMessage {
                        role: "user",
                        content: &prompt.user,
                    },
                ],
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
            };

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if !status.is_success() {
                let message: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(200)
                    .collect();
                return Err(GenerateError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            let reply: ChatResponse = response.json().await.map_err(|e| self.transport_error(e))?;
            reply
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or(GenerateError::EmptyResponse)
        }

        fn transport_error(&self, error: reqwest::Error) -> GenerateError {
            if error.is_timeout() {
                GenerateError::Timeout(self.timeout.as_secs())
            } else {
                GenerateError::Transport(error.to_string())
            }
        }
    }

    impl Generator for HttpGenerator {
        fn generate<'a>(&'a self, prompt: &'a Prompt, settings: &'a ModelSettings) -> GenerateFuture<'a> {
            Box::pin(async move {
                let started = std::time::Instant::now();
                let result = self.complete(prompt, settings).await;
                match &result {
                    Ok(text) => tracing::info!(
                        model = %self.model,
                        chars = text.chars().count(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "generation finished"
                    ),
                    Err(error) => tracing::warn!(model = %self.model, %error, "generation failed"),
                }
                result
            })
        }

        fn name(&self) -> &'static str {
            "http"
        }
    }

    /// Pick the generator the configuration asks for
    pub fn generator_for(config: &LlmConfig) -> Result<Arc<dyn Generator>, GenerateError> {
        match &config.api_key {
            Some(api_key) => {
                let generator =
                    HttpGenerator::new(&config.base_url, api_key, &config.model, config.timeout)?;
                tracing::info!(endpoint = generator.endpoint(), model = %config.model, "generation enabled");
                Ok(Arc::new(generator))
            }
            None => {
                tracing::info!("no API key configured; generation disabled");
                Ok(Arc::new(DisabledGenerator))
            }
        }
    }
}
