use crate::error::{Result, SpeechError};
use serde::{Deserialize, Serialize};

pub mod drivers;
pub mod events;
pub mod prompt;
pub mod registry;
pub mod utterance;
pub mod voice;

pub use events::{EngineEvent, EngineNotification, Handler, HandlerRegistry, SynthState};
pub use prompt::{Prompt, PromptOptions};
pub use registry::{EngineKind, Registry};
pub use utterance::Utterance;
pub use voice::{LanguageMatch, RankedVoice, VoiceInfo};

pub const DEFAULT_RATE: u8 = 50;
pub const DEFAULT_VOLUME: u8 = 75;

/// The settings `Engine::configure` applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub voice: String,
    #[serde(default = "default_rate")]
    pub rate: i32,
    #[serde(default = "default_volume")]
    pub volume: i32,
}

fn default_rate() -> i32 {
    DEFAULT_RATE.into()
}

fn default_volume() -> i32 {
    DEFAULT_VOLUME.into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            voice: String::new(),
            rate: default_rate(),
            volume: default_volume(),
        }
    }
}

/// Validate a 0-100 percentage.
pub fn percent(value: i32) -> Option<u8> {
    u8::try_from(value).ok().filter(|v| *v <= 100)
}

/// A speech synthesizer backend.
///
/// Speaking is asynchronous: `speak` returns as soon as the native side has
/// the prompt, and progress is reported only through handlers bound with
/// `bind`. An engine is owned by one caller; it is not meant to be driven from
/// several threads at once.
pub trait Engine {
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Release native resources. Owners call this once; a second call is a no-op.
    fn close(&mut self) -> Result<()>;

    /// All installed voices, in backend order.
    fn voices(&self) -> Result<Vec<VoiceInfo>>;

    fn state(&self) -> SynthState;

    fn voice(&self) -> Result<Option<VoiceInfo>>;

    fn set_voice(&mut self, voice: &VoiceInfo) -> Result<()>;

    fn rate(&self) -> Result<u8>;

    /// Fails with `RateOutOfRange` outside 0-100, leaving the rate unchanged.
    fn set_rate(&mut self, rate: i32) -> Result<()>;

    fn volume(&self) -> Result<u8>;

    fn set_volume(&mut self, volume: i32) -> Result<()>;

    /// Compile an utterance into the backend's prompt.
    fn preprocess_utterance(&self, utterance: &Utterance) -> Prompt {
        Prompt::compile(utterance, &PromptOptions::default())
    }

    /// Hand a compiled prompt to the synthesizer and return immediately.
    fn speak_prompt(&mut self, prompt: Prompt) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Only `BookmarkReached` and `StateChanged` can be bound.
    fn bind(&mut self, event: EngineEvent, handler: Handler) -> Result<()>;

    fn speak(&mut self, utterance: &Utterance) -> Result<()> {
        let prompt = self.preprocess_utterance(utterance);
        self.speak_prompt(prompt)
    }

    /// Speak an utterance given as JSON, rejecting anything else before
    /// it reaches the synthesizer.
    fn speak_value(&mut self, value: &serde_json::Value) -> Result<()> {
        let utterance = Utterance::from_value(value)?;
        self.speak(&utterance)
    }

    /// Voices speaking `language`, exact matches first.
    fn voices_by_language(&self, language: Option<&str>) -> Result<Vec<VoiceInfo>> {
        Ok(voice::rank_voices(self.voices()?, language)
            .into_iter()
            .map(|ranked| ranked.voice)
            .collect())
    }

    fn set_voice_from_string(&mut self, voice_id: &str) -> Result<()> {
        let voice = self
            .voices()?
            .into_iter()
            .find(|v| v.id == voice_id)
            .ok_or_else(|| SpeechError::UnknownVoice(voice_id.to_string()))?;
        self.set_voice(&voice)
    }

    /// Set the best-ranked voice for `language` that the backend accepts.
    ///
    /// Enumerated voices can be stale or uninstallable, so ones that fail to
    /// set are skipped.
    fn first_settable_voice(&mut self, language: Option<&str>) -> Result<Option<VoiceInfo>> {
        for voice in self.voices_by_language(language)? {
            match self.set_voice_from_string(&voice.id) {
                Ok(()) => return Ok(Some(voice)),
                Err(e) => log::debug!("skipping voice {}: {}", voice.id, e),
            }
        }
        Ok(None)
    }

    /// Apply stored settings, falling back to defaults for anything invalid.
    fn configure(&mut self, config: &EngineConfig) {
        if !config.voice.is_empty() {
            if let Err(e) = self.set_voice_from_string(&config.voice) {
                log::warn!("{}; falling back to the first available voice", e);
                match self.first_settable_voice(None) {
                    Ok(Some(voice)) => log::info!("using voice {}", voice.id),
                    Ok(None) => log::warn!("{} has no usable voice", self.name()),
                    Err(e) => log::warn!("cannot enumerate voices: {}", e),
                }
            }
        }
        if let Err(e) = self.set_rate(config.rate) {
            log::warn!("{}; using rate {}", e, DEFAULT_RATE);
            if let Err(e) = self.set_rate(DEFAULT_RATE.into()) {
                log::warn!("{}: default rate refused: {}", self.name(), e);
            }
        }
        if let Err(e) = self.set_volume(config.volume) {
            log::warn!("{}; using volume {}", e, DEFAULT_VOLUME);
            if let Err(e) = self.set_volume(DEFAULT_VOLUME.into()) {
                log::warn!("{}: default volume refused: {}", self.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, percent};

    #[test]
    fn percent_range() {
        assert_eq!(percent(0), Some(0));
        assert_eq!(percent(100), Some(100));
        assert_eq!(percent(101), None);
        assert_eq!(percent(-1), None);
    }

    #[test]
    fn engine_config_defaults_missing_keys() {
        let config: EngineConfig = serde_json::from_str(r#"{"voice": "v1"}"#).unwrap();
        assert_eq!(
            config,
            EngineConfig {
                voice: "v1".into(),
                rate: 50,
                volume: 75,
            }
        );
    }
}
