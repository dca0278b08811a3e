//! `speech.json`: the persisted speech and reading settings.

use crate::speech::{DEFAULT_RATE, DEFAULT_VOLUME, EngineConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const PARAGRAPH_PAUSE_MAX: u32 = 5000;
pub const END_OF_PAGE_PAUSE_MAX: u32 = 7000;
pub const END_OF_SECTION_PAUSE_MAX: u32 = 9000;

const CONFIG_FILE: &str = "speech.json";

/// Where Bookworm keeps its settings, `$XDG_CONFIG_HOME/bookworm` and the like.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("no configuration directory on this system")?;
    Ok(base.join("bookworm"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Engine name; empty picks the first available one.
    pub engine: String,
    pub voice: String,
    pub rate: i32,
    pub volume: i32,
    pub sentence_pause: u32,
    pub paragraph_pause: u32,
    pub end_of_page_pause: u32,
    pub end_of_section_pause: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        SpeechConfig {
            engine: String::new(),
            voice: String::new(),
            rate: DEFAULT_RATE.into(),
            volume: DEFAULT_VOLUME.into(),
            sentence_pause: 0,
            paragraph_pause: 300,
            end_of_page_pause: 500,
            end_of_section_pause: 900,
        }
    }
}

impl SpeechConfig {
    /// Reset pauses beyond their maximum to the default.
    ///
    /// Rate and volume are left alone; `Engine::configure` deals with those.
    pub fn validate(&mut self) {
        let defaults = SpeechConfig::default();
        let checks: [(&str, &mut u32, u32, u32); 4] = [
            (
                "sentence_pause",
                &mut self.sentence_pause,
                PARAGRAPH_PAUSE_MAX,
                defaults.sentence_pause,
            ),
            (
                "paragraph_pause",
                &mut self.paragraph_pause,
                PARAGRAPH_PAUSE_MAX,
                defaults.paragraph_pause,
            ),
            (
                "end_of_page_pause",
                &mut self.end_of_page_pause,
                END_OF_PAGE_PAUSE_MAX,
                defaults.end_of_page_pause,
            ),
            (
                "end_of_section_pause",
                &mut self.end_of_section_pause,
                END_OF_SECTION_PAUSE_MAX,
                defaults.end_of_section_pause,
            ),
        ];
        for (name, value, max, default) in checks {
            if *value > max {
                log::warn!("{} of {}ms exceeds {}ms, using {}ms", name, value, max, default);
                *value = default;
            }
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            voice: self.voice.clone(),
            rate: self.rate,
            volume: self.volume,
        }
    }

    pub fn pauses(&self) -> Pauses {
        Pauses {
            sentence: self.sentence_pause,
            paragraph: self.paragraph_pause,
            end_of_page: self.end_of_page_pause,
            end_of_section: self.end_of_section_pause,
        }
    }
}

/// Pause lengths in milliseconds, zero meaning none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pauses {
    pub sentence: u32,
    pub paragraph: u32,
    pub end_of_page: u32,
    pub end_of_section: u32,
}

impl Default for Pauses {
    fn default() -> Self {
        SpeechConfig::default().pauses()
    }
}

/// How far continuous reading goes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Keep going across sections
    #[default]
    Continuous,
    /// Stop at the end of the current section
    Section,
    /// Stop at the end of the current page
    Page,
}

impl ReadingMode {
    pub fn crosses_pages(self) -> bool {
        self != ReadingMode::Page
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    #[default]
    Caret,
    PageStart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    pub reading_mode: ReadingMode,
    pub start_reading_from: StartFrom,
    pub speak_page_number: bool,
    pub highlight_spoken_text: bool,
    pub select_spoken_text: bool,
    pub play_end_of_section_sound: bool,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        ReadingConfig {
            reading_mode: ReadingMode::default(),
            start_reading_from: StartFrom::default(),
            speak_page_number: false,
            highlight_spoken_text: true,
            select_spoken_text: false,
            play_end_of_section_sound: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// A program speaking the speech server protocol on stdio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_program: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub reading: ReadingConfig,
    pub backends: BackendConfig,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(CONFIG_FILE))
    }

    /// Load `path`, or the defaults when it does not exist yet.
    pub fn load(path: &Path) -> Result<Config> {
        let mut config: Config = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{} does not exist, using defaults", path.display());
                Config::default()
            }
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        config.speech.validate();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, contents).with_context(|| format!("write {}", path.display()))
    }
}
