//! Named voice profiles, one JSON file each under `voice_profiles/`.

use crate::config::SpeechConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub const PROFILE_DIR: &str = "voice_profiles";

/// Speech settings a profile overrides; anything unset keeps its current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_pause: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_pause: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_page_pause: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_section_pause: Option<u32>,
}

impl ProfileSettings {
    /// Snapshot every setting of `speech`.
    pub fn capture(speech: &SpeechConfig) -> Self {
        ProfileSettings {
            engine: Some(speech.engine.clone()),
            voice: Some(speech.voice.clone()),
            rate: Some(speech.rate),
            volume: Some(speech.volume),
            sentence_pause: Some(speech.sentence_pause),
            paragraph_pause: Some(speech.paragraph_pause),
            end_of_page_pause: Some(speech.end_of_page_pause),
            end_of_section_pause: Some(speech.end_of_section_pause),
        }
    }

    pub fn apply(&self, speech: &mut SpeechConfig) {
        if let Some(engine) = &self.engine {
            speech.engine.clone_from(engine);
        }
        if let Some(voice) = &self.voice {
            speech.voice.clone_from(voice);
        }
        speech.rate = self.rate.unwrap_or(speech.rate);
        speech.volume = self.volume.unwrap_or(speech.volume);
        speech.sentence_pause = self.sentence_pause.unwrap_or(speech.sentence_pause);
        speech.paragraph_pause = self.paragraph_pause.unwrap_or(speech.paragraph_pause);
        speech.end_of_page_pause = self.end_of_page_pause.unwrap_or(speech.end_of_page_pause);
        speech.end_of_section_pause = self
            .end_of_section_pause
            .unwrap_or(speech.end_of_section_pause);
        speech.validate();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub name: String,
    #[serde(default)]
    pub speech: ProfileSettings,
}

fn builtin_profiles() -> Vec<VoiceProfile> {
    let profile = |name: &str, rate, sentence, paragraph, page, section| VoiceProfile {
        name: name.to_string(),
        speech: ProfileSettings {
            rate: Some(rate),
            sentence_pause: Some(sentence),
            paragraph_pause: Some(paragraph),
            end_of_page_pause: Some(page),
            end_of_section_pause: Some(section),
            ..ProfileSettings::default()
        },
    };
    vec![
        profile("Human-like", 60, 250, 500, 700, 900),
        profile("Deep Reading", 60, 400, 800, 1000, 2500),
        profile("Expresse", 65, 0, 300, 500, 700),
    ]
}

/// File name for a profile, stable across renames of the directory.
pub fn profile_file_name(name: &str) -> String {
    format!("{}.json", Uuid::new_v5(&Uuid::NAMESPACE_X500, name.as_bytes()))
}

#[derive(Debug)]
pub struct VoiceProfileManager {
    dir: PathBuf,
    profiles: BTreeMap<String, VoiceProfile>,
    /// Where each profile was read from or written to
    files: BTreeMap<String, PathBuf>,
}

impl VoiceProfileManager {
    /// Open the profile directory, seeding the builtin profiles when it is new.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut manager = VoiceProfileManager {
            dir,
            profiles: BTreeMap::new(),
            files: BTreeMap::new(),
        };
        if !manager.dir.exists() {
            fs::create_dir_all(&manager.dir)
                .with_context(|| format!("create {}", manager.dir.display()))?;
            for profile in builtin_profiles() {
                manager.save(&profile)?;
            }
        }
        manager.reload()?;
        Ok(manager)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory. Unreadable profiles are skipped.
    pub fn reload(&mut self) -> Result<()> {
        self.profiles.clear();
        self.files.clear();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("list {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_profile(&path) {
                Ok(profile) => {
                    self.files.insert(profile.name.clone(), path);
                    self.profiles.insert(profile.name.clone(), profile);
                }
                Err(e) => log::warn!("skipping voice profile {}: {:#}", path.display(), e),
            }
        }
        Ok(())
    }

    pub fn profiles(&self) -> impl Iterator<Item = &VoiceProfile> {
        self.profiles.values()
    }

    pub fn get(&self, name: &str) -> Option<&VoiceProfile> {
        self.profiles.get(name)
    }

    /// Create an empty profile. Fails if one with that name exists.
    pub fn create(&mut self, name: &str) -> Result<&VoiceProfile> {
        self.create_with(name, ProfileSettings::default())
    }

    pub fn create_with(&mut self, name: &str, speech: ProfileSettings) -> Result<&VoiceProfile> {
        if name.trim().is_empty() {
            bail!("a voice profile needs a name");
        }
        if self.profiles.contains_key(name) {
            bail!("a profile with the name {} already exists", name);
        }
        let profile = VoiceProfile {
            name: name.to_string(),
            speech,
        };
        self.save(&profile)?;
        Ok(self.profiles.entry(profile.name.clone()).or_insert(profile))
    }

    pub fn save(&mut self, profile: &VoiceProfile) -> Result<()> {
        let path = match self.files.get(&profile.name) {
            Some(path) => path.clone(),
            None => self.dir.join(profile_file_name(&profile.name)),
        };
        let contents = serde_json::to_string_pretty(profile).context("serialize voice profile")?;
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        self.files.insert(profile.name.clone(), path);
        self.profiles.insert(profile.name.clone(), profile.clone());
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let Some(path) = self.files.get(name) else {
            bail!("profile {} does not exist", name);
        };
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        self.files.remove(name);
        self.profiles.remove(name);
        Ok(())
    }

    /// Apply the named profile on top of `speech`.
    pub fn activate(&self, name: &str, speech: &mut SpeechConfig) -> Result<()> {
        let Some(profile) = self.profiles.get(name) else {
            bail!("profile {} does not exist", name);
        };
        log::info!("activating voice profile {}", name);
        profile.speech.apply(speech);
        Ok(())
    }
}

fn load_profile(path: &Path) -> Result<VoiceProfile> {
    let contents = fs::read_to_string(path).context("read profile")?;
    serde_json::from_str(&contents).context("parse profile")
}

#[cfg(test)]
mod tests {
    use super::{ProfileSettings, profile_file_name};
    use crate::config::SpeechConfig;

    #[test]
    fn file_names_are_stable_uuids() {
        let name = profile_file_name("Human-like");
        assert_eq!(name, profile_file_name("Human-like"));
        assert_ne!(name, profile_file_name("Deep Reading"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), 36 + ".json".len());
    }

    #[test]
    fn unset_settings_are_kept() {
        let mut speech = SpeechConfig {
            voice: "v1".into(),
            ..SpeechConfig::default()
        };
        ProfileSettings {
            rate: Some(65),
            paragraph_pause: Some(9999),
            ..ProfileSettings::default()
        }
        .apply(&mut speech);
        assert_eq!(speech.voice, "v1");
        assert_eq!(speech.rate, 65);
        // Out of range, so back to the default.
        assert_eq!(speech.paragraph_pause, 300);
    }
}
