use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Neutral,
}

/// A synthesizer voice, as enumerated by an engine.
///
/// Built fresh on every enumeration. `data` carries whatever the backend needs
/// to select the voice again (a native handle, a token, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// How well a voice's language matches a requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageMatch {
    /// The whole tag matches, ignoring case
    Exact,
    /// Only the primary subtag matches ("en" of "en-GB" for "en-US")
    PrimarySubtag,
}

impl LanguageMatch {
    pub fn rank(self) -> u8 {
        match self {
            LanguageMatch::Exact => 0,
            LanguageMatch::PrimarySubtag => 1,
        }
    }
}

impl VoiceInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        VoiceInfo {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            language: language.into(),
            gender: None,
            age: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }

    pub fn language_match(&self, language: &str) -> Option<LanguageMatch> {
        let own = self.language.to_lowercase();
        let wanted = language.to_lowercase();
        if own == wanted {
            return Some(LanguageMatch::Exact);
        }
        if !wanted.is_empty() && primary_subtag(&own) == primary_subtag(&wanted) {
            return Some(LanguageMatch::PrimarySubtag);
        }
        None
    }

    pub fn speaks_language(&self, language: &str) -> bool {
        self.language_match(language).is_some()
    }
}

/// Language tags are written with either separator in the wild ("en-US", "en_US").
fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

/// A voice paired with its match rank; lower ranks are better.
///
/// Ordering looks at the rank only, never at the voice itself.
#[derive(Debug, Clone)]
pub struct RankedVoice {
    pub voice: VoiceInfo,
    pub rank: u8,
}

impl PartialEq for RankedVoice {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for RankedVoice {}

impl PartialOrd for RankedVoice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedVoice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

/// Keep the voices that speak `language`, best matches first.
///
/// With no language every voice is kept with rank 0, in enumeration order.
/// Voices of equal rank keep their enumeration order.
pub fn rank_voices<I>(voices: I, language: Option<&str>) -> Vec<RankedVoice>
where
    I: IntoIterator<Item = VoiceInfo>,
{
    let mut ranked = voices
        .into_iter()
        .filter_map(|voice| match language {
            None => Some(RankedVoice { voice, rank: 0 }),
            Some(language) => voice
                .language_match(language)
                .map(|m| RankedVoice {
                    voice,
                    rank: m.rank(),
                }),
        })
        .collect::<Vec<_>>();
    ranked.sort();
    ranked
}

#[cfg(test)]
mod tests {
    use super::{LanguageMatch, VoiceInfo, rank_voices};

    fn voice(id: &str, language: &str) -> VoiceInfo {
        VoiceInfo::new(id, id.to_uppercase(), language)
    }

    #[test]
    fn exact_tag_matches_ignoring_case() {
        let v = voice("v1", "en-US");
        assert_eq!(v.language_match("EN-us"), Some(LanguageMatch::Exact));
        assert!(v.speaks_language("en-US"));
    }

    #[test]
    fn primary_subtag_matches_rank_one() {
        let v = voice("v2", "en-GB");
        assert_eq!(v.language_match("en-US"), Some(LanguageMatch::PrimarySubtag));
        assert_eq!(v.language_match("en"), Some(LanguageMatch::PrimarySubtag));
        assert_eq!(LanguageMatch::PrimarySubtag.rank(), 1);
    }

    #[test]
    fn bare_primary_tag_voice_is_exact_for_bare_query() {
        let v = voice("v4", "en");
        assert_eq!(v.language_match("en"), Some(LanguageMatch::Exact));
        assert_eq!(v.language_match("en-AU"), Some(LanguageMatch::PrimarySubtag));
    }

    #[test]
    fn other_languages_do_not_match() {
        let v = voice("v3", "fr-FR");
        assert_eq!(v.language_match("en-US"), None);
        assert!(!v.speaks_language("en"));
        assert!(!v.speaks_language(""));
    }

    #[test]
    fn ranked_exact_matches_come_first() {
        let voices = vec![
            voice("v2", "en-GB"),
            voice("v3", "fr-FR"),
            voice("v1", "en-US"),
            voice("v5", "en-CA"),
        ];
        let ranked = rank_voices(voices, Some("en-US"));
        let ids = ranked.iter().map(|r| r.voice.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["v1", "v2", "v5"]);
        assert!(ranked.windows(2).all(|w| w[0].rank <= w[1].rank));
    }

    #[test]
    fn no_language_keeps_everything_in_order() {
        let voices = vec![voice("a", "de-DE"), voice("b", "ar-EG")];
        let ranked = rank_voices(voices, None);
        let ids = ranked.iter().map(|r| r.voice.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn display_name_prefers_description() {
        let mut v = voice("v1", "en-US");
        assert_eq!(v.display_name(), "V1");
        v.description = "Microsoft David".into();
        assert_eq!(v.display_name(), "Microsoft David");
    }
}
