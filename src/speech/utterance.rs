use super::voice::VoiceInfo;
use crate::error::{Result, SpeechError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmphSpec {
    None,
    Reduced,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSpec {
    Default,
    Silent,
    ExtraSoft,
    Soft,
    Medium,
    Loud,
    ExtraLoud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSpec {
    ExtraSlow,
    Slow,
    Medium,
    Fast,
    ExtraFast,
}

impl RateSpec {
    /// Bucket a 0-100 rate for synthesizers that only take discrete rates.
    pub fn from_percent(rate: u8) -> RateSpec {
        match rate {
            0..=20 => RateSpec::ExtraSlow,
            21..=40 => RateSpec::Slow,
            41..=60 => RateSpec::Medium,
            _ => RateSpec::Fast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseSpec {
    None,
    ExtraSmall,
    Small,
    Medium,
    Large,
    ExtraLarge,
}

/// Silence inserted into the speech stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pause {
    Strength(PauseSpec),
    Millis(u32),
}

impl From<PauseSpec> for Pause {
    fn from(spec: PauseSpec) -> Self {
        Pause::Strength(spec)
    }
}

impl From<u32> for Pause {
    fn from(ms: u32) -> Self {
        Pause::Millis(ms)
    }
}

/// Voice settings applied to part of an utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emphasis: Option<EmphSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<RateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum SpeechElement {
    Text(String),
    Sentence(String),
    Bookmark(String),
    Pause(Pause),
    Audio(PathBuf),
    StartParagraph,
    EndParagraph,
    StartStyle(SpeechStyle),
    EndStyle(SpeechStyle),
}

/// A blueprint for speaking some content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Utterance {
    #[serde(default)]
    pub priority: i32,
    pub elements: Vec<SpeechElement>,
}

impl Utterance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(priority: i32) -> Self {
        Utterance {
            priority,
            elements: Vec::new(),
        }
    }

    /// Decode an utterance that arrived as JSON (from a script, a socket, ...).
    ///
    /// Anything that does not have the shape of an utterance is rejected.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(SpeechError::InvalidUtterance(value.to_string()));
        }
        Utterance::deserialize(value).map_err(|e| SpeechError::InvalidUtterance(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn add_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(SpeechElement::Text(text.into()));
        self
    }

    pub fn add_sentence(&mut self, sentence: impl Into<String>) -> &mut Self {
        self.elements.push(SpeechElement::Sentence(sentence.into()));
        self
    }

    pub fn add_bookmark(&mut self, bookmark: impl Into<String>) -> &mut Self {
        self.elements.push(SpeechElement::Bookmark(bookmark.into()));
        self
    }

    pub fn add_pause(&mut self, pause: impl Into<Pause>) -> &mut Self {
        self.elements.push(SpeechElement::Pause(pause.into()));
        self
    }

    pub fn add_audio(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.elements.push(SpeechElement::Audio(path.into()));
        self
    }

    /// Wrap whatever `f` adds in a paragraph.
    pub fn paragraph<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&mut Utterance),
    {
        self.elements.push(SpeechElement::StartParagraph);
        f(self);
        self.elements.push(SpeechElement::EndParagraph);
        self
    }

    /// Speak whatever `f` adds with `style`.
    pub fn style<F>(&mut self, style: SpeechStyle, f: F) -> &mut Self
    where
        F: FnOnce(&mut Utterance),
    {
        self.elements.push(SpeechElement::StartStyle(style.clone()));
        f(self);
        self.elements.push(SpeechElement::EndStyle(style));
        self
    }

    /// Append the content of another utterance; its priority is ignored.
    pub fn append(&mut self, other: Utterance) -> &mut Self {
        self.elements.extend(other.elements);
        self
    }

    pub fn bookmarks(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            SpeechElement::Bookmark(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl std::ops::AddAssign for Utterance {
    fn add_assign(&mut self, other: Utterance) {
        self.append(other);
    }
}

#[cfg(test)]
mod tests {
    use super::{Pause, PauseSpec, RateSpec, SpeechElement, SpeechStyle, Utterance};
    use crate::error::SpeechError;
    use serde_json::json;

    #[test]
    fn rate_buckets() {
        assert_eq!(RateSpec::from_percent(0), RateSpec::ExtraSlow);
        assert_eq!(RateSpec::from_percent(20), RateSpec::ExtraSlow);
        assert_eq!(RateSpec::from_percent(21), RateSpec::Slow);
        assert_eq!(RateSpec::from_percent(40), RateSpec::Slow);
        assert_eq!(RateSpec::from_percent(60), RateSpec::Medium);
        assert_eq!(RateSpec::from_percent(61), RateSpec::Fast);
        assert_eq!(RateSpec::from_percent(100), RateSpec::Fast);
    }

    #[test]
    fn builders_keep_element_order() {
        let mut u = Utterance::new();
        u.paragraph(|u| {
            u.add_bookmark("b1").add_sentence("Hello. ");
        })
        .add_pause(PauseSpec::Medium)
        .style(
            SpeechStyle {
                rate: Some(RateSpec::Slow),
                ..Default::default()
            },
            |u| {
                u.add_text("slowly");
            },
        );
        assert!(matches!(u.elements[0], SpeechElement::StartParagraph));
        assert_eq!(u.elements[1], SpeechElement::Bookmark("b1".into()));
        assert!(matches!(u.elements[3], SpeechElement::EndParagraph));
        assert_eq!(
            u.elements[4],
            SpeechElement::Pause(Pause::Strength(PauseSpec::Medium))
        );
        assert!(matches!(u.elements[5], SpeechElement::StartStyle(_)));
        assert!(matches!(u.elements[7], SpeechElement::EndStyle(_)));
        assert_eq!(u.bookmarks().collect::<Vec<_>>(), ["b1"]);
    }

    #[test]
    fn add_assign_appends_other_elements() {
        let mut first = Utterance::with_priority(1);
        first.add_text("one");
        let mut second = Utterance::new();
        second.add_text("two");
        first += second;
        assert_eq!(first.priority, 1);
        assert_eq!(first.elements.len(), 2);
    }

    #[test]
    fn decodes_json_utterance() {
        let value = json!({
            "priority": 2,
            "elements": [
                {"kind": "text", "content": "hi"},
                {"kind": "pause", "content": {"millis": 250}},
                {"kind": "bookmark", "content": "end"},
            ]
        });
        let u = Utterance::from_value(&value).expect("decode utterance");
        assert_eq!(u.priority, 2);
        assert_eq!(u.elements[1], SpeechElement::Pause(Pause::Millis(250)));
    }

    #[test]
    fn rejects_values_that_are_not_utterances() {
        for value in [json!(42), json!("hello"), json!({"text": "hello"})] {
            let err = Utterance::from_value(&value).unwrap_err();
            assert!(matches!(err, SpeechError::InvalidUtterance(_)));
        }
    }
}
