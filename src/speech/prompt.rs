use super::utterance::{
    EmphSpec, Pause, PauseSpec, RateSpec, SpeechElement, SpeechStyle, Utterance, VolumeSpec,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A run of text and the bookmarks that precede it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptChunk {
    pub bookmarks: Vec<String>,
    pub text: String,
}

/// An utterance compiled for native playback.
///
/// The SSML form is for synthesizers that understand marks; the chunked form
/// is the same content for those that only take plain strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub ssml: String,
    pub chunks: Vec<PromptChunk>,
}

#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Language written into `xml:lang`
    pub language: Option<String>,
    /// Wrap the whole prompt in this rate, for synthesizers without native rate control
    pub rate: Option<RateSpec>,
}

impl Prompt {
    pub fn compile(utterance: &Utterance, options: &PromptOptions) -> Prompt {
        let mut compiler = Compiler::default();
        let language = options.language.as_deref().unwrap_or("en");
        let _ = write!(
            compiler.ssml,
            r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="{}">"#,
            escape(language)
        );
        if let Some(rate) = options.rate {
            let _ = write!(compiler.ssml, r#"<prosody rate="{}">"#, rate_name(rate));
        }
        for element in &utterance.elements {
            compiler.element(element);
        }
        if options.rate.is_some() {
            compiler.ssml.push_str("</prosody>");
        }
        compiler.ssml.push_str("</speak>");
        compiler.finish()
    }

    /// Every bookmark in playback order.
    pub fn bookmarks(&self) -> impl Iterator<Item = &str> {
        self.chunks
            .iter()
            .flat_map(|c| c.bookmarks.iter().map(String::as_str))
    }

    pub fn text(&self) -> String {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}

#[derive(Default)]
struct Compiler {
    ssml: String,
    chunks: Vec<PromptChunk>,
    current: PromptChunk,
}

impl Compiler {
    fn element(&mut self, element: &SpeechElement) {
        match element {
            SpeechElement::Text(text) => self.text(text),
            SpeechElement::Sentence(sentence) => {
                self.ssml.push_str("<s>");
                self.text(sentence);
                self.ssml.push_str("</s>");
            }
            SpeechElement::Bookmark(name) => {
                let _ = write!(self.ssml, r#"<mark name="{}"/>"#, escape(name));
                // Bookmarks sit in front of the text that follows them.
                if !self.current.text.is_empty() {
                    self.flush();
                }
                self.current.bookmarks.push(name.clone());
            }
            SpeechElement::Pause(Pause::Strength(spec)) => {
                let _ = write!(self.ssml, r#"<break strength="{}"/>"#, pause_name(*spec));
            }
            SpeechElement::Pause(Pause::Millis(ms)) => {
                let _ = write!(self.ssml, r#"<break time="{}ms"/>"#, ms);
            }
            SpeechElement::Audio(path) => {
                let _ = write!(
                    self.ssml,
                    r#"<audio src="{}"/>"#,
                    escape(&path.to_string_lossy())
                );
            }
            SpeechElement::StartParagraph => self.ssml.push_str("<p>"),
            SpeechElement::EndParagraph => self.ssml.push_str("</p>"),
            SpeechElement::StartStyle(style) => self.start_style(style),
            SpeechElement::EndStyle(style) => self.end_style(style),
        }
    }

    fn text(&mut self, text: &str) {
        self.ssml.push_str(&escape(text));
        self.current.text.push_str(text);
    }

    fn start_style(&mut self, style: &SpeechStyle) {
        if let Some(voice) = &style.voice {
            let _ = write!(self.ssml, r#"<voice name="{}">"#, escape(&voice.name));
        }
        let mut prosody = String::new();
        if let Some(rate) = style.rate {
            let _ = write!(prosody, r#" rate="{}""#, rate_name(rate));
        }
        if let Some(volume) = style.volume {
            let _ = write!(prosody, r#" volume="{}""#, volume_name(volume));
        }
        let _ = write!(self.ssml, "<prosody{}>", prosody);
        if let Some(emphasis) = style.emphasis {
            let _ = write!(self.ssml, r#"<emphasis level="{}">"#, emph_name(emphasis));
        }
    }

    fn end_style(&mut self, style: &SpeechStyle) {
        if style.emphasis.is_some() {
            self.ssml.push_str("</emphasis>");
        }
        self.ssml.push_str("</prosody>");
        if style.voice.is_some() {
            self.ssml.push_str("</voice>");
        }
    }

    fn flush(&mut self) {
        let chunk = std::mem::take(&mut self.current);
        self.chunks.push(chunk);
    }

    fn finish(mut self) -> Prompt {
        if !self.current.text.is_empty() || !self.current.bookmarks.is_empty() {
            self.flush();
        }
        Prompt {
            ssml: self.ssml,
            chunks: self.chunks,
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn rate_name(rate: RateSpec) -> &'static str {
    match rate {
        RateSpec::ExtraSlow => "x-slow",
        RateSpec::Slow => "slow",
        RateSpec::Medium => "medium",
        RateSpec::Fast => "fast",
        RateSpec::ExtraFast => "x-fast",
    }
}

fn volume_name(volume: VolumeSpec) -> &'static str {
    match volume {
        VolumeSpec::Default => "default",
        VolumeSpec::Silent => "silent",
        VolumeSpec::ExtraSoft => "x-soft",
        VolumeSpec::Soft => "soft",
        VolumeSpec::Medium => "medium",
        VolumeSpec::Loud => "loud",
        VolumeSpec::ExtraLoud => "x-loud",
    }
}

fn emph_name(emphasis: EmphSpec) -> &'static str {
    match emphasis {
        EmphSpec::None => "none",
        EmphSpec::Reduced => "reduced",
        EmphSpec::Moderate => "moderate",
        EmphSpec::Strong => "strong",
    }
}

fn pause_name(pause: PauseSpec) -> &'static str {
    match pause {
        PauseSpec::None => "none",
        PauseSpec::ExtraSmall => "x-weak",
        PauseSpec::Small => "weak",
        PauseSpec::Medium => "medium",
        PauseSpec::Large => "strong",
        PauseSpec::ExtraLarge => "x-strong",
    }
}

#[cfg(test)]
mod tests {
    use super::{Prompt, PromptChunk, PromptOptions};
    use crate::speech::utterance::{EmphSpec, PauseSpec, RateSpec, SpeechStyle, Utterance};

    #[test]
    fn bookmarks_split_text_into_chunks() {
        let mut u = Utterance::new();
        u.add_bookmark("start")
            .add_text("One. ")
            .add_bookmark("middle")
            .add_bookmark("middle2")
            .add_text("Two.")
            .add_bookmark("end");
        let prompt = Prompt::compile(&u, &PromptOptions::default());
        assert_eq!(
            prompt.chunks,
            vec![
                PromptChunk {
                    bookmarks: vec!["start".into()],
                    text: "One. ".into()
                },
                PromptChunk {
                    bookmarks: vec!["middle".into(), "middle2".into()],
                    text: "Two.".into()
                },
                PromptChunk {
                    bookmarks: vec!["end".into()],
                    text: String::new()
                },
            ]
        );
        assert_eq!(
            prompt.bookmarks().collect::<Vec<_>>(),
            ["start", "middle", "middle2", "end"]
        );
        assert_eq!(prompt.text(), "One. Two.");
    }

    #[test]
    fn ssml_escapes_and_marks() {
        let mut u = Utterance::new();
        u.paragraph(|u| {
            u.add_bookmark("b\"1").add_sentence("Tom & Jerry <3");
        })
        .add_pause(PauseSpec::Large)
        .add_pause(300u32);
        let prompt = Prompt::compile(
            &u,
            &PromptOptions {
                language: Some("en-GB".into()),
                rate: None,
            },
        );
        assert!(prompt.ssml.starts_with("<speak "));
        assert!(prompt.ssml.contains(r#"xml:lang="en-GB""#));
        assert!(
            prompt
                .ssml
                .contains(r#"<p><mark name="b&quot;1"/><s>Tom &amp; Jerry &lt;3</s></p>"#)
        );
        assert!(prompt.ssml.contains(r#"<break strength="strong"/><break time="300ms"/>"#));
        assert!(prompt.ssml.ends_with("</speak>"));
    }

    #[test]
    fn rate_override_wraps_everything() {
        let mut u = Utterance::new();
        u.add_text("hi");
        let prompt = Prompt::compile(
            &u,
            &PromptOptions {
                language: None,
                rate: Some(RateSpec::ExtraSlow),
            },
        );
        assert!(prompt.ssml.contains(r#"<prosody rate="x-slow">hi</prosody></speak>"#));
    }

    #[test]
    fn styles_nest_properly() {
        let style = SpeechStyle {
            emphasis: Some(EmphSpec::Strong),
            rate: Some(RateSpec::Fast),
            ..Default::default()
        };
        let mut u = Utterance::new();
        u.style(style, |u| {
            u.add_text("loud");
        });
        let prompt = Prompt::compile(&u, &PromptOptions::default());
        assert!(prompt.ssml.contains(
            r#"<prosody rate="fast"><emphasis level="strong">loud</emphasis></prosody>"#
        ));
    }
}
