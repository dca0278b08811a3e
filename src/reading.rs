//! Turning page text into utterances for continuous reading.
//!
//! Positions are character offsets into the page, the unit text controls
//! report carets in.

use crate::config::Pauses;
use crate::speech::Utterance;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A paragraph or sentence and where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub pos: usize,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.pos + self.text.chars().count()
    }
}

/// A span of page text with its structure worked out.
#[derive(Debug, Clone)]
pub struct TextInfo {
    text: String,
    start_pos: usize,
    language: String,
    paragraphs: Vec<Segment>,
}

impl TextInfo {
    /// `start_pos` is where `text` begins on the page.
    pub fn new(text: impl Into<String>, start_pos: usize, language: impl Into<String>) -> Self {
        let text = text.into();
        let paragraphs = split_paragraphs(&text, start_pos);
        TextInfo {
            text,
            start_pos,
            language: language.into(),
            paragraphs,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn start_pos(&self) -> usize {
        self.start_pos
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Non-blank lines.
    pub fn paragraphs(&self) -> &[Segment] {
        &self.paragraphs
    }

    pub fn sentences(&self) -> Vec<Segment> {
        self.paragraphs
            .iter()
            .flat_map(|p| sentence_segments(&p.text, p.pos))
            .collect()
    }

    /// Where fast-forward and rewind may land.
    pub fn paragraph_markers(&self) -> Vec<usize> {
        self.paragraphs.iter().map(|p| p.pos).collect()
    }

    pub fn sentence_markers(&self) -> Vec<usize> {
        self.sentences().iter().map(|s| s.pos).collect()
    }
}

fn split_paragraphs(text: &str, start_pos: usize) -> Vec<Segment> {
    let mut paragraphs = Vec::new();
    let mut pos = start_pos;
    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        let content = line.trim_end_matches(['\r', '\n']);
        if !content.trim().is_empty() {
            paragraphs.push(Segment {
                text: content.to_string(),
                pos,
            });
        }
        pos += len;
    }
    paragraphs
}

/// Sentences of `text`, without surrounding whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split_sentence_bounds()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn sentence_segments(text: &str, start_pos: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut chars_before = 0;
    let mut last_byte = 0;
    for (byte, sentence) in text.split_sentence_bound_indices() {
        chars_before += text[last_byte..byte].chars().count();
        last_byte = byte;
        let leading = sentence.len() - sentence.trim_start().len();
        let trimmed = sentence.trim();
        if trimmed.is_empty() {
            continue;
        }
        segments.push(Segment {
            text: trimmed.to_string(),
            pos: start_pos + chars_before + sentence[..leading].chars().count(),
        });
    }
    segments
}

/// What a reading bookmark marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadingBookmark {
    /// A paragraph starts being spoken
    StartSegment { pos: usize, end: usize },
    /// The last paragraph of a page is done
    EndPage { current: usize },
    /// The end-of-section announcement is done
    NextSection,
}

impl ReadingBookmark {
    /// A bookmark name safe to put in SSML.
    pub fn encode(&self) -> String {
        // Serializing this enum cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE.encode(json)
    }

    /// `None` for bookmarks that are not ours.
    pub fn decode(name: &str) -> Option<ReadingBookmark> {
        let json = URL_SAFE.decode(name).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

/// Build the utterance reading `info`, appended to `prefix`.
///
/// `end_page` is the page number to report once the text is done; pass `None`
/// when reading stops with this page.
pub fn page_utterance(
    info: &TextInfo,
    pauses: &Pauses,
    end_page: Option<usize>,
    mut prefix: Utterance,
) -> Utterance {
    for paragraph in info.paragraphs() {
        let bookmark = ReadingBookmark::StartSegment {
            pos: paragraph.pos,
            end: paragraph.end(),
        };
        prefix.paragraph(|u| {
            u.add_bookmark(bookmark.encode());
            for sentence in split_sentences(&paragraph.text) {
                u.add_sentence(format!("{} ", sentence));
                if pauses.sentence > 0 {
                    u.add_pause(pauses.sentence);
                }
            }
            u.add_pause(pauses.paragraph);
        });
    }
    if let Some(current) = end_page {
        prefix
            .add_pause(pauses.end_of_page)
            .add_bookmark(ReadingBookmark::EndPage { current }.encode());
    }
    prefix
}

/// The first marker after `caret`, or the last one.
pub fn next_marker(markers: &[usize], caret: usize) -> Option<usize> {
    let index = markers.partition_point(|m| *m <= caret);
    markers.get(index).or(markers.last()).copied()
}

/// The last marker before `caret`, or the first one.
pub fn previous_marker(markers: &[usize], caret: usize) -> Option<usize> {
    let index = markers.partition_point(|m| *m < caret);
    markers.get(index.saturating_sub(1)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::utterance::{Pause, SpeechElement};

    const PAGE: &str = "First one. Second one.\n\n  Café au lait?\r\nLast line";

    #[test]
    fn paragraphs_skip_blank_lines_and_count_chars() {
        let info = TextInfo::new(PAGE, 10, "en");
        let paragraphs = info.paragraphs();
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].pos, 10);
        assert_eq!(paragraphs[1].text, "  Café au lait?");
        assert_eq!(paragraphs[1].pos, 10 + 24);
        assert_eq!(paragraphs[1].end(), 10 + 24 + 15);
        assert_eq!(paragraphs[2].pos, 10 + 24 + 17);
        assert_eq!(info.paragraph_markers(), [10, 34, 51]);
    }

    #[test]
    fn sentences_know_their_positions() {
        let info = TextInfo::new(PAGE, 0, "en");
        let sentences = info.sentences();
        let texts = sentences.iter().map(|s| s.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, ["First one.", "Second one.", "Café au lait?", "Last line"]);
        assert_eq!(info.sentence_markers(), [0, 11, 26, 41]);
    }

    #[test]
    fn bookmarks_survive_encoding() {
        let bookmark = ReadingBookmark::StartSegment { pos: 4, end: 20 };
        let name = bookmark.encode();
        assert!(!name.contains(['"', '<', '&', '/', '+']));
        assert_eq!(ReadingBookmark::decode(&name), Some(bookmark));
        assert_eq!(ReadingBookmark::decode("plain-bookmark"), None);
    }

    #[test]
    fn page_utterance_marks_every_paragraph() {
        let info = TextInfo::new(PAGE, 0, "en");
        let pauses = Pauses {
            sentence: 0,
            paragraph: 300,
            end_of_page: 500,
            end_of_section: 900,
        };
        let u = page_utterance(&info, &pauses, Some(3), Utterance::new());
        let bookmarks = u
            .bookmarks()
            .filter_map(ReadingBookmark::decode)
            .collect::<Vec<_>>();
        assert_eq!(
            bookmarks,
            [
                ReadingBookmark::StartSegment { pos: 0, end: 22 },
                ReadingBookmark::StartSegment { pos: 24, end: 39 },
                ReadingBookmark::StartSegment { pos: 41, end: 50 },
                ReadingBookmark::EndPage { current: 3 },
            ]
        );
        assert!(!u.elements.contains(&SpeechElement::Pause(Pause::Millis(0))));
        assert_eq!(
            u.elements[u.elements.len() - 2],
            SpeechElement::Pause(Pause::Millis(500))
        );
    }

    #[test]
    fn sentence_pauses_only_when_set() {
        let info = TextInfo::new("A. B.", 0, "en");
        let pauses = Pauses {
            sentence: 250,
            ..Pauses::default()
        };
        let u = page_utterance(&info, &pauses, None, Utterance::new());
        let count = u
            .elements
            .iter()
            .filter(|e| **e == SpeechElement::Pause(Pause::Millis(250)))
            .count();
        assert_eq!(count, 2);
        assert!(u.bookmarks().all(|b| !matches!(
            ReadingBookmark::decode(b),
            Some(ReadingBookmark::EndPage { .. })
        )));
    }

    #[test]
    fn marker_navigation_clamps() {
        let markers = [0, 10, 20];
        assert_eq!(next_marker(&markers, 0), Some(10));
        assert_eq!(next_marker(&markers, 5), Some(10));
        assert_eq!(next_marker(&markers, 20), Some(20));
        assert_eq!(previous_marker(&markers, 15), Some(10));
        assert_eq!(previous_marker(&markers, 10), Some(0));
        assert_eq!(previous_marker(&markers, 0), Some(0));
        assert_eq!(next_marker(&[], 3), None);
        assert_eq!(previous_marker(&[], 3), None);
    }
}
