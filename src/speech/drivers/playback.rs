//! Chunk bookkeeping for synthesizers that speak one plain string at a time.
//!
//! A chunk is queued before it is handed to the synthesizer and only learns
//! its utterance id afterwards. Callbacks for an id that is not known yet are
//! held until the id is assigned, so a synthesizer that reports from its own
//! thread cannot outrun the queue.

use super::NativeEvent;
use crate::speech::{SynthState, prompt::PromptChunk};
use std::collections::VecDeque;

pub struct Segment<Id> {
    serial: u64,
    id: Option<Id>,
    bookmarks: Vec<String>,
    text: String,
    /// Bookmarks with no text after them, fired once this segment ends
    trailing: Vec<String>,
    started: bool,
}

impl<Id> From<PromptChunk> for Segment<Id> {
    fn from(chunk: PromptChunk) -> Self {
        Segment {
            serial: 0,
            id: None,
            bookmarks: chunk.bookmarks,
            text: chunk.text,
            trailing: Vec::new(),
            started: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Begin,
    End,
}

pub struct Playback<Id> {
    segments: VecDeque<Segment<Id>>,
    paused: Vec<Segment<Id>>,
    early: Vec<(Id, Mark)>,
    next_serial: u64,
    state: i64,
}

impl<Id> Default for Playback<Id> {
    fn default() -> Self {
        Playback {
            segments: VecDeque::new(),
            paused: Vec::new(),
            early: Vec::new(),
            next_serial: 0,
            state: SynthState::Idle.native_code(),
        }
    }
}

impl<Id: Copy + PartialEq> Playback<Id> {
    pub fn state(&self) -> i64 {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == SynthState::Paused.native_code()
    }

    fn set_state(&mut self, state: SynthState, events: &mut Vec<NativeEvent>) {
        let code = state.native_code();
        if self.state != code {
            self.state = code;
            events.push(NativeEvent::StateChanged(code));
        }
    }

    /// Queue segments and return `(serial, text)` for each one to speak.
    ///
    /// Blank segments carry their bookmarks over to the segment before them,
    /// or fire right away when nothing precedes them.
    pub fn enqueue(
        &mut self,
        segments: Vec<Segment<Id>>,
        events: &mut Vec<NativeEvent>,
    ) -> Vec<(u64, String)> {
        let mut queued: Vec<Segment<Id>> = Vec::with_capacity(segments.len());
        for mut segment in segments {
            if segment.text.trim().is_empty() {
                match queued.last_mut() {
                    Some(previous) => {
                        previous.trailing.append(&mut segment.bookmarks);
                        previous.trailing.append(&mut segment.trailing);
                    }
                    None => events.extend(
                        segment
                            .bookmarks
                            .drain(..)
                            .chain(segment.trailing.drain(..))
                            .map(NativeEvent::BookmarkReached),
                    ),
                }
                continue;
            }
            self.next_serial += 1;
            segment.serial = self.next_serial;
            segment.id = None;
            queued.push(segment);
        }
        let pending = queued
            .iter()
            .map(|s| (s.serial, s.text.clone()))
            .collect::<Vec<_>>();
        self.segments.extend(queued);
        let state = if self.segments.is_empty() {
            SynthState::Idle
        } else {
            SynthState::Speaking
        };
        self.set_state(state, events);
        pending
    }

    /// Record the id the synthesizer gave a queued segment.
    ///
    /// `None` means the synthesizer will never report on it, so the segment
    /// counts as spoken.
    pub fn assign(&mut self, serial: u64, id: Option<Id>, events: &mut Vec<NativeEvent>) {
        let Some(segment) = self.segments.iter_mut().find(|s| s.serial == serial) else {
            return;
        };
        match id {
            Some(id) => {
                segment.id = Some(id);
                let (held, rest) = std::mem::take(&mut self.early)
                    .into_iter()
                    .partition::<Vec<_>, _>(|(early, _)| *early == id);
                self.early = rest;
                for (id, mark) in held {
                    match mark {
                        Mark::Begin => self.begin(id, events),
                        Mark::End => self.end(id, events),
                    }
                }
            }
            None => {
                let position = self.segments.iter().position(|s| s.serial == serial);
                if let Some(segment) = position.and_then(|i| self.segments.remove(i)) {
                    events.extend(
                        segment
                            .bookmarks
                            .into_iter()
                            .chain(segment.trailing)
                            .map(NativeEvent::BookmarkReached),
                    );
                }
                if self.segments.is_empty() {
                    self.set_state(SynthState::Idle, events);
                }
            }
        }
        if !self.has_unassigned() {
            self.early.clear();
        }
    }

    /// Drop segments the synthesizer never accepted.
    pub fn discard_unassigned(&mut self, events: &mut Vec<NativeEvent>) {
        self.segments.retain(|s| s.id.is_some());
        self.early.clear();
        if self.segments.is_empty() {
            self.set_state(SynthState::Idle, events);
        }
    }

    fn has_unassigned(&self) -> bool {
        self.segments.iter().any(|s| s.id.is_none())
    }

    pub fn begin(&mut self, id: Id, events: &mut Vec<NativeEvent>) {
        let Some(segment) = self.segments.iter_mut().find(|s| s.id == Some(id)) else {
            if self.has_unassigned() {
                self.early.push((id, Mark::Begin));
            }
            return;
        };
        if !segment.started {
            segment.started = true;
            events.extend(segment.bookmarks.iter().cloned().map(NativeEvent::BookmarkReached));
        }
        self.set_state(SynthState::Speaking, events);
    }

    pub fn end(&mut self, id: Id, events: &mut Vec<NativeEvent>) {
        let Some(index) = self.segments.iter().position(|s| s.id == Some(id)) else {
            // Either not assigned yet, or stopped and no longer ours.
            if self.has_unassigned() {
                self.early.push((id, Mark::End));
            }
            return;
        };
        for segment in self.segments.drain(..=index) {
            events.extend(segment.trailing.into_iter().map(NativeEvent::BookmarkReached));
        }
        if self.segments.is_empty() {
            self.set_state(SynthState::Idle, events);
        }
    }

    /// Forget everything queued and move to `next`; returns what was unfinished.
    pub fn stop(&mut self, next: SynthState, events: &mut Vec<NativeEvent>) -> Vec<Segment<Id>> {
        self.early.clear();
        let unfinished = self.segments.drain(..).collect();
        self.set_state(next, events);
        unfinished
    }

    pub fn hold(&mut self, segments: impl IntoIterator<Item = Segment<Id>>) {
        self.paused.extend(segments);
    }

    pub fn clear_held(&mut self) {
        self.paused.clear();
    }

    /// The held segments, ready to queue again.
    pub fn take_held(&mut self) -> Vec<Segment<Id>> {
        std::mem::take(&mut self.paused)
            .into_iter()
            .map(|mut segment| {
                // Its bookmarks already fired before the pause.
                if segment.started {
                    segment.bookmarks.clear();
                    segment.started = false;
                }
                segment.id = None;
                segment
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{NativeEvent, Playback, Segment};
    use crate::speech::{SynthState, prompt::PromptChunk};

    fn segments(chunks: &[(&[&str], &str)]) -> Vec<Segment<u32>> {
        chunks
            .iter()
            .map(|(bookmarks, text)| {
                Segment::from(PromptChunk {
                    text: text.to_string(),
                    bookmarks: bookmarks.iter().map(|b| b.to_string()).collect(),
                })
            })
            .collect()
    }

    fn bookmark(name: &str) -> NativeEvent {
        NativeEvent::BookmarkReached(name.to_string())
    }

    const SPEAKING: i64 = 1;
    const IDLE: i64 = 0;

    #[test]
    fn callbacks_before_the_id_is_known_are_replayed() {
        let mut playback = Playback::<u32>::default();
        let mut events = Vec::new();
        let pending =
            playback.enqueue(segments(&[(&["a"], "short"), (&["end"], "")]), &mut events);
        assert_eq!(events, [NativeEvent::StateChanged(SPEAKING)]);
        assert_eq!(pending.len(), 1);

        // The synthesizer's thread finishes the utterance before speak returns.
        events.clear();
        playback.begin(7, &mut events);
        playback.end(7, &mut events);
        assert!(events.is_empty());
        assert_eq!(playback.state(), SPEAKING);

        playback.assign(pending[0].0, Some(7), &mut events);
        assert_eq!(
            events,
            [bookmark("a"), bookmark("end"), NativeEvent::StateChanged(IDLE)]
        );
        assert_eq!(playback.state(), IDLE);
    }

    #[test]
    fn callbacks_for_stopped_utterances_are_ignored() {
        let mut playback = Playback::<u32>::default();
        let mut events = Vec::new();
        let pending = playback.enqueue(segments(&[(&[], "one")]), &mut events);
        playback.assign(pending[0].0, Some(1), &mut events);
        playback.stop(SynthState::Idle, &mut events);
        events.clear();
        playback.begin(1, &mut events);
        playback.end(1, &mut events);
        assert!(events.is_empty());
        assert_eq!(playback.state(), IDLE);
    }

    #[test]
    fn untracked_utterances_count_as_spoken() {
        let mut playback = Playback::<u32>::default();
        let mut events = Vec::new();
        let pending = playback.enqueue(segments(&[(&["a"], "one")]), &mut events);
        events.clear();
        playback.assign(pending[0].0, None, &mut events);
        assert_eq!(events, [bookmark("a"), NativeEvent::StateChanged(IDLE)]);
    }

    #[test]
    fn resumed_segments_do_not_refire_bookmarks() {
        let mut playback = Playback::<u32>::default();
        let mut events = Vec::new();
        let pending =
            playback.enqueue(segments(&[(&["a"], "one"), (&["b"], "two")]), &mut events);
        for (serial, id) in pending.iter().map(|p| p.0).zip([1, 2]) {
            playback.assign(serial, Some(id), &mut events);
        }
        playback.begin(1, &mut events);
        let unfinished = playback.stop(SynthState::Paused, &mut events);
        playback.hold(unfinished);

        events.clear();
        let held = playback.take_held();
        let pending = playback.enqueue(held, &mut events);
        for (serial, id) in pending.iter().map(|p| p.0).zip([3, 4]) {
            playback.assign(serial, Some(id), &mut events);
        }
        playback.begin(3, &mut events);
        playback.begin(4, &mut events);
        assert_eq!(events, [NativeEvent::StateChanged(SPEAKING), bookmark("b")]);
    }
}
