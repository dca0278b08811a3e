//! The text-to-speech service of the reader: one active engine, a queue of
//! utterances, and continuous page reading driven by bookmarks.

use crate::config::{Config, ReadingMode, StartFrom};
use crate::error::SpeechError;
use crate::reading::{self, ReadingBookmark, TextInfo};
use crate::speech::{
    Engine, EngineEvent, EngineKind, EngineNotification, Registry, SynthState, Utterance,
    VoiceInfo, utterance::PauseSpec,
};
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    path::Path,
    sync::mpsc::{self, Receiver, Sender},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No speech engine has been initialized")]
    NotInitialized,

    #[error(transparent)]
    Speech(#[from] SpeechError),
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// A page of the open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based
    pub number: usize,
    pub text: String,
    pub language: String,
}

/// What happened while speaking, as seen by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingEvent {
    /// A paragraph started; the caret has moved to `pos`.
    SegmentStarted { pos: usize, end: usize },
    /// Everything on `page` was spoken; the reader should turn the page.
    PageFinished { page: usize },
    /// The end-of-section announcement was spoken.
    SectionFinished,
    /// A bookmark the service did not put there.
    Bookmark(String),
    StateChanged(SynthState),
}

struct Queued {
    priority: i32,
    seq: u64,
    utterance: Utterance,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

pub struct SpeechService {
    registry: Registry,
    config: Config,
    engine: Option<Box<dyn Engine>>,
    queue: BinaryHeap<Reverse<Queued>>,
    next_seq: u64,
    sender: Sender<EngineNotification>,
    notifications: Receiver<EngineNotification>,
    page: Option<Page>,
    /// Structure of the whole current page, for fast-forward and rewind
    page_info: Option<TextInfo>,
    caret: usize,
}

impl SpeechService {
    pub fn new(registry: Registry, config: Config) -> Self {
        let (sender, notifications) = mpsc::channel();
        SpeechService {
            registry,
            config,
            engine: None,
            queue: BinaryHeap::new(),
            next_seq: 0,
            sender,
            notifications,
            page: None,
            page_info: None,
            caret: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn engine(&self) -> Option<&dyn Engine> {
        self.engine.as_deref()
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn Engine>> {
        self.engine.as_mut().ok_or(ServiceError::NotInitialized)
    }

    pub fn state(&self) -> SynthState {
        self.engine.as_ref().map_or(SynthState::Idle, |e| e.state())
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn set_caret(&mut self, caret: usize) {
        self.caret = caret;
    }

    fn configured_kind(&self) -> &EngineKind {
        let name = &self.config.speech.engine;
        if name.is_empty() {
            self.registry.preferred()
        } else {
            self.registry.get(name)
        }
    }

    /// Make the configured engine the active one and apply the settings.
    ///
    /// An engine that fails to start is replaced by the "No Speech" engine.
    pub fn initialize_engine(&mut self) -> Result<()> {
        let kind = self.configured_kind();
        let reuse = self.engine.as_ref().is_some_and(|e| e.name() == kind.name);
        if !reuse {
            let mut engine = match kind.instantiate() {
                Ok(engine) => engine,
                Err(e) => {
                    log::error!("failed to start {}: {}", kind.name, e);
                    EngineKind::dummy().instantiate()?
                }
            };
            if let Some(mut old) = self.engine.take() {
                if let Err(e) = old.close() {
                    log::warn!("closing {}: {}", old.name(), e);
                }
            }
            for event in [EngineEvent::BookmarkReached, EngineEvent::StateChanged] {
                let sender = self.sender.clone();
                engine.bind(
                    event,
                    Box::new(move |notification: &EngineNotification| {
                        // The receiver only goes away with the service.
                        let _ = sender.send(notification.clone());
                    }),
                )?;
            }
            log::info!("speech engine: {}", engine.display_name());
            self.engine = Some(engine);
        }
        self.configure_engine()
    }

    pub fn configure_engine(&mut self) -> Result<()> {
        let config = self.config.speech.engine_config();
        let engine = self.engine_mut()?;
        if engine.state() != SynthState::Idle {
            engine.stop()?;
        }
        engine.configure(&config);
        Ok(())
    }

    /// Switch to a voice speaking `language` unless the current one does.
    ///
    /// Returns the newly selected voice, if any.
    pub fn try_set_language(&mut self, language: &str) -> Result<Option<VoiceInfo>> {
        let engine = self.engine_mut()?;
        if let Some(current) = engine.voice()? {
            if current.speaks_language(language) {
                return Ok(None);
            }
        }
        let voice = engine.first_settable_voice(Some(language))?;
        match &voice {
            Some(voice) => log::info!("switched to {} for {}", voice.id, language),
            None => log::warn!("no voice speaks {}", language),
        }
        Ok(voice)
    }

    pub fn enqueue(&mut self, utterance: Utterance) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Queued {
            priority: utterance.priority,
            seq,
            utterance,
        }));
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Speak everything queued, lowest priority value first.
    pub fn process_queue(&mut self) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(ServiceError::NotInitialized)?;
        while let Some(Reverse(queued)) = self.queue.pop() {
            engine.speak(&queued.utterance)?;
        }
        Ok(())
    }

    /// Read `page` starting at `from` (a character offset).
    pub fn speak_page(&mut self, page: Page, from: usize) -> Result<()> {
        self.speak_page_with(page, from, Utterance::new())
    }

    /// Read `page` from the caret or from its start, as configured.
    pub fn speak_current_page(&mut self, page: Page) -> Result<()> {
        let from = match self.config.reading.start_reading_from {
            StartFrom::Caret => self.caret,
            StartFrom::PageStart => 0,
        };
        self.speak_page(page, from)
    }

    fn speak_page_with(&mut self, page: Page, from: usize, prefix: Utterance) -> Result<()> {
        if self.engine.is_none() {
            return Err(ServiceError::NotInitialized);
        }
        let rest = page.text.chars().skip(from).collect::<String>();
        let info = TextInfo::new(rest, from, page.language.as_str());
        let end_page = self
            .config
            .reading
            .reading_mode
            .crosses_pages()
            .then_some(page.number);
        let pauses = self.config.speech.pauses();
        let utterance = reading::page_utterance(&info, &pauses, end_page, prefix);
        self.page_info = Some(TextInfo::new(page.text.as_str(), 0, page.language.as_str()));
        self.page = Some(page);
        self.caret = from;
        self.enqueue(utterance);
        self.process_queue()
    }

    /// Continue reading on a new page, announcing it when configured to.
    pub fn turn_page(&mut self, page: Page, total_pages: usize) -> Result<()> {
        self.stop_engine()?;
        let mut prefix = Utterance::new();
        if self.config.reading.speak_page_number {
            prefix
                .add_text(format!("Page {} of {}", page.number + 1, total_pages))
                .add_pause(PauseSpec::Medium);
        }
        self.speak_page_with(page, 0, prefix)
    }

    /// Announce the end of a section after the last page of it was read.
    pub fn announce_end_of_section(&mut self, title: &str, sound: Option<&Path>) -> Result<()> {
        let mut utterance = Utterance::with_priority(1);
        if self.config.reading.play_end_of_section_sound {
            if let Some(sound) = sound {
                utterance.add_audio(sound);
            }
        }
        utterance
            .add_text(format!("End of section: {}.", title))
            .add_pause(self.config.speech.end_of_section_pause);
        if self.config.reading.reading_mode == ReadingMode::Continuous {
            utterance.add_bookmark(ReadingBookmark::NextSection.encode());
        }
        self.enqueue(utterance);
        self.process_queue()
    }

    /// Jump to the next paragraph. Returns false when not reading.
    pub fn fastforward(&mut self) -> Result<bool> {
        self.skip(reading::next_marker)
    }

    /// Jump back to the previous paragraph. Returns false when not reading.
    pub fn rewind(&mut self) -> Result<bool> {
        self.skip(reading::previous_marker)
    }

    fn skip(&mut self, marker: fn(&[usize], usize) -> Option<usize>) -> Result<bool> {
        if self.state() != SynthState::Speaking {
            return Ok(false);
        }
        let (Some(info), Some(page)) = (&self.page_info, &self.page) else {
            return Ok(false);
        };
        let Some(pos) = marker(&info.paragraph_markers(), self.caret) else {
            return Ok(false);
        };
        let page = page.clone();
        self.stop_engine()?;
        self.speak_page(page, pos)?;
        Ok(true)
    }

    fn stop_engine(&mut self) -> Result<()> {
        let engine = self.engine_mut()?;
        if engine.state() != SynthState::Idle {
            engine.stop()?;
        }
        Ok(())
    }

    /// Stop speaking and forget anything still queued.
    pub fn stop(&mut self) -> Result<()> {
        self.queue.clear();
        self.engine_mut()?.stop()?;
        Ok(())
    }

    /// Pause while speaking, resume while paused. Returns the state asked for.
    pub fn pause_toggle(&mut self) -> Result<SynthState> {
        let engine = self.engine_mut()?;
        match engine.state() {
            SynthState::Speaking => {
                engine.pause()?;
                Ok(SynthState::Paused)
            }
            SynthState::Paused => {
                engine.resume()?;
                Ok(SynthState::Speaking)
            }
            SynthState::Idle => Ok(SynthState::Idle),
        }
    }

    /// Drain what the engine reported since the last call.
    ///
    /// Handlers run on the synthesizer's thread; this is where their
    /// notifications reach the thread owning the service.
    pub fn poll_events(&mut self) -> Vec<ReadingEvent> {
        let mut events = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            let event = match notification {
                EngineNotification::StateChanged(state) => ReadingEvent::StateChanged(state),
                EngineNotification::BookmarkReached(name) => match ReadingBookmark::decode(&name) {
                    Some(ReadingBookmark::StartSegment { pos, end }) => {
                        self.caret = pos;
                        ReadingEvent::SegmentStarted { pos, end }
                    }
                    Some(ReadingBookmark::EndPage { current }) => {
                        ReadingEvent::PageFinished { page: current }
                    }
                    Some(ReadingBookmark::NextSection) => ReadingEvent::SectionFinished,
                    None => ReadingEvent::Bookmark(name),
                },
            };
            events.push(event);
        }
        events
    }

    /// Close the engine, e.g. when the document is closed.
    pub fn close(&mut self) -> Result<()> {
        self.queue.clear();
        self.page = None;
        self.page_info = None;
        if let Some(mut engine) = self.engine.take() {
            engine.close()?;
        }
        Ok(())
    }
}

impl Drop for SpeechService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing speech service: {}", e);
        }
    }
}
