use super::{
    Engine, EngineEvent, EngineNotification, Handler, HandlerRegistry, Prompt, PromptOptions,
    SynthState, Utterance, VoiceInfo, percent, utterance::RateSpec,
};
use crate::error::{Result, SpeechError};
use anyhow::anyhow;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

pub mod dummy;
#[cfg(any(feature = "native", test))]
#[cfg_attr(not(feature = "native"), allow(dead_code))]
mod playback;
pub mod proc_synth;
#[cfg(feature = "native")]
pub mod tts;

/// The two events a native synthesizer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeEventKind {
    BookmarkReached,
    StateChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    BookmarkReached(String),
    /// Raw native state code
    StateChanged(i64),
}

impl NativeEvent {
    pub fn kind(&self) -> NativeEventKind {
        match self {
            NativeEvent::BookmarkReached(_) => NativeEventKind::BookmarkReached,
            NativeEvent::StateChanged(_) => NativeEventKind::StateChanged,
        }
    }
}

/// Called from the synthesizer's own thread.
pub type NativeCallback = Arc<dyn Fn(NativeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Default)]
struct SubscriberMap {
    next: u64,
    callbacks: HashMap<SubscriptionId, (NativeEventKind, NativeCallback)>,
}

/// Native callbacks by subscription, shared with whatever thread fires them.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<SubscriberMap>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: NativeEventKind, callback: NativeCallback) -> SubscriptionId {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.next += 1;
        let id = SubscriptionId(map.next);
        map.callbacks.insert(id, (kind, callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("no subscription {:?}", id))
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every callback subscribed to the event's kind.
    pub fn emit(&self, event: NativeEvent) {
        // Callbacks run outside the lock; one may subscribe or take a while.
        let callbacks = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .values()
            .filter(|(kind, _)| *kind == event.kind())
            .map(|(_, cb)| Arc::clone(cb))
            .collect::<Vec<_>>();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}

/// A native speech synthesizer handle.
///
/// This is the surface a platform binding has to offer; `NativeEngine` turns
/// it into an `Engine`.
pub trait NativeSynth {
    fn voices(&self) -> anyhow::Result<Vec<VoiceInfo>>;

    fn current_voice_id(&self) -> anyhow::Result<Option<String>>;

    /// Fails if the synthesizer refuses the voice.
    fn set_voice(&mut self, voice: &VoiceInfo) -> anyhow::Result<()>;

    /// Whether the synthesizer has a continuous rate control.
    fn supports_rate(&self) -> bool;

    fn rate(&self) -> anyhow::Result<u8>;

    fn set_rate(&mut self, rate: u8) -> anyhow::Result<()>;

    fn volume(&self) -> anyhow::Result<f64>;

    fn set_volume(&mut self, volume: f64) -> anyhow::Result<()>;

    /// Native state code: 0 ready, 1 speaking, 2 paused.
    fn state(&self) -> i64;

    fn speak_async(&mut self, prompt: Prompt) -> anyhow::Result<()>;

    fn cancel(&mut self) -> anyhow::Result<()>;

    fn pause(&mut self) -> anyhow::Result<()>;

    fn resume(&mut self) -> anyhow::Result<()>;

    fn subscribe(
        &mut self,
        kind: NativeEventKind,
        callback: NativeCallback,
    ) -> anyhow::Result<SubscriptionId>;

    fn unsubscribe(&mut self, id: SubscriptionId) -> anyhow::Result<()>;

    /// Free the native handle. Nothing may be called afterwards.
    fn release(&mut self) -> anyhow::Result<()>;
}

/// An `Engine` over one native synthesizer handle.
///
/// Synthesizers without a rate control get a locally stored rate that is
/// applied to each prompt as a discrete prosody rate.
pub struct NativeEngine<S: NativeSynth> {
    name: &'static str,
    display_name: &'static str,
    synth: S,
    handlers: HandlerRegistry,
    subscriptions: Vec<SubscriptionId>,
    local_rate: u8,
    closed: bool,
}

impl<S: NativeSynth> NativeEngine<S> {
    pub fn new(name: &'static str, display_name: &'static str, mut synth: S) -> Result<Self> {
        let handlers = HandlerRegistry::new();
        let mut subscriptions = Vec::with_capacity(2);
        for kind in [NativeEventKind::BookmarkReached, NativeEventKind::StateChanged] {
            let id = synth.subscribe(kind, trampoline(handlers.clone()))?;
            subscriptions.push(id);
        }
        Ok(NativeEngine {
            name,
            display_name,
            synth,
            handlers,
            subscriptions,
            local_rate: super::DEFAULT_RATE,
            closed: false,
        })
    }

    pub fn synth(&self) -> &S {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut S {
        &mut self.synth
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }
}

/// Fan a native event out to the bound handlers.
fn trampoline(handlers: HandlerRegistry) -> NativeCallback {
    Arc::new(move |event| {
        let notification = match event {
            NativeEvent::BookmarkReached(name) => EngineNotification::BookmarkReached(name),
            NativeEvent::StateChanged(code) => {
                EngineNotification::StateChanged(SynthState::from_native(code))
            }
        };
        handlers.dispatch(&notification);
    })
}

impl<S: NativeSynth> Engine for NativeEngine<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn display_name(&self) -> &'static str {
        self.display_name
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Unsubscribe first, so no callback fires into a released handle.
        // Every step is attempted; the first failure is reported.
        let mut first_error = None;
        for id in std::mem::take(&mut self.subscriptions) {
            if let Err(e) = self.synth.unsubscribe(id) {
                log::warn!("{}: unsubscribing {:?}: {}", self.name, id, e);
                first_error.get_or_insert(e);
            }
        }
        self.handlers.clear();
        if let Err(e) = self.synth.release() {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(self.synth.voices()?)
    }

    fn state(&self) -> SynthState {
        SynthState::from_native(self.synth.state())
    }

    fn voice(&self) -> Result<Option<VoiceInfo>> {
        let Some(current) = self.synth.current_voice_id()? else {
            return Ok(None);
        };
        Ok(self.synth.voices()?.into_iter().find(|v| v.id == current))
    }

    fn set_voice(&mut self, voice: &VoiceInfo) -> Result<()> {
        self.synth
            .set_voice(voice)
            .map_err(|e| SpeechError::InvalidVoice(format!("{} ({})", voice.id, e)))
    }

    fn rate(&self) -> Result<u8> {
        if self.synth.supports_rate() {
            Ok(self.synth.rate()?)
        } else {
            Ok(self.local_rate)
        }
    }

    fn set_rate(&mut self, rate: i32) -> Result<()> {
        let rate = percent(rate).ok_or(SpeechError::RateOutOfRange(rate))?;
        if self.synth.supports_rate() {
            self.synth.set_rate(rate)?;
        } else {
            self.local_rate = rate;
        }
        Ok(())
    }

    fn volume(&self) -> Result<u8> {
        let volume = self.synth.volume()?;
        Ok(volume.round().clamp(0.0, 100.0) as u8)
    }

    fn set_volume(&mut self, volume: i32) -> Result<()> {
        let level = percent(volume).ok_or(SpeechError::VolumeOutOfRange(volume))?;
        self.synth
            .set_volume(f64::from(level))
            .map_err(|e| SpeechError::InvalidVolume(e.to_string()))
    }

    fn preprocess_utterance(&self, utterance: &Utterance) -> Prompt {
        let language = self
            .voice()
            .ok()
            .flatten()
            .map(|voice| voice.language);
        let rate = (!self.synth.supports_rate()).then(|| RateSpec::from_percent(self.local_rate));
        Prompt::compile(utterance, &PromptOptions { language, rate })
    }

    fn speak_prompt(&mut self, prompt: Prompt) -> Result<()> {
        log::debug!("{}: speaking {} chunk(s)", self.name, prompt.chunks.len());
        Ok(self.synth.speak_async(prompt)?)
    }

    fn stop(&mut self) -> Result<()> {
        Ok(self.synth.cancel()?)
    }

    /// No-op unless speaking.
    fn pause(&mut self) -> Result<()> {
        if self.state() != SynthState::Speaking {
            log::debug!("{}: pause ignored while {}", self.name, self.state());
            return Ok(());
        }
        Ok(self.synth.pause()?)
    }

    /// No-op unless paused.
    fn resume(&mut self) -> Result<()> {
        if self.state() != SynthState::Paused {
            log::debug!("{}: resume ignored while {}", self.name, self.state());
            return Ok(());
        }
        Ok(self.synth.resume()?)
    }

    fn bind(&mut self, event: EngineEvent, handler: Handler) -> Result<()> {
        self.handlers.bind(event, handler)
    }
}

impl<S: NativeSynth> Drop for NativeEngine<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing {} engine: {}", self.name, e);
        }
    }
}
