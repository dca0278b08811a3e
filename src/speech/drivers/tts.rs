//! The platform synthesizer, through the `tts` crate.
//!
//! `tts` only speaks plain strings, so prompts are played chunk by chunk and
//! a chunk's bookmarks fire when its utterance begins. Prompts queue behind
//! whatever is playing. There is no native pause either: pausing stops
//! playback and keeps the unfinished chunks for `resume`.

use super::{
    NativeCallback, NativeEngine, NativeEvent, NativeEventKind, NativeSynth, Subscribers,
    SubscriptionId,
    playback::{Playback, Segment},
};
use crate::speech::{Engine, EngineKind, Prompt, SynthState, VoiceInfo, voice::Gender};
use anyhow::{Result, anyhow};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tts::{Tts, UtteranceId};

pub const NAME: &str = "tts";
pub const DISPLAY_NAME: &str = "System Speech";

type Shared = Arc<Mutex<Playback<UtteranceId>>>;

fn lock(playback: &Shared) -> MutexGuard<'_, Playback<UtteranceId>> {
    playback.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TtsSynth {
    tts: Tts,
    playback: Shared,
    subscribers: Subscribers,
    voice_id: Option<String>,
    min_rate: f32,
    max_rate: f32,
    min_volume: f32,
    max_volume: f32,
}

impl TtsSynth {
    pub fn new() -> Result<Self> {
        let tts = Tts::default().map_err(|e| anyhow!(e))?;
        let playback = Shared::default();
        let subscribers = Subscribers::new();
        if tts.supported_features().utterance_callbacks {
            let (p, s) = (playback.clone(), subscribers.clone());
            tts.on_utterance_begin(Some(Box::new(move |id| {
                let mut events = Vec::new();
                lock(&p).begin(id, &mut events);
                emit(&s, events);
            })))
            .map_err(|e| anyhow!(e))?;
            let (p, s) = (playback.clone(), subscribers.clone());
            tts.on_utterance_end(Some(Box::new(move |id| {
                let mut events = Vec::new();
                lock(&p).end(id, &mut events);
                emit(&s, events);
            })))
            .map_err(|e| anyhow!(e))?;
        } else {
            log::warn!("system speech has no utterance callbacks; bookmarks fire as queued");
        }
        let voice_id = tts.voice().ok().flatten().map(|v| v.id());
        Ok(TtsSynth {
            min_rate: tts.min_rate(),
            max_rate: tts.max_rate(),
            min_volume: tts.min_volume(),
            max_volume: tts.max_volume(),
            tts,
            playback,
            subscribers,
            voice_id,
        })
    }

    /// Segments are queued before `speak` so callbacks from the platform's
    /// thread always find them.
    fn queue(&mut self, segments: Vec<Segment<UtteranceId>>) -> Result<()> {
        let mut events = Vec::new();
        let pending = lock(&self.playback).enqueue(segments, &mut events);
        emit(&self.subscribers, events);
        for (serial, text) in pending {
            let spoken = self.tts.speak(text, false).map_err(|e| anyhow!(e));
            let mut events = Vec::new();
            let result = {
                let mut playback = lock(&self.playback);
                match spoken {
                    Ok(id) => {
                        playback.assign(serial, id, &mut events);
                        Ok(())
                    }
                    Err(e) => {
                        playback.discard_unassigned(&mut events);
                        Err(e)
                    }
                }
            };
            emit(&self.subscribers, events);
            result?;
        }
        Ok(())
    }

    fn stop_playback(&mut self, next: SynthState) -> Result<Vec<Segment<UtteranceId>>> {
        let mut events = Vec::new();
        let unfinished = lock(&self.playback).stop(next, &mut events);
        self.tts.stop().map_err(|e| anyhow!(e))?;
        emit(&self.subscribers, events);
        Ok(unfinished)
    }
}

fn emit(subscribers: &Subscribers, events: Vec<NativeEvent>) {
    for event in events {
        subscribers.emit(event);
    }
}

fn scale(percent: f64, min: f32, max: f32) -> f32 {
    min + (max - min) * (percent as f32 / 100.0)
}

fn unscale(value: f32, min: f32, max: f32) -> f64 {
    if max <= min {
        return 0.0;
    }
    f64::from((value - min) / (max - min) * 100.0)
}

impl NativeSynth for TtsSynth {
    fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let voices = self.tts.voices().map_err(|e| anyhow!(e))?;
        Ok(voices
            .into_iter()
            .map(|v| {
                let mut info = VoiceInfo::new(v.id(), v.name(), v.language().to_string());
                info.gender = v.gender().map(|g| match g {
                    tts::Gender::Male => Gender::Male,
                    tts::Gender::Female => Gender::Female,
                });
                info
            })
            .collect())
    }

    fn current_voice_id(&self) -> Result<Option<String>> {
        Ok(self.voice_id.clone())
    }

    fn set_voice(&mut self, voice: &VoiceInfo) -> Result<()> {
        let native = self
            .tts
            .voices()
            .map_err(|e| anyhow!(e))?
            .into_iter()
            .find(|v| v.id() == voice.id)
            .ok_or_else(|| anyhow!("voice {} is not installed", voice.id))?;
        self.tts.set_voice(&native).map_err(|e| anyhow!(e))?;
        self.voice_id = Some(voice.id.clone());
        Ok(())
    }

    fn supports_rate(&self) -> bool {
        self.tts.supported_features().rate
    }

    fn rate(&self) -> Result<u8> {
        let rate = self.tts.get_rate().map_err(|e| anyhow!(e))?;
        Ok(unscale(rate, self.min_rate, self.max_rate).round().clamp(0.0, 100.0) as u8)
    }

    fn set_rate(&mut self, rate: u8) -> Result<()> {
        let rate = scale(f64::from(rate), self.min_rate, self.max_rate);
        self.tts.set_rate(rate).map_err(|e| anyhow!(e))?;
        Ok(())
    }

    fn volume(&self) -> Result<f64> {
        let volume = self.tts.get_volume().map_err(|e| anyhow!(e))?;
        Ok(unscale(volume, self.min_volume, self.max_volume))
    }

    fn set_volume(&mut self, volume: f64) -> Result<()> {
        if !self.tts.supported_features().volume {
            return Err(anyhow!("system speech has no volume control"));
        }
        let volume = scale(volume, self.min_volume, self.max_volume);
        self.tts.set_volume(volume).map_err(|e| anyhow!(e))?;
        Ok(())
    }

    fn state(&self) -> i64 {
        lock(&self.playback).state()
    }

    fn speak_async(&mut self, prompt: Prompt) -> Result<()> {
        let segments = prompt
            .chunks
            .into_iter()
            .map(Segment::from)
            .collect::<Vec<_>>();
        {
            let mut playback = lock(&self.playback);
            if playback.is_paused() {
                playback.hold(segments);
                return Ok(());
            }
        }
        self.queue(segments)
    }

    fn cancel(&mut self) -> Result<()> {
        self.stop_playback(SynthState::Idle)?;
        lock(&self.playback).clear_held();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let unfinished = self.stop_playback(SynthState::Paused)?;
        lock(&self.playback).hold(unfinished);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let held = lock(&self.playback).take_held();
        self.queue(held)
    }

    fn subscribe(
        &mut self,
        kind: NativeEventKind,
        callback: NativeCallback,
    ) -> Result<SubscriptionId> {
        Ok(self.subscribers.subscribe(kind, callback))
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> Result<()> {
        self.subscribers.unsubscribe(id)
    }

    fn release(&mut self) -> Result<()> {
        self.stop_playback(SynthState::Idle)?;
        self.tts.on_utterance_begin(None).map_err(|e| anyhow!(e))?;
        self.tts.on_utterance_end(None).map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

pub fn engine_kind() -> EngineKind {
    EngineKind::new(
        NAME,
        DISPLAY_NAME,
        || Tts::default().is_ok(),
        || {
            let synth = TtsSynth::new()?;
            let engine: Box<dyn Engine> = Box::new(NativeEngine::new(NAME, DISPLAY_NAME, synth)?);
            Ok(engine)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{scale, unscale};

    #[test]
    fn percent_maps_onto_native_range() {
        assert_eq!(scale(0.0, 0.5, 2.0), 0.5);
        assert_eq!(scale(100.0, 0.5, 2.0), 2.0);
        assert_eq!(scale(50.0, 0.0, 10.0), 5.0);
        assert_eq!(unscale(5.0, 0.0, 10.0), 50.0);
        assert_eq!(unscale(1.0, 1.0, 1.0), 0.0);
    }
}
