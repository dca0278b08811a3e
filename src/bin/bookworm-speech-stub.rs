//! A speech program that plays prompts silently, for tests.
//!
//! Each chunk takes `--chunk-ms` to "speak"; its bookmarks are reported as it
//! starts.

use anyhow::{Result, bail};
use bookworm_speech::{
    proc_server_common::serve_synth,
    speech::{
        Prompt, SynthState, VoiceInfo,
        drivers::{
            NativeCallback, NativeEvent, NativeEventKind, NativeSynth, Subscribers,
            SubscriptionId,
        },
        prompt::PromptChunk,
    },
};
use clap::Parser;
use env_logger::Env;
use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

#[derive(Parser, Debug)]
#[command(about = "Silent speech server for tests")]
struct Args {
    /// Report no rate control
    #[arg(long)]
    no_rate: bool,

    /// Refuse to switch to this voice
    #[arg(long)]
    refuse: Vec<String>,

    /// How long each chunk plays
    #[arg(long, default_value_t = 20)]
    chunk_ms: u64,
}

#[derive(Default)]
struct Playback {
    queue: VecDeque<PromptChunk>,
    state: i64,
    running: bool,
}

#[derive(Default)]
struct Shared {
    playback: Mutex<Playback>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Playback> {
        self.playback.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StubSynth {
    voices: Vec<VoiceInfo>,
    refused: Vec<String>,
    voice: Option<String>,
    supports_rate: bool,
    rate: u8,
    volume: f64,
    chunk_delay: Duration,
    shared: Arc<Shared>,
    subscribers: Subscribers,
}

impl StubSynth {
    fn new(args: Args) -> Self {
        StubSynth {
            voices: vec![
                VoiceInfo::new("v1", "Voice One", "en-US"),
                VoiceInfo::new("v2", "Voice Two", "en-GB"),
                VoiceInfo::new("v3", "Voix Trois", "fr-FR"),
            ],
            refused: args.refuse,
            voice: Some("v1".to_string()),
            supports_rate: !args.no_rate,
            rate: 50,
            volume: 100.0,
            chunk_delay: Duration::from_millis(args.chunk_ms),
            shared: Arc::default(),
            subscribers: Subscribers::new(),
        }
    }

    /// Events go out under the lock so they cannot overtake each other.
    fn transition(&self, state: SynthState, clear: bool) {
        let code = state.native_code();
        let mut playback = self.shared.lock();
        if clear {
            playback.queue.clear();
        }
        if playback.state != code {
            playback.state = code;
            self.subscribers.emit(NativeEvent::StateChanged(code));
        }
        self.shared.wake.notify_all();
    }
}

fn play(shared: Arc<Shared>, subscribers: Subscribers, chunk_delay: Duration) {
    loop {
        let text = {
            let mut playback = shared.lock();
            while playback.state == SynthState::Paused.native_code() {
                playback = shared
                    .wake
                    .wait(playback)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            let Some(chunk) = playback.queue.pop_front() else {
                playback.running = false;
                let idle = SynthState::Idle.native_code();
                if playback.state != idle {
                    playback.state = idle;
                    subscribers.emit(NativeEvent::StateChanged(idle));
                }
                return;
            };
            for name in chunk.bookmarks {
                subscribers.emit(NativeEvent::BookmarkReached(name));
            }
            chunk.text
        };
        if !text.trim().is_empty() {
            log::debug!("playing {:?}", text);
            thread::sleep(chunk_delay);
        }
    }
}

impl NativeSynth for StubSynth {
    fn voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(self.voices.clone())
    }

    fn current_voice_id(&self) -> Result<Option<String>> {
        Ok(self.voice.clone())
    }

    fn set_voice(&mut self, voice: &VoiceInfo) -> Result<()> {
        if self.refused.contains(&voice.id) {
            bail!("voice {} cannot be loaded", voice.id);
        }
        self.voice = Some(voice.id.clone());
        Ok(())
    }

    fn supports_rate(&self) -> bool {
        self.supports_rate
    }

    fn rate(&self) -> Result<u8> {
        if !self.supports_rate {
            bail!("no rate control");
        }
        Ok(self.rate)
    }

    fn set_rate(&mut self, rate: u8) -> Result<()> {
        if !self.supports_rate {
            bail!("no rate control");
        }
        self.rate = rate;
        Ok(())
    }

    fn volume(&self) -> Result<f64> {
        Ok(self.volume)
    }

    fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.volume = volume;
        Ok(())
    }

    fn state(&self) -> i64 {
        self.shared.lock().state
    }

    fn speak_async(&mut self, prompt: Prompt) -> Result<()> {
        let spawn = {
            let mut playback = self.shared.lock();
            playback.queue.extend(prompt.chunks);
            let speaking = SynthState::Speaking.native_code();
            if playback.state == SynthState::Idle.native_code() {
                playback.state = speaking;
                self.subscribers.emit(NativeEvent::StateChanged(speaking));
            }
            !std::mem::replace(&mut playback.running, true)
        };
        if spawn {
            let (shared, subscribers) = (self.shared.clone(), self.subscribers.clone());
            let delay = self.chunk_delay;
            thread::spawn(move || play(shared, subscribers, delay));
        }
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.transition(SynthState::Idle, true);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.transition(SynthState::Paused, false);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.transition(SynthState::Speaking, false);
        Ok(())
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
        self.cancel()
    }
}

fn main() -> Result<()> {
    // stdout carries the protocol.
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    serve_synth(StubSynth::new(args))
}
