//! A scenario harness for the engine contract.
//!
//! Scripts drive a `NativeEngine` over a `FakeSynth` that records every
//! native call, so behavior can be checked without a real synthesizer.

use crate::error::SpeechError;
use crate::speech::{
    Engine, EngineConfig, EngineEvent, EngineKind, EngineNotification, Prompt, SynthState,
    Utterance, VoiceInfo,
    drivers::{
        NativeCallback, NativeEngine, NativeEvent, NativeEventKind, NativeSynth, Subscribers,
        SubscriptionId,
    },
};
use anyhow::{Result, anyhow, bail};
use std::fmt::Write as FmtWrite;
use std::{
    collections::HashSet,
    fs,
    io::{self, Read},
    sync::{Arc, Mutex, PoisonError},
};

/// Reaches a `FakeSynth` after it has been boxed into an engine.
#[derive(Clone, Default)]
pub struct FakeHandle {
    subscribers: Subscribers,
    prompts: Arc<Mutex<Vec<Prompt>>>,
}

impl FakeHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a native event without touching the synthesizer's state.
    pub fn fire(&self, event: NativeEvent) {
        self.subscribers.emit(event);
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// An engine kind whose every instance shares this handle.
    pub fn engine_kind(&self, voices: Vec<VoiceInfo>) -> EngineKind {
        let handle = self.clone();
        EngineKind::new(
            "fake",
            "Fake Speech",
            || true,
            move || {
                let synth = FakeSynth {
                    voices: voices.clone(),
                    ..FakeSynth::attached(&handle)
                };
                let engine: Box<dyn Engine> =
                    Box::new(NativeEngine::new("fake", "Fake Speech", synth)?);
                Ok(engine)
            },
        )
    }
}

/// A scriptable native synthesizer.
///
/// Speaking only records the prompt; events are delivered when a test fires
/// them with `fire`.
#[derive(Default)]
pub struct FakeSynth {
    voices: Vec<VoiceInfo>,
    unsettable: HashSet<String>,
    refused_volumes: Vec<f64>,
    fail_unsubscribe: bool,
    current: Option<String>,
    no_rate: bool,
    rate: u8,
    volume: f64,
    state: i64,
    calls: Vec<String>,
    prompts: Arc<Mutex<Vec<Prompt>>>,
    subscribers: Subscribers,
}

impl FakeSynth {
    pub fn new() -> Self {
        FakeSynth {
            rate: 50,
            volume: 100.0,
            ..Default::default()
        }
    }

    pub fn attached(handle: &FakeHandle) -> Self {
        FakeSynth {
            prompts: Arc::clone(&handle.prompts),
            subscribers: handle.subscribers.clone(),
            ..FakeSynth::new()
        }
    }

    pub fn with_voices(voices: Vec<VoiceInfo>) -> Self {
        FakeSynth {
            voices,
            ..FakeSynth::new()
        }
    }

    pub fn add_voice(&mut self, voice: VoiceInfo) {
        self.voices.push(voice);
    }

    /// Enumerated, but refused by `set_voice`.
    pub fn refuse_voice(&mut self, id: &str) {
        self.unsettable.insert(id.to_string());
    }

    /// `set_volume` fails for this level, as when the native conversion does.
    pub fn refuse_volume(&mut self, volume: f64) {
        self.refused_volumes.push(volume);
    }

    /// The next `unsubscribe` fails and leaves its callback in place.
    pub fn fail_next_unsubscribe(&mut self) {
        self.fail_unsubscribe = true;
    }

    /// Act like a synthesizer without a rate control.
    pub fn without_rate(&mut self) {
        self.no_rate = true;
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Native callbacks currently subscribed.
    pub fn subscriptions(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver a native event the way the synthesizer's thread would.
    pub fn fire(&mut self, event: NativeEvent) {
        if let NativeEvent::StateChanged(code) = event {
            self.state = code;
        }
        self.subscribers.emit(event);
    }

    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }
}

impl NativeSynth for FakeSynth {
    fn voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(self.voices.clone())
    }

    fn current_voice_id(&self) -> Result<Option<String>> {
        Ok(self.current.clone())
    }

    fn set_voice(&mut self, voice: &VoiceInfo) -> Result<()> {
        self.record(format!("set_voice {}", voice.id));
        if self.unsettable.contains(&voice.id) {
            bail!("voice {} cannot be used", voice.id);
        }
        self.current = Some(voice.id.clone());
        Ok(())
    }

    fn supports_rate(&self) -> bool {
        !self.no_rate
    }

    fn rate(&self) -> Result<u8> {
        Ok(self.rate)
    }

    fn set_rate(&mut self, rate: u8) -> Result<()> {
        self.record(format!("set_rate {}", rate));
        self.rate = rate;
        Ok(())
    }

    fn volume(&self) -> Result<f64> {
        Ok(self.volume)
    }

    fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.record(format!("set_volume {}", volume));
        if self.refused_volumes.contains(&volume) {
            bail!("volume {} cannot be converted", volume);
        }
        self.volume = volume;
        Ok(())
    }

    fn state(&self) -> i64 {
        self.state
    }

    fn speak_async(&mut self, prompt: Prompt) -> Result<()> {
        self.record("speak");
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt);
        self.state = SynthState::Speaking.native_code();
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.record("cancel");
        self.state = SynthState::Idle.native_code();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.record("pause");
        self.state = SynthState::Paused.native_code();
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.record("resume");
        self.state = SynthState::Speaking.native_code();
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
        self.record("unsubscribe");
        if std::mem::take(&mut self.fail_unsubscribe) {
            bail!("native unsubscribe failed for {:?}", id);
        }
        self.subscribers.unsubscribe(id)
    }

    fn release(&mut self) -> Result<()> {
        self.record("release");
        Ok(())
    }
}

type EventLog = Arc<Mutex<Vec<EngineNotification>>>;

pub struct Harness {
    engine: NativeEngine<FakeSynth>,
    events: EventLog,
    event_cursor: usize,
    call_cursor: usize,
    last_error: Option<SpeechError>,
    last_voice: Option<VoiceInfo>,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let engine = NativeEngine::new("fake", "Fake Speech", FakeSynth::new())?;
        Ok(Self {
            engine,
            events: EventLog::default(),
            event_cursor: 0,
            call_cursor: 0,
            last_error: None,
            last_voice: None,
        })
    }

    pub fn engine(&self) -> &NativeEngine<FakeSynth> {
        &self.engine
    }

    pub fn run_script(&mut self, script: &str) -> Result<()> {
        let mut scenario: Option<String> = None;
        let mut phase = BddPhase::Given;
        let mut last_prefix: Option<BddPrefix> = None;
        for (line_no, line) in script.lines().enumerate() {
            let line_no = line_no + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = parse_scenario(line) {
                self.finish_scenario(scenario.as_deref())?;
                scenario = Some(name.to_string());
                self.reset()?;
                phase = BddPhase::Given;
                last_prefix = None;
                continue;
            }
            if scenario.is_none() {
                return Err(anyhow!("line {}: missing Scenario header", line_no));
            }
            let (prefix, line) = parse_bdd_prefix(line, line_no)?;
            let prefix = match prefix {
                BddPrefix::And => last_prefix.ok_or_else(|| {
                    anyhow!("line {}: And without a previous Given/When/Then", line_no)
                })?,
                _ => prefix,
            };
            last_prefix = Some(prefix);
            phase = match (phase, prefix) {
                (BddPhase::Given, BddPrefix::Given) => BddPhase::Given,
                (BddPhase::Given | BddPhase::When, BddPrefix::When) => BddPhase::When,
                (_, BddPrefix::Then) => BddPhase::Then,
                // A new When after Then starts the next step of the scenario.
                (BddPhase::Then, BddPrefix::When) => BddPhase::When,
                (BddPhase::When | BddPhase::Then, BddPrefix::Given) => {
                    return Err(anyhow!("line {}: Given is only allowed first", line_no));
                }
                (_, BddPrefix::And) => unreachable!("And should be normalized above"),
            };
            let (cmd, rest) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("line {}: missing ':'", line_no))?;
            let payload = rest.trim();
            let asserting = matches!(phase, BddPhase::Then);
            if asserting != is_assert_command(cmd) {
                return Err(anyhow!(
                    "line {}: assertions go after Then, actions before it",
                    line_no
                ));
            }
            if !asserting {
                if let Some(err) = self.last_error.take() {
                    return Err(anyhow!(
                        "line {}: unchecked error from a previous step: {}",
                        line_no,
                        err
                    ));
                }
            }
            if let Err(err) = self.step(cmd, payload, line_no) {
                return Err(anyhow!("{}\n\n{}", err, self.dump_state()));
            }
        }
        self.finish_scenario(scenario.as_deref())
    }

    fn step(&mut self, cmd: &str, payload: &str, line_no: usize) -> Result<()> {
        match cmd {
            "voice" => {
                let mut parts = payload.split_whitespace();
                let (Some(id), Some(language)) = (parts.next(), parts.next()) else {
                    bail!("line {}: usage: voice: <id> <language> [name]", line_no);
                };
                let name = parts.collect::<Vec<_>>().join(" ");
                let name = if name.is_empty() { id.to_string() } else { name };
                self.engine
                    .synth_mut()
                    .add_voice(VoiceInfo::new(id, name, language));
            }
            "refused-voice" => self.engine.synth_mut().refuse_voice(payload),
            "refused-volume" => {
                let volume: f64 = parse_number(payload, line_no)?;
                self.engine.synth_mut().refuse_volume(volume);
            }
            "failing-unsubscribe" => self.engine.synth_mut().fail_next_unsubscribe(),
            "no-rate-control" => self.engine.synth_mut().without_rate(),
            "configure" => {
                let config: EngineConfig = serde_json::from_str(payload)
                    .map_err(|e| anyhow!("line {}: bad config: {}", line_no, e))?;
                self.engine.configure(&config);
            }
            "set-voice" => {
                let result = self.engine.set_voice_from_string(payload);
                self.keep_error(result);
            }
            "first-voice" => {
                let language = (payload != "*").then_some(payload);
                match self.engine.first_settable_voice(language) {
                    Ok(voice) => self.last_voice = voice,
                    Err(e) => self.last_error = Some(e),
                }
            }
            "set-rate" => {
                let rate = parse_number(payload, line_no)?;
                let result = self.engine.set_rate(rate);
                self.keep_error(result);
            }
            "set-volume" => {
                let volume = parse_number(payload, line_no)?;
                let result = self.engine.set_volume(volume);
                self.keep_error(result);
            }
            "speak-text" => {
                let mut utterance = Utterance::new();
                utterance.add_text(payload);
                let result = self.engine.speak(&utterance);
                self.keep_error(result);
            }
            "speak-json" => {
                let value: serde_json::Value = serde_json::from_str(payload)
                    .map_err(|e| anyhow!("line {}: bad json: {}", line_no, e))?;
                let result = self.engine.speak_value(&value);
                self.keep_error(result);
            }
            "bind" => {
                let event = payload.parse::<EngineEvent>();
                let result = event.and_then(|event| {
                    let events = Arc::clone(&self.events);
                    self.engine.bind(
                        event,
                        Box::new(move |n: &EngineNotification| {
                            events
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(n.clone())
                        }),
                    )
                });
                self.keep_error(result);
            }
            "native-bookmark" => self
                .engine
                .synth_mut()
                .fire(NativeEvent::BookmarkReached(payload.to_string())),
            "native-state" => {
                let code = parse_number(payload, line_no)?;
                self.engine.synth_mut().fire(NativeEvent::StateChanged(code));
            }
            "pause" => {
                let result = self.engine.pause();
                self.keep_error(result);
            }
            "resume" => {
                let result = self.engine.resume();
                self.keep_error(result);
            }
            "stop" => {
                let result = self.engine.stop();
                self.keep_error(result);
            }
            "close" => {
                let result = self.engine.close();
                self.keep_error(result);
            }
            "expect-voices" => {
                let (language, ids) = payload
                    .split_once('=')
                    .ok_or_else(|| {
                        anyhow!("line {}: usage: expect-voices: <lang|*> = ids", line_no)
                    })?;
                let language = language.trim();
                let language = (language != "*").then_some(language);
                let actual = self
                    .engine
                    .voices_by_language(language)?
                    .into_iter()
                    .map(|v| v.id)
                    .collect::<Vec<_>>();
                let expected = ids.split_whitespace().collect::<Vec<_>>();
                if actual != expected {
                    bail!("line {}: expected voices {:?}, got {:?}", line_no, expected, actual);
                }
            }
            "expect-voice" => {
                let actual = self.engine.voice()?.map(|v| v.id);
                let expected = (payload != "none").then(|| payload.to_string());
                if actual != expected {
                    bail!("line {}: expected voice {:?}, got {:?}", line_no, expected, actual);
                }
            }
            "expect-selected" => {
                let actual = self.last_voice.as_ref().map(|v| v.id.as_str());
                let expected = (payload != "none").then_some(payload);
                if actual != expected {
                    bail!("line {}: expected selection {:?}, got {:?}", line_no, expected, actual);
                }
            }
            "expect-rate" => {
                let expected: u8 = parse_number(payload, line_no)?;
                let actual = self.engine.rate()?;
                if actual != expected {
                    bail!("line {}: expected rate {}, got {}", line_no, expected, actual);
                }
            }
            "expect-volume" => {
                let expected: u8 = parse_number(payload, line_no)?;
                let actual = self.engine.volume()?;
                if actual != expected {
                    bail!("line {}: expected volume {}, got {}", line_no, expected, actual);
                }
            }
            "expect-state" => {
                let actual = self.engine.state();
                if actual.as_str() != payload {
                    bail!("line {}: expected state {}, got {}", line_no, payload, actual);
                }
            }
            "expect-error" => {
                let err = self
                    .last_error
                    .take()
                    .ok_or_else(|| {
                        anyhow!("line {}: expected error {}, got none", line_no, payload)
                    })?;
                if err.kind() != payload {
                    bail!(
                        "line {}: expected error {}, got {} ({})",
                        line_no,
                        payload,
                        err.kind(),
                        err
                    );
                }
            }
            "expect-event" => {
                let expected = parse_event(payload, line_no)?;
                let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
                let actual = events.get(self.event_cursor).cloned();
                drop(events);
                if actual.as_ref() != Some(&expected) {
                    bail!("line {}: expected event {:?}, got {:?}", line_no, expected, actual);
                }
                self.event_cursor += 1;
            }
            "expect-no-events" => {
                let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(event) = events.get(self.event_cursor) {
                    bail!("line {}: unexpected event {:?}", line_no, event);
                }
            }
            "expect-native" => {
                let calls = self.engine.synth().calls();
                let actual = calls.get(self.call_cursor).cloned();
                if actual.as_deref() != Some(payload) {
                    bail!("line {}: expected native call {:?}, got {:?}", line_no, payload, actual);
                }
                self.call_cursor += 1;
            }
            "expect-native-done" => {
                let calls = self.engine.synth().calls();
                if let Some(call) = calls.get(self.call_cursor) {
                    bail!("line {}: unexpected native call {:?}", line_no, call);
                }
            }
            "skip-native" => {
                let count: usize = parse_number(payload, line_no)?;
                let total = self.engine.synth().calls().len();
                self.call_cursor = (self.call_cursor + count).min(total);
            }
            "expect-prompt-contains" => {
                let prompts = self.engine.synth().prompts();
                let prompt = prompts
                    .last()
                    .ok_or_else(|| anyhow!("line {}: nothing was spoken", line_no))?;
                if !prompt.ssml.contains(payload) {
                    bail!("line {}: prompt {:?} lacks {:?}", line_no, prompt.ssml, payload);
                }
            }
            _ => bail!("line {}: unknown command {}", line_no, cmd),
        }
        Ok(())
    }

    fn keep_error(&mut self, result: crate::error::Result<()>) {
        if let Err(e) = result {
            self.last_error = Some(e);
        }
    }

    fn finish_scenario(&mut self, scenario: Option<&str>) -> Result<()> {
        match (scenario, self.last_error.take()) {
            (Some(name), Some(err)) => {
                bail!("scenario {:?} ended with unchecked error: {}", name, err)
            }
            _ => Ok(()),
        }
    }

    fn reset(&mut self) -> Result<()> {
        *self = Harness::new()?;
        Ok(())
    }

    fn dump_state(&self) -> String {
        let synth = self.engine.synth();
        let mut out = String::from("State:\nnative-calls-remaining:\n");
        for (idx, call) in synth.calls().iter().enumerate().skip(self.call_cursor) {
            let _ = writeln!(&mut out, "{}: {}", idx, call);
        }
        out.push_str("events-remaining:\n");
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        for (idx, event) in events.iter().enumerate().skip(self.event_cursor) {
            let _ = writeln!(&mut out, "{}: {:?}", idx, event);
        }
        let _ = writeln!(&mut out, "state: {}", self.engine.state());
        out
    }
}

pub fn run_script_file(path: &str) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let mut harness = Harness::new()?;
    harness.run_script(&contents)
}

pub fn run_script_stdin() -> Result<()> {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    let mut harness = Harness::new()?;
    harness.run_script(&buf)
}

fn parse_number<T: std::str::FromStr>(input: &str, line_no: usize) -> Result<T> {
    input
        .parse::<T>()
        .map_err(|_| anyhow!("line {}: invalid number {:?}", line_no, input))
}

fn parse_event(input: &str, line_no: usize) -> Result<EngineNotification> {
    let (kind, value) = input
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow!("line {}: usage: expect-event: <event> <value>", line_no))?;
    let value = value.trim();
    match kind {
        "bookmark_reached" => Ok(EngineNotification::BookmarkReached(value.to_string())),
        "state_changed" => {
            let state = [SynthState::Idle, SynthState::Speaking, SynthState::Paused]
                .into_iter()
                .find(|s| s.as_str() == value)
                .ok_or_else(|| anyhow!("line {}: unknown state {}", line_no, value))?;
            Ok(EngineNotification::StateChanged(state))
        }
        _ => bail!("line {}: unknown event {}", line_no, kind),
    }
}

#[derive(Copy, Clone)]
enum BddPrefix {
    Given,
    When,
    Then,
    And,
}

#[derive(Copy, Clone)]
enum BddPhase {
    Given,
    When,
    Then,
}

fn parse_bdd_prefix(line: &str, line_no: usize) -> Result<(BddPrefix, &str)> {
    let lower = line.to_ascii_lowercase();
    for (prefix, kind) in [
        ("given", BddPrefix::Given),
        ("when", BddPrefix::When),
        ("then", BddPrefix::Then),
        ("and", BddPrefix::And),
    ] {
        if lower.starts_with(prefix) {
            let rest = line[prefix.len()..].trim_start();
            if !rest.is_empty() {
                return Ok((kind, rest));
            }
        }
    }
    Err(anyhow!(
        "line {}: missing BDD prefix (Given/When/Then/And)",
        line_no
    ))
}

fn parse_scenario(line: &str) -> Option<&str> {
    let lower = line.to_ascii_lowercase();
    if !lower.starts_with("scenario") {
        return None;
    }
    let rest = line["scenario".len()..].trim_start();
    rest.strip_prefix(':').map(str::trim_start)
}

fn is_assert_command(cmd: &str) -> bool {
    cmd.starts_with("expect-") || cmd == "skip-native"
}

#[cfg(test)]
mod tests {
    use super::Harness;

    #[test]
    fn scripts_need_a_scenario() {
        let mut harness = Harness::new().unwrap();
        let err = harness.run_script("Given voice: v1 en-US").unwrap_err();
        assert!(err.to_string().contains("missing Scenario header"));
    }

    #[test]
    fn assertions_only_after_then() {
        let mut harness = Harness::new().unwrap();
        let err = harness
            .run_script("Scenario: x\nWhen expect-rate: 50")
            .unwrap_err();
        assert!(err.to_string().contains("assertions go after Then"));
    }

    #[test]
    fn unchecked_errors_fail_the_scenario() {
        let mut harness = Harness::new().unwrap();
        let err = harness
            .run_script("Scenario: x\nWhen set-rate: 500")
            .unwrap_err();
        assert!(err.to_string().contains("unchecked error"));
    }
}
