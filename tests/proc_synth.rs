use bookworm_speech::{
    SpeechError,
    config::BackendConfig,
    speech::{
        Engine, EngineEvent, EngineNotification, Registry, SynthState, Utterance,
        drivers::{
            NativeEngine,
            proc_synth::{self, ProcSynth},
        },
    },
};
use std::{
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver},
    time::Duration,
};

fn stub_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bookworm-speech-stub"))
}

fn engine(args: &[&str]) -> NativeEngine<ProcSynth> {
    let synth = ProcSynth::spawn_with_args(&stub_path(), args).expect("spawn speech stub");
    NativeEngine::new(proc_synth::NAME, proc_synth::DISPLAY_NAME, synth).expect("create engine")
}

fn listen(engine: &mut NativeEngine<ProcSynth>) -> Receiver<EngineNotification> {
    let (tx, rx) = mpsc::channel();
    for event in [EngineEvent::BookmarkReached, EngineEvent::StateChanged] {
        let tx = tx.clone();
        engine
            .bind(
                event,
                Box::new(move |n: &EngineNotification| {
                    let _ = tx.send(n.clone());
                }),
            )
            .expect("bind");
    }
    rx
}

fn next(rx: &Receiver<EngineNotification>) -> EngineNotification {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("notification from speech stub")
}

#[test]
fn voices_rank_by_language() {
    let engine = engine(&[]);
    let ids = |language| {
        engine
            .voices_by_language(language)
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(Some("en-US")), ["v1", "v2"]);
    assert_eq!(ids(Some("fr")), ["v3"]);
    assert_eq!(ids(None), ["v1", "v2", "v3"]);
    assert_eq!(engine.voice().unwrap().map(|v| v.id), Some("v1".to_string()));
}

#[test]
fn voice_selection_errors() {
    let mut engine = engine(&["--refuse", "v3"]);
    assert!(matches!(
        engine.set_voice_from_string("v9"),
        Err(SpeechError::UnknownVoice(_))
    ));
    assert!(matches!(
        engine.set_voice_from_string("v3"),
        Err(SpeechError::InvalidVoice(_))
    ));
    engine.set_voice_from_string("v2").unwrap();
    assert_eq!(engine.voice().unwrap().map(|v| v.id), Some("v2".to_string()));

    let selected = engine.first_settable_voice(Some("fr-FR")).unwrap();
    assert!(selected.is_none());
}

#[test]
fn rate_and_volume_round_trip_through_the_program() {
    let mut engine = engine(&[]);
    engine.set_rate(80).unwrap();
    assert_eq!(engine.rate().unwrap(), 80);
    assert!(matches!(
        engine.set_rate(150),
        Err(SpeechError::RateOutOfRange(150))
    ));
    assert_eq!(engine.rate().unwrap(), 80);

    engine.set_volume(30).unwrap();
    assert_eq!(engine.volume().unwrap(), 30);
    assert!(matches!(
        engine.set_volume(-3),
        Err(SpeechError::VolumeOutOfRange(-3))
    ));
}

#[test]
fn programs_without_rate_control_get_rate_buckets() {
    let mut engine = engine(&["--no-rate"]);
    engine.set_rate(95).unwrap();
    assert_eq!(engine.rate().unwrap(), 95);
    let mut utterance = Utterance::new();
    utterance.add_text("quick");
    let prompt = engine.preprocess_utterance(&utterance);
    assert!(prompt.ssml.contains(r#"<prosody rate="fast">quick</prosody>"#));
    assert!(prompt.ssml.contains(r#"xml:lang="en-US""#));
}

#[test]
fn bookmarks_and_state_changes_arrive_in_order() {
    let mut engine = engine(&[]);
    let rx = listen(&mut engine);
    let mut utterance = Utterance::new();
    utterance
        .add_bookmark("start")
        .add_text("Hello there. ")
        .add_bookmark("middle")
        .add_text("General Kenobi.")
        .add_bookmark("end");
    engine.speak(&utterance).unwrap();

    let received = (0..5).map(|_| next(&rx)).collect::<Vec<_>>();
    assert_eq!(
        received,
        [
            EngineNotification::StateChanged(SynthState::Speaking),
            EngineNotification::BookmarkReached("start".to_string()),
            EngineNotification::BookmarkReached("middle".to_string()),
            EngineNotification::BookmarkReached("end".to_string()),
            EngineNotification::StateChanged(SynthState::Idle),
        ]
    );
    assert_eq!(engine.state(), SynthState::Idle);
}

#[test]
fn pause_holds_playback_until_resume() {
    let mut engine = engine(&["--chunk-ms", "200"]);
    let rx = listen(&mut engine);
    let mut utterance = Utterance::new();
    utterance
        .add_text("one")
        .add_bookmark("two")
        .add_text("two");
    engine.speak(&utterance).unwrap();
    assert_eq!(next(&rx), EngineNotification::StateChanged(SynthState::Speaking));

    engine.pause().unwrap();
    assert_eq!(engine.state(), SynthState::Paused);
    assert_eq!(next(&rx), EngineNotification::StateChanged(SynthState::Paused));

    engine.resume().unwrap();
    assert_eq!(next(&rx), EngineNotification::StateChanged(SynthState::Speaking));
    assert_eq!(next(&rx), EngineNotification::BookmarkReached("two".to_string()));
    assert_eq!(next(&rx), EngineNotification::StateChanged(SynthState::Idle));
}

#[test]
fn stop_cancels_the_rest() {
    let mut engine = engine(&["--chunk-ms", "500"]);
    let rx = listen(&mut engine);
    let mut utterance = Utterance::new();
    utterance
        .add_text("long")
        .add_bookmark("never")
        .add_text("reached");
    engine.speak(&utterance).unwrap();
    assert_eq!(next(&rx), EngineNotification::StateChanged(SynthState::Speaking));
    engine.stop().unwrap();
    assert_eq!(next(&rx), EngineNotification::StateChanged(SynthState::Idle));
    assert!(rx.recv_timeout(Duration::from_millis(800)).is_err());
}

#[test]
fn close_is_idempotent_and_final() {
    let mut engine = engine(&[]);
    engine.close().unwrap();
    engine.close().unwrap();
    assert!(engine.voices().is_err());
}

#[test]
fn registry_offers_a_configured_program_first() {
    let registry = Registry::with_defaults(&BackendConfig {
        speech_program: Some(stub_path()),
    });
    let preferred = registry.preferred();
    assert_eq!(preferred.name, proc_synth::NAME);
    let voice = preferred.first_available_voice(Some("fr")).unwrap();
    assert_eq!(voice.map(|v| v.id), Some("v3".to_string()));

    let missing = Registry::with_defaults(&BackendConfig {
        speech_program: Some(Path::new("/nonexistent/speech-program").to_path_buf()),
    });
    assert_eq!(missing.get(proc_synth::NAME).name, "dummy");
}
