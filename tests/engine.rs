use bookworm_speech::{
    ErrorClass, SpeechError,
    harness::{FakeHandle, FakeSynth},
    speech::{
        Engine, EngineEvent, EngineKind, EngineNotification, Registry, SynthState, Utterance,
        VoiceInfo,
        drivers::{NativeEngine, NativeEvent},
    },
};
use serde_json::json;
use std::{sync::mpsc, thread, time::Duration};

fn voices() -> Vec<VoiceInfo> {
    vec![
        VoiceInfo::new("v1", "One", "en-US"),
        VoiceInfo::new("v2", "Two", "en-GB"),
        VoiceInfo::new("v3", "Trois", "fr-FR"),
    ]
}

fn fake_engine() -> NativeEngine<FakeSynth> {
    NativeEngine::new("fake", "Fake Speech", FakeSynth::with_voices(voices())).unwrap()
}

#[test]
fn english_query_ranks_exact_match_first() {
    let engine = fake_engine();
    let ids = engine
        .voices_by_language(Some("en-US"))
        .unwrap()
        .into_iter()
        .map(|v| v.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, ["v1", "v2"]);
}

#[test]
fn errors_carry_their_class() {
    let mut engine = fake_engine();
    let err = engine.set_rate(150).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Value);
    assert_eq!(engine.rate().unwrap(), 50);

    let err = engine.speak_value(&json!(["not", "an", "utterance"])).unwrap_err();
    assert!(matches!(err, SpeechError::InvalidUtterance(_)));
    assert_eq!(err.class(), ErrorClass::Type);
    assert!(engine.synth().prompts().is_empty());

    let err = engine
        .bind(EngineEvent::SpeechProgress, Box::new(|_: &EngineNotification| {}))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotImplemented);
}

#[test]
fn handlers_run_on_the_synthesizer_thread() {
    let handle = FakeHandle::new();
    let kind = handle.engine_kind(voices());
    let mut engine = kind.instantiate().unwrap();
    let (tx, rx) = mpsc::channel();
    engine
        .bind(
            EngineEvent::BookmarkReached,
            Box::new(move |n: &EngineNotification| {
                let _ = tx.send((thread::current().id(), n.clone()));
            }),
        )
        .unwrap();

    let mut utterance = Utterance::new();
    utterance.add_bookmark("b1").add_text("hello");
    engine.speak(&utterance).unwrap();
    assert_eq!(engine.state(), SynthState::Speaking);

    let native = thread::spawn(move || {
        handle.fire(NativeEvent::BookmarkReached("b1".to_string()));
        thread::current().id()
    });
    let native_id = native.join().unwrap();
    let (handler_id, notification) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(handler_id, native_id);
    assert_ne!(handler_id, thread::current().id());
    assert_eq!(
        notification,
        EngineNotification::BookmarkReached("b1".to_string())
    );
}

#[test]
fn several_handlers_run_in_binding_order() {
    let handle = FakeHandle::new();
    let mut engine = handle.engine_kind(voices()).instantiate().unwrap();
    let (tx, rx) = mpsc::channel();
    for tag in ["first", "second"] {
        let tx = tx.clone();
        engine
            .bind(
                EngineEvent::StateChanged,
                Box::new(move |n: &EngineNotification| {
                    let _ = tx.send((tag, n.clone()));
                }),
            )
            .unwrap();
    }
    handle.fire(NativeEvent::StateChanged(2));
    let received = rx.try_iter().collect::<Vec<_>>();
    let paused = EngineNotification::StateChanged(SynthState::Paused);
    assert_eq!(received, [("first", paused.clone()), ("second", paused)]);
}

#[test]
fn closing_stops_event_delivery() {
    let handle = FakeHandle::new();
    let mut engine = handle.engine_kind(voices()).instantiate().unwrap();
    let (tx, rx) = mpsc::channel();
    engine
        .bind(
            EngineEvent::BookmarkReached,
            Box::new(move |n: &EngineNotification| {
                let _ = tx.send(n.clone());
            }),
        )
        .unwrap();
    engine.close().unwrap();
    handle.fire(NativeEvent::BookmarkReached("late".to_string()));
    assert!(rx.try_recv().is_err());
}

#[test]
fn probing_finds_the_best_settable_voice() {
    let handle = FakeHandle::new();
    let mut registry = Registry::new();
    registry.register(handle.engine_kind(voices()));
    let kind = registry.get("fake");
    let voice = kind.first_available_voice(Some("en-GB")).unwrap();
    assert_eq!(voice.map(|v| v.id), Some("v2".to_string()));
    assert_eq!(kind.first_available_voice(Some("ja")).unwrap(), None);
}

#[test]
fn unavailable_engines_refuse_to_start() {
    let kind = EngineKind::new("never", "Never", || false, || unreachable!());
    let err = kind.instantiate().err().unwrap();
    assert!(matches!(err, SpeechError::Unavailable { .. }));
    assert_eq!(err.class(), ErrorClass::Availability);
}

#[test]
fn close_releases_the_handle_when_unsubscribe_fails() {
    let mut engine = fake_engine();
    engine.synth_mut().fail_next_unsubscribe();
    let (tx, rx) = mpsc::channel();
    engine
        .bind(
            EngineEvent::BookmarkReached,
            Box::new(move |n: &EngineNotification| {
                let _ = tx.send(n.clone());
            }),
        )
        .unwrap();

    let err = engine.close().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Backend);
    assert_eq!(engine.synth().calls(), ["unsubscribe", "unsubscribe", "release"]);

    engine.close().unwrap();
    assert_eq!(engine.synth().calls().len(), 3);
    engine
        .synth_mut()
        .fire(NativeEvent::BookmarkReached("late".to_string()));
    assert!(rx.try_recv().is_err());
}
