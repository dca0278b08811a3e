use crate::error::{Result, SpeechError};
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEvent {
    BookmarkReached,
    StateChanged,
    SpeechProgress,
}

impl EngineEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineEvent::BookmarkReached => "bookmark_reached",
            EngineEvent::StateChanged => "state_changed",
            EngineEvent::SpeechProgress => "speech_progress",
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineEvent {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bookmark_reached" => Ok(EngineEvent::BookmarkReached),
            "state_changed" => Ok(EngineEvent::StateChanged),
            "speech_progress" => Ok(EngineEvent::SpeechProgress),
            _ => Err(SpeechError::UnsupportedEvent(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthState {
    Idle,
    Speaking,
    Paused,
}

impl SynthState {
    /// Map a native synthesizer state code (0 ready, 1 speaking, 2 paused).
    pub fn from_native(code: i64) -> SynthState {
        match code {
            1 => SynthState::Speaking,
            2 => SynthState::Paused,
            _ => SynthState::Idle,
        }
    }

    pub fn native_code(self) -> i64 {
        match self {
            SynthState::Idle => 0,
            SynthState::Speaking => 1,
            SynthState::Paused => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SynthState::Idle => "idle",
            SynthState::Speaking => "speaking",
            SynthState::Paused => "paused",
        }
    }
}

impl fmt::Display for SynthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a bound handler receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    BookmarkReached(String),
    StateChanged(SynthState),
}

impl EngineNotification {
    pub fn event(&self) -> EngineEvent {
        match self {
            EngineNotification::BookmarkReached(_) => EngineEvent::BookmarkReached,
            EngineNotification::StateChanged(_) => EngineEvent::StateChanged,
        }
    }
}

/// Handlers run on the synthesizer's thread, not the caller's.
pub type Handler = Box<dyn FnMut(&EngineNotification) + Send>;

type SharedHandler = Arc<Mutex<Handler>>;

/// Event kind to handlers, shared between an engine and its native callbacks.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<Mutex<HashMap<EngineEvent, Vec<SharedHandler>>>>,
}

impl HandlerRegistry {
    pub const SUPPORTED: [EngineEvent; 2] =
        [EngineEvent::BookmarkReached, EngineEvent::StateChanged];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, event: EngineEvent, handler: Handler) -> Result<()> {
        if !Self::SUPPORTED.contains(&event) {
            return Err(SpeechError::UnsupportedEvent(event.to_string()));
        }
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(Arc::new(Mutex::new(handler)));
        Ok(())
    }

    /// Call every handler bound for the notification's event, in binding order.
    ///
    /// Handlers run outside the registry lock, so one may bind another.
    pub fn dispatch(&self, notification: &EngineNotification) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&notification.event())
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }
        log::debug!("dispatching {:?} to {} handler(s)", notification, handlers.len());
        for handler in handlers {
            let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);
            (*handler)(notification);
        }
    }

    pub fn handler_count(&self, event: EngineEvent) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("bookmark_reached", &self.handler_count(EngineEvent::BookmarkReached))
            .field("state_changed", &self.handler_count(EngineEvent::StateChanged))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineEvent, EngineNotification, HandlerRegistry, SynthState};
    use crate::error::SpeechError;
    use std::{
        sync::{Arc, Mutex, mpsc},
        thread,
        time::Duration,
    };

    #[test]
    fn handlers_run_in_binding_order() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            registry
                .bind(
                    EngineEvent::BookmarkReached,
                    Box::new(move |n: &EngineNotification| {
                        if let EngineNotification::BookmarkReached(name) = n {
                            seen.lock().unwrap().push(format!("{}:{}", tag, name));
                        }
                    }),
                )
                .unwrap();
        }
        registry.dispatch(&EngineNotification::BookmarkReached("b".into()));
        registry.dispatch(&EngineNotification::StateChanged(SynthState::Idle));
        assert_eq!(*seen.lock().unwrap(), ["first:b", "second:b"]);
    }

    #[test]
    fn a_handler_can_bind_another_handler() {
        let registry = HandlerRegistry::new();
        let inner = registry.clone();
        let (tx, rx) = mpsc::channel();
        registry
            .bind(
                EngineEvent::StateChanged,
                Box::new(move |_: &EngineNotification| {
                    let tx = tx.clone();
                    inner
                        .bind(
                            EngineEvent::BookmarkReached,
                            Box::new(move |n: &EngineNotification| {
                                let _ = tx.send(n.clone());
                            }),
                        )
                        .unwrap();
                }),
            )
            .unwrap();

        let dispatcher = registry.clone();
        let native = thread::spawn(move || {
            dispatcher.dispatch(&EngineNotification::StateChanged(SynthState::Speaking));
            dispatcher.dispatch(&EngineNotification::BookmarkReached("b1".into()));
        });
        let received = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(received, EngineNotification::BookmarkReached("b1".into()));
        native.join().unwrap();
        assert_eq!(registry.handler_count(EngineEvent::BookmarkReached), 1);
        assert_eq!(
            format!("{:?}", registry),
            "HandlerRegistry { bookmark_reached: 1, state_changed: 1 }"
        );
    }

    #[test]
    fn unsupported_event_is_not_registered() {
        let registry = HandlerRegistry::new();
        let err = registry
            .bind(EngineEvent::SpeechProgress, Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, SpeechError::UnsupportedEvent(_)));
        assert_eq!(registry.handler_count(EngineEvent::SpeechProgress), 0);
    }

    #[test]
    fn unknown_event_names_are_not_implemented() {
        assert_eq!(
            "state_changed".parse::<EngineEvent>().unwrap(),
            EngineEvent::StateChanged
        );
        assert!(matches!(
            "word_reached".parse::<EngineEvent>(),
            Err(SpeechError::UnsupportedEvent(_))
        ));
    }

    #[test]
    fn native_state_codes() {
        assert_eq!(SynthState::from_native(1), SynthState::Speaking);
        assert_eq!(SynthState::from_native(2), SynthState::Paused);
        assert_eq!(SynthState::from_native(0), SynthState::Idle);
        assert_eq!(SynthState::from_native(-7), SynthState::Idle);
        assert_eq!(SynthState::Paused.native_code(), 2);
    }
}
