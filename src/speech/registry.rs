use super::{Engine, VoiceInfo, drivers::dummy::DummyEngine};
use crate::error::{Result, SpeechError};
use std::fmt;

type CheckFn = Box<dyn Fn() -> bool>;
type CreateFn = Box<dyn Fn() -> Result<Box<dyn Engine>>>;

/// A kind of engine that may be instantiated on this host.
pub struct EngineKind {
    pub name: &'static str,
    pub display_name: &'static str,
    check: CheckFn,
    create: CreateFn,
}

impl EngineKind {
    pub fn new<C, F>(name: &'static str, display_name: &'static str, check: C, create: F) -> Self
    where
        C: Fn() -> bool + 'static,
        F: Fn() -> Result<Box<dyn Engine>> + 'static,
    {
        EngineKind {
            name,
            display_name,
            check: Box::new(check),
            create: Box::new(create),
        }
    }

    pub fn dummy() -> Self {
        EngineKind::new(
            DummyEngine::NAME,
            DummyEngine::DISPLAY_NAME,
            || true,
            || Ok(Box::new(DummyEngine::new())),
        )
    }

    /// Whether this engine can run here. Never fails.
    pub fn check(&self) -> bool {
        (self.check)()
    }

    pub fn instantiate(&self) -> Result<Box<dyn Engine>> {
        if !self.check() {
            return Err(SpeechError::Unavailable {
                engine: self.name.to_string(),
            });
        }
        log::debug!("creating {} engine", self.name);
        (self.create)()
    }

    /// Probe a throwaway instance for the best voice it can actually use.
    pub fn first_available_voice(&self, language: Option<&str>) -> Result<Option<VoiceInfo>> {
        let mut probe = self.instantiate()?;
        let voice = probe.first_settable_voice(language);
        if let Err(e) = probe.close() {
            log::warn!("closing {} probe: {}", self.name, e);
        }
        voice
    }
}

impl fmt::Debug for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineKind")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// The engines known to the application, in preference order.
#[derive(Debug)]
pub struct Registry {
    kinds: Vec<EngineKind>,
    dummy: EngineKind,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            kinds: Vec::new(),
            dummy: EngineKind::dummy(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend this build knows about, configured from `backends`.
    pub fn with_defaults(backends: &crate::config::BackendConfig) -> Self {
        let mut registry = Registry::new();
        if let Some(program) = backends.speech_program.clone() {
            registry.register(super::drivers::proc_synth::engine_kind(program));
        }
        #[cfg(feature = "native")]
        registry.register(super::drivers::tts::engine_kind());
        registry
    }

    pub fn register(&mut self, kind: EngineKind) {
        self.kinds.push(kind);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EngineKind> {
        self.kinds.iter().chain(std::iter::once(&self.dummy))
    }

    pub fn available(&self) -> Vec<&EngineKind> {
        self.kinds().filter(|k| k.check()).collect()
    }

    /// The named engine if it can run here, otherwise the "No Speech" engine.
    pub fn get(&self, name: &str) -> &EngineKind {
        match self.kinds.iter().find(|k| k.name == name) {
            Some(kind) if kind.check() => kind,
            Some(kind) => {
                log::warn!("{} is unavailable, speech is disabled", kind.name);
                &self.dummy
            }
            None => {
                if name != self.dummy.name {
                    log::warn!("unknown speech engine {:?}", name);
                }
                &self.dummy
            }
        }
    }

    /// The first registered engine that can run here.
    pub fn preferred(&self) -> &EngineKind {
        self.kinds
            .iter()
            .find(|k| k.check())
            .unwrap_or(&self.dummy)
    }
}
