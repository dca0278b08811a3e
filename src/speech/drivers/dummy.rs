use crate::error::{Result, SpeechError};
use crate::speech::{
    Engine, EngineEvent, Handler, HandlerRegistry, Prompt, SynthState, VoiceInfo, percent,
};

/// Used when no real speech engine is available.
#[derive(Debug, Default)]
pub struct DummyEngine {
    // Kept so bind() follows the same rules as real engines.
    handlers: HandlerRegistry,
}

impl DummyEngine {
    pub const NAME: &'static str = "dummy";
    pub const DISPLAY_NAME: &'static str = "No Speech";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for DummyEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        Self::DISPLAY_NAME
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn voices(&self) -> Result<Vec<VoiceInfo>> {
        Ok(Vec::new())
    }

    fn state(&self) -> SynthState {
        SynthState::Idle
    }

    fn voice(&self) -> Result<Option<VoiceInfo>> {
        Ok(None)
    }

    fn set_voice(&mut self, _voice: &VoiceInfo) -> Result<()> {
        Ok(())
    }

    fn rate(&self) -> Result<u8> {
        Ok(50)
    }

    fn set_rate(&mut self, rate: i32) -> Result<()> {
        percent(rate).map(|_| ()).ok_or(SpeechError::RateOutOfRange(rate))
    }

    fn volume(&self) -> Result<u8> {
        Ok(100)
    }

    fn set_volume(&mut self, volume: i32) -> Result<()> {
        percent(volume)
            .map(|_| ())
            .ok_or(SpeechError::VolumeOutOfRange(volume))
    }

    fn speak_prompt(&mut self, _prompt: Prompt) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn bind(&mut self, event: EngineEvent, handler: Handler) -> Result<()> {
        self.handlers.bind(event, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::DummyEngine;
    use crate::speech::{Engine, EngineConfig, SynthState, Utterance};

    #[test]
    fn everything_is_a_quiet_no_op() {
        let mut engine = DummyEngine::new();
        engine.configure(&EngineConfig {
            voice: "missing".into(),
            rate: 500,
            volume: -3,
        });
        let mut u = Utterance::new();
        u.add_text("nothing");
        engine.speak(&u).unwrap();
        engine.pause().unwrap();
        engine.resume().unwrap();
        assert_eq!(engine.state(), SynthState::Idle);
        assert_eq!(engine.rate().unwrap(), 50);
        assert_eq!(engine.volume().unwrap(), 100);
        assert!(engine.voice().unwrap().is_none());
        assert!(engine.set_rate(101).is_err());
    }
}
