//! Speech server over the platform synthesizer.
//!
//! Point `--speech-program` at this binary to run system speech out of
//! process.

use anyhow::Result;
use bookworm_speech::{proc_server_common::serve_synth, speech::drivers::tts::TtsSynth};
use env_logger::Env;

fn main() -> Result<()> {
    // stdout carries the protocol.
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let synth = TtsSynth::new()?;
    serve_synth(synth)
}
