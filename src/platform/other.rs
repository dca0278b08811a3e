use anyhow::Result;
use std::time::Duration;

/// Nothing to pump; synthesizer callbacks arrive on their own threads.
pub fn tick_runloop() -> Result<()> {
    Ok(())
}

pub fn adjust_poll_timeout(current: Option<Duration>) -> Option<Duration> {
    current
}
