use anyhow::Result;
use core_foundation::runloop;
use std::time::Duration;

// AVSpeechSynthesizer callbacks only run while the run loop is pumped.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pump the current run loop once, briefly.
pub fn tick_runloop() -> Result<()> {
    unsafe {
        let _ = runloop::CFRunLoopRunInMode(runloop::kCFRunLoopDefaultMode, 0.01, 0);
    }
    Ok(())
}

/// Cap a poll timeout so the run loop keeps getting pumped.
pub fn adjust_poll_timeout(current: Option<Duration>) -> Option<Duration> {
    Some(current.map_or(MAX_POLL_INTERVAL, |c| c.min(MAX_POLL_INTERVAL)))
}
