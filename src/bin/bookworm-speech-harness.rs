use anyhow::{Result, anyhow};
use bookworm_speech::harness::{run_script_file, run_script_stdin};
use std::env;

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        run_script_stdin()?;
        return Ok(());
    };
    if args.next().is_some() {
        return Err(anyhow!("usage: bookworm-speech-harness [script.txt]"));
    }
    run_script_file(&path)
}
