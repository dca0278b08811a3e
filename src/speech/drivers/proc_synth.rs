use super::{
    NativeCallback, NativeEngine, NativeEvent, NativeEventKind, NativeSynth, Subscribers,
    SubscriptionId,
};
use crate::speech::{Engine, EngineKind, Prompt, VoiceInfo};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    cell::RefCell,
    env,
    ffi::OsStr,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub const NAME: &str = "process";
pub const DISPLAY_NAME: &str = "External Speech Program";

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

/// The request side of the pipe.
struct Rpc {
    stdin: ChildStdin,
    responses: Receiver<JsonRpcResponse>,
    next_id: u64,
}

impl Rpc {
    fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let payload = serde_json::to_string(&request).context("serialize rpc request")?;
        self.stdin
            .write_all(payload.as_bytes())
            .context("write rpc request")?;
        self.stdin.write_all(b"\n").context("write rpc newline")?;
        self.stdin.flush().context("flush rpc request")?;

        loop {
            let response = match self.responses.recv_timeout(CALL_TIMEOUT) {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) => {
                    bail!("speech program did not answer {} in time", method)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("speech program closed stdout while waiting for response")
                }
            };
            if response.id != Some(id) {
                continue;
            }
            if let Some(err) = response.error {
                bail!(
                    "speech program rpc error {}: {}{}",
                    err.code,
                    err.message,
                    err.data.map(|v| format!(" ({})", v)).unwrap_or_default()
                );
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}

/// A synthesizer living in a child process, spoken to over JSON-RPC.
///
/// A reader thread owns the child's stdout: responses go back to the caller
/// over a channel and notifications become native callbacks on that thread.
pub struct ProcSynth {
    child: Child,
    // Getters need a round trip too; the engine's single owner serializes calls.
    rpc: RefCell<Rpc>,
    subscribers: Subscribers,
    last_state: Arc<AtomicI64>,
    reader: Option<JoinHandle<()>>,
    supports_rate: bool,
    released: bool,
}

impl ProcSynth {
    /// Whether `program` names something we could spawn.
    pub fn check(program: &Path) -> bool {
        if program.components().count() > 1 {
            return program.is_file();
        }
        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }

    pub fn spawn(program: &Path) -> Result<Self> {
        Self::spawn_with_args(program, &[] as &[&str])
    }

    pub fn spawn_with_args<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn speech program {}", program.display()))?;
        let stdin = child.stdin.take().context("capture speech program stdin")?;
        let stdout = child.stdout.take().context("capture speech program stdout")?;

        let (tx, responses) = mpsc::channel();
        let subscribers = Subscribers::new();
        let last_state = Arc::new(AtomicI64::new(0));
        let reader = {
            let subscribers = subscribers.clone();
            let last_state = Arc::clone(&last_state);
            thread::Builder::new()
                .name("speech-program-reader".into())
                .spawn(move || read_messages(stdout, tx, subscribers, last_state))
                .context("start speech program reader")?
        };

        let mut synth = ProcSynth {
            child,
            rpc: RefCell::new(Rpc {
                stdin,
                responses,
                next_id: 1,
            }),
            subscribers,
            last_state,
            reader: Some(reader),
            supports_rate: false,
            released: false,
        };
        let capabilities = synth.call("capabilities", None)?;
        synth.supports_rate = capabilities
            .get("rate")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(synth)
    }

    fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.released {
            bail!("speech program already closed");
        }
        self.rpc.borrow_mut().call(method, params)
    }

    fn shutdown(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl NativeSynth for ProcSynth {
    fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let voices = self.call("voices", None)?;
        serde_json::from_value(voices).context("parse voice list")
    }

    fn current_voice_id(&self) -> Result<Option<String>> {
        let id = self.call("get_voice", None)?;
        Ok(id.as_str().map(str::to_string))
    }

    fn set_voice(&mut self, voice: &VoiceInfo) -> Result<()> {
        self.call("set_voice", Some(json!({ "id": voice.id })))?;
        Ok(())
    }

    fn supports_rate(&self) -> bool {
        self.supports_rate
    }

    fn rate(&self) -> Result<u8> {
        let rate = self.call("get_rate", None)?;
        rate.as_u64()
            .and_then(|r| u8::try_from(r).ok())
            .ok_or_else(|| anyhow!("invalid rate {}", rate))
    }

    fn set_rate(&mut self, rate: u8) -> Result<()> {
        self.call("set_rate", Some(json!({ "rate": rate })))?;
        Ok(())
    }

    fn volume(&self) -> Result<f64> {
        let volume = self.call("get_volume", None)?;
        volume
            .as_f64()
            .ok_or_else(|| anyhow!("invalid volume {}", volume))
    }

    fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.call("set_volume", Some(json!({ "volume": volume })))?;
        Ok(())
    }

    fn state(&self) -> i64 {
        match self.call("state", None) {
            Ok(state) => state.as_i64().unwrap_or(0),
            Err(e) => {
                log::warn!("querying speech program state: {}", e);
                self.last_state.load(Ordering::SeqCst)
            }
        }
    }

    fn speak_async(&mut self, prompt: Prompt) -> Result<()> {
        let params = serde_json::to_value(&prompt).context("serialize prompt")?;
        self.call("speak", Some(params))?;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.call("cancel", None)?;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.call("pause", None)?;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.call("resume", None)?;
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
        self.subscribers.unsubscribe(id)
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if let Err(e) = self.call("close", None) {
            log::debug!("speech program close: {}", e);
        }
        self.released = true;
        self.shutdown();
        Ok(())
    }
}

impl Drop for ProcSynth {
    fn drop(&mut self) {
        if !self.released {
            self.shutdown();
        }
    }
}

/// The registry entry for a speech program at `program`.
pub fn engine_kind(program: PathBuf) -> EngineKind {
    let check_program = program.clone();
    EngineKind::new(
        NAME,
        DISPLAY_NAME,
        move || ProcSynth::check(&check_program),
        move || {
            let synth = ProcSynth::spawn(&program)?;
            let engine: Box<dyn Engine> = Box::new(NativeEngine::new(NAME, DISPLAY_NAME, synth)?);
            Ok(engine)
        },
    )
}

fn read_messages(
    stdout: ChildStdout,
    responses: Sender<JsonRpcResponse>,
    subscribers: Subscribers,
    last_state: Arc<AtomicI64>,
) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("reading speech program output: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("ignoring malformed line from speech program: {}", e);
                continue;
            }
        };
        if value.get("id").is_some() {
            match serde_json::from_value::<JsonRpcResponse>(value) {
                Ok(response) => {
                    if responses.send(response).is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("ignoring malformed response: {}", e),
            }
            continue;
        }
        match parse_notification(&value) {
            Some(event) => {
                if let NativeEvent::StateChanged(code) = event {
                    last_state.store(code, Ordering::SeqCst);
                }
                subscribers.emit(event);
            }
            None => log::debug!("ignoring notification {}", value),
        }
    }
    log::debug!("speech program reader finished");
}

fn parse_notification(value: &Value) -> Option<NativeEvent> {
    let params = value.get("params");
    match value.get("method")?.as_str()? {
        "bookmark_reached" => params?
            .get("name")?
            .as_str()
            .map(|name| NativeEvent::BookmarkReached(name.to_string())),
        "state_changed" => params?
            .get("state")?
            .as_i64()
            .map(NativeEvent::StateChanged),
        _ => None,
    }
}
