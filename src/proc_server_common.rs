//! Server side of the speech process protocol: newline-delimited JSON-RPC 2.0
//! over stdio, plus notifications the server may send at any time.

use crate::speech::{
    Prompt,
    drivers::{NativeEvent, NativeEventKind, NativeSynth},
};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::{
    io::{self, BufRead, Write},
    sync::{Arc, Mutex, PoisonError},
};

#[derive(Debug)]
pub struct Request {
    pub id: Option<u64>,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn param<'a>(&'a self, name: &str) -> Result<&'a Value, RpcError> {
        self.params
            .as_ref()
            .ok_or_else(|| RpcError::invalid_params("missing params"))?
            .get(name)
            .ok_or_else(|| RpcError::invalid_params(format!("missing {}", name)))
    }
}

#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        RpcError {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        RpcError {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        RpcError {
            code: -32601,
            message: format!("method not found: {}", method.into()),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        RpcError {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        RpcError {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

/// Shared writer for responses and notifications.
///
/// Playback threads hold a clone to report bookmarks and state changes while
/// the main loop keeps answering requests.
#[derive(Clone)]
pub struct Notifier {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Notifier {
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Notifier {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_message(&message).context("write rpc notification")
    }

    fn write_result(&self, id: u64, result: Value) -> Result<()> {
        let response = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.write_message(&response).context("write rpc response")
    }

    fn write_error(&self, id: Option<u64>, err: &RpcError) -> Result<()> {
        let response = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": err.code,
                "message": err.message,
                "data": err.data,
            }
        });
        self.write_message(&response).context("write rpc error")
    }

    fn write_message(&self, message: &Value) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *out, message)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Answer requests on stdin until it closes, writing to `notifier`.
pub fn run_server<F>(notifier: &Notifier, mut handler: F) -> Result<()>
where
    F: FnMut(Request, &Notifier) -> Result<Value, RpcError>,
{
    #[cfg(target_os = "macos")]
    {
        run_server_macos(&mut handler, notifier)
    }
    #[cfg(not(target_os = "macos"))]
    {
        serve(io::stdin().lock(), notifier, &mut handler)
    }
}

/// Serve `synth` over the speech server protocol on stdio.
///
/// Native events are forwarded as `bookmark_reached` and `state_changed`
/// notifications.
pub fn serve_synth<S: NativeSynth>(mut synth: S) -> Result<()> {
    let notifier = Notifier::stdout();
    for kind in [NativeEventKind::BookmarkReached, NativeEventKind::StateChanged] {
        let notifier = notifier.clone();
        synth.subscribe(
            kind,
            Arc::new(move |event| {
                if let Err(e) = forward_event(&notifier, &event) {
                    log::warn!("forwarding {:?}: {:#}", event, e);
                }
            }),
        )?;
    }
    run_server(&notifier, |request, _| handle_synth_request(&mut synth, request))
}

fn forward_event(notifier: &Notifier, event: &NativeEvent) -> Result<()> {
    match event {
        NativeEvent::BookmarkReached(name) => {
            notifier.notify("bookmark_reached", json!({ "name": name }))
        }
        NativeEvent::StateChanged(state) => {
            notifier.notify("state_changed", json!({ "state": state }))
        }
    }
}

fn internal(e: anyhow::Error) -> RpcError {
    RpcError::internal_error(format!("{:#}", e))
}

/// Map one protocol request onto `synth`.
pub fn handle_synth_request<S: NativeSynth>(
    synth: &mut S,
    request: Request,
) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "voices" => {
            let voices = synth.voices().map_err(internal)?;
            serde_json::to_value(voices).map_err(|e| RpcError::internal_error(e.to_string()))
        }
        "get_voice" => Ok(json!(synth.current_voice_id().map_err(internal)?)),
        "set_voice" => {
            let id = request
                .param("id")?
                .as_str()
                .ok_or_else(|| RpcError::invalid_params("id must be a string"))?;
            let voice = synth
                .voices()
                .map_err(internal)?
                .into_iter()
                .find(|v| v.id == id)
                .ok_or_else(|| RpcError::invalid_params(format!("unknown voice {}", id)))?;
            synth.set_voice(&voice).map_err(internal)?;
            Ok(Value::Null)
        }
        "capabilities" => Ok(json!({ "rate": synth.supports_rate() })),
        "get_rate" => Ok(json!(synth.rate().map_err(internal)?)),
        "set_rate" => {
            let rate = request
                .param("rate")?
                .as_u64()
                .and_then(|r| u8::try_from(r).ok())
                .filter(|r| *r <= 100)
                .ok_or_else(|| RpcError::invalid_params("rate must be 0-100"))?;
            synth.set_rate(rate).map_err(internal)?;
            Ok(Value::Null)
        }
        "get_volume" => Ok(json!(synth.volume().map_err(internal)?)),
        "set_volume" => {
            let volume = request
                .param("volume")?
                .as_f64()
                .filter(|v| (0.0..=100.0).contains(v))
                .ok_or_else(|| RpcError::invalid_params("volume must be 0-100"))?;
            synth.set_volume(volume).map_err(internal)?;
            Ok(Value::Null)
        }
        "state" => Ok(json!(synth.state())),
        "speak" => {
            let params = request
                .params
                .ok_or_else(|| RpcError::invalid_params("missing params"))?;
            let prompt: Prompt = serde_json::from_value(params)
                .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            synth.speak_async(prompt).map_err(internal)?;
            Ok(Value::Null)
        }
        "cancel" => synth.cancel().map(|_| Value::Null).map_err(internal),
        "pause" => synth.pause().map(|_| Value::Null).map_err(internal),
        "resume" => synth.resume().map(|_| Value::Null).map_err(internal),
        "close" => synth.release().map(|_| Value::Null).map_err(internal),
        _ => Err(RpcError::method_not_found(request.method)),
    }
}

/// Answer requests read from `input` until it reaches end of file.
pub fn serve<R, F>(mut input: R, notifier: &Notifier, handler: &mut F) -> Result<()>
where
    R: BufRead,
    F: FnMut(Request, &Notifier) -> Result<Value, RpcError>,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = input.read_line(&mut line).context("read stdin")?;
        if read == 0 {
            return Ok(());
        }
        handle_line(&line, handler, notifier)?;
    }
}

#[cfg(target_os = "macos")]
fn run_server_macos<F>(handler: &mut F, notifier: &Notifier) -> Result<()>
where
    F: FnMut(Request, &Notifier) -> Result<Value, RpcError>,
{
    use crate::platform;
    use mio::{Events, Interest, Poll, Token};
    use std::io::Read;
    use std::os::fd::AsRawFd;
    use std::time::Duration;

    let mut poll = Poll::new().context("create poll")?;
    let mut events = Events::with_capacity(8);
    let mut stdin = io::stdin();
    poll.registry().register(
        &mut mio::unix::SourceFd(&stdin.as_raw_fd()),
        Token(0),
        Interest::READABLE,
    )?;
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        poll.poll(&mut events, platform::adjust_poll_timeout(Some(Duration::from_millis(10))))?;
        for event in events.iter() {
            if event.token() == Token(0) {
                let mut chunk = [0u8; 4096];
                let read = stdin.read(&mut chunk).context("read stdin")?;
                if read == 0 {
                    return Ok(());
                }
                buffer.extend_from_slice(&chunk[..read]);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line = buffer.drain(..=pos).collect::<Vec<u8>>();
                    let line = String::from_utf8_lossy(&line);
                    handle_line(line.trim_end_matches(&['\r', '\n'][..]), handler, notifier)?;
                }
            }
        }
        // Synthesizer callbacks are delivered through the run loop.
        platform::tick_runloop()?;
    }
}

fn handle_line<F>(line: &str, handler: &mut F, notifier: &Notifier) -> Result<()>
where
    F: FnMut(Request, &Notifier) -> Result<Value, RpcError>,
{
    if line.trim().is_empty() {
        return Ok(());
    }
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("rejecting request: {}", err.message);
            notifier.write_error(None, &err)?;
            return Ok(());
        }
    };
    let id = request.id;
    log::debug!("request {:?}: {}", id, request.method);
    let result = handler(request, notifier);
    if let Some(id) = id {
        match result {
            Ok(value) => notifier.write_result(id, value)?,
            Err(err) => notifier.write_error(Some(id), &err)?,
        }
    }
    Ok(())
}

fn parse_request(line: &str) -> Result<Request, RpcError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| RpcError::parse_error(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| RpcError::invalid_request("request must be an object"))?;
    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_request("missing jsonrpc"))?;
    if jsonrpc != "2.0" {
        return Err(RpcError::invalid_request("jsonrpc must be 2.0"));
    }
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_request("missing method"))?;
    let id = match obj.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::Null) | None => None,
        Some(_) => return Err(RpcError::invalid_request("id must be a number or null")),
    };
    let params = obj.get("params").cloned();
    Ok(Request {
        id,
        method: method.to_string(),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::{Notifier, Request, RpcError, serve};
    use serde_json::{Value, json};
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run(input: &str) -> Vec<Value> {
        let buf = SharedBuf::default();
        let notifier = Notifier::new(buf.clone());
        let mut handler = |req: Request, notifier: &Notifier| -> Result<Value, RpcError> {
            match req.method.as_str() {
                "echo" => Ok(req.param("text")?.clone()),
                "ping" => {
                    notifier.notify("pong", json!({})).unwrap();
                    Ok(Value::Null)
                }
                _ => Err(RpcError::method_not_found(req.method)),
            }
        };
        serve(Cursor::new(input.to_string()), &notifier, &mut handler).unwrap();
        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[test]
    fn answers_requests_by_id() {
        let out = run(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":{"text":"hi"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"nope"}"#,
            "\n",
        ));
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[0]["result"], "hi");
        assert_eq!(out[1]["id"], 2);
        assert_eq!(out[1]["error"]["code"], -32601);
    }

    #[test]
    fn notifications_go_out_before_the_response() {
        let out = run("{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n");
        assert_eq!(out[0]["method"], "pong");
        assert!(out[0].get("id").is_none());
        assert_eq!(out[1]["id"], 7);
    }

    #[test]
    fn malformed_lines_get_an_error_without_id() {
        let out = run("not json\n\n{\"jsonrpc\":\"1.0\",\"method\":\"echo\"}\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["error"]["code"], -32700);
        assert!(out[0]["id"].is_null());
        assert_eq!(out[1]["error"]["code"], -32600);
    }

    #[test]
    fn missing_params_are_invalid() {
        let out = run("{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"echo\"}\n");
        assert_eq!(out[0]["error"]["code"], -32602);
    }
}
