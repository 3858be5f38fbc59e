//! Serving a model on this machine and chatting with it from the terminal.

use crate::accelerator::AcceleratorCatalog;
use crate::cloud::JIILE_HOME_ENV;
use crate::config::ServeConfig;
use crate::error::{NidamError, Result};
use crate::hardware::DeploymentTarget;
use crate::matcher::SelectionPolicy;
use crate::package::ModelPackage;
use crate::process::{run_command, CommandSpec, ServerProcess};
use crate::venv::{resolve_venv_spec, EnvVars, EnvironmentCache};
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info};

/// Fail unless `policy` lets `package` run on `target`.
pub fn ensure_runnable(
    package: &ModelPackage,
    target: &DeploymentTarget,
    catalog: &AcceleratorCatalog,
    policy: &SelectionPolicy,
) -> Result<()> {
    if policy.can_run(&package.requirements(), target, catalog) {
        return Ok(());
    }
    error!("Selected model cannot run on the detected hardware.");
    Err(NidamError::NoAvailableTarget)
}

/// `requested`, or a random port in [`ServeConfig::RANDOM_PORT_RANGE`].
pub fn pick_port(requested: Option<u16>) -> u16 {
    requested.unwrap_or_else(|| rand::rng().random_range(ServeConfig::RANDOM_PORT_RANGE))
}

/// Where the browser chat UI of a local server lives.
pub fn chat_ui_url(port: u16) -> String {
    format!("http://localhost:{}/chat", port)
}

/// Variables the model server runs with: `JIILE_HOME` plus every manifest
/// variable that has a value, taken from `lookup` first, then the default.
pub fn serve_envs<F>(package: &ModelPackage, lookup: F) -> EnvVars
where
    F: Fn(&str) -> Option<String>,
{
    let mut envs: EnvVars = package
        .manifest
        .env_defaults()
        .into_iter()
        .filter_map(|(name, default)| {
            let value = lookup(&name).filter(|v| !v.is_empty()).or(default)?;
            Some((name, value))
        })
        .collect();
    envs.insert(JIILE_HOME_ENV, package.jileml_home().to_string_lossy());
    envs
}

/// `jileml serve <name:version> [--port N]` inside `venv`.
pub fn serve_command(package: &ModelPackage, port: u16, venv: &Path, envs: &EnvVars) -> CommandSpec {
    let mut spec = CommandSpec::new("jileml")
        .args(["serve", package.jileml_tag().as_str()])
        .envs(envs.iter())
        .venv(venv);
    if port != ServeConfig::DEFAULT_PORT {
        spec = spec.args(["--port".to_string(), port.to_string()]);
    }
    spec
}

/// Build (or reuse) the runtime environment for `package`.
pub async fn prepare_environment(
    package: &ModelPackage,
    cache: &EnvironmentCache,
    envs: &EnvVars,
) -> Result<PathBuf> {
    let spec = resolve_venv_spec(package, envs)?;
    cache.ensure(&spec).await
}

/// Serve `package` in the foreground until the server exits.
pub async fn serve(package: &ModelPackage, cache: &EnvironmentCache, port: u16) -> Result<()> {
    let envs = serve_envs(package, |name| std::env::var(name).ok());
    let venv = prepare_environment(package, cache, &envs).await?;
    let spec = serve_command(package, port, &venv, &envs).silent(false);
    run_command(&spec).await?;
    Ok(())
}

/// Start `package` on `port`, wait for it and chat on stdin/stdout.
///
/// Ctrl-C or end of input ends the conversation and stops the server.
pub async fn run(
    package: &ModelPackage,
    cache: &EnvironmentCache,
    port: u16,
    attempts: u32,
) -> Result<()> {
    let envs = serve_envs(package, |name| std::env::var(name).ok());
    let venv = prepare_environment(package, cache, &envs).await?;
    let spec = serve_command(package, port, &venv, &envs);

    let mut server = ServerProcess::spawn(&spec, port)?;
    let http = reqwest::Client::new();

    info!("Model loading...");
    let ready = tokio::select! {
        ready = server.wait_until_ready(&http, attempts) => ready,
        _ = tokio::signal::ctrl_c() => Err(NidamError::Other("Interrupted".to_string())),
    };
    if let Err(e) = ready {
        error!("Model failed to load");
        server.stop().await?;
        return Err(e);
    }
    info!("Model is ready");

    let client = ChatClient::new(http, format!("{}/v1", server.base_url()));
    let session = async {
        let model = client.first_model().await?;
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        chat_loop(&client, &model, stdin, &mut std::io::stdout()).await
    };
    let outcome = tokio::select! {
        outcome = session => outcome,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    println!();
    server.stop().await?;
    outcome
}

/// One message of an OpenAI style conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// A decoded server-sent event of a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Done,
}

/// Turn one SSE line into an event. Lines other than `data:` and chunks
/// without content yield nothing.
pub fn parse_sse_line(line: &str) -> Result<Option<StreamEvent>> {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(StreamEvent::Done));
    }
    if data.is_empty() {
        return Ok(None);
    }
    let chunk: CompletionChunk = serde_json::from_str(data)?;
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();
    Ok((!text.is_empty()).then_some(StreamEvent::Text(text)))
}

/// Splits a byte stream into SSE lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed `bytes` and return the events of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = parse_sse_line(&line)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Events of a trailing line without a newline.
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(parse_sse_line(&line)?.into_iter().collect())
    }
}

/// Minimal client for the server's OpenAI compatible `/v1` API.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Id of the first model the server offers.
    pub async fn first_model(&self) -> Result<String> {
        let url = format!("{}/models", self.base_url);
        let list: ModelList = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        list.data
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| NidamError::Http(format!("{} returned no models", url)))
    }

    /// Stream a completion, handing each text piece to `on_text`. Returns the
    /// full reply.
    pub async fn stream_chat<F>(
        &self,
        model: &str,
        messages: &[ChatMessage],
        mut on_text: F,
    ) -> Result<String>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let mut reply = String::new();
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            for event in decoder.push(&chunk?)? {
                match event {
                    StreamEvent::Text(text) => {
                        on_text(&text)?;
                        reply.push_str(&text);
                    }
                    StreamEvent::Done => return Ok(reply),
                }
            }
        }
        for event in decoder.finish()? {
            if let StreamEvent::Text(text) = event {
                on_text(&text)?;
                reply.push_str(&text);
            }
        }
        Ok(reply)
    }
}

/// Read user lines from `input` and print streamed replies to `out` until
/// input ends. The whole conversation is sent with every turn.
pub async fn chat_loop<R, W>(client: &ChatClient, model: &str, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut messages: Vec<ChatMessage> = Vec::new();
    loop {
        write!(out, "user: ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            writeln!(out, "empty message, please enter something")?;
            continue;
        }
        messages.push(ChatMessage::user(line));

        write!(out, "assistant: ")?;
        out.flush()?;
        let reply = client
            .stream_chat(model, &messages, |text| {
                write!(out, "{}", text)?;
                out.flush()?;
                Ok(())
            })
            .await?;
        writeln!(out)?;
        debug!("Assistant replied with {} bytes", reply.len());
        messages.push(ChatMessage::assistant(reply));
    }
    Ok(())
}
