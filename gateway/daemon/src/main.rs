//! Chat Gateway - Command-line Driver
//!
//! Loads configuration, builds the gateway and serves a single chat request
//! read from a file or stdin. The reply is printed as an `ApiResponse` JSON
//! document, or streamed to stdout fragment by fragment with `--stream`.
//!
//! # Usage
//!
//! ```bash
//! # Non-streaming, request from stdin
//! echo '{"messages":[{"role":"user","content":"hi"}]}' | chat-gateway
//!
//! # Streaming, request from a file, against a different model
//! chat-gateway --stream --model qwen-max --request request.json
//!
//! # Switch the active model and print the result
//! chat-gateway --switch-model qwen-turbo
//!
//! # Verbose logging (stderr)
//! RUST_LOG=debug chat-gateway --stream --request request.json
//! ```
//!
//! # Signals
//!
//! - `SIGINT` during streaming: stops delivery (the session ends as a client
//!   disconnect)

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};

use gateway_core::{
    load_config, load_config_from_path, ApiError, ApiResponse, ChatGateway, ChatReply,
    ChatRequest, ConfigOverrides, GatewayConfig, SessionState,
};

/// Chat Gateway - streaming chat front-end for OpenAI-compatible providers
#[derive(Parser, Debug)]
#[command(name = "chat-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CHAT_GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Upstream model id (overrides config and environment)
    #[arg(short = 'm', long, value_name = "ID")]
    model: Option<String>,

    /// Upstream base URL (overrides config and environment)
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// Session timeout in seconds (overrides config and environment)
    #[arg(long, value_name = "SECS")]
    session_timeout: Option<u64>,

    /// Switch the active model before serving the request
    #[arg(long, value_name = "ID")]
    switch_model: Option<String>,

    /// Stream the reply fragment by fragment
    #[arg(short = 's', long)]
    stream: bool,

    /// Read the request JSON from this file instead of stdin
    #[arg(short = 'r', long, value_name = "FILE")]
    request: Option<PathBuf>,
}

impl Args {
    /// CLI overrides for the loaded configuration
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref endpoint) = self.endpoint {
            overrides = overrides.with_endpoint(endpoint.clone());
        }
        if let Some(ref model) = self.model {
            overrides = overrides.with_model_id(model.clone());
        }
        if let Some(secs) = self.session_timeout {
            overrides = overrides.with_session_timeout_secs(secs);
        }
        overrides
    }

    /// Whether the invocation only switches the model
    fn switch_only(&self) -> bool {
        self.switch_model.is_some() && self.request.is_none() && !self.stream
    }
}

/// Load configuration from all sources, then apply CLI overrides
fn load(args: &Args) -> Result<GatewayConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            load_config_from_path(Some(path.clone()))?
        }
        None => load_config()?,
    };
    args.overrides().apply(&mut config);

    info!(
        source = %config.source(),
        model = %config.model_id,
        endpoint = %config.endpoint,
        "Configuration loaded"
    );
    Ok(config)
}

/// Read the raw request body
async fn read_request(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request file: {}", path.display())),
        None => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("Failed to read request from stdin")?;
            Ok(body)
        }
    }
}

/// Print a JSON document on stdout
fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print an error response and report failure
fn reject(err: ApiError) -> Result<ExitCode> {
    warn!(code = err.code, message = %err.message, "Request rejected");
    print_json(&serde_json::to_value(ApiResponse::<()>::from(Err(err)))?)?;
    Ok(ExitCode::FAILURE)
}

async fn serve_once(gateway: &ChatGateway, request: &ChatRequest) -> Result<ExitCode> {
    let response: ApiResponse<ChatReply> = gateway.chat(request).await.into();
    print_json(&serde_json::to_value(&response)?)?;
    Ok(exit_code(response.is_success()))
}

async fn serve_stream(gateway: &ChatGateway, request: &ChatRequest) -> Result<ExitCode> {
    let handle = match gateway.stream_chat(request) {
        Ok(handle) => handle,
        Err(err) => return reject(err),
    };
    let session_id = handle.id();
    let (mut fragments, monitor) = handle.into_stream();

    let mut stdout = tokio::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            next = fragments.next() => match next {
                Some(fragment) => {
                    stdout.write_all(fragment.text.as_bytes()).await?;
                    stdout.flush().await?;
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                warn!(session_id = %session_id, "Interrupted, closing stream");
                break;
            }
        }
    }
    // Dropping the receiver is the disconnect signal.
    drop(fragments);
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    let report = monitor.wait().await;
    info!(
        session_id = %report.id,
        state = %report.state,
        delivered = report.fragments_delivered,
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "Stream finished"
    );
    if let Some(ref cause) = report.error {
        error!(error = %cause, "Stream did not complete");
    }
    Ok(exit_code(report.state == SessionState::Completed))
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load(&args)?;
    let gateway = ChatGateway::from_config(&config)?;

    if let Some(ref model) = args.switch_model {
        let response = gateway.switch_model(model);
        if args.switch_only() {
            print_json(&serde_json::to_value(&response)?)?;
            return Ok(exit_code(response.is_success()));
        }
        if !response.is_success() {
            bail!("{}: {model:?}", response.message);
        }
    }

    let body = read_request(args.request.as_deref()).await?;
    let request = match ChatRequest::from_json(&body) {
        Ok(request) => request,
        Err(err) => return reject(err.into()),
    };

    if args.stream {
        serve_stream(&gateway, &request).await
    } else {
        serve_once(&gateway, &request).await
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so streamed output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gateway_daemon=info".parse()?)
                .add_directive("gateway_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let args = Args::parse();
    run(args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["chat-gateway"]).unwrap();
        assert!(!args.stream);
        assert!(args.request.is_none());
        assert!(args.switch_model.is_none());
        assert!(!args.switch_only());
    }

    #[test]
    fn test_args_full() {
        let args = Args::try_parse_from([
            "chat-gateway",
            "--config",
            "/tmp/gateway.toml",
            "--model",
            "qwen-max",
            "--endpoint",
            "http://localhost:8000/v1",
            "--session-timeout",
            "30",
            "--stream",
            "--request",
            "req.json",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("/tmp/gateway.toml")));
        assert_eq!(args.model.as_deref(), Some("qwen-max"));
        assert!(args.stream);
        assert_eq!(args.request, Some(PathBuf::from("req.json")));

        let mut config = GatewayConfig::default();
        args.overrides().apply(&mut config);
        assert_eq!(config.model_id, "qwen-max");
        assert_eq!(config.endpoint, "http://localhost:8000/v1");
        assert_eq!(config.session_timeout, std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_switch_only() {
        let args = Args::try_parse_from(["chat-gateway", "--switch-model", "qwen-turbo"]).unwrap();
        assert!(args.switch_only());

        let args =
            Args::try_parse_from(["chat-gateway", "--switch-model", "qwen-turbo", "--stream"])
                .unwrap();
        assert!(!args.switch_only());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let args =
            Args::try_parse_from(["chat-gateway", "--config", path.to_str().unwrap()]).unwrap();

        assert!(load(&args).is_err());
    }

    #[tokio::test]
    async fn test_read_request_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"messages":[{{"role":"user","content":"hi"}}]}}"#).unwrap();

        let body = read_request(Some(file.path())).await.unwrap();
        let request = ChatRequest::from_json(&body).unwrap();

        assert_eq!(request.messages.map(|m| m.len()), Some(1));
    }
}
