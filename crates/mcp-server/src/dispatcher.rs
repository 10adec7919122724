//! The read loop: one line in, at most one reply out.
//!
//! Short tools run inline, so their replies keep request order. Tools in the long-running set
//! are moved onto a [`JoinSet`] and reply whenever they finish; the loop keeps reading in the
//! meantime. All replies go through one [`ReplySink`].

use crate::config::ServerConfig;
use crate::tools;
use crate::transport::{LineReader, ReplySink};
use anyhow::Result;
use firmae_protocol::{
    error_codes, negotiate_version, parse_request, InitializeResult, Reply, Request, ServerInfo,
    ToolResult,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

const SERVER_NAME: &str = "firmae-adapter";

/// What the loop does with one parsed request.
#[derive(Debug)]
enum Action {
    Reply(Reply),
    Ignore,
    CallTool {
        id: Value,
        name: String,
        arguments: Value,
    },
}

fn value_reply<T: Serialize>(id: Value, value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(result) => Reply::result(id, result),
        Err(err) => {
            log::error!("failed to serialize reply: {err}");
            Reply::error(
                id,
                error_codes::INTERNAL_ERROR,
                format!("Internal error: {err}"),
            )
        }
    }
}

fn initialize(request: &Request) -> Reply {
    let version = negotiate_version(request.param_str("protocolVersion"));
    log::info!("initialize: protocol {version}");
    value_reply(
        request.reply_id(),
        &InitializeResult {
            protocol_version: version.to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: Map::new(),
        },
    )
}

fn route(request: Request) -> Action {
    let Some(method) = request.method.as_deref() else {
        return Action::Reply(Reply::error(
            request.reply_id(),
            error_codes::INVALID_REQUEST,
            "Invalid Request: missing method",
        ));
    };

    // Answered even without an id.
    if method == "ping" {
        let id = request.id.clone().unwrap_or_else(|| json!(0));
        return Action::Reply(Reply::result(id, json!({ "ok": true })));
    }
    if request.is_notification() {
        log::debug!("notification {method} dropped");
        return Action::Ignore;
    }

    let id = request.reply_id();
    let reply = match method {
        "initialize" => initialize(&request),
        "shutdown" => Reply::result(id, Value::Null),
        "tools/list" => Reply::result(id, tools::catalog::tools_list()),
        "resources/list" => Reply::result(id, json!({ "resources": [] })),
        "prompts/list" => Reply::result(id, json!({ "prompts": [] })),
        "tools/call" => {
            let Some(name) = request.param_str("name").map(str::to_string) else {
                return Action::Reply(value_reply(id, &ToolResult::error("Missing tool name")));
            };
            let arguments = request
                .param("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            return Action::CallTool {
                id,
                name,
                arguments,
            };
        }
        other => {
            log::debug!("unknown method {other}");
            Reply::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )
        }
    };
    Action::Reply(reply)
}

async fn deliver(sink: &ReplySink, reply: &Reply) {
    if let Err(err) = sink.send(reply).await {
        log::warn!("failed to write reply for id {}: {err}", reply.id);
    }
}

async fn call_and_reply(
    sink: &ReplySink,
    config: Arc<ServerConfig>,
    id: Value,
    name: &str,
    arguments: Value,
) {
    let result = tools::call_tool(config, name, arguments).await;
    deliver(sink, &value_reply(id, &result)).await;
}

/// Serve requests from `read` until end of input, then wait for background calls to reply.
pub(crate) async fn serve<R, W>(read: R, write: W, config: Arc<ServerConfig>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = LineReader::new(read);
    let (sink, writer) = ReplySink::spawn(write);
    let mut background: JoinSet<()> = JoinSet::new();

    loop {
        while let Some(done) = background.try_join_next() {
            if let Err(err) = done {
                log::error!("background tool task failed: {err}");
            }
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                log::error!("Error reading from stdin: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("rejected input line: {err}");
                deliver(&sink, &Reply::error(Value::Null, err.code(), err.to_string())).await;
                continue;
            }
        };

        match route(request) {
            Action::Reply(reply) => deliver(&sink, &reply).await,
            Action::Ignore => {}
            Action::CallTool {
                id,
                name,
                arguments,
            } if tools::is_long_running(&name) => {
                let sink = sink.clone();
                let config = Arc::clone(&config);
                log::info!("{name} (id {id}) started in background");
                background.spawn(async move {
                    let started = Instant::now();
                    call_and_reply(&sink, config, id.clone(), &name, arguments).await;
                    log::info!(
                        "{name} (id {id}) finished in {:.2}s",
                        started.elapsed().as_secs_f64()
                    );
                });
            }
            Action::CallTool {
                id,
                name,
                arguments,
            } => call_and_reply(&sink, Arc::clone(&config), id, &name, arguments).await,
        }
    }

    if !background.is_empty() {
        log::info!("input closed; waiting for {} background call(s)", background.len());
    }
    while let Some(done) = background.join_next().await {
        if let Err(err) = done {
            log::error!("background tool task failed: {err}");
        }
    }
    drop(sink);
    writer.await?;
    Ok(())
}
