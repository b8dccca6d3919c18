//! Stdin dispatch loop, lifecycle state and method routing.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use mailindex_core::config::{HOST_VERSION, SCHEMA_VERSION};
use mailindex_protocol::{decode_request, read_frame, RpcRequest, RpcResponse};
use mailindex_store::{open_store, EmbedderConfig, InitSummary};
use mailindex_update::UpdateManager;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::handlers::{ReaderContext, WriterContext};
use crate::lanes::{send_response, ExitHook, Lane, SharedSink};

pub const READER_METHODS: &[&str] = &[
    "search",
    "stats",
    "filterNewMessages",
    "getMessageByMsgId",
    "queryByDateRange",
    "debugSample",
    "memorySearch",
    "memoryStats",
    "memoryFilterNewMessages",
    "memoryRead",
    "memoryDebugSample",
    "updateCheck",
];

pub const WRITER_METHODS: &[&str] = &[
    "indexBatch",
    "removeBatch",
    "clear",
    "optimize",
    "memoryIndexBatch",
    "memoryRemoveBatch",
    "memoryClear",
    "rebuildEmbeddingsStart",
    "rebuildEmbeddingsBatch",
    "updateRequest",
];

/// Where a method is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Hello,
    Init,
    Reader,
    Writer,
    Unknown,
}

pub fn route(method: &str) -> Route {
    match method {
        "hello" => Route::Hello,
        "init" => Route::Init,
        _ if READER_METHODS.contains(&method) => Route::Reader,
        _ if WRITER_METHODS.contains(&method) => Route::Writer,
        _ => Route::Unknown,
    }
}

/// Everything `serve` needs besides its streams.
#[derive(Clone)]
pub struct HostOptions {
    pub embedder: EmbedderConfig,
    pub update: UpdateManager,
    pub exit_hook: ExitHook,
}

impl HostOptions {
    /// Production defaults: environment embedder and update keys, real process exit.
    pub fn new(install_path: impl Into<PathBuf>) -> Self {
        Self {
            embedder: EmbedderConfig::from_env(),
            update: UpdateManager::from_env(install_path),
            exit_hook: Arc::new(|status| std::process::exit(status)),
        }
    }

    pub fn with_embedder(mut self, embedder: EmbedderConfig) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_update_manager(mut self, update: UpdateManager) -> Self {
        self.update = update;
        self
    }

    pub fn with_exit_hook(mut self, exit_hook: ExitHook) -> Self {
        self.exit_hook = exit_hook;
        self
    }
}

struct Lanes {
    reader: Lane,
    writer: Lane,
}

struct Dispatcher<W: Write + Send + 'static> {
    options: HostOptions,
    sink: SharedSink<W>,
    lanes: Option<Lanes>,
}

/// Reads request frames until EOF and answers every one of them.
///
/// `hello` and `init` are answered inline; everything else runs on the reader
/// or writer lane. On EOF both lanes drain their queues before this returns.
pub fn serve<R, W>(mut input: R, output: W, options: HostOptions) -> Result<()>
where
    R: Read,
    W: Write + Send + 'static,
{
    let mut dispatcher = Dispatcher {
        options,
        sink: Arc::new(Mutex::new(output)),
        lanes: None,
    };

    let outcome = loop {
        let payload = match read_frame(&mut input) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("input closed");
                break Ok(());
            }
            Err(error) => {
                error!(%error, "failed to read request frame");
                break Err(anyhow::Error::new(error).context("failed to read request frame"));
            }
        };
        match decode_request(&payload) {
            Ok(request) => dispatcher.dispatch(request),
            Err(failure) => {
                warn!(message = %failure.message, "rejecting malformed request");
                send_response(&dispatcher.sink, &failure.into_response());
            }
        }
    };

    dispatcher.shutdown();
    outcome
}

impl<W: Write + Send + 'static> Dispatcher<W> {
    fn dispatch(&mut self, request: RpcRequest) {
        debug!(id = %request.id_label(), method = %request.method, "request received");
        let route = route(&request.method);
        match route {
            Route::Hello => {
                let hello = self.hello(&request.params);
                return self.respond(RpcResponse::ok(request.id, hello));
            }
            Route::Init => {
                let response = self.init(&request);
                return self.respond(response);
            }
            Route::Unknown => {
                let message = format!("Unknown method: {}", request.method);
                return self.respond(RpcResponse::error(request.id, message));
            }
            Route::Reader | Route::Writer => {}
        }
        let Some(lanes) = &self.lanes else {
            let message = format!("Must call 'init' first (got '{}')", request.method);
            return self.respond(RpcResponse::error(request.id, message));
        };

        let lane = if route == Route::Reader {
            &lanes.reader
        } else {
            &lanes.writer
        };
        if let Err(rejected) = lane.submit(request) {
            warn!(
                id = %rejected.id_label(),
                method = %rejected.method,
                "lane has stopped, dropping request"
            );
        }
    }

    fn respond(&self, response: RpcResponse) {
        send_response(&self.sink, &response);
    }

    fn hello(&self, params: &Value) -> Value {
        json!({
            "type": "hello-response",
            "hostVersion": HOST_VERSION,
            "schemaVersion": SCHEMA_VERSION,
            "installPath": self.options.update.install_path().display().to_string(),
            "canSelfUpdate": self.options.update.can_self_update(),
            "addonVersion": params.get("addonVersion").cloned().unwrap_or(Value::Null),
            "initialized": self.lanes.is_some(),
        })
    }

    fn init(&mut self, request: &RpcRequest) -> RpcResponse {
        if self.lanes.is_some() {
            return RpcResponse::error(request.id.clone(), "already initialized");
        }
        let Some(profile_path) = request
            .params
            .get("profilePath")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|path| !path.is_empty())
        else {
            return RpcResponse::error(request.id.clone(), "Missing profilePath parameter");
        };

        match self.start_lanes(Path::new(profile_path)) {
            Ok(summary) => match serde_json::to_value(summary) {
                Ok(result) => RpcResponse::ok(request.id.clone(), result),
                Err(error) => RpcResponse::error(request.id.clone(), error.to_string()),
            },
            Err(error) => {
                error!(profile = profile_path, error = %format!("{error:#}"), "init failed");
                RpcResponse::error(request.id.clone(), format!("init failed: {error:#}"))
            }
        }
    }

    fn start_lanes(&mut self, profile_path: &Path) -> Result<InitSummary> {
        let (writer_store, reader_store, summary) = open_store(profile_path, &self.options.embedder)?;
        let reader = Lane::spawn(
            "mailindex-reader",
            Arc::clone(&self.sink),
            ReaderContext {
                store: reader_store,
                update: self.options.update.clone(),
            },
            Arc::clone(&self.options.exit_hook),
        )?;
        let writer = match Lane::spawn(
            "mailindex-writer",
            Arc::clone(&self.sink),
            WriterContext {
                store: writer_store,
                update: self.options.update.clone(),
            },
            Arc::clone(&self.options.exit_hook),
        ) {
            Ok(writer) => writer,
            Err(error) => {
                reader.shutdown();
                return Err(error);
            }
        };
        self.lanes = Some(Lanes { reader, writer });
        info!(profile = %profile_path.display(), "initialized");
        Ok(summary)
    }

    fn shutdown(&mut self) {
        if let Some(Lanes { reader, writer }) = self.lanes.take() {
            reader.shutdown();
            writer.shutdown();
        }
    }
}
