//! Reader and writer lanes: one thread each, fed in order through a channel.

use std::io::Write;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use mailindex_core::config::framing::MAX_FRAME_BYTES;
use mailindex_protocol::{write_frame_within, RpcRequest, RpcResponse};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Output stream shared by the dispatcher and both lanes. A whole frame is
/// written while the lock is held.
pub(crate) type SharedSink<W> = Arc<Mutex<W>>;

/// Called with the exit status once an update has been installed and answered.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn send_response<W: Write>(sink: &SharedSink<W>, response: &RpcResponse) {
    let mut writer = lock_unpoisoned(sink);
    deliver(&mut *writer, response, MAX_FRAME_BYTES);
}

/// Writes `response`. A result that cannot be framed is answered with an
/// error frame for the same id instead.
fn deliver<W: Write + ?Sized>(writer: &mut W, response: &RpcResponse, max_bytes: u32) {
    let error = match write_frame_within(writer, response, max_bytes) {
        Ok(()) => return,
        Err(error) => error,
    };
    error!(id = %response.id(), %error, "failed to write response frame");
    if response.is_error() || !error.is_encoding() {
        return;
    }
    let fallback = RpcResponse::error(response.id().clone(), format!("Response could not be sent: {error}"));
    if let Err(error) = write_frame_within(writer, &fallback, max_bytes) {
        error!(id = %response.id(), %error, "failed to write fallback error frame");
    }
}

/// What the lane does after answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit(i32),
}

/// Executes the requests routed to one lane.
pub(crate) trait LaneHandler: Send + 'static {
    fn handle(&mut self, request: &RpcRequest) -> (Result<Value, String>, Flow);
}

pub(crate) struct Lane {
    name: &'static str,
    sender: Sender<RpcRequest>,
    handle: JoinHandle<()>,
}

impl Lane {
    pub(crate) fn spawn<W, H>(
        name: &'static str,
        sink: SharedSink<W>,
        mut handler: H,
        exit_hook: ExitHook,
    ) -> Result<Self>
    where
        W: Write + Send + 'static,
        H: LaneHandler,
    {
        let (sender, receiver) = mpsc::channel::<RpcRequest>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for request in receiver {
                    let started = Instant::now();
                    let (outcome, flow) = handler.handle(&request);
                    let response = match outcome {
                        Ok(result) => RpcResponse::ok(request.id.clone(), result),
                        Err(message) => {
                            warn!(lane = name, method = %request.method, error = %message, "request failed");
                            RpcResponse::error(request.id.clone(), message)
                        }
                    };
                    send_response(&sink, &response);
                    debug!(
                        lane = name,
                        method = %request.method,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "request handled"
                    );
                    if let Flow::Exit(status) = flow {
                        info!(lane = name, status, "exiting after update");
                        // Held until the process ends so no other lane writes a partial frame.
                        let _quiesced = lock_unpoisoned(&sink);
                        exit_hook(status);
                        break;
                    }
                }
                debug!(lane = name, "lane stopped");
            })
            .with_context(|| format!("failed to spawn {name} thread"))?;
        Ok(Self {
            name,
            sender,
            handle,
        })
    }

    /// Queues `request`; returns it back when the lane has stopped.
    pub(crate) fn submit(&self, request: RpcRequest) -> Result<(), RpcRequest> {
        self.sender.send(request).map_err(|rejected| rejected.0)
    }

    /// Closes the queue and waits for pending work to be answered.
    pub(crate) fn shutdown(self) {
        let Self {
            name,
            sender,
            handle,
        } = self;
        drop(sender);
        if handle.join().is_err() {
            error!(lane = name, "lane thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailindex_protocol::read_frame;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::TryLockError;

    struct Echo;

    impl LaneHandler for Echo {
        fn handle(&mut self, request: &RpcRequest) -> (Result<Value, String>, Flow) {
            match request.method.as_str() {
                "boom" => (Err("boom failed".to_string()), Flow::Continue),
                "quit" => (Ok(json!({"bye": true})), Flow::Exit(0)),
                _ => (Ok(request.params.clone()), Flow::Continue),
            }
        }
    }

    fn frames(sink: &SharedSink<Vec<u8>>) -> Vec<Value> {
        let bytes = lock_unpoisoned(sink).clone();
        let mut cursor = std::io::Cursor::new(bytes);
        let mut out = Vec::new();
        while let Some(frame) = read_frame(&mut cursor).expect("frame") {
            out.push(serde_json::from_slice(&frame).expect("json"));
        }
        out
    }

    #[test]
    fn functional_lane_answers_in_order_and_stops_after_exit() {
        let sink: SharedSink<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        let exit_status = Arc::new(AtomicI32::new(-1));
        let recorded = Arc::clone(&exit_status);
        let hook: ExitHook = Arc::new(move |status| recorded.store(status, Ordering::SeqCst));

        let lane = Lane::spawn("test-lane", Arc::clone(&sink), Echo, hook).expect("spawn");
        for request in [
            RpcRequest::new("1", "echo", json!({"n": 1})),
            RpcRequest::new(2, "boom", json!({})),
            RpcRequest::new("3", "quit", json!({})),
            RpcRequest::new("4", "echo", json!({"n": 4})),
        ] {
            let _ = lane.submit(request);
        }
        lane.shutdown();

        let responses = frames(&sink);
        assert_eq!(
            responses,
            vec![
                json!({"id": "1", "result": {"n": 1}}),
                json!({"id": 2, "error": "boom failed"}),
                json!({"id": "3", "result": {"bye": true}}),
            ]
        );
        assert_eq!(exit_status.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn regression_exit_hook_runs_with_output_locked() {
        let sink: SharedSink<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::new(AtomicI32::new(-1));
        let recorded = Arc::clone(&observed);
        let watched = Arc::clone(&sink);
        let hook: ExitHook = Arc::new(move |_| {
            let locked = matches!(watched.try_lock(), Err(TryLockError::WouldBlock));
            recorded.store(i32::from(locked), Ordering::SeqCst);
        });

        let lane = Lane::spawn("test-lane", Arc::clone(&sink), Echo, hook).expect("spawn");
        let _ = lane.submit(RpcRequest::new("q", "quit", json!({})));
        lane.shutdown();

        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(frames(&sink), vec![json!({"id": "q", "result": {"bye": true}})]);
    }

    #[test]
    fn regression_unframeable_result_is_answered_with_error() {
        let mut out = Vec::new();
        let response = RpcResponse::ok(json!("big"), json!({"body": "x".repeat(256)}));
        deliver(&mut out, &response, 128);

        let sink: SharedSink<Vec<u8>> = Arc::new(Mutex::new(out));
        let responses = frames(&sink);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], "big");
        let message = responses[0]["error"].as_str().expect("error frame");
        assert!(message.contains("could not be sent"), "{message}");
        assert!(responses[0].get("result").is_none());
    }
}
