use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use httpmock::prelude::*;
use mailindex_host::{serve, ExitHook, HostOptions};
use mailindex_protocol::{read_frame, write_frame};
use mailindex_store::EmbedderConfig;
use mailindex_update::{sha256_hex, signed_message, TrustedKeys, UpdateManager};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn encode(requests: &[Value]) -> Vec<u8> {
    let mut input = Vec::new();
    for request in requests {
        write_frame(&mut input, request).expect("encode");
    }
    input
}

fn options(install_path: &Path) -> HostOptions {
    HostOptions {
        embedder: EmbedderConfig::default(),
        update: UpdateManager::new(install_path, TrustedKeys::embedded()),
        exit_hook: Arc::new(|_| {}),
    }
}

/// Runs one session to EOF and returns the responses keyed by id.
fn run_session(input: Vec<u8>, options: HostOptions) -> HashMap<String, Value> {
    let output = SharedBuffer::default();
    serve(Cursor::new(input), output.clone(), options).expect("serve");

    let bytes = output.0.lock().expect("buffer").clone();
    let mut cursor = Cursor::new(bytes);
    let mut responses = HashMap::new();
    while let Some(frame) = read_frame(&mut cursor).expect("frame") {
        let response: Value = serde_json::from_slice(&frame).expect("json");
        let id = match &response["id"] {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
        responses.insert(id, response);
    }
    responses
}

/// Input stream fed one frame at a time, so a test can wait for answers
/// before sending the next requests. EOF once the sender is dropped.
struct ChannelInput {
    frames: Receiver<Vec<u8>>,
    pending: Cursor<Vec<u8>>,
}

impl Read for ChannelInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let read = self.pending.read(buf)?;
            if read > 0 || buf.is_empty() {
                return Ok(read);
            }
            match self.frames.recv() {
                Ok(bytes) => self.pending = Cursor::new(bytes),
                Err(_) => return Ok(0),
            }
        }
    }
}

fn channel_input() -> (Sender<Vec<u8>>, ChannelInput) {
    let (sender, frames) = mpsc::channel();
    let input = ChannelInput {
        frames,
        pending: Cursor::new(Vec::new()),
    };
    (sender, input)
}

/// Complete frames written so far; a frame still being written is ignored.
fn written_frames(output: &SharedBuffer) -> Vec<Value> {
    let bytes = output.0.lock().expect("buffer").clone();
    let mut cursor = Cursor::new(bytes);
    let mut frames = Vec::new();
    while let Ok(Some(frame)) = read_frame(&mut cursor) {
        frames.push(serde_json::from_slice(&frame).expect("json"));
    }
    frames
}

fn wait_for_frames(output: &SharedBuffer, count: usize) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let frames = written_frames(output);
        if frames.len() >= count {
            return frames;
        }
        assert!(Instant::now() < deadline, "only {} of {count} responses arrived", frames.len());
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn init_request(id: &str, profile: &Path) -> Value {
    json!({"id": id, "method": "init", "params": {"profilePath": profile.display().to_string()}})
}

#[test]
fn integration_lifecycle_gates_methods_until_init() {
    let temp = tempfile::tempdir().expect("tempdir");
    let profile = temp.path().join("profile");
    let mut input = encode(&[
        json!({"id": "h1", "method": "hello", "params": {"addonVersion": "2.4.0"}}),
        json!({"id": "s1", "method": "search", "params": {"q": "x"}}),
        json!({"id": "u1", "method": "dropDatabase"}),
    ]);
    let garbage = br#"{"id": "bad", "params": 3}"#;
    input.extend_from_slice(&(garbage.len() as u32).to_ne_bytes());
    input.extend_from_slice(garbage);
    input.extend(encode(&[
        init_request("i1", &profile),
        init_request("i2", &profile),
        json!({"id": "h2", "method": "hello"}),
        json!({"id": "st", "method": "stats"}),
    ]));

    let responses = run_session(input, options(&temp.path().join("mailindex-host")));

    let hello = &responses["h1"]["result"];
    assert_eq!(hello["type"], "hello-response");
    assert_eq!(hello["schemaVersion"], 1);
    assert_eq!(hello["addonVersion"], "2.4.0");
    assert_eq!(hello["initialized"], false);
    assert_eq!(hello["canSelfUpdate"], true);

    let gated = responses["s1"]["error"].as_str().expect("error");
    assert!(gated.to_ascii_lowercase().contains("init"), "{gated}");
    assert!(responses["u1"]["error"].as_str().expect("error").contains("Unknown"));
    assert!(responses["bad"]["error"].as_str().expect("error").contains("Invalid request"));

    let summary = &responses["i1"]["result"];
    assert_eq!(summary["ok"], true);
    assert_eq!(summary["docs"], 0);
    assert_eq!(summary["hasEmbeddings"], true);
    assert!(responses["i2"]["error"].as_str().expect("error").contains("already initialized"));
    assert_eq!(responses["h2"]["result"]["initialized"], true);
    assert_eq!(responses["st"]["result"]["docs"], 0);
}

#[test]
fn integration_writes_from_one_session_are_visible_to_the_next() {
    let temp = tempfile::tempdir().expect("tempdir");
    let profile = temp.path().join("profile");
    let install = temp.path().join("mailindex-host");

    let written = run_session(
        encode(&[
            init_request("i", &profile),
            json!({"id": "w1", "method": "indexBatch", "params": {"rows": [
                {"msgId": "<a@example.com>", "subject": "Quarterly invoice", "from": "billing@example.com",
                 "body": "Your invoice for March is attached.", "dateMs": 1_700_000_000_000_i64},
                {"msgId": "<b@example.com>", "subject": "Lunch", "from": "bob@example.com",
                 "body": "Tacos on Friday?", "dateMs": 1_700_000_100_000_i64},
            ]}}),
            json!({"id": "w2", "method": "memoryIndexBatch", "params": {"rows": [
                {"memId": "m1", "role": "user", "content": "Remind me about the invoice", "dateMs": 1_700_000_000_000_i64},
            ]}}),
        ]),
        options(&install),
    );
    assert_eq!(written["w1"]["result"]["count"], 2);
    assert_eq!(written["w2"]["result"]["count"], 1);

    let read = run_session(
        encode(&[
            init_request("i", &profile),
            json!({"id": "r1", "method": "search", "params": {"q": "invoice"}}),
            json!({"id": "r2", "method": "filterNewMessages", "params": {"ids": ["<a@example.com>", "<c@example.com>"]}}),
            json!({"id": "r3", "method": "memorySearch", "params": {"q": "invoice"}}),
            json!({"id": "r4", "method": "getMessageByMsgId", "params": {"msgId": "<b@example.com>"}}),
        ]),
        options(&install),
    );
    assert_eq!(read["i"]["result"]["docs"], 2);
    assert_eq!(read["i"]["result"]["memoryDocs"], 1);

    let hits = read["r1"]["result"].as_array().expect("hits");
    assert_eq!(hits[0]["uniqueId"], "<a@example.com>");
    assert_eq!(read["r2"]["result"]["newCount"], 1);
    assert_eq!(read["r2"]["result"]["skippedCount"], 1);
    assert_eq!(read["r3"]["result"][0]["memId"], "m1");
    assert_eq!(read["r4"]["result"]["found"], true);
}

#[test]
fn integration_clear_on_writer_lane_is_ordered_after_index() {
    let temp = tempfile::tempdir().expect("tempdir");
    let profile = temp.path().join("profile");
    let install = temp.path().join("mailindex-host");

    let responses = run_session(
        encode(&[
            init_request("i", &profile),
            json!({"id": "w1", "method": "indexBatch", "params": {"rows": [
                {"msgId": "<a@example.com>", "subject": "one", "body": "first"},
                {"msgId": "<b@example.com>", "subject": "two", "body": "second"},
            ]}}),
            json!({"id": "w2", "method": "clear"}),
        ]),
        options(&install),
    );
    assert_eq!(responses["w2"]["result"], json!({"ok": true, "removed": 2}));

    let after = run_session(
        encode(&[
            init_request("i", &profile),
            json!({"id": "st", "method": "stats"}),
        ]),
        options(&install),
    );
    assert_eq!(after["st"]["result"]["docs"], 0);
    assert_eq!(after["st"]["result"]["vecDocs"], 0);
}

#[test]
fn integration_successful_update_answers_then_exits_and_stops_writer() {
    let server = MockServer::start();
    let artifact = b"#!/bin/sh\necho updated\n".to_vec();
    server.mock(|when, then| {
        when.method(GET).path("/mailindex-host");
        then.status(200).body(artifact.clone());
    });

    let temp = tempfile::tempdir().expect("tempdir");
    let install = temp.path().join("mailindex-host");
    std::fs::write(&install, b"old").expect("seed");

    let key = SigningKey::from_bytes(&[3; 32]);
    let url = server.url("/mailindex-host");
    let digest = sha256_hex(&artifact);
    let signature = key.sign(signed_message("9.0.0", "linux-x86_64", &digest, &url).as_bytes());

    let exit_status = Arc::new(AtomicI32::new(-1));
    let recorded = Arc::clone(&exit_status);
    let exit_hook: ExitHook = Arc::new(move |status| recorded.store(status, Ordering::SeqCst));
    let trusted = TrustedKeys::new([BASE64.encode(key.verifying_key().to_bytes())]);
    let options = options(&install)
        .with_update_manager(UpdateManager::new(&install, trusted))
        .with_exit_hook(exit_hook);

    let responses = run_session(
        encode(&[
            init_request("i", &temp.path().join("profile")),
            json!({"id": "up", "method": "updateRequest", "params": {
                "targetVersion": "9.0.0", "updateUrl": url, "sha256": digest,
                "platform": "linux-x86_64", "signature": BASE64.encode(signature.to_bytes()),
            }}),
            json!({"id": "late", "method": "indexBatch", "params": {"rows": []}}),
        ]),
        options,
    );

    let outcome = &responses["up"]["result"];
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["newVersion"], "9.0.0");
    assert_eq!(exit_status.load(Ordering::SeqCst), 0);
    assert!(!responses.contains_key("late"));
    assert_eq!(std::fs::read(&install).expect("installed"), artifact);
}

#[test]
fn integration_one_session_interleaves_lanes_and_reads_after_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let profile = temp.path().join("profile");
    let options = options(&temp.path().join("mailindex-host"));
    let (sender, input) = channel_input();
    let output = SharedBuffer::default();
    let sink = output.clone();
    let session = std::thread::spawn(move || serve(input, sink, options));

    sender.send(encode(&[init_request("i", &profile)])).expect("send");
    assert_eq!(wait_for_frames(&output, 1)[0]["result"]["ok"], true);

    sender
        .send(encode(&[
            json!({"id": "w1", "method": "indexBatch", "params": {"rows": [
                {"msgId": "<a@example.com>", "subject": "Quarterly invoice", "body": "Invoice attached."},
                {"msgId": "<b@example.com>", "subject": "Invoice reminder", "body": "Second notice."},
            ]}}),
            json!({"id": "r1", "method": "search", "params": {"q": "invoice"}}),
            json!({"id": "w2", "method": "clear"}),
            json!({"id": "r2", "method": "stats"}),
        ]))
        .expect("send");
    let frames = wait_for_frames(&output, 5);
    let ids = frames[1..]
        .iter()
        .map(|frame| frame["id"].as_str().expect("id").to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids.len(), 4);
    assert_eq!(
        ids.iter().cloned().collect::<HashSet<_>>(),
        ["w1", "r1", "w2", "r2"].map(String::from).into_iter().collect::<HashSet<_>>()
    );
    let by_id = frames
        .iter()
        .map(|frame| (frame["id"].as_str().expect("id").to_string(), frame.clone()))
        .collect::<HashMap<_, _>>();
    assert_eq!(by_id["w1"]["result"]["count"], 2);
    assert_eq!(by_id["w2"]["result"], json!({"ok": true, "removed": 2}));
    assert!(by_id["r1"].get("result").is_some() && by_id["r2"].get("result").is_some());

    sender
        .send(encode(&[
            json!({"id": "r3", "method": "stats"}),
            json!({"id": "r4", "method": "search", "params": {"q": "invoice"}}),
        ]))
        .expect("send");
    let frames = wait_for_frames(&output, 7);
    drop(sender);
    session.join().expect("session thread").expect("serve");

    let after = frames[5..]
        .iter()
        .map(|frame| (frame["id"].as_str().expect("id").to_string(), frame.clone()))
        .collect::<HashMap<_, _>>();
    assert_eq!(after["r3"]["result"]["docs"], 0);
    assert_eq!(after["r3"]["result"]["vecDocs"], 0);
    assert_eq!(after["r4"]["result"], json!([]));
    assert_eq!(written_frames(&output).len(), 7);
}
