//! Method handlers executed on the reader and writer lanes.

use mailindex_protocol::RpcRequest;
use mailindex_store::{Collection, StoreReader, StoreWriter};
use mailindex_update::UpdateManager;
use serde::Serialize;
use serde_json::{json, Value};

use crate::lanes::{Flow, LaneHandler};

fn to_result<T: Serialize, E: std::fmt::Display>(outcome: Result<T, E>) -> Result<Value, String> {
    outcome
        .map_err(|error| error.to_string())
        .and_then(|value| serde_json::to_value(value).map_err(|error| error.to_string()))
}

fn unknown(method: &str) -> Result<Value, String> {
    Err(format!("Unknown method: {method}"))
}

/// Read-only methods; never mutates the index.
pub(crate) struct ReaderContext {
    pub store: StoreReader,
    pub update: UpdateManager,
}

impl LaneHandler for ReaderContext {
    fn handle(&mut self, request: &RpcRequest) -> (Result<Value, String>, Flow) {
        let params = &request.params;
        let store = &mut self.store;
        let outcome = match request.method.as_str() {
            "search" => to_result(store.search(params)),
            "stats" => to_result(store.stats(Collection::Email)),
            "filterNewMessages" => to_result(store.filter_new(Collection::Email, params)),
            "getMessageByMsgId" => to_result(store.get_message(params)),
            "queryByDateRange" => to_result(store.query_by_date_range(params)),
            "debugSample" => to_result(store.debug_sample()),
            "memorySearch" => to_result(store.memory_search(params)),
            "memoryStats" => to_result(store.stats(Collection::Memory)),
            "memoryFilterNewMessages" => to_result(store.filter_new(Collection::Memory, params)),
            "memoryRead" => to_result(store.memory_read(params)),
            "memoryDebugSample" => to_result(store.memory_debug_sample()),
            "updateCheck" => to_result(self.update.check(params)),
            other => unknown(other),
        };
        (outcome, Flow::Continue)
    }
}

/// Mutating methods, including the self-update that ends the process.
pub(crate) struct WriterContext {
    pub store: StoreWriter,
    pub update: UpdateManager,
}

impl WriterContext {
    fn clear(&mut self, collection: Collection) -> Result<Value, String> {
        self.store
            .clear(collection)
            .map(|removed| json!({"ok": true, "removed": removed}))
            .map_err(|error| error.to_string())
    }
}

impl LaneHandler for WriterContext {
    fn handle(&mut self, request: &RpcRequest) -> (Result<Value, String>, Flow) {
        let params = &request.params;
        let outcome = match request.method.as_str() {
            "indexBatch" => to_result(self.store.index_batch(Collection::Email, params)),
            "removeBatch" => to_result(self.store.remove_batch(Collection::Email, params)),
            "clear" => self.clear(Collection::Email),
            "optimize" => to_result(
                self.store
                    .optimize(Collection::Email)
                    .map(|()| json!({"ok": true})),
            ),
            "memoryIndexBatch" => to_result(self.store.index_batch(Collection::Memory, params)),
            "memoryRemoveBatch" => to_result(self.store.remove_batch(Collection::Memory, params)),
            "memoryClear" => self.clear(Collection::Memory),
            "rebuildEmbeddingsStart" => to_result(self.store.rebuild_start()),
            "rebuildEmbeddingsBatch" => to_result(self.store.rebuild_batch(params)),
            "updateRequest" => {
                let outcome = to_result(self.update.apply(params));
                let flow = if outcome.is_ok() { Flow::Exit(0) } else { Flow::Continue };
                return (outcome, flow);
            }
            other => unknown(other),
        };
        (outcome, Flow::Continue)
    }
}
