//! Shared test utilities for all integration test suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::TempDir;
pub use zincdb::{
    CollaboratorError, DocumentEncoder, DocumentIndexer, EngineKind, IndexStore, IndexWriter,
    SourceStore, StorageConfig, StorageError, StorageRegistry,
};

/// Both engine kinds, for tests that must hold for either
pub const ENGINE_KINDS: [EngineKind; 2] = [EngineKind::Lsm, EngineKind::OrderedLog];

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Index name unique within the test process
pub fn unique_index(prefix: &str) -> String {
    format!("{}-{}", prefix, COUNTER.fetch_add(1, Ordering::Relaxed))
}

// ============================================================================
// TestRegistry - registry over a temporary data directory
// ============================================================================

/// Registry wrapper that owns its data directory and can be reopened.
pub struct TestRegistry {
    pub registry: Arc<StorageRegistry>,
    pub config: StorageConfig,
    pub dir: TempDir,
}

impl TestRegistry {
    /// Registry with small engine limits and fsync on every commit
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Registry whose test configuration is adjusted by `f`
    pub fn with_config(f: impl FnOnce(StorageConfig) -> StorageConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = f(StorageConfig::for_testing(dir.path()));
        let registry =
            Arc::new(StorageRegistry::new(config.clone()).expect("Failed to create registry"));
        TestRegistry {
            registry,
            config,
            dir,
        }
    }

    /// Resolve `name` with `kind`
    pub fn store(&self, name: &str, kind: EngineKind) -> Arc<IndexStore> {
        self.registry
            .resolve(name, kind)
            .expect("Failed to resolve index")
    }

    /// Data directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Clean shutdown, then a fresh registry over the same directory
    pub fn reopen(&mut self) {
        self.registry.close_all().expect("close_all failed");
        self.registry =
            Arc::new(StorageRegistry::new(self.config.clone()).expect("Failed to reopen"));
    }

    /// Drop every store without closing it, as a crash would
    ///
    /// Callers must drop their own store handles first, or the old engines
    /// keep their directory locks.
    pub fn crash(&mut self) {
        self.registry =
            Arc::new(StorageRegistry::new(self.config.clone()).expect("Failed to reopen"));
    }
}

// ============================================================================
// Indexing collaborators
// ============================================================================

/// Encoder that turns a document into its compact JSON text.
///
/// Documents with a top-level `"reject"` field fail to encode.
#[derive(Debug, Default)]
pub struct JsonEncoder;

impl DocumentEncoder for JsonEncoder {
    type Document = EncodedDoc;

    fn encode(
        &self,
        doc_id: &str,
        doc: &Map<String, Value>,
    ) -> Result<EncodedDoc, CollaboratorError> {
        if doc.contains_key("reject") {
            return Err(CollaboratorError::rejected(format!(
                "document {doc_id} carries a reject field"
            )));
        }
        Ok(EncodedDoc {
            id: doc_id.to_string(),
            body: Value::Object(doc.clone()).to_string(),
        })
    }
}

/// Document as handed to the index writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDoc {
    pub id: String,
    pub body: String,
}

/// In-memory search index that records every call
#[derive(Debug, Default)]
pub struct RecordingIndex {
    pub docs: Mutex<std::collections::BTreeMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
    pub doc_count: AtomicU64,
    pub failing: std::sync::atomic::AtomicBool,
}

impl RecordingIndex {
    /// Make every following write fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, call: String) -> Result<(), CollaboratorError> {
        self.calls.lock().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::rejected("search index unavailable"));
        }
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.doc_count.load(Ordering::SeqCst)
    }
}

impl IndexWriter for RecordingIndex {
    type Document = EncodedDoc;

    fn update(&self, doc_id: &str, doc: EncodedDoc) -> Result<(), CollaboratorError> {
        self.check(format!("update:{doc_id}"))?;
        self.docs.lock().insert(doc_id.to_string(), doc.body);
        Ok(())
    }

    fn insert(&self, doc: EncodedDoc) -> Result<(), CollaboratorError> {
        self.check(format!("insert:{}", doc.id))?;
        self.docs.lock().insert(doc.id, doc.body);
        Ok(())
    }

    fn delete(&self, doc_id: &str) -> Result<(), CollaboratorError> {
        self.check(format!("delete:{doc_id}"))?;
        self.docs.lock().remove(doc_id);
        Ok(())
    }

    fn increment_doc_count(&self, n: u64) {
        self.doc_count.fetch_add(n, Ordering::SeqCst);
    }
}

/// Indexer over `store` writing into a fresh recording index
///
/// The index is reachable afterwards through `indexer.writer()`.
pub fn indexer(store: Arc<IndexStore>) -> DocumentIndexer<JsonEncoder, RecordingIndex> {
    DocumentIndexer::new(SourceStore::new(store), JsonEncoder, RecordingIndex::default())
}

/// JSON object literal as a document map
pub fn doc(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
