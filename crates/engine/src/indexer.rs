//! Document indexing
//!
//! Indexing a document touches two durable stores that share no
//! transaction: the [`SourceStore`] and the external search index. The
//! [`DocumentIndexer`] runs them as a fixed sequence of steps:
//!
//! 1. mint an ID if the caller supplied none
//! 2. encode the document; on failure nothing is persisted
//! 3. persist the source JSON
//! 4. hand the encoded document to the index writer (`insert` plus a doc
//!    count increment for a new ID, `update` otherwise)
//!
//! A crash or writer failure after step 3 leaves the source persisted and the
//! search index stale for that document. Deletes run in the opposite order,
//! index first, so on a partial failure the source store is always the more
//! complete of the two.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use zinc_core::{Result, StorageError};

use crate::source::SourceStore;

/// Failure reported by an external collaborator
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator refused the input
    #[error("rejected: {0}")]
    Rejected(String),

    /// Any other failure
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl CollaboratorError {
    /// Rejection with a message
    pub fn rejected(msg: impl Into<String>) -> Self {
        CollaboratorError::Rejected(msg.into())
    }
}

/// Builds the search index's representation of a document
pub trait DocumentEncoder: Send + Sync {
    /// Encoded document handed to the [`IndexWriter`]
    type Document;

    /// Encode `doc` under `doc_id`
    fn encode(
        &self,
        doc_id: &str,
        doc: &Map<String, Value>,
    ) -> std::result::Result<Self::Document, CollaboratorError>;
}

/// Writes encoded documents into the external search index
pub trait IndexWriter: Send + Sync {
    /// Encoded document accepted by this writer
    type Document;

    /// Replace the document stored under `doc_id`
    fn update(&self, doc_id: &str, doc: Self::Document)
        -> std::result::Result<(), CollaboratorError>;

    /// Add a new document
    fn insert(&self, doc: Self::Document) -> std::result::Result<(), CollaboratorError>;

    /// Remove the document stored under `doc_id`
    fn delete(&self, doc_id: &str) -> std::result::Result<(), CollaboratorError>;

    /// Account for `n` new documents
    fn increment_doc_count(&self, n: u64);
}

/// Result of [`DocumentIndexer::index_document`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOutcome {
    /// ID the document was stored under
    pub id: String,
    /// Whether the ID was minted by this call
    pub minted: bool,
}

/// Runs the source-then-index sequence for one index
pub struct DocumentIndexer<E, W> {
    sources: SourceStore,
    encoder: E,
    writer: W,
}

impl<E, W> DocumentIndexer<E, W>
where
    E: DocumentEncoder,
    W: IndexWriter<Document = E::Document>,
{
    /// Indexer writing sources to `sources`
    pub fn new(sources: SourceStore, encoder: E, writer: W) -> Self {
        DocumentIndexer {
            sources,
            encoder,
            writer,
        }
    }

    /// Source store backing this indexer
    pub fn sources(&self) -> &SourceStore {
        &self.sources
    }

    /// Index writer
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Store and index `doc`.
    ///
    /// With `doc_id == None` a new ID is minted from the index's sequence
    /// and the document is inserted; otherwise the existing document is
    /// updated in place.
    ///
    /// # Errors
    ///
    /// - `Unsupported` / `SequenceExhausted` if an ID cannot be minted
    /// - `Encoding` if the encoder rejects the document; nothing is persisted
    /// - `IndexWrite` if the index writer fails; the source is already
    ///   persisted at that point
    pub fn index_document(
        &self,
        doc_id: Option<&str>,
        doc: &Map<String, Value>,
    ) -> Result<IndexOutcome> {
        let (id, minted) = match doc_id {
            Some(id) if !id.is_empty() => (id.to_string(), false),
            Some(_) => return Err(StorageError::invalid_input("document id must not be empty")),
            None => (self.sources.store().generate_id()?, true),
        };

        let encoded = self
            .encoder
            .encode(&id, doc)
            .map_err(|e| StorageError::Encoding {
                doc_id: id.clone(),
                reason: e.to_string(),
            })?;

        let source = Value::Object(doc.clone());
        self.sources.set_source(&id, &source)?;

        let written = if minted {
            self.writer.insert(encoded).map(|()| self.writer.increment_doc_count(1))
        } else {
            self.writer.update(&id, encoded)
        };
        if let Err(e) = written {
            warn!(
                target: "zinc::indexer",
                index = %self.sources.store().name(),
                doc_id = %id,
                error = %e,
                "Index write failed after source was persisted"
            );
            return Err(StorageError::IndexWrite {
                doc_id: id,
                reason: e.to_string(),
            });
        }

        debug!(target: "zinc::indexer", doc_id = %id, minted, "Document indexed");
        Ok(IndexOutcome { id, minted })
    }

    /// Remove `doc_id` from the index, then its source
    pub fn delete_document(&self, doc_id: &str) -> Result<()> {
        self.writer
            .delete(doc_id)
            .map_err(|e| StorageError::IndexWrite {
                doc_id: doc_id.to_string(),
                reason: e.to_string(),
            })?;
        self.sources.delete_source(doc_id)
    }

    /// Source bytes of `doc_id`
    pub fn get_document(&self, doc_id: &str) -> Result<Vec<u8>> {
        self.sources.get_source(doc_id)
    }
}
