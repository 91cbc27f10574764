//! Proof books and where they come from.
//!
//! A proof book is the distributed allow-list data: address → ordered proof
//! nodes, plus (optionally) the root the book was generated against. Two
//! on-disk layouts are accepted:
//!
//! ```text
//! { "0xabc…": ["0x…", "0x…"], … }                    flat proof map
//! { "root": "0x…", "proofs": { "0xabc…": [ … ] } }   map with embedded root
//! ```
//!
//! A separate root file (a bare hex hash, optionally JSON-quoted) overrides
//! any embedded root.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fallback::Attempt;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors loading or parsing proof data.
#[derive(Debug, Error)]
pub enum ProofError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The content is not a recognised proof book.
    #[error("malformed proof data: {0}")]
    Malformed(String),

    /// A value that should be a 32-byte hash is not.
    #[error("invalid hash {0:?}")]
    InvalidHash(String),

    /// Every configured source failed.
    #[error("proof data unavailable ({} source(s) failed)", attempts.len())]
    Unavailable {
        /// Per-source failures, in order.
        attempts: Vec<Attempt>,
    },
}

// ---------------------------------------------------------------------------
// ProofBook
// ---------------------------------------------------------------------------

/// Parsed allow-list proof data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofBook {
    proofs: HashMap<Address, Vec<B256>>,
    root: Option<B256>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBook {
    WithRoot {
        root: Option<String>,
        proofs: HashMap<String, Vec<String>>,
    },
    Flat(HashMap<String, Vec<String>>),
}

impl ProofBook {
    /// An in-memory book.
    pub fn new(proofs: HashMap<Address, Vec<B256>>, root: Option<B256>) -> Self {
        Self { proofs, root }
    }

    /// Parses either JSON layout.
    ///
    /// Entries whose key is not an address are skipped with a warning; a bad
    /// hash inside a valid entry fails the whole book, since a partially
    /// decoded proof can only ever fail verification. Keys that differ only
    /// by case name the same address: identical proofs collapse into one
    /// entry, differing ones fail the book.
    pub fn from_json(json: &str) -> Result<Self, ProofError> {
        let raw: RawBook =
            serde_json::from_str(json).map_err(|e| ProofError::Malformed(e.to_string()))?;
        let (root, entries) = match raw {
            RawBook::WithRoot { root, proofs } => (root, proofs),
            RawBook::Flat(proofs) => (None, proofs),
        };

        let mut proofs = HashMap::with_capacity(entries.len());
        for (key, nodes) in entries {
            let Ok(address) = Address::from_str(&key.trim().to_ascii_lowercase()) else {
                warn!(key = %key, "Skipping proof entry with non-address key");
                continue;
            };
            let nodes = nodes
                .iter()
                .map(|n| parse_hash(n))
                .collect::<Result<Vec<_>, _>>()?;
            match proofs.entry(address) {
                Entry::Vacant(slot) => {
                    slot.insert(nodes);
                }
                Entry::Occupied(existing) if *existing.get() == nodes => {
                    warn!(key = %key, %address, "Duplicate proof entry");
                }
                Entry::Occupied(_) => {
                    return Err(ProofError::Malformed(format!(
                        "conflicting proofs for {address}"
                    )));
                }
            }
        }

        let root = root.as_deref().map(parse_hash).transpose()?;
        Ok(Self { proofs, root })
    }

    /// Replaces the embedded root.
    pub fn with_root(mut self, root: Option<B256>) -> Self {
        if root.is_some() {
            self.root = root;
        }
        self
    }

    /// Proof for `address`, if listed.
    pub fn proof_for(&self, address: Address) -> Option<&[B256]> {
        self.proofs.get(&address).map(Vec::as_slice)
    }

    /// The root this book claims to be built against.
    pub fn root(&self) -> Option<B256> {
        self.root
    }

    /// Number of listed addresses.
    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    /// Returns `true` if no address is listed.
    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }
}

/// Parses a 32-byte hex hash, tolerating whitespace and JSON quotes.
pub fn parse_hash(s: &str) -> Result<B256, ProofError> {
    let trimmed = s.trim().trim_matches('"');
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|_| ProofError::InvalidHash(trimmed.to_string()))?;
    if bytes.len() != 32 {
        return Err(ProofError::InvalidHash(trimmed.to_string()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Parses a root file.
pub fn parse_root(content: &str) -> Result<B256, ProofError> {
    parse_hash(content)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Somewhere a proof book can be loaded from.
#[async_trait]
pub trait ProofSource: Send + Sync {
    /// Short identifier for logs.
    fn id(&self) -> String;

    /// Loads and parses the book.
    async fn load(&self) -> Result<ProofBook, ProofError>;
}

/// Proof (and optional root) files on local disk.
#[derive(Debug, Clone)]
pub struct FileProofSource {
    proofs_path: PathBuf,
    root_path: Option<PathBuf>,
}

impl FileProofSource {
    /// A proof file with no separate root file.
    pub fn new(proofs_path: impl Into<PathBuf>) -> Self {
        Self {
            proofs_path: proofs_path.into(),
            root_path: None,
        }
    }

    /// Adds a root file that overrides any embedded root.
    pub fn with_root_file(mut self, root_path: impl Into<PathBuf>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }
}

async fn read(path: &Path) -> Result<String, ProofError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProofError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl ProofSource for FileProofSource {
    fn id(&self) -> String {
        format!("file:{}", self.proofs_path.display())
    }

    async fn load(&self) -> Result<ProofBook, ProofError> {
        let book = ProofBook::from_json(&read(&self.proofs_path).await?)?;
        let root = match &self.root_path {
            Some(path) => Some(parse_root(&read(path).await?)?),
            None => None,
        };
        let book = book.with_root(root);
        debug!(path = %self.proofs_path.display(), entries = book.len(), "Loaded proof file");
        Ok(book)
    }
}

/// A book already in memory.
#[derive(Debug, Clone)]
pub struct StaticProofSource {
    id: String,
    book: Arc<ProofBook>,
}

impl StaticProofSource {
    /// Wraps `book` under identifier `id`.
    pub fn new(id: impl Into<String>, book: ProofBook) -> Self {
        Self {
            id: id.into(),
            book: Arc::new(book),
        }
    }
}

#[async_trait]
impl ProofSource for StaticProofSource {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn load(&self) -> Result<ProofBook, ProofError> {
        Ok((*self.book).clone())
    }
}
