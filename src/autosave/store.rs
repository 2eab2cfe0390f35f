use std::fmt;

use educe::Educe;
use thiserror::Error;
use type_safe_id::{StaticType, TypeSafeId};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentTag;

impl StaticType for DocumentTag {
    const TYPE: &'static str = "doc";
}

pub type DocumentId = TypeSafeId<DocumentTag>;

/// Version number assigned by the store on every successful write.
///
/// The client never increments this itself, it only echoes back what the
/// store handed out. `DocVersion::NEW` marks a document that was never persisted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocVersion(u64);

impl DocVersion {
    pub const NEW: DocVersion = DocVersion(0);

    pub fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn number(self) -> u64 {
        self.0
    }

    pub fn is_new(self) -> bool {
        self == Self::NEW
    }
}

impl fmt::Display for DocVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Educe, Clone, PartialEq, Eq)]
#[educe(Debug)]
pub struct Document {
    pub id: DocumentId,
    #[educe(Debug(ignore))]
    pub content: String,
    pub version: DocVersion,
}

impl Document {
    pub fn empty(id: DocumentId) -> Self {
        Self {
            id,
            content: String::new(),
            version: DocVersion::NEW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The expected version no longer matches what the store holds.
    #[error("document was changed elsewhere (expected {expected}, store has {actual})")]
    Conflict {
        expected: DocVersion,
        actual: DocVersion,
    },
    /// Network, timeout or server-side trouble; trying again later may work.
    #[error("{0}")]
    Transient(String),
    /// The store refuses this content for good.
    #[error("{0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// The persistence endpoint the autosave engine writes through.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// Loads a document, `None` if the store has never seen this id.
    async fn fetch(&self, id: &DocumentId) -> Result<Option<Document>, StoreError>;

    /// Writes `content` if the store still holds `expected`, returning the new version.
    async fn save(
        &self,
        id: &DocumentId,
        content: &str,
        expected: DocVersion,
    ) -> Result<DocVersion, StoreError>;
}
