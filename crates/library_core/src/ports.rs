//! crates/library_core/src/ports.rs
//!
//! Defines the repository contract the core depends on.
//! This trait forms the boundary of the hexagonal architecture, allowing the core
//! to stay independent of the concrete store (Postgres in the service, an
//! in-memory map in tests).

use crate::domain::{Book, Bookmark, Highlight, Product, RectF, Tag, User};
use async_trait::async_trait;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from the underlying store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A write was based on a stale read of the record.
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Unit of Work
//=========================================================================================

/// A single write inside a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Persist the profile fields of `user` (names, storage limit, product) and
    /// its new stamp, but only if the stored stamp still equals `expected_stamp`.
    /// Email and the request counter are left as stored.
    UpdateUser { user: User, expected_stamp: Uuid },
    UpdateTag { tag: Tag, expected_stamp: Uuid },
    DeleteRect(Uuid),
    DeleteHighlight(Uuid),
    DeleteBookmark(Uuid),
    DeleteTag(Uuid),
    DeleteBook(Uuid),
}

/// An ordered list of writes committed atomically by [`LibraryRepository::save_changes`].
///
/// Deleting a missing book or tag fails the whole set with `NotFound`; child
/// rows that are already gone are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) -> &mut Self {
        self.changes.push(change);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

//=========================================================================================
// Repository Port
//=========================================================================================

#[async_trait]
pub trait LibraryRepository: Send + Sync {
    // --- Accounts ---
    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_product_by_id(&self, product_id: &str) -> PortResult<Product>;

    // --- Books ---
    async fn list_books_by_user(&self, user_id: Uuid) -> PortResult<Vec<Book>>;

    async fn get_book_by_id(&self, book_id: Uuid) -> PortResult<Book>;

    // --- Book relationships ---
    async fn list_tags_for_book(&self, book_id: Uuid) -> PortResult<Vec<Tag>>;

    async fn list_bookmarks_for_book(&self, book_id: Uuid) -> PortResult<Vec<Bookmark>>;

    async fn list_highlights_for_book(&self, book_id: Uuid) -> PortResult<Vec<Highlight>>;

    async fn list_rects_for_highlight(&self, highlight_id: Uuid) -> PortResult<Vec<RectF>>;

    // --- Tags ---
    async fn list_tags_by_user(&self, user_id: Uuid) -> PortResult<Vec<Tag>>;

    async fn get_tag_by_id(&self, tag_id: Uuid) -> PortResult<Tag>;

    // --- Writes ---
    /// Commit every change in order inside one transaction, or none of them.
    async fn save_changes(&self, changes: ChangeSet) -> PortResult<()>;
}
