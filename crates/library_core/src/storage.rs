//! crates/library_core/src/storage.rs
//!
//! Computes how much storage a user's library occupies: cover images plus
//! the parsed document sizes of every owned book.

use crate::error::CoreResult;
use crate::ports::LibraryRepository;
use crate::size;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Breakdown of a user's used storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub book_count: usize,
    pub cover_bytes: u64,
    pub document_bytes: u64,
}

impl StorageUsage {
    pub fn total(&self) -> u64 {
        self.cover_bytes.saturating_add(self.document_bytes)
    }
}

/// Sums a user's storage from source records.
///
/// Nothing is cached: every call recomputes from the repository, so the figure
/// reflects concurrent additions and deletions as of the read.
#[derive(Clone)]
pub struct StorageAccountant {
    repo: Arc<dyn LibraryRepository>,
}

impl StorageAccountant {
    pub fn new(repo: Arc<dyn LibraryRepository>) -> Self {
        Self { repo }
    }

    /// Total bytes used by `user_id`'s books.
    pub async fn used_storage(&self, user_id: Uuid) -> CoreResult<u64> {
        Ok(self.usage(user_id).await?.total())
    }

    /// Per-component storage figures for `user_id`.
    ///
    /// A single unparseable `document_size` fails the whole pass; a corrupt
    /// record must not understate usage.
    #[instrument(skip(self))]
    pub async fn usage(&self, user_id: Uuid) -> CoreResult<StorageUsage> {
        let books = self.repo.list_books_by_user(user_id).await?;
        let mut usage = StorageUsage { book_count: books.len(), ..StorageUsage::default() };
        // Sub-byte fractions are summed first and truncated once.
        let mut document_nanos: u128 = 0;
        for book in &books {
            let nanos = size::parse_exact(&book.document_size).map_err(|e| {
                warn!(book_id = %book.id, size = %book.document_size, "Unparseable document size");
                e
            })?;
            usage.cover_bytes = usage.cover_bytes.saturating_add(book.cover_size);
            document_nanos = document_nanos.saturating_add(nanos);
        }
        usage.document_bytes = u64::try_from(document_nanos / size::NANOS_PER_BYTE).unwrap_or(u64::MAX);
        debug!(books = usage.book_count, total = usage.total(), "Computed used storage");
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Book;
    use crate::error::CoreError;
    use crate::mock::InMemoryRepository;
    use crate::size::SizeError;

    fn book(user_id: Uuid, document_size: &str, cover_size: u64) -> Book {
        let mut book = Book::new(user_id, "Title", "pdf", document_size);
        book.cover_size = cover_size;
        book
    }

    #[tokio::test]
    async fn sums_covers_and_documents() {
        let user_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.insert_book(book(user_id, "1 MB", 2000)).await;
        repo.insert_book(book(user_id, "500 KB", 0)).await;
        let accountant = StorageAccountant::new(Arc::new(repo));

        let usage = accountant.usage(user_id).await.unwrap();
        assert_eq!(usage.book_count, 2);
        assert_eq!(usage.cover_bytes, 2000);
        assert_eq!(usage.document_bytes, 1_500_000);
        assert_eq!(accountant.used_storage(user_id).await.unwrap(), 1_502_000);
    }

    #[tokio::test]
    async fn sub_byte_sizes_are_summed_before_truncating() {
        let user_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        for _ in 0..4 {
            repo.insert_book(book(user_id, "0,0005 KB", 0)).await;
        }
        repo.insert_book(book(user_id, "1.75 b", 0)).await;
        let accountant = StorageAccountant::new(Arc::new(repo));

        // 4 x 0.5 B + 1.75 B = 3.75 B
        assert_eq!(accountant.used_storage(user_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ignores_other_users_books() {
        let (owner, stranger) = (Uuid::new_v4(), Uuid::new_v4());
        let repo = InMemoryRepository::new();
        repo.insert_book(book(owner, "2 KB", 10)).await;
        repo.insert_book(book(stranger, "9 GB", 10)).await;
        let accountant = StorageAccountant::new(Arc::new(repo));

        assert_eq!(accountant.used_storage(owner).await.unwrap(), 2_010);
    }

    #[tokio::test]
    async fn empty_library_uses_nothing() {
        let accountant = StorageAccountant::new(Arc::new(InMemoryRepository::new()));
        assert_eq!(accountant.used_storage(Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn one_corrupt_size_fails_the_whole_pass() {
        let user_id = Uuid::new_v4();
        let repo = InMemoryRepository::new();
        repo.insert_book(book(user_id, "1 MB", 0)).await;
        repo.insert_book(book(user_id, "12xx", 0)).await;
        let accountant = StorageAccountant::new(Arc::new(repo));

        let err = accountant.used_storage(user_id).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::MalformedSize(SizeError::UnknownUnit { input: "12xx".into(), unit: "xx".into() })
        );
    }
}
