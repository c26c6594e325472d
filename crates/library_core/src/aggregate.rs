//! crates/library_core/src/aggregate.rs
//!
//! Materializes a Book with everything it owns, and removes it again.
//!
//! Cascading deletes are explicit: the aggregate is loaded, then every child is
//! removed by key, leaves first, inside one change set.

use crate::domain::{Book, BookAggregate, Tag};
use crate::error::{CoreError, CoreResult};
use crate::ports::{Change, ChangeSet, LibraryRepository};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AggregateLoader {
    repo: Arc<dyn LibraryRepository>,
}

impl AggregateLoader {
    pub fn new(repo: Arc<dyn LibraryRepository>) -> Self {
        Self { repo }
    }

    /// Load `book_id` with all relationships. Another user's book is reported
    /// as not found.
    #[instrument(skip(self))]
    pub async fn load(&self, user_id: Uuid, book_id: Uuid) -> CoreResult<BookAggregate> {
        let book = self.owned_book(user_id, book_id).await?;
        let mut aggregate = BookAggregate::new(book);
        self.load_full(&mut aggregate).await?;
        Ok(aggregate)
    }

    /// Populate tags, bookmarks, highlights and each highlight's rects.
    ///
    /// The book record is re-read as well, so a concurrent deletion surfaces
    /// as [`CoreError::NotFound`]. Calling this again on a populated aggregate
    /// replaces its contents rather than appending.
    pub async fn load_full(&self, aggregate: &mut BookAggregate) -> CoreResult<()> {
        let book = self.repo.get_book_by_id(aggregate.id()).await?;
        let tags = self.repo.list_tags_for_book(book.id).await?;
        if let Some(foreign) = tags.iter().find(|t| t.user_id != book.user_id) {
            return Err(CoreError::Validation(format!(
                "Tag {} on book {} belongs to another user",
                foreign.id, book.id
            )));
        }
        let bookmarks = self.repo.list_bookmarks_for_book(book.id).await?;
        let highlights = self.repo.list_highlights_for_book(book.id).await?;
        let mut rects = Vec::new();
        for highlight in &highlights {
            rects.extend(self.repo.list_rects_for_highlight(highlight.id).await?);
        }
        debug!(
            book_id = %book.id,
            tags = tags.len(),
            bookmarks = bookmarks.len(),
            highlights = highlights.len(),
            rects = rects.len(),
            "Loaded book relationships"
        );
        aggregate.replace(book, tags, bookmarks, highlights, rects);
        Ok(())
    }

    /// Every book of `user_id`, each with its relationships loaded.
    #[instrument(skip(self))]
    pub async fn load_library(&self, user_id: Uuid) -> CoreResult<Vec<BookAggregate>> {
        let books = self.repo.list_books_by_user(user_id).await?;
        let mut library = Vec::with_capacity(books.len());
        for book in books {
            let mut aggregate = BookAggregate::new(book);
            self.load_full(&mut aggregate).await?;
            library.push(aggregate);
        }
        Ok(library)
    }

    pub async fn book_exists(&self, user_id: Uuid, book_id: Uuid) -> CoreResult<bool> {
        match self.owned_book(user_id, book_id).await {
            Ok(_) => Ok(true),
            Err(CoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a book together with its bookmarks, highlights, rects and book-scoped tags.
    #[instrument(skip(self))]
    pub async fn delete_book(&self, user_id: Uuid, book_id: Uuid) -> CoreResult<()> {
        let aggregate = self.load(user_id, book_id).await?;
        let changes = cascade_delete(&aggregate);
        let removed = changes.len();
        self.repo.save_changes(changes).await?;
        info!(%book_id, removed, "Deleted book");
        Ok(())
    }

    /// All tags of `user_id`, oldest first.
    pub async fn list_tags(&self, user_id: Uuid) -> CoreResult<Vec<Tag>> {
        let mut tags = self.repo.list_tags_by_user(user_id).await?;
        tags.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(tags)
    }

    #[instrument(skip(self))]
    pub async fn delete_tag(&self, user_id: Uuid, tag_id: Uuid) -> CoreResult<()> {
        let tag = self.repo.get_tag_by_id(tag_id).await?;
        if tag.user_id != user_id {
            return Err(CoreError::NotFound(format!("Tag {tag_id} not found")));
        }
        let mut changes = ChangeSet::new();
        changes.push(Change::DeleteTag(tag_id));
        self.repo.save_changes(changes).await?;
        Ok(())
    }

    async fn owned_book(&self, user_id: Uuid, book_id: Uuid) -> CoreResult<Book> {
        let book = self.repo.get_book_by_id(book_id).await?;
        if book.user_id != user_id {
            return Err(CoreError::NotFound(format!("Book {book_id} not found")));
        }
        Ok(book)
    }
}

/// The removals for `aggregate`, children before parents.
pub fn cascade_delete(aggregate: &BookAggregate) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for id in aggregate.rects.keys() {
        changes.push(Change::DeleteRect(*id));
    }
    for id in aggregate.highlights.keys() {
        changes.push(Change::DeleteHighlight(*id));
    }
    for id in aggregate.bookmarks.keys() {
        changes.push(Change::DeleteBookmark(*id));
    }
    for id in aggregate.tags.keys() {
        changes.push(Change::DeleteTag(*id));
    }
    changes.push(Change::DeleteBook(aggregate.id()));
    changes
}
