//! crates/library_core/src/mock.rs
//!
//! In-memory repository for testing.

use crate::domain::{Book, Bookmark, Highlight, Product, RectF, Tag, User};
use crate::ports::{Change, ChangeSet, LibraryRepository, PortError, PortResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    products: HashMap<String, Product>,
    books: HashMap<Uuid, Book>,
    bookmarks: HashMap<Uuid, Bookmark>,
    highlights: HashMap<Uuid, Highlight>,
    rects: HashMap<Uuid, RectF>,
    tags: HashMap<Uuid, Tag>,
}

/// In-memory implementation of [`LibraryRepository`].
///
/// Records live in maps behind a [`RwLock`]. [`save_changes`](LibraryRepository::save_changes)
/// applies a change set to a copy of the state and swaps it in only if every
/// change succeeds, and it refuses to delete a row that is still referenced,
/// the same way the Postgres schema does. Not gated on `#[cfg(test)]` so
/// other crates can use it through the `mock` feature.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.write().await.products.insert(product.id.clone(), product);
    }

    pub async fn insert_book(&self, book: Book) {
        self.state.write().await.books.insert(book.id, book);
    }

    pub async fn insert_bookmark(&self, bookmark: Bookmark) {
        self.state.write().await.bookmarks.insert(bookmark.id, bookmark);
    }

    pub async fn insert_highlight(&self, highlight: Highlight) {
        self.state.write().await.highlights.insert(highlight.id, highlight);
    }

    pub async fn insert_rect(&self, rect: RectF) {
        self.state.write().await.rects.insert(rect.id, rect);
    }

    pub async fn insert_tag(&self, tag: Tag) {
        self.state.write().await.tags.insert(tag.id, tag);
    }

    /// Mutate a stored user in place, bypassing concurrency stamps (test setup only).
    pub async fn update_user_with(&self, user_id: Uuid, f: impl FnOnce(&mut User)) {
        if let Some(user) = self.state.write().await.users.get_mut(&user_id) {
            f(user);
        }
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> PortError {
    PortError::NotFound(format!("{kind} {id} not found"))
}

/// A row gained children after the caller read it.
fn still_referenced(kind: &str, id: Uuid) -> PortError {
    PortError::Conflict(format!("{kind} {id} is still referenced"))
}

impl State {
    fn apply(&mut self, change: Change) -> PortResult<()> {
        match change {
            Change::UpdateUser { user, expected_stamp } => {
                let stored = self.users.get_mut(&user.id).ok_or_else(|| not_found("User", user.id))?;
                if stored.concurrency_stamp != expected_stamp {
                    return Err(PortError::Conflict(format!("User {} was modified concurrently", user.id)));
                }
                stored.first_name = user.first_name;
                stored.last_name = user.last_name;
                stored.book_storage_limit = user.book_storage_limit;
                stored.product_id = user.product_id;
                stored.concurrency_stamp = user.concurrency_stamp;
            }
            Change::UpdateTag { tag, expected_stamp } => {
                let stored = self.tags.get(&tag.id).ok_or_else(|| not_found("Tag", tag.id))?;
                if stored.concurrency_stamp != expected_stamp {
                    return Err(PortError::Conflict(format!("Tag {} was modified concurrently", tag.id)));
                }
                self.tags.insert(tag.id, tag);
            }
            Change::DeleteRect(id) => {
                self.rects.remove(&id);
            }
            Change::DeleteHighlight(id) => {
                if self.rects.values().any(|r| r.highlight_id == id) {
                    return Err(still_referenced("Highlight", id));
                }
                self.highlights.remove(&id);
            }
            Change::DeleteBookmark(id) => {
                self.bookmarks.remove(&id);
            }
            Change::DeleteTag(id) => {
                self.tags.remove(&id).ok_or_else(|| not_found("Tag", id))?;
            }
            Change::DeleteBook(id) => {
                if !self.books.contains_key(&id) {
                    return Err(not_found("Book", id));
                }
                let referenced = self.bookmarks.values().any(|b| b.book_id == id)
                    || self.highlights.values().any(|h| h.book_id == id)
                    || self.tags.values().any(|t| t.book_id == Some(id));
                if referenced {
                    return Err(still_referenced("Book", id));
                }
                self.books.remove(&id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryRepository for InMemoryRepository {
    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        self.state.read().await.users.get(&user_id).cloned().ok_or_else(|| not_found("User", user_id))
    }

    async fn get_product_by_id(&self, product_id: &str) -> PortResult<Product> {
        self.state
            .read()
            .await
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| not_found("Product", product_id))
    }

    async fn list_books_by_user(&self, user_id: Uuid) -> PortResult<Vec<Book>> {
        let state = self.state.read().await;
        Ok(state.books.values().filter(|b| b.user_id == user_id).cloned().collect())
    }

    async fn get_book_by_id(&self, book_id: Uuid) -> PortResult<Book> {
        self.state.read().await.books.get(&book_id).cloned().ok_or_else(|| not_found("Book", book_id))
    }

    async fn list_tags_for_book(&self, book_id: Uuid) -> PortResult<Vec<Tag>> {
        let state = self.state.read().await;
        Ok(state.tags.values().filter(|t| t.book_id == Some(book_id)).cloned().collect())
    }

    async fn list_bookmarks_for_book(&self, book_id: Uuid) -> PortResult<Vec<Bookmark>> {
        let state = self.state.read().await;
        Ok(state.bookmarks.values().filter(|b| b.book_id == book_id).cloned().collect())
    }

    async fn list_highlights_for_book(&self, book_id: Uuid) -> PortResult<Vec<Highlight>> {
        let state = self.state.read().await;
        Ok(state.highlights.values().filter(|h| h.book_id == book_id).cloned().collect())
    }

    async fn list_rects_for_highlight(&self, highlight_id: Uuid) -> PortResult<Vec<RectF>> {
        let state = self.state.read().await;
        Ok(state.rects.values().filter(|r| r.highlight_id == highlight_id).cloned().collect())
    }

    async fn list_tags_by_user(&self, user_id: Uuid) -> PortResult<Vec<Tag>> {
        let state = self.state.read().await;
        Ok(state.tags.values().filter(|t| t.user_id == user_id).cloned().collect())
    }

    async fn get_tag_by_id(&self, tag_id: Uuid) -> PortResult<Tag> {
        self.state.read().await.tags.get(&tag_id).cloned().ok_or_else(|| not_found("Tag", tag_id))
    }

    async fn save_changes(&self, changes: ChangeSet) -> PortResult<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        for change in changes {
            next.apply(change)?;
        }
        *state = next;
        Ok(())
    }
}
