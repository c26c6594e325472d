//! crates/library_core/src/domain.rs
//!
//! Defines the pure, core data structures for the library.
//! These structs are independent of any database or serialization format.
//! Children only hold their parent's key; there are no back-pointers.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_COLOR_THEME: &str = "Normal";

/// A library account, as seen by the accounting core.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Explicit per-user storage limit in bytes; overrides the product tier.
    pub book_storage_limit: Option<u64>,
    pub ai_requests_today: u32,
    pub product_id: Option<String>,
    pub concurrency_stamp: Uuid,
}

impl User {
    pub fn new(email: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            book_storage_limit: None,
            ai_requests_today: 0,
            product_id: None,
            concurrency_stamp: Uuid::new_v4(),
        }
    }
}

/// A subscription tier. Read-only reference data.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: i32,
    pub book_storage_limit: u64,
    pub ai_request_limit: u32,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub authors: Option<String>,
    pub format: String,
    pub language: Option<String>,
    pub creator: Option<String>,
    pub creation_date: Option<String>,
    /// Human readable, e.g. `"12,5 MB"`. Never empty.
    pub document_size: String,
    pub pages_size: String,
    pub page_count: i32,
    pub current_page: i32,
    pub has_cover: bool,
    /// Cover image size in bytes.
    pub cover_size: u64,
    pub cover_last_modified: DateTime<Utc>,
    pub added_to_library: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_opened: Option<DateTime<Utc>>,
    pub color_theme: String,
    pub file_hash: String,
    pub project_gutenberg_id: i32,
}

impl Book {
    /// A freshly added book with the schema defaults applied.
    pub fn new(user_id: Uuid, title: impl Into<String>, format: impl Into<String>, document_size: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            authors: None,
            format: format.into(),
            language: None,
            creator: None,
            creation_date: None,
            document_size: document_size.into(),
            pages_size: String::new(),
            page_count: 0,
            current_page: 0,
            has_cover: false,
            cover_size: 0,
            cover_last_modified: now,
            added_to_library: now,
            last_modified: now,
            last_opened: None,
            color_theme: DEFAULT_COLOR_THEME.to_string(),
            file_hash: String::new(),
            project_gutenberg_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    pub id: Uuid,
    pub book_id: Uuid,
    pub name: String,
    pub page_number: i32,
    pub y_offset: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub id: Uuid,
    pub book_id: Uuid,
    pub color: String,
    pub page_number: i32,
}

/// Bounding box of one highlighted span.
#[derive(Debug, Clone, PartialEq)]
pub struct RectF {
    pub id: Uuid,
    pub highlight_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Tags can exist unattached.
    pub book_id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub concurrency_stamp: Uuid,
}

impl Tag {
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            book_id: None,
            name: name.into(),
            created_at: Utc::now(),
            concurrency_stamp: Uuid::new_v4(),
        }
    }
}

/// A Book together with everything it owns, stored as an arena keyed by id.
///
/// Keying by id is what makes repeated loads idempotent: re-inserting an
/// entity replaces it instead of appending a duplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct BookAggregate {
    pub book: Book,
    pub tags: BTreeMap<Uuid, Tag>,
    pub bookmarks: BTreeMap<Uuid, Bookmark>,
    pub highlights: BTreeMap<Uuid, Highlight>,
    pub rects: BTreeMap<Uuid, RectF>,
}

impl BookAggregate {
    /// An aggregate with no relationships loaded yet.
    pub fn new(book: Book) -> Self {
        Self {
            book,
            tags: BTreeMap::new(),
            bookmarks: BTreeMap::new(),
            highlights: BTreeMap::new(),
            rects: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.book.id
    }

    /// The regions belonging to one highlight.
    pub fn rects_for(&self, highlight_id: Uuid) -> impl Iterator<Item = &RectF> + '_ {
        self.rects.values().filter(move |r| r.highlight_id == highlight_id)
    }

    fn clear_relationships(&mut self) {
        self.tags.clear();
        self.bookmarks.clear();
        self.highlights.clear();
        self.rects.clear();
    }

    /// Replace the book record and every loaded relationship.
    pub(crate) fn replace(&mut self, book: Book, tags: Vec<Tag>, bookmarks: Vec<Bookmark>, highlights: Vec<Highlight>, rects: Vec<RectF>) {
        self.book = book;
        self.clear_relationships();
        self.tags.extend(tags.into_iter().map(|t| (t.id, t)));
        self.bookmarks.extend(bookmarks.into_iter().map(|b| (b.id, b)));
        self.highlights.extend(highlights.into_iter().map(|h| (h.id, h)));
        self.rects.extend(rects.into_iter().map(|r| (r.id, r)));
    }
}
