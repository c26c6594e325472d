//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `LibraryRepository` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use library_core::domain::{Book, Bookmark, Highlight, Product, RectF, Tag, User};
use library_core::ports::{Change, ChangeSet, LibraryRepository, PortError, PortResult};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Postgres SQLSTATE for a foreign key violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `LibraryRepository` port.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Creates a new `PgRepository`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Maps a failed lookup, turning a missing row into `NotFound`.
fn lookup_error(kind: &str, id: impl std::fmt::Display) -> impl FnOnce(sqlx::Error) -> PortError {
    let what = format!("{} {}", kind, id);
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} not found", what)),
        _ => unexpected(e),
    }
}

/// Maps a failed write. A row that is still referenced, or a reference to a row
/// that has vanished, means another writer got there first.
fn write_error(e: sqlx::Error) -> PortError {
    let is_fk_violation = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION);
    if is_fk_violation {
        PortError::Conflict(e.to_string())
    } else {
        unexpected(e)
    }
}

fn to_unsigned(column: &str, value: i64) -> PortResult<u64> {
    u64::try_from(value).map_err(|_| PortError::Unexpected(format!("negative {}: {}", column, value)))
}

fn to_signed(column: &str, value: u64) -> PortResult<i64> {
    i64::try_from(value).map_err(|_| PortError::Unexpected(format!("{} out of range: {}", column, value)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    book_storage_limit: Option<i64>,
    ai_requests_today: i32,
    product_id: Option<String>,
    concurrency_stamp: Uuid,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            book_storage_limit: self
                .book_storage_limit
                .map(|limit| to_unsigned("book_storage_limit", limit))
                .transpose()?,
            ai_requests_today: u32::try_from(self.ai_requests_today)
                .map_err(|_| PortError::Unexpected(format!("negative ai_requests_today: {}", self.ai_requests_today)))?,
            product_id: self.product_id,
            concurrency_stamp: self.concurrency_stamp,
        })
    }
}

#[derive(FromRow)]
struct ProductRecord {
    id: String,
    name: String,
    description: String,
    price: i32,
    book_storage_limit: i64,
    ai_request_limit: i32,
}
impl ProductRecord {
    fn to_domain(self, features: Vec<String>) -> PortResult<Product> {
        Ok(Product {
            book_storage_limit: to_unsigned("book_storage_limit", self.book_storage_limit)?,
            ai_request_limit: u32::try_from(self.ai_request_limit)
                .map_err(|_| PortError::Unexpected(format!("negative ai_request_limit: {}", self.ai_request_limit)))?,
            id: self.id,
            name: self.name,
            description: self.description,
            price: self.price,
            features,
        })
    }
}

#[derive(FromRow)]
struct BookRecord {
    id: Uuid,
    user_id: Uuid,
    title: String,
    authors: Option<String>,
    format: String,
    language: Option<String>,
    creator: Option<String>,
    creation_date: Option<String>,
    document_size: String,
    pages_size: String,
    page_count: i32,
    current_page: i32,
    has_cover: bool,
    cover_size: i64,
    cover_last_modified: DateTime<Utc>,
    added_to_library: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    last_opened: Option<DateTime<Utc>>,
    color_theme: String,
    file_hash: String,
    project_gutenberg_id: i32,
}
impl BookRecord {
    fn to_domain(self) -> PortResult<Book> {
        Ok(Book {
            cover_size: to_unsigned("cover_size", self.cover_size)?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            authors: self.authors,
            format: self.format,
            language: self.language,
            creator: self.creator,
            creation_date: self.creation_date,
            document_size: self.document_size,
            pages_size: self.pages_size,
            page_count: self.page_count,
            current_page: self.current_page,
            has_cover: self.has_cover,
            cover_last_modified: self.cover_last_modified,
            added_to_library: self.added_to_library,
            last_modified: self.last_modified,
            last_opened: self.last_opened,
            color_theme: self.color_theme,
            file_hash: self.file_hash,
            project_gutenberg_id: self.project_gutenberg_id,
        })
    }
}

#[derive(FromRow)]
struct BookmarkRecord {
    id: Uuid,
    book_id: Uuid,
    name: String,
    page_number: i32,
    y_offset: f32,
}
impl BookmarkRecord {
    fn to_domain(self) -> Bookmark {
        Bookmark {
            id: self.id,
            book_id: self.book_id,
            name: self.name,
            page_number: self.page_number,
            y_offset: self.y_offset,
        }
    }
}

#[derive(FromRow)]
struct HighlightRecord {
    id: Uuid,
    book_id: Uuid,
    color: String,
    page_number: i32,
}
impl HighlightRecord {
    fn to_domain(self) -> Highlight {
        Highlight {
            id: self.id,
            book_id: self.book_id,
            color: self.color,
            page_number: self.page_number,
        }
    }
}

#[derive(FromRow)]
struct RectFRecord {
    id: Uuid,
    highlight_id: Uuid,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}
impl RectFRecord {
    fn to_domain(self) -> RectF {
        RectF {
            id: self.id,
            highlight_id: self.highlight_id,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(FromRow)]
struct TagRecord {
    id: Uuid,
    user_id: Uuid,
    book_id: Option<Uuid>,
    name: String,
    created_at: DateTime<Utc>,
    concurrency_stamp: Uuid,
}
impl TagRecord {
    fn to_domain(self) -> Tag {
        Tag {
            id: self.id,
            user_id: self.user_id,
            book_id: self.book_id,
            name: self.name,
            created_at: self.created_at,
            concurrency_stamp: self.concurrency_stamp,
        }
    }
}

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, book_storage_limit, ai_requests_today, product_id, concurrency_stamp";

const BOOK_COLUMNS: &str = "id, user_id, title, authors, format, language, creator, creation_date, \
     document_size, pages_size, page_count, current_page, has_cover, cover_size, cover_last_modified, \
     added_to_library, last_modified, last_opened, color_theme, file_hash, project_gutenberg_id";

const TAG_COLUMNS: &str = "id, user_id, book_id, name, created_at, concurrency_stamp";

//=========================================================================================
// Transactional Writes
//=========================================================================================

/// Resolves a stamped update that touched no rows into the right error.
async fn missed_update(tx: &mut Transaction<'_, Postgres>, table: &str, kind: &str, id: Uuid) -> PortError {
    let exists = sqlx::query_scalar::<_, bool>(&format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table))
        .bind(id)
        .fetch_one(&mut **tx)
        .await;
    match exists {
        Ok(true) => PortError::Conflict(format!("{} {} was modified concurrently", kind, id)),
        Ok(false) => PortError::NotFound(format!("{} {} not found", kind, id)),
        Err(e) => unexpected(e),
    }
}

async fn delete_row(tx: &mut Transaction<'_, Postgres>, table: &str, id: Uuid) -> PortResult<u64> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table))
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(write_error)?;
    Ok(result.rows_affected())
}

async fn apply_change(tx: &mut Transaction<'_, Postgres>, change: Change) -> PortResult<()> {
    match change {
        Change::UpdateUser { user, expected_stamp } => {
            let limit = user.book_storage_limit.map(|l| to_signed("book_storage_limit", l)).transpose()?;
            let result = sqlx::query(
                "UPDATE users SET first_name = $3, last_name = $4, book_storage_limit = $5, \
                 product_id = $6, concurrency_stamp = $7 \
                 WHERE id = $1 AND concurrency_stamp = $2",
            )
            .bind(user.id)
            .bind(expected_stamp)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(limit)
            .bind(&user.product_id)
            .bind(user.concurrency_stamp)
            .execute(&mut **tx)
            .await
            .map_err(write_error)?;
            if result.rows_affected() == 0 {
                return Err(missed_update(tx, "users", "User", user.id).await);
            }
        }
        Change::UpdateTag { tag, expected_stamp } => {
            let result = sqlx::query(
                "UPDATE tags SET book_id = $3, name = $4, concurrency_stamp = $5 \
                 WHERE id = $1 AND concurrency_stamp = $2",
            )
            .bind(tag.id)
            .bind(expected_stamp)
            .bind(tag.book_id)
            .bind(&tag.name)
            .bind(tag.concurrency_stamp)
            .execute(&mut **tx)
            .await
            .map_err(write_error)?;
            if result.rows_affected() == 0 {
                return Err(missed_update(tx, "tags", "Tag", tag.id).await);
            }
        }
        Change::DeleteRect(id) => {
            delete_row(tx, "rect_fs", id).await?;
        }
        Change::DeleteHighlight(id) => {
            delete_row(tx, "highlights", id).await?;
        }
        Change::DeleteBookmark(id) => {
            delete_row(tx, "bookmarks", id).await?;
        }
        Change::DeleteTag(id) => {
            if delete_row(tx, "tags", id).await? == 0 {
                return Err(PortError::NotFound(format!("Tag {} not found", id)));
            }
        }
        Change::DeleteBook(id) => {
            if delete_row(tx, "books", id).await? == 0 {
                return Err(PortError::NotFound(format!("Book {} not found", id)));
            }
        }
    }
    Ok(())
}

//=========================================================================================
// `LibraryRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl LibraryRepository for PgRepository {
    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(lookup_error("User", user_id))?;
        record.to_domain()
    }

    async fn get_product_by_id(&self, product_id: &str) -> PortResult<Product> {
        let record = sqlx::query_as::<_, ProductRecord>(
            "SELECT id, name, description, price, book_storage_limit, ai_request_limit FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .map_err(lookup_error("Product", product_id))?;

        let features = sqlx::query_scalar::<_, String>(
            "SELECT name FROM product_features WHERE product_id = $1 ORDER BY name ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        record.to_domain(features)
    }

    async fn list_books_by_user(&self, user_id: Uuid) -> PortResult<Vec<Book>> {
        let records = sqlx::query_as::<_, BookRecord>(&format!(
            "SELECT {} FROM books WHERE user_id = $1 ORDER BY added_to_library ASC",
            BOOK_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_book_by_id(&self, book_id: Uuid) -> PortResult<Book> {
        let record = sqlx::query_as::<_, BookRecord>(&format!("SELECT {} FROM books WHERE id = $1", BOOK_COLUMNS))
            .bind(book_id)
            .fetch_one(&self.pool)
            .await
            .map_err(lookup_error("Book", book_id))?;
        record.to_domain()
    }

    async fn list_tags_for_book(&self, book_id: Uuid) -> PortResult<Vec<Tag>> {
        let records = sqlx::query_as::<_, TagRecord>(&format!("SELECT {} FROM tags WHERE book_id = $1", TAG_COLUMNS))
            .bind(book_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_bookmarks_for_book(&self, book_id: Uuid) -> PortResult<Vec<Bookmark>> {
        let records = sqlx::query_as::<_, BookmarkRecord>(
            "SELECT id, book_id, name, page_number, y_offset FROM bookmarks WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_highlights_for_book(&self, book_id: Uuid) -> PortResult<Vec<Highlight>> {
        let records = sqlx::query_as::<_, HighlightRecord>(
            "SELECT id, book_id, color, page_number FROM highlights WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_rects_for_highlight(&self, highlight_id: Uuid) -> PortResult<Vec<RectF>> {
        let records = sqlx::query_as::<_, RectFRecord>(
            "SELECT id, highlight_id, x, y, width, height FROM rect_fs WHERE highlight_id = $1",
        )
        .bind(highlight_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_tags_by_user(&self, user_id: Uuid) -> PortResult<Vec<Tag>> {
        let records = sqlx::query_as::<_, TagRecord>(&format!(
            "SELECT {} FROM tags WHERE user_id = $1 ORDER BY created_at ASC",
            TAG_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_tag_by_id(&self, tag_id: Uuid) -> PortResult<Tag> {
        let record = sqlx::query_as::<_, TagRecord>(&format!("SELECT {} FROM tags WHERE id = $1", TAG_COLUMNS))
            .bind(tag_id)
            .fetch_one(&self.pool)
            .await
            .map_err(lookup_error("Tag", tag_id))?;
        Ok(record.to_domain())
    }

    #[instrument(skip(self, changes), fields(changes = changes.len()))]
    async fn save_changes(&self, changes: ChangeSet) -> PortResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for change in changes {
            // Returning early drops `tx`, which rolls the whole set back.
            apply_change(&mut tx, change).await?;
        }
        tx.commit().await.map_err(write_error)?;
        debug!("change set committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_maps_to_not_found() {
        let err = lookup_error("Book", "42")(sqlx::Error::RowNotFound);
        assert_eq!(err, PortError::NotFound("Book 42 not found".to_string()));
    }

    #[test]
    fn other_failures_are_unexpected() {
        assert!(matches!(write_error(sqlx::Error::PoolTimedOut), PortError::Unexpected(_)));
        assert!(matches!(lookup_error("Tag", 1)(sqlx::Error::PoolClosed), PortError::Unexpected(_)));
    }

    #[test]
    fn negative_sizes_are_rejected() {
        assert_eq!(to_unsigned("cover_size", 12).unwrap(), 12);
        assert!(to_unsigned("cover_size", -1).is_err());
        assert!(to_signed("book_storage_limit", u64::MAX).is_err());
    }
}
