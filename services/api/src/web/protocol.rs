//! services/api/src/web/protocol.rs
//!
//! Defines the JSON bodies exchanged between clients and the REST API, and
//! their conversion to and from the core's types.

use chrono::{DateTime, Utc};
use library_core::{BookAggregate, CoreError, CoreResult, PatchOp, PatchOperation, PatchValue, StorageQuota, StorageUsage, Tag, User};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Request Bodies
//=========================================================================================

/// One RFC 6902 operation as it arrives on the wire.
///
/// Only `add`, `replace` and `remove` are supported; `test`, `move` and `copy`
/// are rejected as invalid patch operations.
#[derive(Deserialize, Serialize, Debug, Clone, ToSchema)]
pub struct JsonPatchOperation {
    pub op: String,
    pub path: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub value: Option<serde_json::Value>,
}

impl JsonPatchOperation {
    /// Decodes the wire operation into the core's representation.
    pub fn into_core(self) -> CoreResult<PatchOperation> {
        let op = match self.op.to_ascii_lowercase().as_str() {
            "add" => PatchOp::Add,
            "replace" => PatchOp::Replace,
            "remove" => PatchOp::Remove,
            other => {
                return Err(CoreError::InvalidPatchOperation(format!("unsupported operation '{}'", other)));
            }
        };
        let value = match self.value {
            None | Some(serde_json::Value::Null) => PatchValue::Null,
            Some(serde_json::Value::Bool(b)) => PatchValue::Bool(b),
            Some(serde_json::Value::String(s)) => PatchValue::Text(s),
            Some(serde_json::Value::Number(n)) => match n.as_i64() {
                Some(i) => PatchValue::Integer(i),
                None => {
                    return Err(CoreError::InvalidPatchOperation(format!(
                        "'{}': {} is not a whole number in range",
                        self.path, n
                    )));
                }
            },
            Some(other) => {
                return Err(CoreError::InvalidPatchOperation(format!(
                    "'{}': unsupported value {}",
                    self.path, other
                )));
            }
        };
        Ok(PatchOperation { op, path: self.path, value })
    }
}

/// Decodes a whole patch document; the first bad operation rejects it.
pub fn decode_patch(ops: Vec<JsonPatchOperation>) -> CoreResult<Vec<PatchOperation>> {
    ops.into_iter().map(JsonPatchOperation::into_core).collect()
}

/// The body of `PUT /tags`.
#[derive(Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagRequest {
    pub id: Uuid,
    pub name: String,
}

/// Query parameters of `GET /books/quota`.
#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QuotaQuery {
    /// Size in bytes of the upload being considered.
    pub bytes: u64,
}

//=========================================================================================
// Response Bodies
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub book_storage_limit: Option<u64>,
    pub ai_requests_today: u32,
    pub product_id: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            book_storage_limit: user.book_storage_limit,
            ai_requests_today: user.ai_requests_today,
            product_id: user.product_id,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageResponse {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub book_count: usize,
    pub document_bytes: u64,
    pub cover_bytes: u64,
}

impl StorageResponse {
    pub fn new(quota: StorageQuota, usage: StorageUsage) -> Self {
        Self {
            used: quota.used,
            limit: quota.limit,
            remaining: quota.remaining(),
            book_count: usage.book_count,
            document_bytes: usage.document_bytes,
            cover_bytes: usage.cover_bytes,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub bytes: u64,
    pub allowed: bool,
    pub used: u64,
    pub limit: u64,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagResponse {
    pub id: Uuid,
    pub book_id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Tag> for TagResponse {
    fn from(tag: Tag) -> Self {
        Self { id: tag.id, book_id: tag.book_id, name: tag.name, created_at: tag.created_at }
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkResponse {
    pub id: Uuid,
    pub name: String,
    pub page_number: i32,
    pub y_offset: f32,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct RectResponse {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HighlightResponse {
    pub id: Uuid,
    pub color: String,
    pub page_number: i32,
    pub rects: Vec<RectResponse>,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookResponse {
    pub id: Uuid,
    pub title: String,
    pub authors: Option<String>,
    pub format: String,
    pub language: Option<String>,
    pub document_size: String,
    pub pages_size: String,
    pub page_count: i32,
    pub current_page: i32,
    pub has_cover: bool,
    pub cover_size: u64,
    pub added_to_library: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_opened: Option<DateTime<Utc>>,
    pub color_theme: String,
    pub project_gutenberg_id: i32,
    pub tags: Vec<TagResponse>,
    pub bookmarks: Vec<BookmarkResponse>,
    pub highlights: Vec<HighlightResponse>,
}

impl From<BookAggregate> for BookResponse {
    fn from(aggregate: BookAggregate) -> Self {
        let highlights = aggregate
            .highlights
            .values()
            .map(|h| HighlightResponse {
                id: h.id,
                color: h.color.clone(),
                page_number: h.page_number,
                rects: aggregate
                    .rects_for(h.id)
                    .map(|r| RectResponse { x: r.x, y: r.y, width: r.width, height: r.height })
                    .collect(),
            })
            .collect();
        let BookAggregate { book, tags, bookmarks, .. } = aggregate;
        Self {
            id: book.id,
            title: book.title,
            authors: book.authors,
            format: book.format,
            language: book.language,
            document_size: book.document_size,
            pages_size: book.pages_size,
            page_count: book.page_count,
            current_page: book.current_page,
            has_cover: book.has_cover,
            cover_size: book.cover_size,
            added_to_library: book.added_to_library,
            last_modified: book.last_modified,
            last_opened: book.last_opened,
            color_theme: book.color_theme,
            project_gutenberg_id: book.project_gutenberg_id,
            tags: tags.into_values().map(TagResponse::from).collect(),
            bookmarks: bookmarks
                .into_values()
                .map(|b| BookmarkResponse { id: b.id, name: b.name, page_number: b.page_number, y_offset: b.y_offset })
                .collect(),
            highlights,
        }
    }
}

/// The body of every error response.
#[derive(Serialize, Debug, PartialEq, ToSchema)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}
