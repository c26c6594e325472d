//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::middleware::CurrentUser;
use crate::web::protocol::{
    decode_patch, BookResponse, BookmarkResponse, ErrorBody, HighlightResponse, JsonPatchOperation, QuotaQuery,
    QuotaResponse, RectResponse, StorageResponse, TagResponse, UpdateTagRequest, UserResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use library_core::{CoreError, PortError, StorageQuota};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_user_handler,
        patch_user_handler,
        get_storage_handler,
        list_tags_handler,
        update_tag_handler,
        patch_tag_handler,
        delete_tag_handler,
        list_books_handler,
        get_book_handler,
        delete_book_handler,
        check_quota_handler,
    ),
    components(
        schemas(
            UserResponse, StorageResponse, QuotaResponse, TagResponse, BookResponse, BookmarkResponse,
            HighlightResponse, RectResponse, JsonPatchOperation, UpdateTagRequest, ErrorBody
        )
    ),
    tags(
        (name = "Library API", description = "Accounts, tags, books and storage quota of the e-book library.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Responses
//=========================================================================================

/// A core failure on its way out as an HTTP response.
#[derive(Debug)]
pub struct HttpError(pub CoreError);

impl From<CoreError> for HttpError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl From<PortError> for HttpError {
    fn from(err: PortError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status.is_server_error() {
            error!("Request failed: {:?}", self.0);
            "An unexpected internal error occurred".to_string()
        } else {
            warn!(retryable = self.0.is_retryable(), "Request rejected: {}", self.0);
            self.0.to_string()
        };
        (status, Json(ErrorBody { status: status.as_u16(), message })).into_response()
    }
}

type HandlerResult<T> = Result<T, HttpError>;

//=========================================================================================
// Account Handlers
//=========================================================================================

/// Get the caller's account.
#[utoipa::path(
    get,
    path = "/user",
    responses(
        (status = 200, description = "The caller's account", body = UserResponse),
        (status = 404, description = "Unknown user", body = ErrorBody)
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn get_user_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> HandlerResult<Json<UserResponse>> {
    let user = app_state.repo.get_user_by_id(user_id).await?;
    Ok(Json(user.into()))
}

/// Apply a JSON Patch document to the caller's account.
///
/// Supported paths are `/firstName`, `/lastName`, `/bookStorageLimit` and `/productId`.
#[utoipa::path(
    patch,
    path = "/user",
    request_body = Vec<JsonPatchOperation>,
    responses(
        (status = 200, description = "The updated account", body = UserResponse),
        (status = 400, description = "Invalid patch or validation failure", body = ErrorBody),
        (status = 403, description = "The new limit is below the storage already used", body = ErrorBody),
        (status = 409, description = "The account changed concurrently; reload and retry", body = ErrorBody)
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn patch_user_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(ops): Json<Vec<JsonPatchOperation>>,
) -> HandlerResult<Json<UserResponse>> {
    let ops = decode_patch(ops)?;
    let user = app_state.patcher.apply_user_patch(user_id, &ops).await?;
    Ok(Json(user.into()))
}

/// Get the caller's used storage and effective limit.
#[utoipa::path(
    get,
    path = "/user/storage",
    responses(
        (status = 200, description = "Storage usage", body = StorageResponse),
        (status = 422, description = "A recorded book size is malformed", body = ErrorBody)
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn get_storage_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> HandlerResult<Json<StorageResponse>> {
    let user = app_state.repo.get_user_by_id(user_id).await?;
    let usage = app_state.quota.accountant().usage(user_id).await?;
    let limit = app_state.quota.storage_limit(&user).await?;
    let quota = StorageQuota { used: usage.total(), limit };
    Ok(Json(StorageResponse::new(quota, usage)))
}

//=========================================================================================
// Tag Handlers
//=========================================================================================

/// List the caller's tags, oldest first.
#[utoipa::path(
    get,
    path = "/tags",
    responses((status = 200, description = "The caller's tags", body = Vec<TagResponse>)),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_tags_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> HandlerResult<Json<Vec<TagResponse>>> {
    let tags = app_state.loader.list_tags(user_id).await?;
    Ok(Json(tags.into_iter().map(TagResponse::from).collect()))
}

/// Rename a tag.
#[utoipa::path(
    put,
    path = "/tags",
    request_body = UpdateTagRequest,
    responses(
        (status = 200, description = "The renamed tag", body = TagResponse),
        (status = 400, description = "Empty, too long or duplicate name", body = ErrorBody),
        (status = 404, description = "Unknown tag", body = ErrorBody),
        (status = 409, description = "The tag changed concurrently; reload and retry", body = ErrorBody)
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn update_tag_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(body): Json<UpdateTagRequest>,
) -> HandlerResult<Json<TagResponse>> {
    let tag = app_state.patcher.update_tag(user_id, body.id, &body.name).await?;
    Ok(Json(tag.into()))
}

/// Apply a JSON Patch document to a tag.
///
/// Supported paths are `/name` and `/bookId`.
#[utoipa::path(
    patch,
    path = "/tags/{id}",
    request_body = Vec<JsonPatchOperation>,
    responses(
        (status = 200, description = "The updated tag", body = TagResponse),
        (status = 400, description = "Invalid patch or validation failure", body = ErrorBody),
        (status = 404, description = "Unknown tag or book", body = ErrorBody),
        (status = 409, description = "The tag changed concurrently; reload and retry", body = ErrorBody)
    ),
    params(
        ("id" = Uuid, Path, description = "The tag to update."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn patch_tag_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(tag_id): Path<Uuid>,
    Json(ops): Json<Vec<JsonPatchOperation>>,
) -> HandlerResult<Json<TagResponse>> {
    let ops = decode_patch(ops)?;
    let tag = app_state.patcher.apply_tag_patch(user_id, tag_id, &ops).await?;
    Ok(Json(tag.into()))
}

/// Delete a tag.
#[utoipa::path(
    delete,
    path = "/tags/{id}",
    responses(
        (status = 204, description = "Tag deleted"),
        (status = 404, description = "Unknown tag", body = ErrorBody)
    ),
    params(
        ("id" = Uuid, Path, description = "The tag to delete."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_tag_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(tag_id): Path<Uuid>,
) -> HandlerResult<StatusCode> {
    app_state.loader.delete_tag(user_id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Book Handlers
//=========================================================================================

/// List the caller's books with their tags, bookmarks and highlights.
#[utoipa::path(
    get,
    path = "/books",
    responses((status = 200, description = "The caller's library", body = Vec<BookResponse>)),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_books_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> HandlerResult<Json<Vec<BookResponse>>> {
    let library = app_state.loader.load_library(user_id).await?;
    Ok(Json(library.into_iter().map(BookResponse::from).collect()))
}

/// Get one book with its tags, bookmarks and highlights.
#[utoipa::path(
    get,
    path = "/books/{id}",
    responses(
        (status = 200, description = "The book", body = BookResponse),
        (status = 404, description = "Unknown book", body = ErrorBody)
    ),
    params(
        ("id" = Uuid, Path, description = "The book to load."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_book_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(book_id): Path<Uuid>,
) -> HandlerResult<Json<BookResponse>> {
    let aggregate = app_state.loader.load(user_id, book_id).await?;
    Ok(Json(aggregate.into()))
}

/// Delete a book together with its bookmarks, highlights and book-scoped tags.
#[utoipa::path(
    delete,
    path = "/books/{id}",
    responses(
        (status = 204, description = "Book deleted"),
        (status = 404, description = "Unknown book", body = ErrorBody),
        (status = 409, description = "The book changed during deletion; retry", body = ErrorBody)
    ),
    params(
        ("id" = Uuid, Path, description = "The book to delete."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_book_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(book_id): Path<Uuid>,
) -> HandlerResult<StatusCode> {
    app_state.loader.delete_book(user_id, book_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Check whether an upload of `bytes` would fit in the caller's storage.
#[utoipa::path(
    get,
    path = "/books/quota",
    responses((status = 200, description = "The quota decision", body = QuotaResponse)),
    params(
        QuotaQuery,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn check_quota_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(query): Query<QuotaQuery>,
) -> HandlerResult<Json<QuotaResponse>> {
    let quota = app_state.quota.storage_quota(user_id).await?;
    Ok(Json(QuotaResponse { bytes: query.bytes, allowed: quota.allows(query.bytes), used: quota.used, limit: quota.limit }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use library_core::mock::InMemoryRepository;
    use library_core::{Book, SizeError, User};
    use rstest::rstest;
    use std::collections::HashMap;

    fn app_state(repo: Arc<InMemoryRepository>) -> Arc<AppState> {
        let vars = HashMap::from([("DATABASE_URL".to_string(), "postgres://localhost/library".to_string())]);
        let config = Config::from_vars(vars).unwrap();
        Arc::new(AppState::new(repo, config.quota_defaults))
    }

    async fn seeded() -> (Arc<AppState>, User, Book) {
        let repo = Arc::new(InMemoryRepository::new());
        let user = User::new("ada@example.com", "Ada", "Lovelace");
        let mut book = Book::new(user.id, "Dune", "epub", "1 MB");
        book.cover_size = 2_000;
        repo.insert_user(user.clone()).await;
        repo.insert_book(book.clone()).await;
        (app_state(repo), user, book)
    }

    #[rstest]
    #[case(CoreError::Validation("name".into()), StatusCode::BAD_REQUEST)]
    #[case(CoreError::InvalidPatchOperation("op".into()), StatusCode::BAD_REQUEST)]
    #[case(CoreError::QuotaExceeded { used: 10, requested: 5, limit: 12 }, StatusCode::FORBIDDEN)]
    #[case(CoreError::NotFound("book".into()), StatusCode::NOT_FOUND)]
    #[case(CoreError::Conflict("user".into()), StatusCode::CONFLICT)]
    #[case(CoreError::MalformedSize(SizeError::Empty), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(CoreError::Repository("pool".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn core_errors_map_to_status(#[case] err: CoreError, #[case] status: StatusCode) {
        assert_eq!(HttpError(err).into_response().status(), status);
    }

    #[tokio::test]
    async fn server_errors_hide_details() {
        let response = HttpError(CoreError::Repository("password authentication failed".into())).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 500);
        assert!(!body["message"].as_str().unwrap().contains("password"));
    }

    #[tokio::test]
    async fn storage_and_quota_reflect_the_library() {
        let (state, user, _) = seeded().await;

        let Json(storage) = get_storage_handler(State(state.clone()), Extension(CurrentUser(user.id))).await.unwrap();
        assert_eq!(storage.used, 1_002_000);
        assert_eq!(storage.limit, 100_000_000);
        assert_eq!(storage.book_count, 1);

        let query = QuotaQuery { bytes: 98_998_000 };
        let Json(quota) = check_quota_handler(State(state.clone()), Extension(CurrentUser(user.id)), Query(query)).await.unwrap();
        assert!(quota.allowed);

        let query = QuotaQuery { bytes: 98_998_001 };
        let Json(quota) = check_quota_handler(State(state), Extension(CurrentUser(user.id)), Query(query)).await.unwrap();
        assert!(!quota.allowed);
    }

    #[tokio::test]
    async fn patch_user_decodes_json_patch() {
        let (state, user, _) = seeded().await;
        let ops = vec![JsonPatchOperation {
            op: "replace".into(),
            path: "/firstName".into(),
            value: Some(serde_json::json!("Augusta")),
        }];

        let Json(patched) = patch_user_handler(State(state), Extension(CurrentUser(user.id)), Json(ops)).await.unwrap();
        assert_eq!(patched.first_name, "Augusta");
    }

    #[tokio::test]
    async fn deleted_book_is_gone() {
        let (state, user, book) = seeded().await;

        let status = delete_book_handler(State(state.clone()), Extension(CurrentUser(user.id)), Path(book.id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = get_book_handler(State(state), Extension(CurrentUser(user.id)), Path(book.id)).await.unwrap_err();
        assert!(matches!(err.0, CoreError::NotFound(_)));
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/user", "/user/storage", "/tags", "/tags/{id}", "/books", "/books/{id}", "/books/quota"] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
