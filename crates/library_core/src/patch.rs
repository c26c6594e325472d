//! crates/library_core/src/patch.rs
//!
//! Applies partial updates to a user profile or a tag.
//!
//! Operations arrive already decoded from the wire as [`PatchOperation`]s
//! addressed by path. Each one is turned into a typed edit for its target
//! (`UserEdit`, `TagEdit`), so every accepted path has exactly one place where
//! its value is checked. Edits are applied in order to an in-memory copy; the
//! copy is validated and then committed against the concurrency stamp of the
//! snapshot it started from. Any failure leaves the stored entity untouched.

use crate::domain::{Tag, User};
use crate::error::{CoreError, CoreResult};
use crate::ports::{Change, ChangeSet, LibraryRepository};
use crate::quota::QuotaEnforcer;
use crate::size;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub const FIRST_NAME_MAX_LEN: usize = 40;
pub const LAST_NAME_MAX_LEN: usize = 50;
pub const TAG_NAME_MAX_LEN: usize = 30;

//=========================================================================================
// Wire-independent Operations
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

/// A single field-level mutation, e.g. `replace /firstName "Ada"`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: PatchValue,
}

impl PatchOperation {
    pub fn replace(path: impl Into<String>, value: PatchValue) -> Self {
        Self { op: PatchOp::Replace, path: path.into(), value }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self { op: PatchOp::Remove, path: path.into(), value: PatchValue::Null }
    }

    /// Path without the leading `/`, lowercased. Paths match case-insensitively.
    fn field(&self) -> String {
        self.path.strip_prefix('/').unwrap_or(&self.path).to_ascii_lowercase()
    }

    fn unknown_path(&self) -> CoreError {
        CoreError::InvalidPatchOperation(format!("unknown path '{}'", self.path))
    }

    fn wrong_type(&self, expected: &str) -> CoreError {
        CoreError::InvalidPatchOperation(format!("'{}' expects {expected}, got {:?}", self.path, self.value))
    }

    fn text(&self) -> CoreResult<String> {
        match (&self.op, &self.value) {
            (PatchOp::Remove, _) => Ok(String::new()),
            (_, PatchValue::Text(text)) => Ok(text.trim().to_string()),
            _ => Err(self.wrong_type("a string")),
        }
    }

    fn optional_text(&self) -> CoreResult<Option<String>> {
        match (&self.op, &self.value) {
            (PatchOp::Remove, _) | (_, PatchValue::Null) => Ok(None),
            (_, PatchValue::Text(text)) => Ok(Some(text.trim().to_string())),
            _ => Err(self.wrong_type("a string or null")),
        }
    }

    /// A byte count, given either as an integer or as a size string such as `"2 GB"`.
    fn optional_bytes(&self) -> CoreResult<Option<u64>> {
        match (&self.op, &self.value) {
            (PatchOp::Remove, _) | (_, PatchValue::Null) => Ok(None),
            (_, PatchValue::Integer(n)) => u64::try_from(*n).map(Some).map_err(|_| self.wrong_type("a non-negative integer")),
            (_, PatchValue::Text(text)) => size::parse(text)
                .map(Some)
                .map_err(|e| CoreError::InvalidPatchOperation(format!("'{}': {e}", self.path))),
            _ => Err(self.wrong_type("a byte count or size string")),
        }
    }

    fn optional_uuid(&self) -> CoreResult<Option<Uuid>> {
        match self.optional_text()? {
            None => Ok(None),
            Some(text) => Uuid::parse_str(&text).map(Some).map_err(|_| self.wrong_type("a UUID")),
        }
    }
}

//=========================================================================================
// Typed Edits
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
enum UserEdit {
    FirstName(String),
    LastName(String),
    BookStorageLimit(Option<u64>),
    ProductId(Option<String>),
}

impl UserEdit {
    fn parse(op: &PatchOperation) -> CoreResult<Self> {
        match op.field().as_str() {
            "firstname" => Ok(UserEdit::FirstName(op.text()?)),
            "lastname" => Ok(UserEdit::LastName(op.text()?)),
            "bookstoragelimit" => Ok(UserEdit::BookStorageLimit(op.optional_bytes()?)),
            "productid" => Ok(UserEdit::ProductId(op.optional_text()?.filter(|id| !id.is_empty()))),
            _ => Err(op.unknown_path()),
        }
    }

    fn apply(self, user: &mut User) {
        match self {
            UserEdit::FirstName(name) => user.first_name = name,
            UserEdit::LastName(name) => user.last_name = name,
            UserEdit::BookStorageLimit(limit) => user.book_storage_limit = limit,
            UserEdit::ProductId(product_id) => user.product_id = product_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TagEdit {
    Name(String),
    BookId(Option<Uuid>),
}

impl TagEdit {
    fn parse(op: &PatchOperation) -> CoreResult<Self> {
        match op.field().as_str() {
            "name" => Ok(TagEdit::Name(op.text()?)),
            "bookid" => Ok(TagEdit::BookId(op.optional_uuid()?)),
            _ => Err(op.unknown_path()),
        }
    }

    fn apply(self, tag: &mut Tag) {
        match self {
            TagEdit::Name(name) => tag.name = name,
            TagEdit::BookId(book_id) => tag.book_id = book_id,
        }
    }
}

fn require_text(field: &str, value: &str, max_len: usize) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max_len {
        return Err(CoreError::Validation(format!("{field} must be at most {max_len} characters")));
    }
    Ok(())
}

//=========================================================================================
// Coordinator
//=========================================================================================

#[derive(Clone)]
pub struct PatchCoordinator {
    repo: Arc<dyn LibraryRepository>,
    quota: QuotaEnforcer,
}

impl PatchCoordinator {
    pub fn new(repo: Arc<dyn LibraryRepository>, quota: QuotaEnforcer) -> Self {
        Self { repo, quota }
    }

    /// Read the user, apply `ops`, validate, and commit.
    pub async fn apply_user_patch(&self, user_id: Uuid, ops: &[PatchOperation]) -> CoreResult<User> {
        let snapshot = self.repo.get_user_by_id(user_id).await?;
        self.apply_user_patch_from(snapshot, ops).await
    }

    /// Apply `ops` on top of a snapshot the caller already read.
    ///
    /// If the stored user changed since `snapshot` was taken, nothing is written
    /// and [`CoreError::Conflict`] is returned.
    #[instrument(skip_all, fields(user_id = %snapshot.id, ops = ops.len()))]
    pub async fn apply_user_patch_from(&self, snapshot: User, ops: &[PatchOperation]) -> CoreResult<User> {
        let mut draft = snapshot.clone();
        for op in ops {
            UserEdit::parse(op)?.apply(&mut draft);
        }
        self.validate_user(&snapshot, &draft).await?;

        draft.concurrency_stamp = Uuid::new_v4();
        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateUser { user: draft.clone(), expected_stamp: snapshot.concurrency_stamp });
        self.repo.save_changes(changes).await?;
        info!("Patched user profile");
        // Only profile fields were written; the rest may have moved since the snapshot.
        Ok(self.repo.get_user_by_id(draft.id).await?)
    }

    async fn validate_user(&self, before: &User, after: &User) -> CoreResult<()> {
        require_text("firstName", &after.first_name, FIRST_NAME_MAX_LEN)?;
        require_text("lastName", &after.last_name, LAST_NAME_MAX_LEN)?;

        let tier_changed = before.product_id != after.product_id;
        if tier_changed {
            if let Some(product_id) = &after.product_id {
                self.repo.get_product_by_id(product_id).await.map_err(|e| match CoreError::from(e) {
                    CoreError::NotFound(_) => CoreError::Validation(format!("unknown product '{product_id}'")),
                    other => other,
                })?;
            }
        }
        if tier_changed || before.book_storage_limit != after.book_storage_limit {
            let limit = self.quota.storage_limit(after).await?;
            let used = self.quota.accountant().used_storage(after.id).await?;
            debug!(used, limit, "Re-checking storage against new limit");
            if used > limit {
                return Err(CoreError::QuotaExceeded { used, requested: 0, limit });
            }
        }
        Ok(())
    }

    /// Read the tag (which must belong to `user_id`), apply `ops`, validate, and commit.
    pub async fn apply_tag_patch(&self, user_id: Uuid, tag_id: Uuid, ops: &[PatchOperation]) -> CoreResult<Tag> {
        let snapshot = self.repo.get_tag_by_id(tag_id).await?;
        if snapshot.user_id != user_id {
            return Err(CoreError::NotFound(format!("Tag {tag_id} not found")));
        }
        self.apply_tag_patch_from(snapshot, ops).await
    }

    /// Apply `ops` on top of a tag snapshot the caller already read.
    #[instrument(skip_all, fields(tag_id = %snapshot.id, ops = ops.len()))]
    pub async fn apply_tag_patch_from(&self, snapshot: Tag, ops: &[PatchOperation]) -> CoreResult<Tag> {
        let mut draft = snapshot.clone();
        for op in ops {
            TagEdit::parse(op)?.apply(&mut draft);
        }
        self.validate_tag(&snapshot, &draft).await?;

        draft.concurrency_stamp = Uuid::new_v4();
        let mut changes = ChangeSet::new();
        changes.push(Change::UpdateTag { tag: draft.clone(), expected_stamp: snapshot.concurrency_stamp });
        self.repo.save_changes(changes).await?;
        info!("Patched tag");
        Ok(draft)
    }

    /// Rename a tag; the whole-object update form of [`apply_tag_patch`](Self::apply_tag_patch).
    pub async fn update_tag(&self, user_id: Uuid, tag_id: Uuid, name: &str) -> CoreResult<Tag> {
        let op = PatchOperation::replace("/name", PatchValue::Text(name.to_string()));
        self.apply_tag_patch(user_id, tag_id, std::slice::from_ref(&op)).await
    }

    async fn validate_tag(&self, before: &Tag, after: &Tag) -> CoreResult<()> {
        require_text("name", &after.name, TAG_NAME_MAX_LEN)?;

        if before.name != after.name {
            let taken = self
                .repo
                .list_tags_by_user(after.user_id)
                .await?
                .iter()
                .any(|t| t.id != after.id && t.name.eq_ignore_ascii_case(&after.name));
            if taken {
                return Err(CoreError::Validation(format!("a tag named '{}' already exists", after.name)));
            }
        }
        if before.book_id != after.book_id {
            if let Some(book_id) = after.book_id {
                let book = self.repo.get_book_by_id(book_id).await?;
                if book.user_id != after.user_id {
                    return Err(CoreError::NotFound(format!("Book {book_id} not found")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Book, Product};
    use crate::mock::InMemoryRepository;
    use crate::quota::QuotaDefaults;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        patcher: PatchCoordinator,
        user: User,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_product(Product {
            id: "basic".into(),
            name: "Basic".into(),
            description: String::new(),
            price: 0,
            book_storage_limit: 1_000_000,
            ai_request_limit: 5,
            features: vec![],
        })
        .await;
        let user = User::new("ada@example.com", "Ada", "Lovelace");
        repo.insert_user(user.clone()).await;
        repo.insert_book(Book::new(user.id, "Notes", "pdf", "2 MB")).await;
        let quota = QuotaEnforcer::new(repo.clone(), QuotaDefaults { book_storage_limit: 10_000_000, ai_request_limit: 5 });
        let patcher = PatchCoordinator::new(repo.clone(), quota);
        Fixture { repo, patcher, user }
    }

    fn text(value: &str) -> PatchValue {
        PatchValue::Text(value.to_string())
    }

    #[tokio::test]
    async fn applies_operations_in_order() {
        let f = fixture().await;
        let ops = [
            PatchOperation::replace("/firstName", text("Augusta")),
            PatchOperation { op: PatchOp::Add, path: "/FIRSTNAME".into(), value: text("  Ada ") },
            PatchOperation::replace("lastName", text("King")),
        ];
        let patched = f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap();
        assert_eq!(patched.first_name, "Ada");
        assert_eq!(patched.last_name, "King");
        assert_ne!(patched.concurrency_stamp, f.user.concurrency_stamp);
        assert_eq!(f.repo.get_user_by_id(f.user.id).await.unwrap(), patched);
    }

    #[tokio::test]
    async fn unknown_path_changes_nothing() {
        let f = fixture().await;
        let ops = [PatchOperation::replace("/firstName", text("Augusta")), PatchOperation::replace("/email", text("x@y.z"))];
        let err = f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidPatchOperation(_)));
        assert_eq!(f.repo.get_user_by_id(f.user.id).await.unwrap(), f.user);
    }

    #[tokio::test]
    async fn wrong_value_type_is_an_invalid_operation() {
        let f = fixture().await;
        let ops = [PatchOperation::replace("/firstName", PatchValue::Integer(7))];
        assert!(matches!(f.patcher.apply_user_patch(f.user.id, &ops).await, Err(CoreError::InvalidPatchOperation(_))));
    }

    #[tokio::test]
    async fn removing_a_required_field_fails_validation() {
        let f = fixture().await;
        let ops = [PatchOperation::remove("/lastName")];
        let err = f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap_err();
        assert_eq!(err, CoreError::Validation("lastName is required".into()));
        assert_eq!(err.status(), 400);
        assert_eq!(f.repo.get_user_by_id(f.user.id).await.unwrap(), f.user);
    }

    #[tokio::test]
    async fn overlong_name_fails_validation() {
        let f = fixture().await;
        let ops = [PatchOperation::replace("/firstName", text(&"a".repeat(FIRST_NAME_MAX_LEN + 1)))];
        assert!(matches!(f.patcher.apply_user_patch(f.user.id, &ops).await, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn limit_accepts_size_strings() {
        let f = fixture().await;
        let ops = [PatchOperation::replace("/bookStorageLimit", text("2,5 MB"))];
        let patched = f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap();
        assert_eq!(patched.book_storage_limit, Some(2_500_000));

        let ops = [PatchOperation::remove("/bookStorageLimit")];
        assert_eq!(f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap().book_storage_limit, None);
    }

    #[tokio::test]
    async fn downgrade_below_usage_is_rejected() {
        let f = fixture().await;
        let ops = [PatchOperation::replace("/productId", text("basic"))];
        let err = f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap_err();
        assert_eq!(err, CoreError::QuotaExceeded { used: 2_000_000, requested: 0, limit: 1_000_000 });

        let ops = [PatchOperation::replace("/bookStorageLimit", PatchValue::Integer(1_999_999))];
        assert!(matches!(f.patcher.apply_user_patch(f.user.id, &ops).await, Err(CoreError::QuotaExceeded { .. })));
        assert_eq!(f.repo.get_user_by_id(f.user.id).await.unwrap(), f.user);
    }

    #[tokio::test]
    async fn override_keeps_downgrade_within_quota() {
        let f = fixture().await;
        let ops = [
            PatchOperation::replace("/bookStorageLimit", PatchValue::Integer(3_000_000)),
            PatchOperation::replace("/productId", text("basic")),
        ];
        let patched = f.patcher.apply_user_patch(f.user.id, &ops).await.unwrap();
        assert_eq!(patched.product_id.as_deref(), Some("basic"));
    }

    #[tokio::test]
    async fn unknown_product_fails_validation() {
        let f = fixture().await;
        let ops = [PatchOperation::replace("/productId", text("platinum"))];
        assert_eq!(
            f.patcher.apply_user_patch(f.user.id, &ops).await,
            Err(CoreError::Validation("unknown product 'platinum'".into()))
        );
    }

    #[tokio::test]
    async fn stale_snapshot_loses_the_race() {
        let f = fixture().await;
        let snapshot = f.repo.get_user_by_id(f.user.id).await.unwrap();
        let first = [PatchOperation::replace("/firstName", text("Augusta"))];
        let second = [PatchOperation::replace("/lastName", text("Byron"))];

        let winner = f.patcher.apply_user_patch_from(snapshot.clone(), &first).await;
        let loser = f.patcher.apply_user_patch_from(snapshot, &second).await;

        assert!(winner.is_ok());
        let err = loser.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(err.is_retryable());
        let stored = f.repo.get_user_by_id(f.user.id).await.unwrap();
        assert_eq!((stored.first_name.as_str(), stored.last_name.as_str()), ("Augusta", "Lovelace"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_patches_on_one_snapshot_commit_once() {
        let f = fixture().await;
        let snapshot = f.repo.get_user_by_id(f.user.id).await.unwrap();
        let spawn = |path: &'static str, value: &'static str| {
            let patcher = f.patcher.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                patcher.apply_user_patch_from(snapshot, &[PatchOperation::replace(path, text(value))]).await
            })
        };
        let first = spawn("/firstName", "Augusta");
        let second = spawn("/lastName", "Byron");
        let results = [first.await.unwrap(), second.await.unwrap()];

        let committed: Vec<&User> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(committed.len(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(CoreError::Conflict(_)))));
        assert_eq!(&f.repo.get_user_by_id(f.user.id).await.unwrap(), committed[0]);
    }

    #[tokio::test]
    async fn profile_patch_keeps_fields_it_does_not_edit() {
        let f = fixture().await;
        f.repo.update_user_with(f.user.id, |u| u.ai_requests_today = 9).await;
        let snapshot = f.repo.get_user_by_id(f.user.id).await.unwrap();
        // Daily reset lands after the read and leaves the stamp alone.
        f.repo.update_user_with(f.user.id, |u| u.ai_requests_today = 0).await;

        let ops = [PatchOperation::replace("/firstName", text("Augusta"))];
        let patched = f.patcher.apply_user_patch_from(snapshot, &ops).await.unwrap();

        let stored = f.repo.get_user_by_id(f.user.id).await.unwrap();
        assert_eq!(stored.first_name, "Augusta");
        assert_eq!(stored.ai_requests_today, 0);
        assert_eq!(stored.email, "ada@example.com");
        assert_eq!(patched, stored);
    }

    #[tokio::test]
    async fn tag_rename_and_attach() {
        let f = fixture().await;
        let book = f.repo.list_books_by_user(f.user.id).await.unwrap().remove(0);
        let tag = Tag::new(f.user.id, "todo");
        f.repo.insert_tag(tag.clone()).await;

        let ops = [
            PatchOperation::replace("/name", text("Reading")),
            PatchOperation::replace("/bookId", text(&book.id.to_string())),
        ];
        let patched = f.patcher.apply_tag_patch(f.user.id, tag.id, &ops).await.unwrap();
        assert_eq!(patched.name, "Reading");
        assert_eq!(patched.book_id, Some(book.id));

        let detached = f.patcher.apply_tag_patch(f.user.id, tag.id, &[PatchOperation::remove("/bookId")]).await.unwrap();
        assert_eq!(detached.book_id, None);
    }

    #[tokio::test]
    async fn tag_cannot_reference_another_users_book() {
        let f = fixture().await;
        let foreign = Book::new(Uuid::new_v4(), "Theirs", "epub", "1 KB");
        f.repo.insert_book(foreign.clone()).await;
        let tag = Tag::new(f.user.id, "todo");
        f.repo.insert_tag(tag.clone()).await;

        let ops = [PatchOperation::replace("/bookId", text(&foreign.id.to_string()))];
        assert!(matches!(f.patcher.apply_tag_patch(f.user.id, tag.id, &ops).await, Err(CoreError::NotFound(_))));
        assert_eq!(f.repo.get_tag_by_id(tag.id).await.unwrap(), tag);
    }

    #[tokio::test]
    async fn tag_names_are_unique_per_user() {
        let f = fixture().await;
        let existing = Tag::new(f.user.id, "Fantasy");
        let tag = Tag::new(f.user.id, "todo");
        f.repo.insert_tag(existing).await;
        f.repo.insert_tag(tag.clone()).await;
        f.repo.insert_tag(Tag::new(Uuid::new_v4(), "Horror")).await;

        assert!(matches!(f.patcher.update_tag(f.user.id, tag.id, "fantasy").await, Err(CoreError::Validation(_))));
        assert_eq!(f.patcher.update_tag(f.user.id, tag.id, "Horror").await.unwrap().name, "Horror");
    }

    #[tokio::test]
    async fn tag_name_rules() {
        let f = fixture().await;
        let tag = Tag::new(f.user.id, "todo");
        f.repo.insert_tag(tag.clone()).await;

        assert!(matches!(f.patcher.update_tag(f.user.id, tag.id, "   ").await, Err(CoreError::Validation(_))));
        let long = "x".repeat(TAG_NAME_MAX_LEN + 1);
        assert!(matches!(f.patcher.update_tag(f.user.id, tag.id, &long).await, Err(CoreError::Validation(_))));
        assert!(matches!(
            f.patcher.apply_tag_patch(f.user.id, tag.id, &[PatchOperation::remove("/createdAt")]).await,
            Err(CoreError::InvalidPatchOperation(_))
        ));
        assert!(matches!(f.patcher.update_tag(Uuid::new_v4(), tag.id, "mine").await, Err(CoreError::NotFound(_))));
        assert_eq!(f.repo.get_tag_by_id(tag.id).await.unwrap(), tag);
    }
}
