//! crates/library_core/src/quota.rs
//!
//! Decides whether an operation fits within a user's subscription limits.
//!
//! The check is best-effort: two uploads racing each other can both pass
//! before either is written, because used storage is recomputed per call and
//! nothing is locked. Callers needing a hard guarantee must serialize writes
//! per user.

use crate::domain::User;
use crate::error::{CoreError, CoreResult};
use crate::ports::LibraryRepository;
use crate::storage::StorageAccountant;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Limits applied when a user has neither an override nor a subscribed product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDefaults {
    pub book_storage_limit: u64,
    pub ai_request_limit: u32,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self { book_storage_limit: 100_000_000, ai_request_limit: 10 }
    }
}

/// Per-tier counters other than storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Resets daily; the rollover itself is scheduled elsewhere.
    AiExplanationRequests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageQuota {
    pub used: u64,
    pub limit: u64,
}

impl StorageQuota {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// The limit is inclusive: filling storage exactly to the limit is allowed.
    pub fn allows(&self, additional: u64) -> bool {
        self.used.checked_add(additional).is_some_and(|total| total <= self.limit)
    }
}

/// A read-only decision function over limits and usage.
#[derive(Clone)]
pub struct QuotaEnforcer {
    repo: Arc<dyn LibraryRepository>,
    accountant: StorageAccountant,
    defaults: QuotaDefaults,
}

impl QuotaEnforcer {
    pub fn new(repo: Arc<dyn LibraryRepository>, defaults: QuotaDefaults) -> Self {
        let accountant = StorageAccountant::new(repo.clone());
        Self { repo, accountant, defaults }
    }

    pub fn accountant(&self) -> &StorageAccountant {
        &self.accountant
    }

    /// Effective storage limit: the user's override, else the product's, else the default.
    pub async fn storage_limit(&self, user: &User) -> CoreResult<u64> {
        if let Some(limit) = user.book_storage_limit {
            return Ok(limit);
        }
        match &user.product_id {
            Some(product_id) => Ok(self.repo.get_product_by_id(product_id).await?.book_storage_limit),
            None => Ok(self.defaults.book_storage_limit),
        }
    }

    /// Effective limit for a counter-style quota.
    pub async fn counter_limit(&self, user: &User, kind: CounterKind) -> CoreResult<u32> {
        match (kind, &user.product_id) {
            (CounterKind::AiExplanationRequests, Some(product_id)) => {
                Ok(self.repo.get_product_by_id(product_id).await?.ai_request_limit)
            }
            (CounterKind::AiExplanationRequests, None) => Ok(self.defaults.ai_request_limit),
        }
    }

    #[instrument(skip(self))]
    pub async fn storage_quota(&self, user_id: Uuid) -> CoreResult<StorageQuota> {
        let user = self.repo.get_user_by_id(user_id).await?;
        let limit = self.storage_limit(&user).await?;
        let used = self.accountant.used_storage(user_id).await?;
        Ok(StorageQuota { used, limit })
    }

    /// `true` iff `used + additional_bytes <= limit`.
    pub async fn can_accept_additional_bytes(&self, user_id: Uuid, additional_bytes: u64) -> CoreResult<bool> {
        let quota = self.storage_quota(user_id).await?;
        let allowed = quota.allows(additional_bytes);
        debug!(%user_id, used = quota.used, limit = quota.limit, additional_bytes, allowed, "Storage quota check");
        Ok(allowed)
    }

    /// Like [`can_accept_additional_bytes`](Self::can_accept_additional_bytes), but
    /// fails with [`CoreError::QuotaExceeded`] for write paths.
    pub async fn ensure_can_accept(&self, user_id: Uuid, additional_bytes: u64) -> CoreResult<()> {
        let quota = self.storage_quota(user_id).await?;
        if !quota.allows(additional_bytes) {
            return Err(CoreError::QuotaExceeded { used: quota.used, requested: additional_bytes, limit: quota.limit });
        }
        Ok(())
    }

    /// Whether one more use of the counter is allowed today. Never resets the counter.
    #[instrument(skip(self))]
    pub async fn check_feature_count(&self, user_id: Uuid, kind: CounterKind) -> CoreResult<bool> {
        let user = self.repo.get_user_by_id(user_id).await?;
        let limit = self.counter_limit(&user, kind).await?;
        Ok(Self::counter_value(&user, kind) < limit)
    }

    pub async fn ensure_feature_count(&self, user_id: Uuid, kind: CounterKind) -> CoreResult<()> {
        let user = self.repo.get_user_by_id(user_id).await?;
        let limit = self.counter_limit(&user, kind).await?;
        let used = Self::counter_value(&user, kind);
        if used >= limit {
            return Err(CoreError::QuotaExceeded { used: used.into(), requested: 1, limit: limit.into() });
        }
        Ok(())
    }

    fn counter_value(user: &User, kind: CounterKind) -> u32 {
        match kind {
            CounterKind::AiExplanationRequests => user.ai_requests_today,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Book, Product, User};
    use crate::mock::InMemoryRepository;

    fn product(id: &str, storage: u64, ai: u32) -> Product {
        Product {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            price: 0,
            book_storage_limit: storage,
            ai_request_limit: ai,
            features: vec![],
        }
    }

    async fn setup(limit: Option<u64>, product_id: Option<&str>) -> (Arc<InMemoryRepository>, Uuid) {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_product(product("pro", 5_000_000, 50)).await;
        let mut user = User::new("ada@example.com", "Ada", "Lovelace");
        user.book_storage_limit = limit;
        user.product_id = product_id.map(str::to_string);
        let user_id = user.id;
        repo.insert_user(user).await;
        let mut book = Book::new(user_id, "Title", "epub", "1 MB");
        book.cover_size = 500;
        repo.insert_book(book).await;
        (repo, user_id)
    }

    #[tokio::test]
    async fn limit_is_inclusive() {
        let (repo, user_id) = setup(Some(1_001_000), None).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults::default());
        assert!(quota.can_accept_additional_bytes(user_id, 500).await.unwrap());
        assert!(!quota.can_accept_additional_bytes(user_id, 501).await.unwrap());
    }

    #[tokio::test]
    async fn override_beats_product() {
        let (repo, user_id) = setup(Some(2_000_000), Some("pro")).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults::default());
        assert_eq!(quota.storage_quota(user_id).await.unwrap(), StorageQuota { used: 1_000_500, limit: 2_000_000 });
    }

    #[tokio::test]
    async fn product_beats_default() {
        let (repo, user_id) = setup(None, Some("pro")).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults { book_storage_limit: 1, ai_request_limit: 1 });
        assert_eq!(quota.storage_quota(user_id).await.unwrap().limit, 5_000_000);
    }

    #[tokio::test]
    async fn default_applies_without_product() {
        let (repo, user_id) = setup(None, None).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults { book_storage_limit: 1_000_000, ai_request_limit: 1 });
        let status = quota.storage_quota(user_id).await.unwrap();
        assert_eq!(status.remaining(), 0);
        assert_eq!(
            quota.ensure_can_accept(user_id, 1).await,
            Err(CoreError::QuotaExceeded { used: 1_000_500, requested: 1, limit: 1_000_000 })
        );
    }

    #[tokio::test]
    async fn dangling_product_is_not_found() {
        let (repo, user_id) = setup(None, Some("gone")).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults::default());
        assert!(matches!(quota.storage_quota(user_id).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn overflowing_request_is_rejected() {
        let (repo, user_id) = setup(Some(u64::MAX), None).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults::default());
        assert!(!quota.can_accept_additional_bytes(user_id, u64::MAX).await.unwrap());
    }

    #[tokio::test]
    async fn ai_requests_are_limited_by_product() {
        let (repo, user_id) = setup(None, Some("pro")).await;
        let quota = QuotaEnforcer::new(repo.clone(), QuotaDefaults::default());
        assert!(quota.check_feature_count(user_id, CounterKind::AiExplanationRequests).await.unwrap());

        repo.update_user_with(user_id, |u| u.ai_requests_today = 50).await;
        assert!(!quota.check_feature_count(user_id, CounterKind::AiExplanationRequests).await.unwrap());
        assert!(matches!(
            quota.ensure_feature_count(user_id, CounterKind::AiExplanationRequests).await,
            Err(CoreError::QuotaExceeded { used: 50, limit: 50, .. })
        ));
    }

    #[tokio::test]
    async fn ai_requests_fall_back_to_default_limit() {
        let (repo, user_id) = setup(None, None).await;
        repo.update_user_with(user_id, |u| u.ai_requests_today = 2).await;
        let quota = QuotaEnforcer::new(repo, QuotaDefaults { book_storage_limit: 0, ai_request_limit: 3 });
        assert!(quota.check_feature_count(user_id, CounterKind::AiExplanationRequests).await.unwrap());
        assert!(quota.ensure_feature_count(user_id, CounterKind::AiExplanationRequests).await.is_ok());
    }
}
