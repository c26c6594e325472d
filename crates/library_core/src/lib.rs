//! Accounting and relational-integrity core of the e-book library.
//!
//! Everything here talks to storage through [`ports::LibraryRepository`];
//! the service crate provides the Postgres implementation and the `mock`
//! feature provides an in-memory one.

pub mod aggregate;
pub mod domain;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod patch;
pub mod ports;
pub mod quota;
pub mod size;
pub mod storage;

pub use aggregate::AggregateLoader;
pub use domain::{Book, BookAggregate, Bookmark, Highlight, Product, RectF, Tag, User};
pub use error::{CoreError, CoreResult};
pub use patch::{PatchCoordinator, PatchOp, PatchOperation, PatchValue};
pub use ports::{Change, ChangeSet, LibraryRepository, PortError, PortResult};
pub use quota::{CounterKind, QuotaDefaults, QuotaEnforcer, StorageQuota};
pub use size::{SizeError, SizeUnit};
pub use storage::{StorageAccountant, StorageUsage};
