//! Job-file record store for freight-forwarding back offices.
//!
//! One uniform store over three interchangeable persistence backends: a
//! managed real-time document database, a version-controlled content-hosting
//! API, and plain JSON files on disk. The store enforces the business
//! invariants — unique job-file, invoice, and airway-bill numbers; the
//! pending → checked → approved/rejected sign-off workflow; soft-delete with
//! recovery — while the adapters stay dumb blob stores.
//!
//! Entry points: resolve a [`config::StoreConfig`] from the environment,
//! build an adapter with [`config::connect_from_config`], and wrap it in a
//! [`store::JobFileStore`].

pub mod activity;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod record;
pub mod store;

pub use backend::{BackendAdapter, Collection};
pub use error::{ConfigError, StoreError};
pub use record::{BackupSnapshot, BusinessKey, JobFileRecord, LifecycleStatus, RecordSummary};
pub use store::{ImportReport, JobFileStore};
