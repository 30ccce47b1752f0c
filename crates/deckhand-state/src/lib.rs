//! deckhand-state: durable records for Deckhand.
//!
//! Holds reference data (environments, namespaces, artifacts, live
//! entities), deployment records and cron jobs behind the async
//! [`Repository`] trait.
//!
//! # Backends
//!
//! [`StateStore`] embeds [redb](https://docs.rs/redb). All domain types are
//! JSON-serialized into `&[u8]` value columns; composite keys
//! (`{namespace}/{kind}/{id}`, `{cron_job}:{deployment}`) enable prefix
//! scans for related records. It is `Clone + Send + Sync` (backed by
//! `Arc<Database>`) and suits a single replica.
//!
//! [`PgRepository`] uses PostgreSQL through sqlx and is what several
//! replicas share.

pub mod error;
pub mod postgres;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use postgres::PgRepository;
pub use repository::Repository;
pub use store::{DuePredicate, StateStore};
pub use types::*;
