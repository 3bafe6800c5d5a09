//! vigil-state — task status store for Vigil.
//!
//! Backed by [redb](https://docs.rs/redb). Every status a task emits is
//! appended to its record, so the full history (and the `healthy` flag the
//! health checker attached to it) can be replayed for reconciliation and
//! rendered by the state endpoint.
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns, keyed by
//! task id. The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
