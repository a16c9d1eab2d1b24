//! # commit-mirror core
//!
//! Runtime-free logic shared by the `cmirror` binary and its tests: the
//! commit record model, the [`store::CommitStore`] capability trait, the
//! [`source::CommitSource`] upstream trait, and in-memory implementations
//! of both.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies.

pub mod models;
pub mod source;
pub mod store;
