//! # Commit Mirror
//!
//! Incrementally mirror a hosted repository's commit history into a
//! document store.
//!
//! Commits are listed page by page for a date window, filtered against what
//! is already stored, enriched with per-commit file and stats detail on a
//! bounded worker pool, and inserted one by one. Where to continue is always
//! derived from the store's own date boundaries, so every run can be killed
//! and restarted safely.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Rate Governor│◀──│   Fetcher    │◀──│ GitHubSource│
//! │ quota+tokens │   │ retry/backoff│   │ list/detail │
//! └──────────────┘   └──────────────┘   └──────┬──────┘
//!                                              │
//!        ┌──────────┐   ┌──────────┐   ┌───────┴─────┐
//!        │  Store   │◀──│  Fanout  │◀──│ Page Walker │◀── Ingestion modes
//!        │SQLite/PG │   │ pool (10)│   │ one page at │    (initial, catch-up,
//!        └──────────┘   └──────────┘   │   a time    │     extend)
//!                                      └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`transport`] | Single authenticated HTTP GET |
//! | [`rate_governor`] | Quota checks and credential rotation |
//! | [`fetcher`] | Retry and status classification |
//! | [`github`] | GitHub REST commit source |
//! | [`walker`] | Sequential page sweep over a window |
//! | [`fanout`] | Per-page filter, enrichment and insert |
//! | [`ingest`] | Ingestion modes and run wrapper |
//! | [`interrupt`] | Ctrl-C flag |
//! | [`elapsed`] | Accumulated run time file |
//! | [`menu`] | Interactive operator menu |
//! | [`progress`] | Progress reporting |
//! | [`stats`] | Store summary |
//! | [`db`] | Store connections |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | Local store |
//! | [`postgres_store`] | Remote store |

pub mod config;
pub mod db;
pub mod elapsed;
pub mod fanout;
pub mod fetcher;
pub mod github;
pub mod ingest;
pub mod interrupt;
pub mod menu;
pub mod migrate;
pub mod postgres_store;
pub mod progress;
pub mod rate_governor;
pub mod sqlite_store;
pub mod stats;
pub mod transport;
pub mod walker;
