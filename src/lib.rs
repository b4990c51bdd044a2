//! # Scene Sync
//!
//! Authoring and incremental vector-index synchronization for narrative
//! scene records.
//!
//! Authors record structured scenes (chapter, scene index, location, mood,
//! characters, free-text plot). Every write marks the scene dirty; a
//! synchronization pass turns each dirty scene into a text digest, embeds it,
//! upserts the vector under a positional key (`plot-ch{chapter}-{scene}`), and
//! clears the dirty flag only after the index has acknowledged the write.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Authoring  │──▶│    SQLite    │──▶│Synchronizer│
//! │ (scenesync) │   │ scenes table │   │digest+embed│
//! └─────────────┘   └──────▲───────┘   └─────┬──────┘
//!                          │ mark_clean      │ upsert
//!                          └─────────────────┤
//!                                            ▼
//!                                   ┌────────────────┐
//!                                   │  Vector index  │
//!                                   │ SQLite/Pinecone│
//!                                   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scenesync init
//! scenesync scene add --chapter 1 --title 出会い --plot "猫が鳴いた" --location 庭 --mood 切ない
//! scenesync sync
//! scenesync search "雨の夜の別れ"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Scene, character and chapter types |
//! | [`mood`] | Mood tag list and its storage encoding |
//! | [`digest`] | External ids, digest text, index metadata |
//! | [`scenes`] | Scene and character authoring |
//! | [`sync`] | The synchronization pass |
//! | [`store`] | Record store traits, SQLite and in-memory stores |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index abstraction and backends |
//! | [`search`] | Semantic search over synchronized scenes |
//! | [`progress`] | Sync progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod digest;
pub mod embedding;
pub mod error;
pub mod http;
pub mod index;
pub mod migrate;
pub mod models;
pub mod mood;
pub mod progress;
pub mod scene_cmd;
pub mod scenes;
pub mod search;
pub mod stats;
pub mod store;
pub mod sync;
pub mod sync_cmd;
