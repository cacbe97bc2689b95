//! # manual-rag
//!
//! Answers questions about medical devices from their manuals.
//!
//! Each device's manual is extracted to text, split into overlapping chunks,
//! embedded, and stored as a per-device vector index. A question is embedded
//! with the same provider, matched against the index by cosine similarity, and
//! the best excerpts are handed to a chat model that answers from them only.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │ Manuals  │──▶│ Extract │──▶│   Chunk   │──▶│ Embed (local │
//! │ pdf/docx │   │         │   │ 1200/200  │   │  or remote)  │
//! └──────────┘   └─────────┘   └───────────┘   └──────┬───────┘
//!                                                     ▼
//!                ┌──────────┐   ┌──────────┐   ┌──────────────┐
//!                │ Generate │◀──│ Retrieve │◀──│ Index store  │
//!                │  answer  │   │  top-k   │   │ <device>.json│
//!                └──────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Chunks, index stamps, answers |
//! | [`mapping`] | Device id → manual path |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`chunk`] | Overlapping character windows |
//! | [`embedding`] | Embedding provider abstraction, retry/backoff |
//! | [`store`] | Per-device index files |
//! | [`retrieve`] | Cosine ranking |
//! | [`ingest`] | Building indices |
//! | [`jobs`] | Background ingest job |
//! | [`progress`] | Ingest progress events |
//! | [`generation`] | Chat-completion collaborator |
//! | [`pipeline`] | Question answering |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod retrieve;
pub mod server;
pub mod store;
