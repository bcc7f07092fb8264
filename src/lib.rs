//! # Business Assistant
//!
//! A query orchestration engine for business questions. Each query is
//! answered by combining passages retrieved from a local knowledge base with
//! results from external tools (weather, CRM, notes, calculator), then
//! handing both to a language model instructed to stay within that evidence.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────┐
//!          ┌────▶│ Retriever  │──────────────────────┐
//! ┌─────┐  │     └────────────┘                      ▼
//! │query│──┤                                   ┌────────────┐   ┌──────────────┐
//! └─────┘  │     ┌────────────┐   ┌─────────┐  │ Synthesizer│──▶│ Conversation │
//!          └────▶│  Selector  │──▶│Executor │─▶│   (LLM)    │   │    State     │
//!                └────────────┘   └─────────┘  └────────────┘   └──────────────┘
//! ```
//!
//! Retrieval and tool selection run concurrently. Tool calls run
//! concurrently with per-call timeouts and retry. A failed tool or an
//! unavailable index degrades the answer; only a synthesis failure fails it.
//!
//! ## Quick Start
//!
//! ```bash
//! bia ask "What is 15% of 200?"
//! bia chat
//! bia serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`error`] | Error taxonomy |
//! | [`logging`] | Tracing subscriber setup |
//! | [`retry`] | Exponential backoff for retryable failures |
//! | [`embedding`] | Embedding providers |
//! | [`ingest`] | Knowledge base loading |
//! | [`retrieval`] | Top-k passage retrieval |
//! | [`llm`] | Chat model abstraction |
//! | [`tools`] | Tool trait, registry and built-in tools |
//! | [`selector`] | Tool selection strategies |
//! | [`executor`] | Concurrent tool execution |
//! | [`synthesizer`] | Prompt assembly and grounded generation |
//! | [`assistant`] | The `answer()` pipeline |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | SQLite connection for the notes store |
//! | [`migrate`] | Notes schema |

pub mod assistant;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod retrieval;
pub mod retry;
pub mod selector;
pub mod server;
pub mod synthesizer;
pub mod tools;
