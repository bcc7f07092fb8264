//! # Business Assistant Core
//!
//! Pure logic shared by the Business Assistant orchestration engine: the
//! data model, paragraph chunking, embedding math, the vector index
//! abstraction, and the bounded conversation window.
//!
//! This crate has no tokio, HTTP, or database dependencies. Everything that
//! talks to the outside world (embedding APIs, chat models, tools) lives in
//! the `business-assistant` app crate.

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod index;
pub mod models;
