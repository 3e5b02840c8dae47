//! Core pipeline for bulk tag normalization.
//!
//! This crate ties the store scanner and LLM client into the three-stage
//! extract → normalize → apply pipeline, plus the sibling price-fix flow:
//! - [`inventory`] — tag inventory built from a full collection scan
//! - [`chunker`] — bounded-size chunk planning over the inventory
//! - [`normalize`] — chunked LLM normalization with validation and fallbacks
//! - [`apply`] — derived `ui_tags` computation and partial patching
//! - [`retry`] — bounded retries with a backoff schedule for remote calls
//! - [`progress`] — durable per-collection completion ledger
//! - [`prices`] — dollars→cents payload conversion with a double-run guard
//! - [`pipeline`] — orchestration, collection resolution, resumability

pub mod apply;
pub mod chunker;
pub mod files;
pub mod inventory;
pub mod normalize;
pub mod pipeline;
pub mod prices;
pub mod progress;
pub mod report;
pub mod retry;
