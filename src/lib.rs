// src/lib.rs

//! kbengine — offline replication and storage engine for engineering-debugging
//! knowledge bases.
//!
//! # Architecture
//!
//! - Database-first: all entity state lives in a single SQLite file with WAL
//!   journaling and foreign keys enforced.
//! - Content-addressed attachments: blob bytes are keyed by SHA-256 and
//!   deduplicated, never owned by the relational store.
//! - Packages: self-contained ZIP archives carrying a manifest, four JSONL
//!   change streams, and referenced attachment blobs, exchanged out-of-band
//!   or over the LAN endpoint.
//! - Last-writer-wins merge: imported changes are arbitrated against local
//!   state by `(updatedAtUtc, updatedByInstanceId)`; losers are recorded in
//!   a reviewable conflict ledger instead of being silently dropped.

pub mod blobstore;
pub mod config;
pub mod conflict;
pub mod db;
mod error;
pub mod engine;
pub mod identity;
pub mod lan;
pub mod merge;
pub mod package;
pub mod purge;
pub mod search;
pub mod watermark;

pub use error::{Error, Result};
