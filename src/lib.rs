//! abkit - streaming toolkit for Android Backup (`.ab`) archives.
//!
//! An Android Backup file is a short textual header followed by an
//! optionally compressed, optionally encrypted PAX-formatted TAR stream.
//! This crate converts between AB and TAR, rewraps archives with
//! different encryption/compression, splits a full-system backup into
//! per-app archives, merges them back, and lists contents - all in a
//! single forward pass over composable byte-stream filters.

pub mod ab;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod file;
pub mod kdf;
pub mod ops;
pub mod pipeline;
pub mod tar;
pub mod ui;
pub mod zlib;
