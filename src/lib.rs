//! popularity-sync - Resumable popularity score synchronization
//!
//! This crate pulls social engagement counters for published content records
//! from metrics providers, turns them into weighted popularity scores and
//! keeps each record's aggregate score current, one page at a time.

pub mod config;
pub mod database;
pub mod error;
pub mod locales;
pub mod models;
pub mod otel;
pub mod providers;
pub mod scoring;
pub mod sync;
