//! RNC Lookup API Library
//!
//! This library answers "who is taxpayer X" for Dominican RNC/Cédula
//! identifiers by scraping the DGII lookup webform, normalizing the result
//! into a fixed profile schema and caching it in Postgres. A bulk importer
//! pre-warms the same cache from the published taxpayer registry.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core lookup logic.
//! - `data`: Data access layer.
//! - `integrations`: External DGII integrations.
//! - `cache_store`: Time-bounded profile cache.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema.
//! - `errors`: Error handling types.
//! - `form_client`: DGII webform client.
//! - `handlers`: HTTP request handlers.
//! - `importer`: Bulk registry importer.
//! - `lookup`: Lookup-or-fetch orchestration.
//! - `metrics`: Daily usage counters.
//! - `models`: Core data models.
//! - `normalize`: Identifier and label normalization.
//! - `parser`: DGII result page parser.
//! - `registry_file`: Registry text decoding and row mapping.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

pub mod cache_store;
pub mod config;
pub mod db;
pub mod errors;
pub mod form_client;
pub mod handlers;
pub mod importer;
pub mod lookup;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod registry_file;
