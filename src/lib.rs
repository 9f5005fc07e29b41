//! Ground Game - canvassing visit ingestion and leaderboards
//!
//! A Rust library that records door-to-door canvassing visits and keeps
//! volunteer leaderboards up to date.
//!
//! # Features
//!
//! - Address resolution against a geocoder with an exact-match fallback chain
//! - Non-destructive merging of resident details with an audit trail
//! - Derived household support levels
//! - Configurable scoring and asynchronous leaderboard recomputation
//! - SQLite storage with optimistic concurrency on addresses

/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Geocoder port and offline implementation
pub mod geocoder;
/// Leaderboard aggregation and queries
pub mod leaderboard;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Task queue for leaderboard aggregation
pub mod queue;
/// Household canvass status derivation
pub mod rank;
/// Person merging
pub mod reconcile;
/// Repository pattern for data access
pub mod repository;
/// Address resolution
pub mod resolver;
/// Database schema definitions
pub mod schema;
/// Visit scoring
pub mod score;
/// Visit ingestion
pub mod service;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use config::AppConfig;
pub use db::{Database, SqliteRepository};
pub use error::{GroundGameError, Result};
pub use leaderboard::{LeaderboardAggregator, RankingQuery};
pub use models::{IngestedVisit, VisitRequest};
pub use queue::{ChannelTaskQueue, InlineTaskQueue, TaskQueue};
pub use repository::InMemoryRepository;
pub use service::VisitService;
