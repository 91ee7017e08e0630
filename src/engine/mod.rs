//! Result engine: card evaluation, splits, team aggregation and caching.

/// Revision-stamped result cache.
pub mod cache;
/// Card evaluation against a course.
pub mod evaluate;
/// Rogaining point scoring.
pub mod rogaining;
/// Split tables and leg-key normalization.
pub mod splits;
/// Status precedence rules.
pub mod status;
/// Relay aggregation.
pub mod team;
/// Result traits and pluggable result modules.
pub mod traits;
