//! Free-punch store and the hashed punch index.

/// Hash types and helper index aliases.
pub mod indices;
/// Two-level (hash type, card number) punch index.
pub mod punch_index;
/// Authoritative free-punch store and undo/redo engine.
pub mod store;
