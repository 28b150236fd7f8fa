//! Batchbox: Schema-Driven Generation Node Engine
//!
//! Client-side engine for dynamic generation nodes in a visual graph editor.
//! Keeps each node's on-canvas parameter widgets synchronized with the
//! backend-declared schema of its selected model, restores dynamic state
//! across graph save/reload without flicker, and dispatches generation
//! requests host-queued, independently, or dependency-scoped, reusing prior
//! results through an opaque backend-computed params hash.

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gate;
pub mod host;
pub mod logging;
pub mod node;
pub mod restore;
pub mod schema;
pub mod sync;
pub mod types;
