//! Named references: branches, tags and releases.

mod manager;

pub use manager::RefManager;
