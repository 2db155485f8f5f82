//! The reactive tiling engine: layouts, workspaces and the tracker.

pub mod layout;
pub mod tracker;
pub mod workspace;

pub use layout::{Layout, LayoutKind};
pub use tracker::Tracker;
pub use workspace::Workspace;
