//! Shared window-system model: workplace, pointer, clients and persistence.

pub mod cache;
pub mod client;
pub mod manager;
pub mod workplace;

pub use client::Client;
pub use manager::Manager;
pub use workplace::{Displays, Env, Pointer, Workplace};

use serde::{Deserialize, Serialize};

/// A (desktop, screen) pair; the identity of a workspace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub desktop: u32,
    pub screen: u32,
}

impl Location {
    pub const fn new(desktop: u32, screen: u32) -> Self {
        Self { desktop, screen }
    }
}
