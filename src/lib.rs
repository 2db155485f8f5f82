//! retile: auto-tiling companion for EWMH-compliant X11 window managers.
//!
//! The engine observes windows created by the host window manager,
//! partitions them per desktop and screen into a master/slave model,
//! recomputes geometries on every relevant event and pushes geometry
//! requests back through EWMH. It never draws, grabs input or replaces the
//! window manager.

pub mod config;
pub mod desktop;
pub mod input;
pub mod shared;
pub mod store;
pub mod winsys;
