//! Window-system facade.
//!
//! The tiling engine talks to the window manager exclusively through the
//! [`WindowSystem`] trait: enumeration in stacking order, per-window info
//! snapshots, pointer state, head enumeration, and EWMH requests. The x11rb
//! adapter lives in [`x11`]; tests substitute a scripted mock.

pub mod atoms;
pub mod randr;
pub mod x11;

#[cfg(test)]
pub mod mock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::shared::{Geometry, Point};

/// Opaque X window identifier.
pub type WindowId = u32;

/// Sentinel desktop index meaning "all desktops" (sticky windows).
pub const ALL_DESKTOPS: u32 = u32::MAX;

/// `_NET_WM_STATE` request action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Remove,
    Add,
    Toggle,
}

impl StateAction {
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Remove => 0,
            Self::Add => 1,
            Self::Toggle => 2,
        }
    }
}

/// One physical output as reported by RandR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub id: u32,
    pub name: String,
    pub primary: bool,
    pub geometry: Geometry,
}

/// Raw pointer sample: position plus button mask.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PointerSample {
    pub position: Point,
    pub left: bool,
    pub middle: bool,
    pub right: bool,
}

/// `_NET_WM_STRUT_PARTIAL` of a panel window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StrutPartial {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
    pub left_start_y: u32,
    pub left_end_y: u32,
    pub right_start_y: u32,
    pub right_end_y: u32,
    pub top_start_x: u32,
    pub top_end_x: u32,
    pub bottom_start_x: u32,
    pub bottom_end_x: u32,
}

/// Server-side frame extents, `_NET_FRAME_EXTENTS` minus `_GTK_FRAME_EXTENTS`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameExtents {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

/// ICCCM `WM_NORMAL_HINTS` flag: program minimum size specified.
pub const SIZE_HINT_P_MIN_SIZE: u32 = 1 << 4;
/// ICCCM `WM_NORMAL_HINTS` flag: program window gravity specified.
pub const SIZE_HINT_P_WIN_GRAVITY: u32 = 1 << 9;

/// Subset of ICCCM `WM_NORMAL_HINTS` consumed by the engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalHints {
    pub flags: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub win_gravity: u32,
}

/// `_MOTIF_WM_HINTS` flag: the decorations field is meaningful.
pub const MOTIF_HINT_DECORATIONS: u32 = 1 << 1;
/// `_MOTIF_WM_HINTS` decoration value: no decorations at all.
pub const MOTIF_DECORATION_NONE: u32 = 0;
/// `_MOTIF_WM_HINTS` decoration value: all decorations.
pub const MOTIF_DECORATION_ALL: u32 = 1;

/// Legacy `_MOTIF_WM_HINTS` governing server-side decorations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifHints {
    pub flags: u32,
    pub decorations: u32,
}

impl MotifHints {
    /// Whether these hints ask for server-side decorations. Absent hints
    /// default to decorated.
    pub const fn decorated(&self) -> bool {
        self.flags & MOTIF_HINT_DECORATIONS == 0 || self.decorations != MOTIF_DECORATION_NONE
    }
}

/// Normal and motif hints of one window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    pub normal: NormalHints,
    pub motif: MotifHints,
}

/// Geometry and adjustment data of one window.
///
/// `adj_pos`/`adj_size` request extent compensation on move/resize;
/// `adj_restore` drops the compensation once the window is restored.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub geometry: Geometry,
    pub hints: Hints,
    pub extents: FrameExtents,
    pub adj_pos: bool,
    pub adj_size: bool,
    pub adj_restore: bool,
}

/// Best-effort per-window snapshot as read from the server.
///
/// Individual property failures are absorbed by the adapter; a vanished
/// window surfaces as an empty `class`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub class: String,
    pub name: String,
    pub types: Vec<String>,
    pub states: Vec<String>,
    /// Raw `_NET_WM_DESKTOP`; `None` when unset, [`ALL_DESKTOPS`] when sticky.
    pub desktop: Option<u32>,
    pub dimensions: Dimensions,
}

/// The abstract window system the engine cooperates with.
pub trait WindowSystem: Send + Sync {
    /// Name of the running EWMH window manager.
    fn wm_name(&self) -> String;

    fn root_geometry(&self) -> Result<Geometry>;

    /// All client windows in bottom-to-top stacking order.
    fn stacked_windows(&self) -> Result<Vec<WindowId>>;

    fn active_window(&self) -> Result<WindowId>;
    fn set_active_window(&self, window: WindowId) -> Result<()>;

    fn desktop_count(&self) -> Result<u32>;
    fn current_desktop(&self) -> Result<u32>;
    fn set_current_desktop(&self, desktop: u32) -> Result<()>;

    fn heads(&self) -> Result<Vec<Head>>;

    fn pointer(&self) -> Result<PointerSample>;

    fn snapshot(&self, window: WindowId) -> Result<WindowSnapshot>;

    /// Geometry of the window including server-side decorations.
    fn decor_geometry(&self, window: WindowId) -> Result<Geometry>;

    fn move_resize_window(
        &self,
        window: WindowId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()>;
    fn move_window(&self, window: WindowId, x: i32, y: i32) -> Result<()>;

    fn set_state(&self, window: WindowId, action: StateAction, state: &str) -> Result<()>;
    fn set_desktop(&self, window: WindowId, desktop: u32) -> Result<()>;
    fn set_normal_hints(&self, window: WindowId, hints: &NormalHints) -> Result<()>;
    fn set_motif_hints(&self, window: WindowId, hints: &MotifHints) -> Result<()>;

    fn strut_partial(&self, window: WindowId) -> Result<Option<StrutPartial>>;

    /// Subscribe to structure, property and focus events of a window.
    fn listen_to_window(&self, window: WindowId) -> Result<()>;
}

/// Receiver for events dispatched by the facade's event pump.
pub trait EventObserver: Send + Sync {
    /// A property changed on the root window.
    fn root_property(&self, atom: &str);
    /// A property changed on a client window.
    fn window_property(&self, window: WindowId, atom: &str);
    /// A client window was moved, resized or restacked.
    fn window_configure(&self, window: WindowId);
}
