//! Workplace and pointer state.
//!
//! The [`Env`] owns the window-system facade together with the process-wide
//! singletons: desktop/screen topology, the stacked window list and the
//! pointer model. A display-topology cache sits between EWMH viewport events
//! and the comparatively expensive RandR probe; the RandR watcher invalidates
//! it on hotplug.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::shared::{Geometry, Point};
use crate::winsys::{Head, StrutPartial, WindowId, WindowSystem};

/// Topology cache entries older than this are refreshed even when valid.
const TOPOLOGY_CACHE_TIMEOUT: Duration = Duration::from_secs(300);

/// Side length of the hot-corner trigger areas.
const CORNER_SIZE: u32 = 10;

/// Desktop and screen topology as last observed.
#[derive(Debug, Default, Clone)]
pub struct Workplace {
    pub desktop_count: u32,
    pub screen_count: u32,
    pub current_desktop: u32,
    pub current_screen: u32,
    pub displays: Displays,
}

/// Physical display summary: full screens, panel-subtracted desktops and
/// pointer corner regions.
#[derive(Debug, Default, Clone)]
pub struct Displays {
    /// Unique topology name derived from the ordered head tuples.
    pub name: String,
    pub screens: Vec<Head>,
    pub desktops: Vec<Head>,
    pub corners: Vec<Corner>,
}

/// One hot-corner trigger region on a screen.
#[derive(Debug, Clone)]
pub struct Corner {
    pub name: String,
    pub screen: u32,
    pub area: Geometry,
}

fn create_corners(screens: &[Head]) -> Vec<Corner> {
    let mut corners = Vec::with_capacity(screens.len() * 4);
    for (i, head) in screens.iter().enumerate() {
        let g = head.geometry;
        let s = CORNER_SIZE;
        let spots = [
            ("top_left", g.x, g.y),
            ("top_right", g.right() - s as i32, g.y),
            ("bottom_left", g.x, g.bottom() - s as i32),
            ("bottom_right", g.right() - s as i32, g.bottom() - s as i32),
        ];
        for (name, x, y) in spots {
            corners.push(Corner {
                name: name.into(),
                screen: i as u32,
                area: Geometry::new(x, y, s, s),
            });
        }
    }
    corners
}

/// Pointer button states.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Buttons {
    pub left: bool,
    pub middle: bool,
    pub right: bool,
}

/// Pointer model: position, buttons and per-button last drag times.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pointer {
    pub position: Point,
    pub buttons: Buttons,
    drag_left: Option<Instant>,
    drag_middle: Option<Instant>,
    drag_right: Option<Instant>,
}

impl Pointer {
    /// Whether any button's last press was within `dt`.
    pub fn dragging(&self, dt: Duration) -> bool {
        let within = |t: Option<Instant>| t.is_some_and(|t| t.elapsed() < dt);
        within(self.drag_left) || within(self.drag_middle) || within(self.drag_right)
    }

    pub const fn pressed(&self) -> bool {
        self.buttons.left || self.buttons.middle || self.buttons.right
    }

    /// Simulate a full press, used after programmatic screen moves so the
    /// gesture pipeline picks the migration up on the next poll.
    pub fn press(&mut self) {
        self.buttons = Buttons { left: true, middle: true, right: true };
        let now = Instant::now();
        self.drag_left = Some(now);
        self.drag_middle = Some(now);
        self.drag_right = Some(now);
    }
}

/// Stacked window list plus the active window.
#[derive(Debug, Default, Clone)]
pub struct Windows {
    pub active: WindowId,
    pub stacked: Vec<WindowId>,
}

/// The facade plus all process-lifetime window-system state.
pub struct Env {
    pub sys: Arc<dyn WindowSystem>,
    pub config: Config,
    pub workplace: RwLock<Workplace>,
    pub windows: RwLock<Windows>,
    pub pointer: Mutex<Pointer>,
    topology_cache: Mutex<Option<(Displays, Instant)>>,
    topology_valid: AtomicBool,
}

impl Env {
    /// Probe the initial topology. Fails when the root geometry cannot be
    /// read; everything later degrades gracefully instead.
    pub fn new(sys: Arc<dyn WindowSystem>, config: Config) -> Result<Arc<Self>> {
        let env = Arc::new(Self {
            sys,
            config,
            workplace: RwLock::new(Workplace::default()),
            windows: RwLock::new(Windows::default()),
            pointer: Mutex::new(Pointer::default()),
            topology_cache: Mutex::new(None),
            topology_valid: AtomicBool::new(false),
        });

        env.refresh_windows();
        env.refresh_active();

        let displays = env
            .probe_displays()
            .context("Initial topology probe failed")?;

        {
            let mut wp = env.workplace.write();
            wp.screen_count = displays.screens.len() as u32;
            wp.displays = displays;
            wp.desktop_count = env.sys.desktop_count().unwrap_or(0);
            wp.current_desktop = env.sys.current_desktop().unwrap_or(0);
        }

        env.pointer_update();
        info!(
            "Workplace initialized [{} desktops x {} screens]",
            env.workplace.read().desktop_count,
            env.workplace.read().screen_count
        );

        Ok(env)
    }

    /// Wait until the window manager reports a non-empty topology. After the
    /// attempts run out the engine proceeds with zero workspaces and refuses
    /// to tile.
    pub fn wait_for_topology(&self, attempts: u32, delay: Duration) {
        let attempts = if attempts == 0 { 10 } else { attempts };
        let delay = if delay.is_zero() { Duration::from_millis(500) } else { delay };

        for attempt in 0..attempts {
            {
                let wp = self.workplace.read();
                if wp.desktop_count > 0 && wp.screen_count > 0 {
                    return;
                }
            }
            warn!(
                "Waiting for valid WM topology ({}/{})",
                attempt + 1,
                attempts
            );
            thread::sleep(delay);

            if let Ok(count) = self.sys.desktop_count() {
                self.workplace.write().desktop_count = count;
            }
            self.refresh_displays();
            if let Ok(current) = self.sys.current_desktop() {
                self.workplace.write().current_desktop = current;
            }
        }

        let wp = self.workplace.read();
        warn!(
            "Proceeding without confirmed WM topology [{} desktops x {} screens]",
            wp.desktop_count, wp.screen_count
        );
    }

    /// Feature gate keyed on the reported window manager. Some hosts ignore
    /// or fight min-size hints.
    pub fn supports_min_size_hints(&self) -> bool {
        let wm = self.sys.wm_name().to_lowercase();
        !wm.contains("mutter") && !wm.contains("muffin")
    }

    // ---- windows -------------------------------------------------------

    pub fn refresh_windows(&self) {
        match self.sys.stacked_windows() {
            Ok(stacked) => self.windows.write().stacked = stacked,
            Err(e) => warn!("Error retrieving client list: {e:#}"),
        }
    }

    pub fn refresh_active(&self) {
        match self.sys.active_window() {
            Ok(active) => self.windows.write().active = active,
            Err(e) => warn!("Error retrieving active window: {e:#}"),
        }
    }

    pub fn stacked_windows(&self) -> Vec<WindowId> {
        self.windows.read().stacked.clone()
    }

    pub fn active_window(&self) -> WindowId {
        self.windows.read().active
    }

    // ---- topology ------------------------------------------------------

    /// Invalidate the topology cache; called from the RandR watcher.
    pub fn invalidate_topology(&self) {
        self.topology_valid.store(false, Ordering::Relaxed);
    }

    /// Probe heads and derive the panel-subtracted desktop rectangles.
    fn probe_displays(&self) -> Result<Displays> {
        let root_geometry = self.sys.root_geometry()?;
        let screens = self.sys.heads()?;
        let mut desktops = screens.clone();

        let name = screens
            .iter()
            .map(|s| {
                let (x, y, w, h) = s.geometry.pieces();
                format!("{}-{}-{}-{}-{}-{}", s.name, s.id, x, y, w, h)
            })
            .collect::<Vec<_>>()
            .join("-");

        // Subtract panel struts from the desktop rectangles
        let mut rects: Vec<Geometry> = desktops.iter().map(|d| d.geometry).collect();
        let mut applied = vec![[false; 4]; rects.len()];
        for window in self.stacked_windows() {
            let strut = match self.sys.strut_partial(window) {
                Ok(Some(strut)) => strut,
                Ok(None) => continue,
                Err(e) => {
                    trace!("Error on strut request: {e:#}");
                    continue;
                }
            };
            apply_strut(&mut rects, &mut applied, root_geometry, strut);
        }
        for (desktop, rect) in desktops.iter_mut().zip(rects) {
            desktop.geometry = rect;
        }

        let corners = create_corners(&screens);

        debug!("Screens {screens:?}");
        debug!("Desktops {desktops:?}");

        Ok(Displays { name, screens, desktops, corners })
    }

    /// Re-probe displays, keeping the previous topology on failure.
    pub fn refresh_displays(&self) {
        match self.probe_displays() {
            Ok(displays) => {
                let mut wp = self.workplace.write();
                wp.screen_count = displays.screens.len() as u32;
                wp.displays = displays.clone();
                drop(wp);
                *self.topology_cache.lock() = Some((displays, Instant::now()));
                self.topology_valid.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!("Topology probe failed, keeping previous: {e:#}"),
        }
    }

    /// Handle one root property notification, refreshing the affected state.
    pub fn state_update(&self, atom: &str) {
        match atom {
            "_NET_NUMBER_OF_DESKTOPS" => match self.sys.desktop_count() {
                Ok(count) => self.workplace.write().desktop_count = count,
                Err(e) => warn!("Error retrieving number of desktops: {e:#}"),
            },
            "_NET_CURRENT_DESKTOP" => match self.sys.current_desktop() {
                Ok(current) => self.workplace.write().current_desktop = current,
                Err(e) => warn!("Error retrieving current desktop: {e:#}"),
            },
            "_NET_DESKTOP_LAYOUT" | "_NET_DESKTOP_GEOMETRY" | "_NET_WORKAREA" => {
                // Real configuration changes always re-probe
                self.refresh_displays();
            }
            "_NET_DESKTOP_VIEWPORT" => {
                // Workspace switches may reuse a young cached topology
                let cached = self.topology_cache.lock().clone();
                let valid = self.topology_valid.load(Ordering::Relaxed);
                match cached {
                    Some((displays, at)) if valid && at.elapsed() < TOPOLOGY_CACHE_TIMEOUT => {
                        trace!("Topology cache hit");
                        let mut wp = self.workplace.write();
                        wp.screen_count = displays.screens.len() as u32;
                        wp.displays = displays;
                    }
                    _ => {
                        debug!("Topology cache miss or expired");
                        self.refresh_displays();
                    }
                }
            }
            "_NET_CLIENT_LIST_STACKING" => self.refresh_windows(),
            "_NET_ACTIVE_WINDOW" => self.refresh_active(),
            _ => {}
        }
    }

    // ---- screens -------------------------------------------------------

    /// Index of the screen containing the point; 0 when outside all heads.
    pub fn screen_at(&self, p: Point) -> u32 {
        let wp = self.workplace.read();
        for (i, screen) in wp.displays.screens.iter().enumerate() {
            if p.is_inside(screen.geometry) {
                return i as u32;
            }
        }
        0
    }

    pub fn screen_geometry(&self, screen: u32) -> Geometry {
        let wp = self.workplace.read();
        wp.displays
            .screens
            .get(screen as usize)
            .map(|s| s.geometry)
            .unwrap_or_default()
    }

    /// Work-area rectangle of a screen with the configured edge margin
    /// subtracted.
    pub fn desktop_geometry(&self, screen: u32) -> Geometry {
        let wp = self.workplace.read();
        let desktop = match wp.displays.desktops.get(screen as usize) {
            Some(desktop) => desktop,
            None => return Geometry::default(),
        };
        let (mut x, mut y, mut w, mut h) = desktop.geometry.pieces();

        let margin = if desktop.primary && self.config.tiling.edge_margin_primary.len() == 4 {
            &self.config.tiling.edge_margin_primary
        } else {
            &self.config.tiling.edge_margin
        };
        if margin.len() == 4 {
            // top/right/bottom/left
            x += margin[3];
            y += margin[0];
            w = (w as i64 - (margin[1] + margin[3]) as i64).max(0) as u32;
            h = (h as i64 - (margin[2] + margin[0]) as i64).max(0) as u32;
        }

        Geometry::new(x, y, w, h)
    }

    /// The hot corner currently hovered by the pointer, if any.
    pub fn hot_corner(&self) -> Option<Corner> {
        let position = self.pointer.lock().position;
        let wp = self.workplace.read();
        wp.displays
            .corners
            .iter()
            .find(|c| position.is_inside(c.area))
            .cloned()
    }

    // ---- pointer -------------------------------------------------------

    /// Refresh the pointer model. Returns the new state and whether a button
    /// transition occurred since the previous sample.
    pub fn pointer_update(&self) -> (Pointer, bool) {
        let sample = match self.sys.pointer() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Error retrieving pointer position: {e:#}");
                let pointer = *self.pointer.lock();
                return (pointer, false);
            }
        };

        let mut pointer = self.pointer.lock();
        let previous_buttons = pointer.buttons;

        pointer.position = sample.position;
        pointer.buttons = Buttons {
            left: sample.left,
            middle: sample.middle,
            right: sample.right,
        };
        let now = Instant::now();
        if sample.left {
            pointer.drag_left = Some(now);
        }
        if sample.middle {
            pointer.drag_middle = Some(now);
        }
        if sample.right {
            pointer.drag_right = Some(now);
        }
        let snapshot = *pointer;
        drop(pointer);

        let current_screen = self.screen_at(sample.position);
        self.workplace.write().current_screen = current_screen;

        (snapshot, snapshot.buttons != previous_buttons)
    }

    pub fn pointer_snapshot(&self) -> Pointer {
        *self.pointer.lock()
    }

    /// The (desktop, screen) the user is currently looking at.
    pub fn active_location(&self) -> super::Location {
        let wp = self.workplace.read();
        super::Location::new(wp.current_desktop, wp.current_screen)
    }
}

/// Shrink desktop rectangles by one panel strut. Conflicting struts on the
/// same edge of the same head resolve first-wins.
fn apply_strut(
    rects: &mut [Geometry],
    applied: &mut [[bool; 4]],
    root: Geometry,
    strut: StrutPartial,
) {
    let full = |start: u32, end: u32, max: i32| -> (i32, i32) {
        if start == 0 && end == 0 {
            (0, max)
        } else {
            (start as i32, end as i32)
        }
    };
    let overlaps = |a0: i32, a1: i32, b0: i32, b1: i32| a0 < b1 && b0 < a1;

    for (rect, edges) in rects.iter_mut().zip(applied.iter_mut()) {
        // Left edge
        if strut.left > 0 && !edges[0] {
            let (y0, y1) = full(strut.left_start_y, strut.left_end_y, root.bottom());
            if overlaps(y0, y1, rect.y, rect.bottom()) && rect.x < strut.left as i32 {
                let shift = strut.left as i32 - rect.x;
                rect.x += shift;
                rect.width = rect.width.saturating_sub(shift as u32);
                edges[0] = true;
            }
        }
        // Right edge
        if strut.right > 0 && !edges[1] {
            let (y0, y1) = full(strut.right_start_y, strut.right_end_y, root.bottom());
            let boundary = root.right() - strut.right as i32;
            if overlaps(y0, y1, rect.y, rect.bottom()) && rect.right() > boundary {
                rect.width = rect.width.saturating_sub((rect.right() - boundary) as u32);
                edges[1] = true;
            }
        }
        // Top edge
        if strut.top > 0 && !edges[2] {
            let (x0, x1) = full(strut.top_start_x, strut.top_end_x, root.right());
            if overlaps(x0, x1, rect.x, rect.right()) && rect.y < strut.top as i32 {
                let shift = strut.top as i32 - rect.y;
                rect.y += shift;
                rect.height = rect.height.saturating_sub(shift as u32);
                edges[2] = true;
            }
        }
        // Bottom edge
        if strut.bottom > 0 && !edges[3] {
            let (x0, x1) = full(strut.bottom_start_x, strut.bottom_end_x, root.right());
            let boundary = root.bottom() - strut.bottom as i32;
            if overlaps(x0, x1, rect.x, rect.right()) && rect.bottom() > boundary {
                rect.height = rect.height.saturating_sub((rect.bottom() - boundary) as u32);
                edges[3] = true;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{dual_heads, mock_env};
    use super::*;
    use crate::winsys::mock::MockWindowSystem;

    #[test]
    fn screen_lookup_spans_heads() {
        let env = mock_env(MockWindowSystem::new(2, dual_heads()));
        assert_eq!(env.screen_at(Point::new(100, 100)), 0);
        assert_eq!(env.screen_at(Point::new(2000, 100)), 1);
        // Outside every head falls back to the first screen
        assert_eq!(env.screen_at(Point::new(-50, -50)), 0);
    }

    #[test]
    fn displays_name_identifies_topology() {
        let env = mock_env(MockWindowSystem::new(2, dual_heads()));
        let wp = env.workplace.read();
        assert_eq!(
            wp.displays.name,
            "DP-1-1-0-0-1920-1080-DP-2-2-1920-0-1920-1080"
        );
        assert_eq!(wp.screen_count, 2);
    }

    #[test]
    fn corners_per_screen() {
        let env = mock_env(MockWindowSystem::new(2, dual_heads()));
        let wp = env.workplace.read();
        assert_eq!(wp.displays.corners.len(), 8);

        drop(wp);
        env.pointer.lock().position = Point::new(1925, 1075);
        let corner = env.hot_corner().expect("corner under pointer");
        assert_eq!(corner.name, "bottom_left");
        assert_eq!(corner.screen, 1);
    }

    #[test]
    fn desktop_geometry_applies_margin() {
        let sys = MockWindowSystem::single_head();
        let mut config = Config::default();
        config.cache.enabled = false;
        config.tiling.edge_margin = vec![10, 20, 30, 40];
        let env = super::testing::mock_env_with(sys, config);

        let geometry = env.desktop_geometry(0);
        assert_eq!(geometry, Geometry::new(40, 10, 1920 - 60, 1080 - 40));
    }

    #[test]
    fn strut_subtracts_panel() {
        let mut rects = vec![Geometry::new(0, 0, 1920, 1080)];
        let mut applied = vec![[false; 4]];
        let strut = StrutPartial {
            top: 32,
            top_start_x: 0,
            top_end_x: 1920,
            ..StrutPartial::default()
        };
        apply_strut(
            &mut rects,
            &mut applied,
            Geometry::new(0, 0, 1920, 1080),
            strut,
        );
        assert_eq!(rects[0], Geometry::new(0, 32, 1920, 1048));

        // A second top strut on the same head loses
        let other = StrutPartial {
            top: 64,
            top_start_x: 0,
            top_end_x: 1920,
            ..StrutPartial::default()
        };
        apply_strut(
            &mut rects,
            &mut applied,
            Geometry::new(0, 0, 1920, 1080),
            other,
        );
        assert_eq!(rects[0], Geometry::new(0, 32, 1920, 1048));
    }

    #[test]
    fn pointer_drag_window() {
        let mut pointer = Pointer::default();
        assert!(!pointer.dragging(Duration::from_millis(500)));
        pointer.press();
        assert!(pointer.pressed());
        assert!(pointer.dragging(Duration::from_millis(500)));
    }
}
