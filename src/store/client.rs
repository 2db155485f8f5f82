//! One tracked window and its info snapshots.
//!
//! A client carries three snapshots: `original` (at tracking time), `cached`
//! (from disk, drives restoration across restarts) and `latest` (refreshed on
//! every relevant event). The `latest` snapshot is read-mostly and guarded by
//! its own lock; the dirty bit feeds the persistence pipeline.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

use super::cache::{self, CacheStore};
use super::workplace::Env;
use super::Location;
use crate::config::Config;
use crate::winsys::{
    Dimensions, StateAction, WindowId, WindowSnapshot, ALL_DESKTOPS,
    MOTIF_DECORATION_ALL, MOTIF_DECORATION_NONE, MOTIF_HINT_DECORATIONS,
    SIZE_HINT_P_MIN_SIZE,
};

/// Which snapshot a restore applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreFlag {
    Original,
    Cached,
    Latest,
}

/// States that affect restoration and therefore the dirty bit. Transient
/// states such as focus or attention are deliberately absent.
const PERSISTENT_STATES: [&str; 10] = [
    "_NET_WM_STATE_MAXIMIZED_VERT",
    "_NET_WM_STATE_MAXIMIZED_HORZ",
    "_NET_WM_STATE_FULLSCREEN",
    "_NET_WM_STATE_HIDDEN",
    "_NET_WM_STATE_STICKY",
    "_NET_WM_STATE_SHADED",
    "_NET_WM_STATE_SKIP_TASKBAR",
    "_NET_WM_STATE_SKIP_PAGER",
    "_NET_WM_STATE_ABOVE",
    "_NET_WM_STATE_BELOW",
];

/// Window types that are never tiled.
const SPECIAL_TYPES: [&str; 13] = [
    "_NET_WM_WINDOW_TYPE_DOCK",
    "_NET_WM_WINDOW_TYPE_DESKTOP",
    "_NET_WM_WINDOW_TYPE_TOOLBAR",
    "_NET_WM_WINDOW_TYPE_UTILITY",
    "_NET_WM_WINDOW_TYPE_TOOLTIP",
    "_NET_WM_WINDOW_TYPE_SPLASH",
    "_NET_WM_WINDOW_TYPE_DIALOG",
    "_NET_WM_WINDOW_TYPE_COMBO",
    "_NET_WM_WINDOW_TYPE_NOTIFICATION",
    "_NET_WM_WINDOW_TYPE_DROPDOWN_MENU",
    "_NET_WM_WINDOW_TYPE_POPUP_MENU",
    "_NET_WM_WINDOW_TYPE_MENU",
    "_NET_WM_WINDOW_TYPE_DND",
];

/// States that keep a window out of tiling while set.
const SPECIAL_STATES: [&str; 6] = [
    "_NET_WM_STATE_HIDDEN",
    "_NET_WM_STATE_MODAL",
    "_NET_WM_STATE_ABOVE",
    "_NET_WM_STATE_BELOW",
    "_NET_WM_STATE_SKIP_PAGER",
    "_NET_WM_STATE_SKIP_TASKBAR",
];

/// Complete observed state of one window at one point in time. Replaced
/// wholesale on refresh, never patched.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub class: String,
    pub name: String,
    pub types: Vec<String>,
    pub states: Vec<String>,
    pub location: Location,
    pub dimensions: Dimensions,
}

/// Window id plus creation epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowHandle {
    pub id: WindowId,
    /// Creation time in milliseconds since the epoch.
    pub created: u64,
}

impl WindowHandle {
    fn new(id: WindowId) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { id, created }
    }
}

/// Serialized form of a client cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct ClientRecord {
    window: WindowHandle,
    created: u64,
    locked: bool,
    latest: WindowInfo,
}

pub struct Client {
    pub window: WindowHandle,
    created: Instant,
    locked: AtomicBool,
    original: WindowInfo,
    cached: Mutex<WindowInfo>,
    latest: RwLock<WindowInfo>,
    dirty: AtomicBool,
    #[cfg(test)]
    backdated: AtomicBool,
}

impl Client {
    /// Track a window. A cached snapshot, when present, is applied and the
    /// window is restored to it.
    pub fn create(env: &Env, store: &CacheStore, window: WindowId) -> Arc<Self> {
        let original = get_info(env, window);
        let mut cached = original.clone();

        let record: Option<ClientRecord> = store
            .client_path(&original.class, original.location.desktop)
            .and_then(|path| cache::read_file(&path));
        if let Some(record) = &record {
            cached.states = record.latest.states.clone();
            cached.dimensions.geometry = record.latest.dimensions.geometry;
            cached.location.screen = env.screen_at(cached.dimensions.geometry.center());
        }

        let cached_states = cached.states.clone();
        let cached_geometry = cached.dimensions.geometry;
        let cached_screen = cached.location.screen;

        let client = Arc::new(Self {
            window: WindowHandle::new(window),
            created: Instant::now(),
            locked: AtomicBool::new(false),
            original: original.clone(),
            cached: Mutex::new(cached),
            latest: RwLock::new(original),
            dirty: AtomicBool::new(true),
            #[cfg(test)]
            backdated: AtomicBool::new(false),
        });

        if record.is_some() {
            client.restore(env, RestoreFlag::Cached);
        }

        {
            let mut latest = client.latest.write();
            latest.states = cached_states;
            latest.dimensions.geometry = cached_geometry;
            latest.location.screen = cached_screen;
        }

        client
    }

    pub fn id(&self) -> WindowId {
        self.window.id
    }

    /// Consistent copy of the latest snapshot.
    pub fn latest(&self) -> WindowInfo {
        self.latest.read().clone()
    }

    pub fn original(&self) -> &WindowInfo {
        &self.original
    }

    pub fn location(&self) -> Location {
        self.latest.read().location
    }

    pub fn lock_moves(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock_moves(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// True within the first second after tracking started.
    pub fn is_new(&self) -> bool {
        #[cfg(test)]
        if self.backdated.load(Ordering::SeqCst) {
            return false;
        }
        self.created.elapsed() < Duration::from_millis(1000)
    }

    /// Refresh `latest` from the server. A vanished window (empty class) is
    /// discarded. Changes to geometry, persistent states or location mark
    /// the client dirty.
    pub fn update(&self, env: &Env) {
        let info = get_info(env, self.window.id);
        if info.class.is_empty() {
            return;
        }

        let old = self.latest.read().clone();
        let geometry_changed = info.dimensions.geometry != old.dimensions.geometry;
        let states_changed =
            persistent_states(&info.states) != persistent_states(&old.states);
        let location_changed = info.location != old.location;

        if geometry_changed || states_changed || location_changed {
            self.dirty.store(true, Ordering::SeqCst);
            trace!(
                class = %info.class,
                geom = geometry_changed,
                state = states_changed,
                loc = location_changed,
                "client marked dirty"
            );
        }

        *self.latest.write() = info;
    }

    /// Request a move/resize through the window manager. A locked client
    /// rejects exactly one call and consumes the lock. Width or height of
    /// zero or less degrade to a move-only request.
    pub fn move_window(&self, env: &Env, x: i32, y: i32, w: i32, h: i32) {
        if self.locked.swap(false, Ordering::SeqCst) {
            info!("Reject window move/resize [{}]", self.latest.read().class);
            return;
        }

        self.unmaximize(env);
        self.unfullscreen(env);

        let latest = self.latest.read().clone();
        let ext = latest.dimensions.extents;
        let (dx, dy) = if latest.dimensions.adj_pos {
            (ext.left, ext.top)
        } else {
            (0, 0)
        };
        let (dw, dh) = if latest.dimensions.adj_size {
            (ext.left + ext.right, ext.top + ext.bottom)
        } else {
            (0, 0)
        };

        let result = if w > 0 && h > 0 {
            env.sys.move_resize_window(
                self.window.id,
                x + dx,
                y + dy,
                (w - dw).max(1) as u32,
                (h - dh).max(1) as u32,
            )
        } else {
            env.sys.move_window(self.window.id, x + dx, y + dy)
        };
        if let Err(e) = result {
            warn!("Error moving window [{}]: {e:#}", latest.class);
        }

        self.update(env);
    }

    /// Restore the window to one of its snapshots: refreshes first for
    /// `Latest`, re-applies sticky for `Cached`, re-applies configured
    /// decoration for `Original`; always clears size limits, maximize and
    /// fullscreen before moving.
    pub fn restore(&self, env: &Env, flag: RestoreFlag) {
        if flag == RestoreFlag::Latest {
            self.update(env);
        }

        if flag == RestoreFlag::Cached && is_sticky(&self.cached.lock()) {
            self.move_to_desktop(env, ALL_DESKTOPS);
        }

        self.unlimit(env);
        self.unmaximize(env);
        self.unfullscreen(env);

        if flag == RestoreFlag::Original {
            if env.config.tiling.window_decoration {
                self.decorate(env);
            } else {
                self.undecorate(env);
            }
            self.update(env);
        }

        {
            let mut latest = self.latest.write();
            if latest.dimensions.adj_restore {
                latest.dimensions.adj_pos = false;
                latest.dimensions.adj_size = false;
            }
        }

        let geometry = match flag {
            RestoreFlag::Original => self.original.dimensions.geometry,
            RestoreFlag::Cached => self.cached.lock().dimensions.geometry,
            RestoreFlag::Latest => self.latest.read().dimensions.geometry,
        };
        self.move_window(
            env,
            geometry.x,
            geometry.y,
            geometry.width as i32,
            geometry.height as i32,
        );
    }

    /// Install a minimum-size hint so the window manager keeps the tile from
    /// shrinking. Skipped on hosts that fight min-size hints.
    pub fn limit(&self, env: &Env, w: i32, h: i32) -> bool {
        if !env.supports_min_size_hints() {
            return false;
        }

        let ext = self.latest.read().dimensions.extents;
        let (dw, dh) = (ext.left + ext.right, ext.top + ext.bottom);

        let mut hints = self.cached.lock().dimensions.hints.normal;
        hints.flags |= SIZE_HINT_P_MIN_SIZE;
        hints.min_width = (w - dw).max(0) as u32;
        hints.min_height = (h - dh).max(0) as u32;

        if let Err(e) = env.sys.set_normal_hints(self.window.id, &hints) {
            warn!("Error setting size limits [{}]: {e:#}", self.latest.read().class);
        }
        true
    }

    /// Restore the window's own size hints.
    pub fn unlimit(&self, env: &Env) -> bool {
        if !env.supports_min_size_hints() {
            return false;
        }
        let hints = self.cached.lock().dimensions.hints.normal;
        if let Err(e) = env.sys.set_normal_hints(self.window.id, &hints) {
            warn!("Error restoring size limits [{}]: {e:#}", self.latest.read().class);
        }
        true
    }

    /// Request decorations, unless the window originally opted out or the
    /// decoration action is unbound.
    pub fn decorate(&self, env: &Env) -> bool {
        if !env.config.keys.contains_key("decoration") {
            return false;
        }
        let latest_decorated = self.latest.read().dimensions.hints.motif.decorated();
        if latest_decorated || !self.original.dimensions.hints.motif.decorated() {
            return false;
        }

        let mut hints = self.cached.lock().dimensions.hints.motif;
        hints.flags |= MOTIF_HINT_DECORATIONS;
        hints.decorations = MOTIF_DECORATION_ALL;
        if let Err(e) = env.sys.set_motif_hints(self.window.id, &hints) {
            warn!("Error setting decorations [{}]: {e:#}", self.latest.read().class);
        }
        true
    }

    /// Remove decorations, unless the window originally required them.
    pub fn undecorate(&self, env: &Env) -> bool {
        if !env.config.keys.contains_key("decoration") {
            return false;
        }
        let latest_decorated = self.latest.read().dimensions.hints.motif.decorated();
        if !latest_decorated && self.original.dimensions.hints.motif.decorated() {
            return false;
        }

        let mut hints = self.cached.lock().dimensions.hints.motif;
        hints.flags |= MOTIF_HINT_DECORATIONS;
        hints.decorations = MOTIF_DECORATION_NONE;
        if let Err(e) = env.sys.set_motif_hints(self.window.id, &hints) {
            warn!("Error removing decorations [{}]: {e:#}", self.latest.read().class);
        }
        true
    }

    pub fn fullscreen(&self, env: &Env) -> bool {
        if is_fullscreen(&self.latest.read()) {
            return false;
        }
        self.set_state(env, StateAction::Add, "_NET_WM_STATE_FULLSCREEN");
        true
    }

    pub fn unfullscreen(&self, env: &Env) -> bool {
        if !is_fullscreen(&self.latest.read()) {
            return false;
        }
        self.set_state(env, StateAction::Remove, "_NET_WM_STATE_FULLSCREEN");
        true
    }

    pub fn unmaximize(&self, env: &Env) -> bool {
        if !is_maximized(&self.latest.read()) {
            return false;
        }
        self.set_state(env, StateAction::Remove, "_NET_WM_STATE_MAXIMIZED_VERT");
        self.set_state(env, StateAction::Remove, "_NET_WM_STATE_MAXIMIZED_HORZ");
        true
    }

    fn set_state(&self, env: &Env, action: StateAction, state: &str) {
        if let Err(e) = env.sys.set_state(self.window.id, action, state) {
            warn!("Error changing state {state}: {e:#}");
        }
    }

    /// Move to a desktop; the all-ones sentinel additionally pins the window
    /// sticky.
    pub fn move_to_desktop(&self, env: &Env, desktop: u32) {
        if desktop == ALL_DESKTOPS {
            self.set_state(env, StateAction::Add, "_NET_WM_STATE_STICKY");
        }
        if let Err(e) = env.sys.set_desktop(self.window.id, desktop) {
            warn!("Error setting desktop: {e:#}");
        }
    }

    /// Center the window on another head and simulate a pointer press so the
    /// gesture pipeline completes the migration.
    pub fn move_to_screen(&self, env: &Env, screen: u32) {
        let target = env.screen_geometry(screen);
        let geometry = self.latest.read().dimensions.geometry;
        let (w, h) = (geometry.width as i32, geometry.height as i32);
        let x = (target.center().x - w / 2).max(target.x + 100);
        let y = (target.center().y - h / 2).max(target.y + 100);

        if let Err(e) = env.sys.move_window(self.window.id, x, y) {
            warn!("Error moving window to screen {screen}: {e:#}");
        }
        env.pointer.lock().press();
    }

    /// Persist the latest snapshot if dirty; the dirty bit clears only on a
    /// completed write.
    pub fn write(&self, store: &CacheStore) {
        if store.disabled() {
            return;
        }
        if !self.dirty.load(Ordering::SeqCst) {
            trace!("Skip clean client cache write [{}]", self.latest.read().class);
            return;
        }

        let latest = self.latest.read().clone();
        let record = ClientRecord {
            window: self.window,
            created: self.window.created,
            locked: self.locked.load(Ordering::SeqCst),
            latest,
        };

        let path = match store.client_path(&record.latest.class, record.latest.location.desktop)
        {
            Some(path) => path,
            None => return,
        };

        let data = match serde_json::to_vec_pretty(&record) {
            Ok(data) => data,
            Err(e) => {
                warn!("Error serializing client cache [{}]: {e}", record.latest.class);
                return;
            }
        };

        if let Err(e) = cache::write_file(&path, &data) {
            warn!("Error writing client cache [{}]: {e:#}", record.latest.class);
            return;
        }

        self.dirty.store(false, Ordering::SeqCst);
        debug!("Client cache written [{}]", record.latest.class);
    }
}

#[cfg(test)]
impl Client {
    /// Bare client for manager and layout tests; never touches a facade.
    pub(crate) fn test_stub(id: WindowId, class: &str) -> Arc<Self> {
        let info = WindowInfo {
            class: class.into(),
            name: class.into(),
            ..WindowInfo::default()
        };
        Arc::new(Self {
            window: WindowHandle { id, created: 0 },
            created: Instant::now(),
            locked: AtomicBool::new(false),
            original: info.clone(),
            cached: Mutex::new(info.clone()),
            latest: RwLock::new(info),
            dirty: AtomicBool::new(false),
            backdated: AtomicBool::new(false),
        })
    }

    /// Overwrite the latest snapshot directly; tests drive geometry this way.
    pub(crate) fn set_latest_for_test(&self, info: WindowInfo) {
        *self.latest.write() = info;
    }

    /// Age the client past the is-new window so gesture paths engage.
    pub(crate) fn backdate_for_test(&self) {
        self.backdated.store(true, Ordering::SeqCst);
    }
}

/// Read a full window info snapshot. Individual read failures degrade to
/// defaults; a vanished window yields an empty class.
pub fn get_info(env: &Env, window: WindowId) -> WindowInfo {
    let snapshot = match env.sys.snapshot(window) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Error reading window info 0x{window:x}: {e:#}");
            return WindowInfo::default();
        }
    };

    let (desktop_count, current_desktop) = {
        let wp = env.workplace.read();
        (wp.desktop_count, wp.current_desktop)
    };

    let WindowSnapshot { class, name, types, mut states, desktop, dimensions } = snapshot;

    let sticky = desktop.is_some_and(|d| d > desktop_count);
    let desktop = match desktop {
        Some(d) if !sticky => d,
        _ => current_desktop,
    };
    if sticky && !states.iter().any(|s| s == "_NET_WM_STATE_STICKY") {
        states.push("_NET_WM_STATE_STICKY".into());
    }

    let screen = env.screen_at(dimensions.geometry.center());

    WindowInfo {
        class,
        name,
        types,
        states,
        location: Location::new(desktop, screen),
        dimensions,
    }
}

/// Only the states that matter for restoration.
pub fn persistent_states(states: &[String]) -> Vec<String> {
    states
        .iter()
        .filter(|s| PERSISTENT_STATES.contains(&s.as_str()))
        .cloned()
        .collect()
}

/// Windows the controller must leave alone: itself, special EWMH types, and
/// special states. Hidden windows on other desktops stay trackable.
pub fn is_special(info: &WindowInfo, current_desktop: u32) -> bool {
    if info.class == env!("CARGO_PKG_NAME") {
        debug!("Ignore internal window [{}]", info.class);
        return true;
    }

    for typ in &info.types {
        if SPECIAL_TYPES.contains(&typ.as_str()) {
            debug!("Ignore window with type {typ} [{}]", info.class);
            return true;
        }
    }

    for state in &info.states {
        if state == "_NET_WM_STATE_HIDDEN" && info.location.desktop != current_desktop {
            continue;
        }
        if SPECIAL_STATES.contains(&state.as_str()) {
            debug!("Ignore window with state {state} [{}]", info.class);
            return true;
        }
    }

    false
}

/// Windows excluded by configuration: empty class, or a class pattern match
/// without a rescuing name match.
pub fn is_ignored(config: &Config, info: &WindowInfo) -> bool {
    if info.class.is_empty() {
        debug!("Ignore invalid window");
        return true;
    }

    for pattern in config.ignore_patterns() {
        let class_match = pattern.class.is_match(&info.class.to_lowercase());
        let name_match = pattern
            .name
            .as_ref()
            .is_some_and(|re| re.is_match(&info.name.to_lowercase()));
        if class_match && !name_match {
            debug!("Ignore window from config [{}]", info.class);
            return true;
        }
    }

    false
}

pub fn is_fullscreen(info: &WindowInfo) -> bool {
    info.states.iter().any(|s| s == "_NET_WM_STATE_FULLSCREEN")
}

pub fn is_maximized(info: &WindowInfo) -> bool {
    info.states
        .iter()
        .any(|s| s == "_NET_WM_STATE_MAXIMIZED_VERT" || s == "_NET_WM_STATE_MAXIMIZED_HORZ")
}

pub fn is_minimized(info: &WindowInfo) -> bool {
    info.states.iter().any(|s| s == "_NET_WM_STATE_HIDDEN")
}

pub fn is_sticky(info: &WindowInfo) -> bool {
    info.states.iter().any(|s| s == "_NET_WM_STATE_STICKY")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Geometry;
    use crate::store::workplace::testing::mock_env;
    use crate::winsys::mock::MockWindowSystem;
    use crate::winsys::WindowSystem;

    fn store() -> CacheStore {
        CacheStore::new(None, "test")
    }

    #[test]
    fn update_tracks_dirty_transitions() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);

        // Fresh clients start dirty so the first write lands on disk
        assert!(client.is_dirty());

        // A clean update with no changes keeps the client clean
        client.dirty.store(false, Ordering::SeqCst);
        client.update(&env);
        assert!(!client.is_dirty());

        // Transient state changes do not dirty the client
        mock.set_window_states(1, vec!["_NET_WM_STATE_FOCUSED".into()]);
        client.update(&env);
        assert!(!client.is_dirty());

        // Persistent state changes do
        mock.set_window_states(1, vec!["_NET_WM_STATE_MAXIMIZED_VERT".into()]);
        client.update(&env);
        assert!(client.is_dirty());
    }

    #[test]
    fn geometry_change_marks_dirty() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);
        client.dirty.store(false, Ordering::SeqCst);

        mock.set_window_geometry(1, Geometry::new(10, 10, 640, 480));
        client.update(&env);
        assert!(client.is_dirty());
    }

    #[test]
    fn locked_client_rejects_one_move() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);

        mock.clear_moves();

        client.lock_moves();
        client.move_window(&env, 0, 0, 960, 1080);
        assert!(mock.moves().is_empty(), "locked move must be rejected");

        // The lock is consumed: the next move goes through
        client.move_window(&env, 0, 0, 960, 1080);
        let moves = mock.moves();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].geometry, Geometry::new(0, 0, 960, 1080));
    }

    #[test]
    fn move_window_clears_maximize_and_fullscreen() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        sys.set_window_states(
            1,
            vec![
                "_NET_WM_STATE_MAXIMIZED_VERT".into(),
                "_NET_WM_STATE_FULLSCREEN".into(),
            ],
        );
        let mock = sys.clone();
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);
        client.update(&env);

        client.move_window(&env, 0, 0, 960, 540);

        let removals: Vec<String> = mock
            .state_requests()
            .into_iter()
            .filter(|(_, action, _)| *action == StateAction::Remove)
            .map(|(_, _, state)| state)
            .collect();
        assert!(removals.iter().any(|s| s == "_NET_WM_STATE_MAXIMIZED_VERT"));
        assert!(removals.iter().any(|s| s == "_NET_WM_STATE_FULLSCREEN"));
    }

    #[test]
    fn sticky_sentinel_adds_sticky_state() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);

        client.move_to_desktop(&env, ALL_DESKTOPS);

        assert!(mock.state_requests().iter().any(|(_, action, state)| {
            *action == StateAction::Add && state == "_NET_WM_STATE_STICKY"
        }));
    }

    #[test]
    fn size_limits_respect_host_support() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);

        assert!(client.limit(&env, 960, 540));
        let hints = mock.snapshot(1).unwrap().dimensions.hints.normal;
        assert!(hints.flags & crate::winsys::SIZE_HINT_P_MIN_SIZE != 0);
        assert_eq!(hints.min_width, 960);
        assert_eq!(hints.min_height, 540);

        // Restores the window's own hints
        assert!(client.unlimit(&env));
        let hints = mock.snapshot(1).unwrap().dimensions.hints.normal;
        assert_eq!(hints.min_width, 0);

        // Hosts that fight min-size hints are skipped entirely
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        sys.set_wm_name("Mutter (Muffin)");
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);
        assert!(!client.limit(&env, 960, 540));
        assert!(!client.unlimit(&env));
    }

    #[test]
    fn decorate_requires_bound_action() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let env = mock_env(sys);
        let client = Client::create(&env, &store(), 1);

        // No `decoration` key bound: both paths refuse
        assert!(!client.decorate(&env));
        assert!(!client.undecorate(&env));
    }

    #[test]
    fn persistent_filter_drops_transient_states() {
        let states = vec![
            "_NET_WM_STATE_FOCUSED".to_string(),
            "_NET_WM_STATE_MAXIMIZED_VERT".to_string(),
            "_NET_WM_STATE_DEMANDS_ATTENTION".to_string(),
            "_NET_WM_STATE_STICKY".to_string(),
        ];
        assert_eq!(
            persistent_states(&states),
            vec![
                "_NET_WM_STATE_MAXIMIZED_VERT".to_string(),
                "_NET_WM_STATE_STICKY".to_string(),
            ]
        );
    }

    #[test]
    fn special_and_ignored_predicates() {
        let mut info = WindowInfo {
            class: "Alpha".into(),
            name: "alpha window".into(),
            ..WindowInfo::default()
        };
        assert!(!is_special(&info, 0));

        info.types = vec!["_NET_WM_WINDOW_TYPE_DIALOG".into()];
        assert!(is_special(&info, 0));
        info.types.clear();

        // Hidden on the current desktop is special, on another it is not
        info.states = vec!["_NET_WM_STATE_HIDDEN".into()];
        info.location.desktop = 0;
        assert!(is_special(&info, 0));
        info.location.desktop = 1;
        assert!(!is_special(&info, 0));

        let mut config = Config::default();
        config.tiling.window_ignore = vec![["alpha".into(), "keepme".into()]];
        config.compile_ignores();
        assert!(is_ignored(&config, &info));

        info.name = "keepme please".into();
        assert!(!is_ignored(&config, &info));

        info.class = String::new();
        assert!(is_ignored(&config, &info));
    }
}
