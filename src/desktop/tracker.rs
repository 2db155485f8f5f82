//! The central coordinator.
//!
//! The tracker owns the client index and the workspace table, reacts to
//! property, structure and pointer events, hosts the drag gesture state
//! machine and serializes all cache writes through one background worker
//! with a debounce in front of it.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::workspace::Workspace;
use crate::shared::Point;
use crate::store::cache::CacheStore;
use crate::store::client::{
    self, Client, RestoreFlag, WindowInfo,
};
use crate::store::manager::{Directions, Selection};
use crate::store::workplace::{Env, Pointer};
use crate::store::Location;
use crate::winsys::{EventObserver, WindowId, ALL_DESKTOPS};

/// Debounce window between a state change and the cache write it schedules.
const WRITE_DEBOUNCE: Duration = Duration::from_millis(750);

/// A press within this window counts as an active drag.
const DRAG_THRESHOLD: Duration = Duration::from_millis(500);

/// Gesture resolution delay after a button release, letting the structure
/// event stream settle.
const GESTURE_SETTLE: Duration = Duration::from_millis(50);

/// Bounded event/action channels; slow consumers drop, never block.
const CHANNEL_CAPACITY: usize = 8;

/// Domain event and action publishers.
pub struct Channels {
    event_tx: SyncSender<String>,
    action_tx: SyncSender<String>,
}

impl Channels {
    fn emit_event(&self, event: &str) {
        if self.event_tx.try_send(event.into()).is_err() {
            trace!("Event channel full, dropped {event}");
        }
    }

    fn emit_action(&self, action: &str) {
        if self.action_tx.try_send(action.into()).is_err() {
            trace!("Action channel full, dropped {action}");
        }
    }
}

/// Consumer ends of the tracker's channels.
pub struct TrackerChannels {
    pub events: Receiver<String>,
    pub actions: Receiver<String>,
}

#[derive(Default)]
struct Slot {
    dragging: bool,
    source: Option<Arc<Client>>,
}

impl Slot {
    fn active(&self) -> bool {
        self.source.is_some()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Default)]
struct SwapSlot {
    source: Option<Arc<Client>>,
    target: Option<Arc<Client>>,
}

#[derive(Default)]
struct ScreenSlot {
    source: Option<Arc<Client>>,
    target: Option<Location>,
}

/// The four gesture slots driven by structure-notify events.
#[derive(Default)]
pub struct Handlers {
    resize: Slot,
    moving: Slot,
    swap_client: SwapSlot,
    swap_screen: ScreenSlot,
}

impl Handlers {
    pub fn any_active(&self) -> bool {
        self.resize.active()
            || self.moving.active()
            || self.swap_client.source.is_some()
            || self.swap_screen.source.is_some()
    }

    pub fn reset(&mut self) {
        self.resize.reset();
        self.moving.reset();
        self.swap_client = SwapSlot::default();
        self.swap_screen = ScreenSlot::default();
    }
}

struct WriteSchedule {
    due: bool,
    due_at: Instant,
}

struct GestureArm {
    deadline: Option<Instant>,
    button_released: bool,
}

struct WriteRequest {
    done: Option<mpsc::Sender<()>>,
}

pub struct Tracker {
    env: Arc<Env>,
    clients: RwLock<HashMap<WindowId, Arc<Client>>>,
    workspaces: RwLock<HashMap<Location, Arc<Workspace>>>,
    handlers: Mutex<Handlers>,
    channels: Channels,
    write_tx: SyncSender<WriteRequest>,
    schedule: Mutex<WriteSchedule>,
    schedule_cv: Condvar,
    gesture: Mutex<GestureArm>,
    gesture_cv: Condvar,
}

impl Tracker {
    /// Build the tracker, its workspace table and its three background
    /// threads (writer, debounce timer, gesture timer).
    pub fn new(env: Arc<Env>) -> (Arc<Self>, TrackerChannels) {
        let (event_tx, event_rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        let (action_tx, action_rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        let (write_tx, write_rx) = mpsc::sync_channel::<WriteRequest>(1);

        let tracker = Arc::new(Self {
            env,
            clients: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(HashMap::new()),
            handlers: Mutex::new(Handlers::default()),
            channels: Channels { event_tx, action_tx },
            write_tx,
            schedule: Mutex::new(WriteSchedule { due: false, due_at: Instant::now() }),
            schedule_cv: Condvar::new(),
            gesture: Mutex::new(GestureArm { deadline: None, button_released: true }),
            gesture_cv: Condvar::new(),
        });

        *tracker.workspaces.write() = tracker.create_workspaces();

        spawn_writer(Arc::downgrade(&tracker), write_rx);
        spawn_debounce_timer(Arc::downgrade(&tracker));
        spawn_gesture_timer(Arc::downgrade(&tracker));

        (
            tracker,
            TrackerChannels { events: event_rx, actions: action_rx },
        )
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Publish a domain event on behalf of the input layer.
    pub(crate) fn emit_event(&self, event: &str) {
        self.channels.emit_event(event);
    }

    /// Publish an action on behalf of the input layer.
    pub(crate) fn emit_action(&self, action: &str) {
        self.channels.emit_action(action);
    }

    fn cache_store(&self) -> CacheStore {
        CacheStore::new(
            self.env.config.cache_root(),
            &self.env.workplace.read().displays.name,
        )
    }

    fn create_workspaces(&self) -> HashMap<Location, Arc<Workspace>> {
        let store = self.cache_store();
        let (desktops, screens) = {
            let wp = self.env.workplace.read();
            (wp.desktop_count, wp.screen_count)
        };

        let mut workspaces = HashMap::new();
        for desktop in 0..desktops {
            for screen in 0..screens {
                let location = Location::new(desktop, screen);
                let workspace = Workspace::new(location, &self.env.config.tiling);
                workspace.read_cache(&store);
                workspaces.insert(location, Arc::new(workspace));
            }
        }
        workspaces
    }

    // ---- tracking ------------------------------------------------------

    /// Reconcile the tracked set against the current stacking order.
    /// Precondition: the active workspace has tiling enabled.
    pub fn update(&self) {
        let Some(active) = self.active_workspace() else {
            return;
        };
        if !active.tiling_enabled() {
            return;
        }

        let tracked = self.snapshot_clients();
        let stacked = self.env.stacked_windows();
        debug!(
            "Update trackable clients [{}/{}]",
            tracked.len(),
            stacked.len()
        );
        let current_desktop = self.env.workplace.read().current_desktop;

        let mut trackable = HashMap::new();
        for window in &stacked {
            trackable.insert(*window, self.is_trackable(*window));
        }

        // Untrack vanished or untrackable windows; refresh the rest on the
        // current desktop only to spare X round trips
        for (window, client) in tracked {
            if !trackable.get(&window).copied().unwrap_or(false) {
                self.untrack_window(window);
            } else if client.location().desktop == current_desktop {
                client.update(&self.env);
            }
        }

        for window in stacked {
            if trackable.get(&window).copied().unwrap_or(false) && !self.is_tracked(window) {
                self.track_window(window);
            }
        }
    }

    /// Tear everything down and rebuild the workspace table for the current
    /// topology.
    pub fn reset(&self) {
        let tracked = self.snapshot_clients();
        debug!("Reset trackable clients [{}]", tracked.len());

        for window in tracked.keys() {
            self.untrack_window(*window);
        }

        *self.workspaces.write() = self.create_workspaces();

        self.channels.emit_event("workplace_change");
    }

    fn track_window(&self, window: WindowId) -> bool {
        if self.is_tracked(window) {
            return false;
        }

        let store = self.cache_store();
        let client = Client::create(&self.env, &store, window);
        let Some(workspace) = self.client_workspace(&client) else {
            return false;
        };

        {
            let mut clients = self.clients.write();
            if clients.contains_key(&window) {
                return false;
            }
            clients.insert(window, Arc::clone(&client));
        }
        workspace.add_client(&client);

        if let Err(e) = self.env.sys.listen_to_window(window) {
            warn!("Error subscribing to window 0x{window:x}: {e:#}");
        }
        self.tile(&workspace);

        true
    }

    fn untrack_window(&self, window: WindowId) -> bool {
        let Some(client) = self.clients.write().remove(&window) else {
            return false;
        };

        let workspace = self.client_workspace(&client);

        // Hand the window back in its last observed state
        client.restore(&self.env, RestoreFlag::Latest);

        if let Some(workspace) = workspace {
            workspace.remove_client(&client);
            self.tile(&workspace);
        }

        true
    }

    pub fn is_tracked(&self, window: WindowId) -> bool {
        self.clients.read().contains_key(&window)
    }

    fn is_trackable(&self, window: WindowId) -> bool {
        let info = client::get_info(&self.env, window);
        self.is_trackable_info(&info)
    }

    fn is_trackable_info(&self, info: &WindowInfo) -> bool {
        let current_desktop = self.env.workplace.read().current_desktop;

        // Hidden windows on other desktops remain trackable
        if info.states.iter().any(|s| s == "_NET_WM_STATE_HIDDEN")
            && info.location.desktop != current_desktop
        {
            return !client::is_ignored(&self.env.config, info);
        }
        !client::is_special(info, current_desktop) && !client::is_ignored(&self.env.config, info)
    }

    // ---- lookups -------------------------------------------------------

    pub fn client_by_window(&self, window: WindowId) -> Option<Arc<Client>> {
        self.clients.read().get(&window).cloned()
    }

    pub fn active_client(&self) -> Option<Arc<Client>> {
        self.client_by_window(self.env.active_window())
    }

    pub fn active_workspace(&self) -> Option<Arc<Workspace>> {
        self.workspace_at(self.env.active_location())
    }

    pub fn workspace_at(&self, location: Location) -> Option<Arc<Workspace>> {
        let workspace = self.workspaces.read().get(&location).cloned();
        if workspace.is_none() {
            warn!(
                "Invalid workspace [workspace-{}-{}]",
                location.desktop, location.screen
            );
        }
        workspace
    }

    pub fn client_workspace(&self, client: &Client) -> Option<Arc<Workspace>> {
        self.workspace_at(client.location())
    }

    /// The visible client under the given point, if any.
    pub fn client_at(&self, workspace: &Workspace, point: Point) -> Option<Arc<Client>> {
        workspace
            .visible_clients(&self.env)
            .into_iter()
            .find(|c| point.is_inside(c.latest().dimensions.geometry))
    }

    pub fn snapshot_clients(&self) -> HashMap<WindowId, Arc<Client>> {
        self.clients.read().clone()
    }

    fn snapshot_client_list(&self) -> Vec<Arc<Client>> {
        self.clients.read().values().cloned().collect()
    }

    fn snapshot_workspace_list(&self) -> Vec<Arc<Workspace>> {
        self.workspaces.read().values().cloned().collect()
    }

    fn workspace_count(&self) -> usize {
        self.workspaces.read().len()
    }

    fn unlock_clients(&self) {
        let Some(workspace) = self.active_workspace() else {
            return;
        };
        for client in workspace
            .active_layout()
            .manager()
            .clients(Selection::Stacked, &[])
        {
            client.unlock_moves();
        }
    }

    // ---- tiling --------------------------------------------------------

    pub fn tile(&self, workspace: &Workspace) {
        if !workspace.tiling_enabled() {
            return;
        }
        workspace.tile(&self.env);
        self.channels.emit_event("clients_change");
        self.channels.emit_event("workspaces_change");
    }

    pub fn restore(&self, workspace: &Workspace, flag: RestoreFlag) {
        workspace.restore(&self.env, flag);
        self.channels.emit_event("clients_change");
        self.channels.emit_event("workspaces_change");
    }

    // ---- pointer -------------------------------------------------------

    /// Refresh the pointer model; a button transition arms the gesture
    /// resolution timer.
    pub fn refresh_pointer(&self) -> Pointer {
        let (pointer, transition) = self.env.pointer_update();
        if transition {
            info!("Pointer event {:?}", pointer.buttons);
            self.on_pointer_update(&pointer);
        }
        pointer
    }

    /// Arm the single-shot gesture timer: immediately while a button is
    /// held, after a short settle once it is released.
    pub fn on_pointer_update(&self, pointer: &Pointer) {
        let button_released = !pointer.pressed();
        let delay = if button_released {
            GESTURE_SETTLE
        } else {
            Duration::ZERO
        };

        let mut arm = self.gesture.lock();
        arm.deadline = Some(Instant::now() + delay);
        arm.button_released = button_released;
        self.gesture_cv.notify_all();
    }

    /// Reset all gesture handlers unless a move is in flight; called when
    /// the pointer went stationary.
    pub fn reset_handlers_if_idle(&self) {
        let mut handlers = self.handlers.lock();
        if !handlers.moving.active() {
            handlers.reset();
        }
    }

    pub fn handlers_active(&self) -> bool {
        self.handlers.lock().any_active()
    }

    /// Resolve pending gestures. Screen swaps execute before client swaps so
    /// the post-move workspace hosts the following swap test.
    fn resolve_gestures(&self, button_released: bool) {
        let screen_swap = {
            let handlers = self.handlers.lock();
            handlers
                .swap_screen
                .source
                .clone()
                .zip(handlers.swap_screen.target)
        };
        if let Some((client, target)) = screen_swap {
            self.handle_workspace_change(&client, Some(target));
        }

        let client_swap = {
            let handlers = self.handlers.lock();
            handlers
                .swap_client
                .source
                .clone()
                .zip(handlers.swap_client.target.clone())
        };
        if let Some((client, target)) = client_swap {
            self.handle_swap_client(&client, &target);
        }

        let move_or_resize = {
            let handlers = self.handlers.lock();
            handlers.moving.active() || handlers.resize.active()
        };
        if move_or_resize {
            {
                let mut handlers = self.handlers.lock();
                handlers.moving.reset();
                handlers.resize.reset();
            }
            self.unlock_clients();

            if button_released {
                if let Some(workspace) = self.active_workspace() {
                    self.tile(&workspace);
                }
            }
        }
    }

    // ---- gesture handlers ---------------------------------------------

    /// Structure event: pure size change. Installs the resize gesture and,
    /// while dragging, locks the client and feeds the edge into the layout's
    /// proportion update.
    fn handle_resize_client(&self, client: &Arc<Client>) {
        let Some(workspace) = self.client_workspace(client) else {
            return;
        };
        if !workspace.tiling_enabled() || !self.is_tracked(client.id()) {
            return;
        }
        if client::is_maximized(&client::get_info(&self.env, client.id())) {
            return;
        }

        let previous = client.latest().dimensions.geometry;
        let Ok(current) = self.env.sys.decor_geometry(client.id()) else {
            return;
        };
        let (px, py, pw, ph) = previous.pieces();
        let (cx, cy, cw, ch) = current.pieces();

        let resized = cw != pw || ch != ph;
        let moved = (cx != px || cy != py) && (cw == pw && ch == ph);
        if !resized || moved || self.handlers.lock().moving.active() {
            return;
        }

        let pointer = self.refresh_pointer();

        {
            let mut handlers = self.handlers.lock();
            if !client.is_new() && !handlers.resize.active() {
                handlers.resize = Slot {
                    dragging: pointer.dragging(DRAG_THRESHOLD),
                    source: Some(Arc::clone(client)),
                };
            }
        }
        debug!("Client resize handler fired [{}]", client.latest().class);

        let dragging = self.handlers.lock().resize.dragging;
        if dragging {
            if let Some(source) = self.handlers.lock().resize.source.clone() {
                source.lock_moves();
                debug!("Client resize handler active [{}]", client.latest().class);
            }

            let directions = Directions {
                top: cy != py,
                right: cx == px && cw != pw,
                bottom: cy == py && ch != ph,
                left: cx != px,
            };
            workspace
                .active_layout()
                .update_proportions(&self.env, client, &directions);
            workspace.mark_dirty();
            self.schedule_write();
        }

        self.tile(&workspace);
    }

    /// Structure event: pure position change. Installs the move gesture and
    /// keeps the swap targets in sync with the drag.
    fn handle_move_client(&self, client: &Arc<Client>) {
        if !self.is_tracked(client.id()) {
            return;
        }
        if client::is_maximized(&client::get_info(&self.env, client.id())) {
            return;
        }

        let previous = client.latest().dimensions.geometry;
        let Ok(current) = self.env.sys.decor_geometry(client.id()) else {
            return;
        };
        let (px, py, pw, ph) = previous.pieces();
        let (cx, cy, cw, ch) = current.pieces();

        let moved = cx != px || cy != py;
        let resized = cw != pw || ch != ph;
        if !moved || resized || self.handlers.lock().resize.active() {
            return;
        }

        let pointer = self.refresh_pointer();

        {
            let mut handlers = self.handlers.lock();
            if !client.is_new() && !handlers.moving.active() {
                handlers.moving = Slot {
                    dragging: pointer.dragging(DRAG_THRESHOLD),
                    source: Some(Arc::clone(client)),
                };
            }
        }
        debug!("Client move handler fired [{}]", client.latest().class);

        let dragging = self.handlers.lock().moving.dragging;
        let target_point = if dragging {
            pointer.position
        } else {
            Point::new(cx, cy)
        };
        let target_desktop = self.env.workplace.read().current_desktop;
        let target_screen = self.env.screen_at(target_point);

        let workspace = self.client_workspace(client);

        // Hovering another visible client arms the swap
        {
            self.handlers.lock().swap_client = SwapSlot::default();
        }
        if let Some(workspace) = &workspace {
            if let Some(other) = self.client_at(workspace, target_point) {
                if other.id() != client.id() {
                    debug!(
                        "Client swap handler active [{}-{}]",
                        client.latest().class,
                        other.latest().class
                    );
                    self.handlers.lock().swap_client = SwapSlot {
                        source: Some(Arc::clone(client)),
                        target: Some(other),
                    };
                }
            }
        }

        // Crossing a head boundary arms the screen swap
        {
            self.handlers.lock().swap_screen = ScreenSlot::default();
        }
        if client.location().screen != target_screen {
            debug!("Screen swap handler active [{}]", client.latest().class);
            self.handlers.lock().swap_screen = ScreenSlot {
                source: Some(Arc::clone(client)),
                target: Some(Location::new(target_desktop, target_screen)),
            };
        }
    }

    /// Swap two clients in place within the workspace.
    fn handle_swap_client(&self, client: &Arc<Client>, target: &Arc<Client>) {
        if !self.is_tracked(client.id()) {
            self.handlers.lock().swap_client = SwapSlot::default();
            return;
        }
        let Some(workspace) = self.client_workspace(client) else {
            self.handlers.lock().swap_client = SwapSlot::default();
            return;
        };
        debug!(
            "Client swap handler fired [{}-{}]",
            client.latest().class,
            target.latest().class
        );

        workspace
            .active_layout()
            .manager()
            .swap_clients(client, target);

        workspace.mark_dirty();
        client.mark_dirty();
        target.mark_dirty();
        self.schedule_write();

        self.handlers.lock().swap_client = SwapSlot::default();

        self.tile(&workspace);
    }

    /// Move a client between workspaces: out of its current one, refreshed,
    /// into the target (screen swap) or wherever its location now points.
    /// Master status carries over.
    fn handle_workspace_change(&self, client: &Arc<Client>, target: Option<Location>) {
        if !self.is_tracked(client.id()) {
            self.handlers.lock().swap_screen = ScreenSlot::default();
            return;
        }
        debug!("Client workspace handler fired [{}]", client.latest().class);

        let Some(old_workspace) = self.client_workspace(client) else {
            self.handlers.lock().swap_screen = ScreenSlot::default();
            return;
        };
        let was_master = old_workspace
            .active_layout()
            .manager()
            .is_master(client);
        old_workspace.remove_client(client);

        if old_workspace.tiling_enabled() {
            self.tile(&old_workspace);
        }

        if !self.is_trackable(client.id()) {
            self.handlers.lock().swap_screen = ScreenSlot::default();
            return;
        }
        client.update(&self.env);

        let mut new_workspace = self.client_workspace(client);
        let screen_swap_active = self.handlers.lock().swap_screen.source.is_some();
        if screen_swap_active {
            if let Some(target) = target.and_then(|loc| self.workspace_at(loc)) {
                if target.tiling_enabled() {
                    new_workspace = Some(target);
                }
            }
        }
        let Some(new_workspace) = new_workspace else {
            self.handlers.lock().swap_screen = ScreenSlot::default();
            return;
        };

        new_workspace.add_client(client);
        if was_master {
            new_workspace.active_layout().manager().make_master(client);
            new_workspace.mark_dirty();
            client.mark_dirty();
            self.schedule_write();
        }

        if new_workspace.tiling_enabled() {
            self.tile(&new_workspace);
        } else {
            client.restore(&self.env, RestoreFlag::Latest);
        }

        self.handlers.lock().swap_screen = ScreenSlot::default();
    }

    // ---- property handlers --------------------------------------------

    /// `_NET_WM_STATE` with a maximize: un-maximize and request the
    /// maximized layout instead.
    fn handle_maximized_client(&self, client: &Arc<Client>) {
        if !self.is_tracked(client.id()) {
            return;
        }
        if !client::is_maximized(&client::get_info(&self.env, client.id())) {
            return;
        }
        let Some(workspace) = self.client_workspace(client) else {
            return;
        };
        if !workspace.tiling_enabled() {
            return;
        }
        debug!("Client maximized handler fired [{}]", client.latest().class);

        client.update(&self.env);
        client.unmaximize(&self.env);

        if !client.is_new() && workspace.active_layout().name() != "maximized" {
            self.channels.emit_action("layout_maximized");
            if let Err(e) = self.env.sys.set_active_window(client.id()) {
                warn!("Error activating window: {e:#}");
            }
        }
    }

    /// `_NET_WM_STATE` with hidden: the window leaves tiling.
    fn handle_minimized_client(&self, client: &Arc<Client>) {
        if !self.is_tracked(client.id()) {
            return;
        }
        let Some(workspace) = self.client_workspace(client) else {
            return;
        };
        if !workspace.tiling_enabled() {
            return;
        }

        if client::is_minimized(&client::get_info(&self.env, client.id())) {
            debug!("Client minimized, untracking [{}]", client.latest().class);
            self.untrack_window(client.id());
        }
    }

    // ---- root events ---------------------------------------------------

    /// Root property handling, after the store state has been refreshed.
    fn on_state_update(&self, atom: &str) {
        let (desktop_count, screen_count, current_desktop) = {
            let wp = self.env.workplace.read();
            (wp.desktop_count, wp.screen_count, wp.current_desktop)
        };

        let workplace_changed =
            desktop_count as usize * screen_count as usize != self.workspace_count();
        let workspace_changed = atom == "_NET_CURRENT_DESKTOP";
        let viewport_changed = matches!(
            atom,
            "_NET_NUMBER_OF_DESKTOPS"
                | "_NET_DESKTOP_LAYOUT"
                | "_NET_DESKTOP_GEOMETRY"
                | "_NET_DESKTOP_VIEWPORT"
                | "_NET_WORKAREA"
        );
        let client_list_changed = atom == "_NET_CLIENT_LIST_STACKING";
        let focus_changed = atom == "_NET_ACTIVE_WINDOW";
        let clients_changed = client_list_changed || focus_changed;

        if workplace_changed {
            self.reset();
        }

        if workspace_changed {
            // Re-pin sticky clients onto the new desktop
            for client in self.snapshot_client_list() {
                let latest = client.latest();
                if client::is_sticky(&latest) && latest.location.desktop != current_desktop {
                    client.move_to_desktop(&self.env, ALL_DESKTOPS);
                }
            }
        }

        if workspace_changed || viewport_changed || clients_changed {
            self.handlers.lock().reset();
            self.unlock_clients();
            self.update();
        }

        // Persist only when the topology or the client list really changed
        if workplace_changed || client_list_changed {
            self.schedule_write();
        }

        self.maybe_write();
    }

    // ---- persistence ---------------------------------------------------

    /// Debounced write: the earliest pending deadline wins, the timer thread
    /// fires the flush.
    pub fn schedule_write(&self) {
        let deadline = Instant::now() + WRITE_DEBOUNCE;
        let mut schedule = self.schedule.lock();
        if !schedule.due || deadline < schedule.due_at {
            schedule.due_at = deadline;
        }
        schedule.due = true;
        self.schedule_cv.notify_all();
        trace!("Cache write scheduled");
    }

    /// Fire a due write that the timer has not picked up yet.
    fn maybe_write(&self) {
        let fire = {
            let schedule = self.schedule.lock();
            schedule.due && schedule.due_at <= Instant::now()
        };
        if fire {
            self.schedule.lock().due = false;
            self.write();
        }
    }

    /// Enqueue an asynchronous write; drops when one is already pending.
    pub fn write(&self) {
        match self.write_tx.try_send(WriteRequest { done: None }) {
            Ok(()) => debug!("Cache write enqueued"),
            Err(TrySendError::Full(_)) => trace!("Cache write already queued"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Synchronous write: cancels the pending debounce and blocks until the
    /// worker acknowledges. Used at shutdown and on restore requests.
    pub fn flush(&self) {
        self.schedule.lock().due = false;

        let (done_tx, done_rx) = mpsc::channel();
        if self
            .write_tx
            .send(WriteRequest { done: Some(done_tx) })
            .is_ok()
        {
            let _ = done_rx.recv();
        }
    }

    /// One full write pass over current snapshots; per-entity writes skip
    /// clean entries. Runs on the single worker thread only.
    fn do_write(&self) {
        self.schedule.lock().due = false;

        let store = self.cache_store();
        let clients = self.snapshot_client_list();
        let workspaces = self.snapshot_workspace_list();

        let clients_dirty = clients.iter().filter(|c| c.is_dirty()).count();
        let workspaces_dirty = workspaces.iter().filter(|w| w.is_dirty()).count();
        debug!(
            "Cache write start [{clients_dirty}/{} clients, {workspaces_dirty}/{} workspaces]",
            clients.len(),
            workspaces.len()
        );

        for client in &clients {
            client.write(&store);
        }
        for workspace in &workspaces {
            workspace.write(&store);
        }

        self.channels.emit_event("windows_change");
    }
}

impl EventObserver for Tracker {
    fn root_property(&self, atom: &str) {
        self.env.state_update(atom);
        self.on_state_update(atom);
    }

    fn window_property(&self, window: WindowId, atom: &str) {
        let Some(client) = self.client_by_window(window) else {
            return;
        };
        trace!("Client property event {atom} [{}]", client.latest().class);

        match atom {
            "_NET_WM_STATE" => {
                self.handle_maximized_client(&client);
                self.handle_minimized_client(&client);
            }
            "_NET_WM_DESKTOP" => {
                self.handle_workspace_change(&client, Some(self.env.active_location()));
            }
            _ => {}
        }
    }

    fn window_configure(&self, window: WindowId) {
        let Some(client) = self.client_by_window(window) else {
            return;
        };
        trace!("Client structure event [{}]", client.latest().class);

        self.handle_resize_client(&client);
        self.handle_move_client(&client);
        if !self.handlers.lock().moving.active() {
            client.update(&self.env);
        }
    }
}

fn spawn_writer(tracker: Weak<Tracker>, write_rx: mpsc::Receiver<WriteRequest>) {
    thread::Builder::new()
        .name("cache-writer".into())
        .spawn(move || {
            for request in write_rx {
                if let Some(tracker) = tracker.upgrade() {
                    tracker.do_write();
                }
                if let Some(done) = request.done {
                    let _ = done.send(());
                }
            }
        })
        .expect("failed to spawn cache writer thread");
}

fn spawn_debounce_timer(tracker: Weak<Tracker>) {
    thread::Builder::new()
        .name("write-debounce".into())
        .spawn(move || loop {
            let Some(tracker) = tracker.upgrade() else {
                return;
            };

            let mut schedule = tracker.schedule.lock();
            if !schedule.due {
                tracker
                    .schedule_cv
                    .wait_for(&mut schedule, Duration::from_secs(1));
                continue;
            }
            let now = Instant::now();
            if schedule.due_at > now {
                let wait = schedule.due_at - now;
                tracker.schedule_cv.wait_for(&mut schedule, wait);
                continue;
            }
            schedule.due = false;
            drop(schedule);

            tracker.write();
        })
        .expect("failed to spawn write debounce thread");
}

fn spawn_gesture_timer(tracker: Weak<Tracker>) {
    thread::Builder::new()
        .name("gesture-timer".into())
        .spawn(move || loop {
            let Some(tracker) = tracker.upgrade() else {
                return;
            };

            let mut arm = tracker.gesture.lock();
            match arm.deadline {
                None => {
                    tracker
                        .gesture_cv
                        .wait_for(&mut arm, Duration::from_secs(1));
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        tracker.gesture_cv.wait_for(&mut arm, deadline - now);
                    } else {
                        arm.deadline = None;
                        let button_released = arm.button_released;
                        drop(arm);
                        tracker.resolve_gestures(button_released);
                    }
                }
            }
        })
        .expect("failed to spawn gesture timer thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::shared::Geometry;
    use crate::store::workplace::testing::{dual_heads, mock_env, mock_env_with};
    use crate::winsys::mock::MockWindowSystem;
    use tempfile::TempDir;

    fn tracked_tracker(
        windows: &[(u32, &str, Geometry)],
    ) -> (Arc<Tracker>, TrackerChannels, MockWindowSystem) {
        let sys = MockWindowSystem::single_head();
        for (id, class, geometry) in windows {
            sys.add_window(*id, class, *geometry);
        }
        let mock = sys.clone();
        let env = mock_env(sys);
        let (tracker, channels) = Tracker::new(env);
        tracker.update();
        (tracker, channels, mock)
    }

    #[test]
    fn update_tracks_trackable_windows_only() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        sys.add_window(2, "Panel", Geometry::new(0, 0, 1920, 32));
        sys.set_window_types(2, vec!["_NET_WM_WINDOW_TYPE_DOCK".into()]);
        sys.add_window(3, "", Geometry::new(0, 0, 10, 10));
        let env = mock_env(sys);

        let (tracker, _channels) = Tracker::new(env);
        tracker.update();

        assert!(tracker.is_tracked(1));
        assert!(!tracker.is_tracked(2));
        assert!(!tracker.is_tracked(3));
    }

    #[test]
    fn vanished_window_is_untracked_and_restored() {
        let (tracker, _channels, mock) =
            tracked_tracker(&[(1, "Alpha", Geometry::new(5, 5, 600, 400))]);
        assert!(tracker.is_tracked(1));

        mock.remove_window(1);
        tracker.update();
        assert!(!tracker.is_tracked(1));
    }

    #[test]
    fn hidden_window_on_current_desktop_is_untracked() {
        let (tracker, _channels, mock) =
            tracked_tracker(&[(1, "Alpha", Geometry::new(5, 5, 600, 400))]);

        mock.set_window_states(1, vec!["_NET_WM_STATE_HIDDEN".into()]);
        tracker.update();
        assert!(!tracker.is_tracked(1));
    }

    #[test]
    fn hidden_window_on_other_desktop_stays_tracked() {
        let sys = MockWindowSystem::new(
            2,
            vec![crate::winsys::Head {
                id: 1,
                name: "eDP-1".into(),
                primary: true,
                geometry: Geometry::new(0, 0, 1920, 1080),
            }],
        );
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let (tracker, _channels) = Tracker::new(env);
        tracker.update();
        assert!(tracker.is_tracked(1));

        mock.set_window_desktop(1, Some(1));
        mock.set_window_states(1, vec!["_NET_WM_STATE_HIDDEN".into()]);
        tracker.update();
        assert!(tracker.is_tracked(1));
    }

    #[test]
    fn client_at_uses_rect_containment() {
        let (tracker, _channels, _mock) = tracked_tracker(&[
            (1, "Alpha", Geometry::new(0, 0, 640, 480)),
            (2, "Beta", Geometry::new(0, 0, 640, 480)),
        ]);
        let workspace = tracker.active_workspace().unwrap();

        // After tiling, Alpha owns the left half
        let hit = tracker
            .client_at(&workspace, Point::new(100, 500))
            .expect("client under point");
        assert_eq!(hit.id(), 1);

        let hit = tracker
            .client_at(&workspace, Point::new(1500, 500))
            .expect("client under point");
        assert_eq!(hit.id(), 2);

        assert!(tracker
            .client_at(&workspace, Point::new(-10, -10))
            .is_none());
    }

    #[test]
    fn drag_swap_reorders_buckets() {
        let (tracker, _channels, mock) = tracked_tracker(&[
            (1, "Alpha", Geometry::new(0, 0, 640, 480)),
            (2, "Beta", Geometry::new(700, 0, 640, 480)),
        ]);
        let workspace = tracker.active_workspace().unwrap();
        let alpha = tracker.client_by_window(1).unwrap();
        alpha.backdate_for_test();
        tracker.client_by_window(2).unwrap().backdate_for_test();

        let manager = workspace.active_layout().manager();
        assert!(manager.is_master(&alpha));

        // The user drags Alpha into Beta's half, button held. The press
        // transition arms the gesture timer; let it drain before the
        // structure events install the swap slots.
        mock.set_pointer(Point::new(1500, 500), true);
        tracker.refresh_pointer();
        thread::sleep(Duration::from_millis(50));
        let alpha_geometry = alpha.latest().dimensions.geometry;
        mock.set_window_geometry(
            1,
            Geometry::new(900, 80, alpha_geometry.width, alpha_geometry.height),
        );
        tracker.window_configure(1);

        {
            let handlers = tracker.handlers.lock();
            assert!(handlers.moving.active());
            assert!(handlers.swap_client.source.is_some());
        }

        // Button release resolves the gesture
        mock.set_pointer(Point::new(1500, 500), false);
        tracker.resolve_gestures(true);

        let beta = tracker.client_by_window(2).unwrap();
        assert!(manager.is_master(&beta));
        assert!(manager.is_slave(&alpha));
        assert!(!tracker.handlers_active());
    }

    #[test]
    fn drag_across_heads_migrates_workspace_and_master_status() {
        let sys = MockWindowSystem::new(1, dual_heads());
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);
        let (tracker, _channels) = Tracker::new(env);
        tracker.update();

        let alpha = tracker.client_by_window(1).unwrap();
        alpha.backdate_for_test();
        let source_ws = tracker.workspace_at(Location::new(0, 0)).unwrap();
        assert!(source_ws.active_layout().manager().is_master(&alpha));

        // Drag Alpha so the pointer crosses into the second head
        mock.set_pointer(Point::new(2400, 500), true);
        tracker.refresh_pointer();
        thread::sleep(Duration::from_millis(50));
        let geometry = alpha.latest().dimensions.geometry;
        mock.set_window_geometry(
            1,
            Geometry::new(2000, 100, geometry.width, geometry.height),
        );
        tracker.window_configure(1);

        assert!(tracker.handlers.lock().swap_screen.source.is_some());

        mock.set_pointer(Point::new(2400, 500), false);
        tracker.resolve_gestures(true);

        let target_ws = tracker.workspace_at(Location::new(0, 1)).unwrap();
        assert_eq!(source_ws.client_count(), 0);
        assert_eq!(target_ws.client_count(), 1);
        assert!(target_ws.active_layout().manager().is_master(&alpha));
        assert_eq!(alpha.location().screen, 1);
    }

    #[test]
    fn resize_drag_updates_proportions_and_locks_client() {
        let (tracker, _channels, mock) = tracked_tracker(&[
            (1, "Alpha", Geometry::new(0, 0, 640, 480)),
            (2, "Beta", Geometry::new(700, 0, 640, 480)),
        ]);
        let workspace = tracker.active_workspace().unwrap();
        let beta = tracker.client_by_window(2).unwrap();
        tracker.client_by_window(1).unwrap().backdate_for_test();
        beta.backdate_for_test();

        // Tiled: Alpha left half, Beta right half. Drag Beta's left edge
        // 96px right while holding the button.
        mock.set_pointer(Point::new(1056, 500), true);
        tracker.refresh_pointer();
        thread::sleep(Duration::from_millis(50));
        mock.set_window_geometry(2, Geometry::new(1056, 0, 864, 1080));
        tracker.window_configure(2);

        let row = workspace
            .active_layout()
            .manager()
            .proportions()
            .master_slave[&2]
            .clone();
        assert!((row[0] - 0.55).abs() < 1e-9);
        assert!((row[1] - 0.45).abs() < 1e-9);
        assert!(tracker.handlers.lock().resize.active());
    }

    #[test]
    fn maximize_requests_maximized_layout() {
        let (tracker, channels, mock) = tracked_tracker(&[
            (1, "Alpha", Geometry::new(0, 0, 640, 480)),
            (2, "Beta", Geometry::new(700, 0, 640, 480)),
        ]);
        let alpha = tracker.client_by_window(1).unwrap();
        alpha.backdate_for_test();

        mock.set_window_states(1, vec!["_NET_WM_STATE_MAXIMIZED_VERT".into()]);
        tracker.window_property(1, "_NET_WM_STATE");

        let actions: Vec<String> = channels.actions.try_iter().collect();
        assert!(actions.iter().any(|a| a == "layout_maximized"));

        // The maximize itself was undone
        assert!(mock.state_requests().iter().any(|(w, action, state)| {
            *w == 1
                && *action == crate::winsys::StateAction::Remove
                && state == "_NET_WM_STATE_MAXIMIZED_VERT"
        }));
    }

    #[test]
    fn minimize_untracks_the_client() {
        let (tracker, _channels, mock) =
            tracked_tracker(&[(1, "Alpha", Geometry::new(0, 0, 640, 480))]);
        assert!(tracker.is_tracked(1));

        mock.set_window_states(1, vec!["_NET_WM_STATE_HIDDEN".into()]);
        tracker.window_property(1, "_NET_WM_STATE");
        assert!(!tracker.is_tracked(1));
    }

    #[test]
    fn workplace_change_resets_workspaces() {
        let (tracker, channels, mock) =
            tracked_tracker(&[(1, "Alpha", Geometry::new(0, 0, 640, 480))]);
        assert_eq!(tracker.workspace_count(), 1);

        // The WM grows to two desktops
        mock.set_desktop_count(2);
        tracker.root_property("_NET_NUMBER_OF_DESKTOPS");

        assert_eq!(tracker.workspace_count(), 2);
        let events: Vec<String> = channels.events.try_iter().collect();
        assert!(events.iter().any(|e| e == "workplace_change"));
    }

    #[test]
    fn debounced_write_coalesces_and_clears_dirty() {
        let dir = TempDir::new().unwrap();
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mut config = Config::default();
        config.cache.enabled = true;
        config.cache.directory = dir.path().to_string_lossy().into_owned();
        let env = mock_env_with(sys, config);

        let (tracker, _channels) = Tracker::new(env);
        tracker.update();
        let alpha = tracker.client_by_window(1).unwrap();
        assert!(alpha.is_dirty());

        tracker.schedule_write();
        thread::sleep(Duration::from_millis(300));
        tracker.schedule_write();

        // Still inside the debounce window of the first call
        thread::sleep(Duration::from_millis(250));
        assert!(alpha.is_dirty());

        // Past the first deadline the single write has fired
        thread::sleep(Duration::from_millis(600));
        assert!(!alpha.is_dirty());
    }

    #[test]
    fn flush_writes_synchronously() {
        let dir = TempDir::new().unwrap();
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mut config = Config::default();
        config.cache.enabled = true;
        config.cache.directory = dir.path().to_string_lossy().into_owned();
        let env = mock_env_with(sys, config);

        let (tracker, _channels) = Tracker::new(env);
        tracker.update();
        let alpha = tracker.client_by_window(1).unwrap();

        tracker.flush();
        assert!(!alpha.is_dirty());
    }
}
