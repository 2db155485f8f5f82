//! Pointer-driven input: the poll loop, hot corners, focus-follows-mouse
//! and the action executor.
//!
//! A single poller refreshes the pointer model on a period chosen from the
//! configuration, resets stale gestures, reports workspace changes, fires
//! corner actions and schedules delayed focus. Drag-time geometry updates
//! arrive at least at 10 Hz because a held button polls at 100 ms.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::desktop::tracker::Tracker;
use crate::store::client::RestoreFlag;
use crate::store::workplace::Pointer;
use crate::store::Location;

/// Poll period by configuration: focus-follows-mouse needs the tightest
/// loop, hot corners a medium one, plain tracking the loosest.
pub fn poll_interval(tracker: &Tracker) -> Duration {
    let config = &tracker.env().config;
    if config.input.window_focus_delay > 0 {
        Duration::from_millis(100)
    } else if config.has_corner_actions() {
        Duration::from_millis(200)
    } else {
        Duration::from_millis(500)
    }
}

/// Per-poller state carried between ticks.
#[derive(Default)]
pub struct PollState {
    previous: Option<Pointer>,
    last_location: Option<Location>,
    last_corner: Option<String>,
    focus_pending: Arc<Mutex<bool>>,
}

/// Spawn the pointer poll loop.
pub fn spawn_poller(tracker: Arc<Tracker>) -> JoinHandle<()> {
    let interval = poll_interval(&tracker);
    info!("Pointer poller started [{}ms]", interval.as_millis());

    thread::Builder::new()
        .name("pointer-poller".into())
        .spawn(move || {
            let mut state = PollState::default();
            loop {
                tick(&tracker, &mut state);

                // A held button tightens the loop so drag-time geometry is
                // observed at 10 Hz or better
                let pressed = tracker.env().pointer_snapshot().pressed();
                thread::sleep(if pressed {
                    Duration::from_millis(100).min(interval)
                } else {
                    interval
                });
            }
        })
        .expect("failed to spawn pointer poller thread")
}

/// One poll: refresh pointer, reset stale gestures, observe workspace and
/// corner changes, update delayed focus.
pub fn tick(tracker: &Arc<Tracker>, state: &mut PollState) {
    let pointer = tracker.refresh_pointer();

    reset_tracker(tracker, state, &pointer);
    update_workspace(tracker, state);
    update_corner(tracker, state);
    update_focus(tracker, state, &pointer);

    state.previous = Some(pointer);
}

/// A stationary pointer with no move in flight clears all gesture slots.
fn reset_tracker(tracker: &Tracker, state: &PollState, pointer: &Pointer) {
    if let Some(previous) = &state.previous {
        if previous.position == pointer.position {
            tracker.reset_handlers_if_idle();
        }
    }
}

/// Report a changed active workspace.
fn update_workspace(tracker: &Tracker, state: &mut PollState) {
    let location = tracker.env().active_location();
    if state.last_location != Some(location) {
        if state.last_location.is_some() {
            info!(
                "Active workspace updated [workspace-{}-{}]",
                location.desktop, location.screen
            );
            tracker.emit_event("workplace_change");
        }
        state.last_location = Some(location);
    }
}

/// Fire the bound action when the pointer enters a hot corner.
fn update_corner(tracker: &Tracker, state: &mut PollState) {
    let env = tracker.env();
    if !env.config.has_corner_actions() {
        state.last_corner = None;
        return;
    }

    let corner = env.hot_corner();
    let name = corner.map(|c| c.name);
    if name == state.last_corner {
        return;
    }
    state.last_corner = name.clone();

    let Some(name) = name else {
        return;
    };
    let Some(action) = env.config.input.corners.get(&name).filter(|a| !a.is_empty())
    else {
        return;
    };
    debug!("Corner {name} triggers {action}");

    tracker.emit_event("corner_change");
    tracker.emit_action(action);
}

/// Schedule a single delayed focus on the hovered window; a changed hover
/// target before the delay elapses drops the pending focus.
fn update_focus(tracker: &Arc<Tracker>, state: &mut PollState, pointer: &Pointer) {
    let env = tracker.env();
    let delay = env.config.input.window_focus_delay;
    if delay == 0 {
        return;
    }

    if *state.focus_pending.lock() {
        return;
    }
    let Some(previous) = &state.previous else {
        return;
    };
    if previous.position == pointer.position {
        return;
    }

    let Some(workspace) = tracker.active_workspace() else {
        return;
    };
    let (Some(active), Some(hovered)) = (
        tracker.active_client(),
        tracker.client_at(&workspace, pointer.position),
    ) else {
        return;
    };
    info!("Hovered window updated [{}]", hovered.latest().class);

    *state.focus_pending.lock() = true;
    let pending = Arc::clone(&state.focus_pending);
    let tracker = Arc::clone(tracker);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(delay));
        *pending.lock() = false;

        // The hover target moved on in the meantime
        let position = tracker.env().pointer_snapshot().position;
        let Some(workspace) = tracker.active_workspace() else {
            return;
        };
        let still_hovered = tracker
            .client_at(&workspace, position)
            .is_some_and(|c| c.id() == hovered.id());
        if !still_hovered {
            return;
        }

        if hovered.id() != active.id()
            && workspace.tiling_enabled()
            && !tracker.handlers_active()
        {
            let _ = tracker.env().sys.set_active_window(hovered.id());
        }
    });
}

/// Map an action string onto the tracker. Used by the action channel
/// consumer for corner actions and tracker-internal requests.
pub fn execute_action(tracker: &Tracker, action: &str) {
    let Some(workspace) = tracker.active_workspace() else {
        return;
    };
    info!("Execute action {action}");

    match action {
        "layout_vertical" | "layout_horizontal" | "layout_maximized" | "layout_untiled" => {
            let name = action.trim_start_matches("layout_");
            if workspace.activate_layout(name) {
                tracker.tile(&workspace);
                tracker.schedule_write();
            }
        }
        "layout_cycle" => {
            workspace.cycle_layout();
            tracker.tile(&workspace);
            tracker.schedule_write();
        }
        "tiling_enable" => {
            workspace.enable_tiling();
            tracker.tile(&workspace);
            tracker.schedule_write();
        }
        "tiling_disable" => {
            workspace.disable_tiling();
            tracker.restore(&workspace, RestoreFlag::Latest);
            tracker.schedule_write();
        }
        "tiling_toggle" => {
            if workspace.tiling_enabled() {
                execute_action(tracker, "tiling_disable");
            } else {
                execute_action(tracker, "tiling_enable");
            }
        }
        "proportion_increase" => {
            workspace.active_layout().manager().increase_proportion();
            tracker.tile(&workspace);
            workspace.mark_dirty();
            tracker.schedule_write();
        }
        "proportion_decrease" => {
            workspace.active_layout().manager().decrease_proportion();
            tracker.tile(&workspace);
            workspace.mark_dirty();
            tracker.schedule_write();
        }
        "master_increase" => {
            workspace.active_layout().manager().increase_master();
            tracker.tile(&workspace);
            workspace.mark_dirty();
            tracker.schedule_write();
        }
        "master_decrease" => {
            workspace.active_layout().manager().decrease_master();
            tracker.tile(&workspace);
            workspace.mark_dirty();
            tracker.schedule_write();
        }
        "slave_increase" => {
            workspace.active_layout().manager().increase_slave();
            tracker.tile(&workspace);
            workspace.mark_dirty();
            tracker.schedule_write();
        }
        "slave_decrease" => {
            workspace.active_layout().manager().decrease_slave();
            tracker.tile(&workspace);
            workspace.mark_dirty();
            tracker.schedule_write();
        }
        "master_make" => {
            let manager = workspace.active_layout().manager();
            if let Some(active) = manager.active_client(tracker.env().active_window()) {
                manager.make_master(&active);
                tracker.tile(&workspace);
                workspace.mark_dirty();
                tracker.schedule_write();
            }
        }
        "decoration_enable" => {
            let manager = workspace.active_layout().manager();
            manager.enable_decoration();
            for client in manager.clients(crate::store::manager::Selection::Stacked, &[]) {
                client.decorate(tracker.env());
            }
            tracker.tile(&workspace);
        }
        "decoration_disable" => {
            let manager = workspace.active_layout().manager();
            manager.disable_decoration();
            for client in manager.clients(crate::store::manager::Selection::Stacked, &[]) {
                client.undecorate(tracker.env());
            }
            tracker.tile(&workspace);
        }
        "decoration_toggle" => {
            if workspace.active_layout().manager().decoration_enabled() {
                execute_action(tracker, "decoration_disable");
            } else {
                execute_action(tracker, "decoration_enable");
            }
        }
        "window_fullscreen" => {
            if let Some(active) = tracker.active_client() {
                if crate::store::client::is_fullscreen(&active.latest()) {
                    active.unfullscreen(tracker.env());
                } else {
                    active.fullscreen(tracker.env());
                }
            }
        }
        "screen_next" | "screen_previous" => {
            let env = tracker.env();
            let screens = env.workplace.read().screen_count;
            if screens == 0 {
                return;
            }
            if let Some(active) = tracker.active_client() {
                let current = active.location().screen;
                let target = if action == "screen_next" {
                    (current + 1) % screens
                } else {
                    (current + screens - 1) % screens
                };
                active.move_to_screen(env, target);
            }
        }
        "window_next" => {
            let manager = workspace.active_layout().manager();
            if let Some(next) = manager.next_client(tracker.env().active_window()) {
                let _ = tracker.env().sys.set_active_window(next.id());
            }
        }
        "window_previous" => {
            let manager = workspace.active_layout().manager();
            if let Some(previous) = manager.previous_client(tracker.env().active_window()) {
                let _ = tracker.env().sys.set_active_window(previous.id());
            }
        }
        "restore" => {
            tracker.restore(&workspace, RestoreFlag::Original);
            tracker.flush();
        }
        _ => debug!("Unknown action {action}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::desktop::tracker::Tracker;
    use crate::shared::{Geometry, Point};
    use crate::store::workplace::testing::mock_env_with;
    use crate::winsys::mock::MockWindowSystem;

    fn tracker_with_config(
        config: Config,
    ) -> (Arc<Tracker>, crate::desktop::tracker::TrackerChannels, MockWindowSystem) {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let mut config = config;
        config.cache.enabled = false;
        let env = mock_env_with(sys, config);
        let (tracker, channels) = Tracker::new(env);
        tracker.update();
        (tracker, channels, mock)
    }

    #[test]
    fn poll_interval_follows_config() {
        let (tracker, _c, _m) = tracker_with_config(Config::default());
        assert_eq!(poll_interval(&tracker), Duration::from_millis(500));

        let mut config = Config::default();
        config.input.corners.insert("top_left".into(), "layout_cycle".into());
        let (tracker, _c, _m) = tracker_with_config(config);
        assert_eq!(poll_interval(&tracker), Duration::from_millis(200));

        let mut config = Config::default();
        config.input.window_focus_delay = 120;
        let (tracker, _c, _m) = tracker_with_config(config);
        assert_eq!(poll_interval(&tracker), Duration::from_millis(100));
    }

    #[test]
    fn corner_action_fires_once_per_entry() {
        let mut config = Config::default();
        config
            .input
            .corners
            .insert("bottom_right".into(), "layout_cycle".into());
        let (tracker, channels, mock) = tracker_with_config(config);

        // Drain tracking noise
        let _: Vec<String> = channels.events.try_iter().collect();

        let mut state = PollState::default();
        mock.set_pointer(Point::new(1915, 1075), false);
        tick(&tracker, &mut state);
        // Staying inside the corner does not re-fire
        tick(&tracker, &mut state);

        let actions: Vec<String> = channels.actions.try_iter().collect();
        assert_eq!(actions, vec!["layout_cycle".to_string()]);

        // Leaving and re-entering fires again
        mock.set_pointer(Point::new(500, 500), false);
        tick(&tracker, &mut state);
        mock.set_pointer(Point::new(1915, 1075), false);
        tick(&tracker, &mut state);
        let actions: Vec<String> = channels.actions.try_iter().collect();
        assert_eq!(actions, vec!["layout_cycle".to_string()]);
    }

    #[test]
    fn layout_action_switches_and_retiles() {
        let (tracker, _channels, mock) = tracker_with_config(Config::default());
        let workspace = tracker.active_workspace().unwrap();
        assert_eq!(workspace.active_layout().name(), "vertical");

        mock.clear_moves();
        execute_action(&tracker, "layout_maximized");

        assert_eq!(workspace.active_layout().name(), "maximized");
        assert!(!mock.moves().is_empty());
    }

    #[test]
    fn tiling_toggle_restores_and_back() {
        let (tracker, _channels, _mock) = tracker_with_config(Config::default());
        let workspace = tracker.active_workspace().unwrap();
        assert!(workspace.tiling_enabled());

        execute_action(&tracker, "tiling_toggle");
        assert!(!workspace.tiling_enabled());

        execute_action(&tracker, "tiling_toggle");
        assert!(workspace.tiling_enabled());
    }

    #[test]
    fn proportion_action_moves_the_split() {
        let (tracker, _channels, mock) = tracker_with_config(Config::default());
        mock.add_window(2, "Beta", Geometry::new(700, 0, 640, 480));
        tracker.update();
        let workspace = tracker.active_workspace().unwrap();

        execute_action(&tracker, "proportion_increase");
        let row = workspace
            .active_layout()
            .manager()
            .proportions()
            .master_slave[&2]
            .clone();
        assert!((row[0] - 0.55).abs() < 1e-9);
    }
}
