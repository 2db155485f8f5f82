//! One (desktop, screen) tiling unit.
//!
//! A workspace owns the closed set of layouts, each with its own manager.
//! Clients are registered with every layout so switching layouts keeps the
//! partition; only the active layout produces geometry.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::layout::{create_layouts, Layout, LayoutRecord};
use crate::config::TilingConfig;
use crate::store::cache::{self, CacheStore};
use crate::store::client::{Client, RestoreFlag};
use crate::store::manager::Selection;
use crate::store::workplace::Env;
use crate::store::Location;

/// Serialized workspace state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub location: Location,
    pub layouts: Vec<LayoutRecord>,
    pub active_index: usize,
    pub tiling_enabled: bool,
}

pub struct Workspace {
    pub location: Location,
    layouts: Vec<Layout>,
    active_index: AtomicUsize,
    tiling_enabled: AtomicBool,
    dirty: AtomicBool,
}

impl Workspace {
    pub fn new(location: Location, config: &TilingConfig) -> Self {
        Self {
            location,
            layouts: create_layouts(location, config),
            active_index: AtomicUsize::new(0),
            tiling_enabled: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
        }
    }

    // ---- layouts -------------------------------------------------------

    pub fn layouts(&self) -> &[Layout] {
        &self.layouts
    }

    pub fn active_layout(&self) -> &Layout {
        let index = self.active_index.load(Ordering::SeqCst).min(self.layouts.len() - 1);
        &self.layouts[index]
    }

    /// Select a layout by name. Unknown names are ignored.
    pub fn activate_layout(&self, name: &str) -> bool {
        match self.layouts.iter().position(|l| l.name() == name) {
            Some(index) => {
                info!(
                    "Activate layout {name} [workspace-{}-{}]",
                    self.location.desktop, self.location.screen
                );
                self.active_index.store(index, Ordering::SeqCst);
                self.mark_dirty();
                true
            }
            None => {
                warn!("Unknown layout {name}");
                false
            }
        }
    }

    /// Advance to the next layout in the cycle.
    pub fn cycle_layout(&self) {
        let next = (self.active_index.load(Ordering::SeqCst) + 1) % self.layouts.len();
        self.active_index.store(next, Ordering::SeqCst);
        self.mark_dirty();
    }

    // ---- tiling --------------------------------------------------------

    pub fn tiling_enabled(&self) -> bool {
        self.tiling_enabled.load(Ordering::SeqCst)
    }

    pub fn enable_tiling(&self) {
        self.tiling_enabled.store(true, Ordering::SeqCst);
        self.mark_dirty();
    }

    pub fn disable_tiling(&self) {
        self.tiling_enabled.store(false, Ordering::SeqCst);
        self.mark_dirty();
    }

    /// Run the active layout.
    pub fn tile(&self, env: &Env) {
        if !self.tiling_enabled() {
            return;
        }
        self.active_layout().apply(env);
        self.mark_dirty();
    }

    /// Restore every client of the active manager to the given snapshot.
    pub fn restore(&self, env: &Env, flag: RestoreFlag) {
        debug!(
            "Restore workspace [workspace-{}-{}]",
            self.location.desktop, self.location.screen
        );
        for client in self
            .active_layout()
            .manager()
            .clients(Selection::Stacked, &[])
        {
            client.restore(env, flag);
        }
        self.mark_dirty();
    }

    // ---- clients -------------------------------------------------------

    /// Register the client with every layout's manager.
    pub fn add_client(&self, client: &Arc<Client>) {
        for layout in &self.layouts {
            layout.manager().add_client(client);
        }
        self.mark_dirty();
    }

    pub fn remove_client(&self, client: &Client) {
        for layout in &self.layouts {
            layout.manager().remove_client(client);
        }
        self.mark_dirty();
    }

    pub fn visible_clients(&self, env: &Env) -> Vec<Arc<Client>> {
        let order = env.stacked_windows();
        self.active_layout().manager().clients(Selection::Visible, &order)
    }

    pub fn client_count(&self) -> usize {
        self.active_layout().manager().client_count()
    }

    // ---- dirty & persistence ------------------------------------------

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn record(&self) -> WorkspaceRecord {
        WorkspaceRecord {
            location: self.location,
            layouts: self.layouts.iter().map(Layout::record).collect(),
            active_index: self.active_index.load(Ordering::SeqCst),
            tiling_enabled: self.tiling_enabled(),
        }
    }

    /// Apply a cached record by layout name; shape mismatches degrade to the
    /// defaults.
    pub fn apply_record(&self, record: &WorkspaceRecord) {
        for cached in &record.layouts {
            if let Some(layout) = self.layouts.iter().find(|l| l.name() == cached.name) {
                layout.manager().apply_record(&cached.manager);
            }
        }
        if record.active_index < self.layouts.len() {
            self.active_index.store(record.active_index, Ordering::SeqCst);
        }
        self.tiling_enabled
            .store(record.tiling_enabled, Ordering::SeqCst);
    }

    /// Read the cached record for this location, if any.
    pub fn read_cache(&self, store: &CacheStore) {
        let Some(path) = store.workspace_path(self.location) else {
            return;
        };
        if let Some(record) = cache::read_file::<WorkspaceRecord>(&path) {
            self.apply_record(&record);
        }
    }

    /// Persist the workspace if dirty; the dirty bit clears only on a
    /// completed write.
    pub fn write(&self, store: &CacheStore) {
        if store.disabled() || !self.is_dirty() {
            return;
        }
        let Some(path) = store.workspace_path(self.location) else {
            return;
        };

        let data = match serde_json::to_vec_pretty(&self.record()) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "Error serializing workspace cache [workspace-{}-{}]: {e}",
                    self.location.desktop, self.location.screen
                );
                return;
            }
        };

        if let Err(e) = cache::write_file(&path, &data) {
            warn!(
                "Error writing workspace cache [workspace-{}-{}]: {e:#}",
                self.location.desktop, self.location.screen
            );
            return;
        }
        self.dirty.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Geometry;
    use crate::store::workplace::testing::mock_env;
    use crate::winsys::mock::MockWindowSystem;
    use tempfile::TempDir;

    fn workspace() -> Workspace {
        Workspace::new(Location::new(0, 0), &TilingConfig::default())
    }

    #[test]
    fn clients_register_with_every_layout() {
        let ws = workspace();
        let a = Client::test_stub(1, "Alpha");
        ws.add_client(&a);

        for layout in ws.layouts() {
            assert_eq!(layout.manager().client_count(), 1);
        }

        ws.remove_client(&a);
        for layout in ws.layouts() {
            assert_eq!(layout.manager().client_count(), 0);
        }
    }

    #[test]
    fn layout_survives_cycling() {
        let ws = workspace();
        let a = Client::test_stub(1, "Alpha");
        ws.add_client(&a);

        assert_eq!(ws.active_layout().name(), "vertical");
        ws.cycle_layout();
        assert_eq!(ws.active_layout().name(), "horizontal");
        assert_eq!(ws.active_layout().manager().client_count(), 1);

        assert!(ws.activate_layout("maximized"));
        assert_eq!(ws.active_layout().name(), "maximized");
        assert!(!ws.activate_layout("spiral"));
    }

    #[test]
    fn disabled_tiling_moves_nothing() {
        let sys = MockWindowSystem::single_head();
        sys.add_window(1, "Alpha", Geometry::new(0, 0, 640, 480));
        let mock = sys.clone();
        let env = mock_env(sys);

        let ws = workspace();
        let store = CacheStore::new(None, "test");
        let client = Client::create(&env, &store, 1);
        ws.add_client(&client);
        mock.clear_moves();

        ws.disable_tiling();
        ws.tile(&env);
        assert!(mock.moves().is_empty());

        ws.enable_tiling();
        ws.tile(&env);
        assert!(!mock.moves().is_empty());
    }

    #[test]
    fn visible_clients_bounded_by_caps() {
        let sys = MockWindowSystem::single_head();
        for id in 1..=8 {
            sys.add_window(id, &format!("W{id}"), Geometry::new(0, 0, 640, 480));
        }
        let env = mock_env(sys);

        let ws = workspace();
        let store = CacheStore::new(None, "test");
        for id in 1..=8 {
            ws.add_client(&Client::create(&env, &store, id));
        }

        let manager = ws.active_layout().manager();
        let cap = manager.masters_maximum() + manager.slaves_maximum();
        assert!(ws.visible_clients(&env).len() <= cap);
    }

    #[test]
    fn record_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(Some(dir.path().to_path_buf()), "test-display");

        let ws = workspace();
        ws.active_layout().manager().increase_proportion();
        ws.activate_layout("horizontal");
        ws.disable_tiling();
        ws.write(&store);
        assert!(!ws.is_dirty());

        let restored = workspace();
        restored.read_cache(&store);
        assert_eq!(restored.active_layout().name(), "horizontal");
        assert!(!restored.tiling_enabled());
        assert_eq!(
            restored.layouts()[0].manager().proportions(),
            ws.layouts()[0].manager().proportions()
        );
    }

    #[test]
    fn clean_workspace_skips_write() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(Some(dir.path().to_path_buf()), "test-display");

        let ws = workspace();
        ws.write(&store);
        assert!(!ws.is_dirty());

        ws.mark_dirty();
        ws.write(&store);
        assert!(!ws.is_dirty());
        assert!(store
            .workspace_path(Location::new(0, 0))
            .unwrap()
            .exists());
    }
}
