//! Scripted in-memory window system for tests.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    Dimensions, Head, MotifHints, NormalHints, PointerSample, StateAction, StrutPartial,
    WindowId, WindowSnapshot, WindowSystem,
};
use crate::shared::{Geometry, Point};

/// One recorded geometry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCall {
    pub window: WindowId,
    pub geometry: Geometry,
    pub resized: bool,
}

#[derive(Default)]
struct MockState {
    wm_name: String,
    windows: HashMap<WindowId, WindowSnapshot>,
    stacked: Vec<WindowId>,
    active: WindowId,
    desktops: u32,
    current_desktop: u32,
    heads: Vec<Head>,
    pointer: PointerSample,
    struts: HashMap<WindowId, StrutPartial>,
    moves: Vec<MoveCall>,
    state_requests: Vec<(WindowId, StateAction, String)>,
}

/// A fully scripted [`WindowSystem`]; requests mutate the stored snapshots so
/// follow-up reads observe them. Clones share state, so tests keep a handle
/// after handing one copy to the engine.
#[derive(Clone)]
pub struct MockWindowSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockWindowSystem {
    pub fn new(desktops: u32, heads: Vec<Head>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                wm_name: "mockwm".into(),
                desktops,
                heads,
                ..MockState::default()
            })),
        }
    }

    /// A single 1920x1080 head, one desktop.
    pub fn single_head() -> Self {
        Self::new(
            1,
            vec![Head {
                id: 1,
                name: "eDP-1".into(),
                primary: true,
                geometry: Geometry::new(0, 0, 1920, 1080),
            }],
        )
    }

    pub fn add_window(&self, window: WindowId, class: &str, geometry: Geometry) {
        let mut state = self.state.lock();
        state.windows.insert(
            window,
            WindowSnapshot {
                class: class.into(),
                name: class.into(),
                desktop: Some(0),
                dimensions: Dimensions {
                    geometry,
                    ..Dimensions::default()
                },
                ..WindowSnapshot::default()
            },
        );
        state.stacked.push(window);
    }

    pub fn remove_window(&self, window: WindowId) {
        let mut state = self.state.lock();
        state.windows.remove(&window);
        state.stacked.retain(|w| *w != window);
    }

    pub fn set_window_geometry(&self, window: WindowId, geometry: Geometry) {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.dimensions.geometry = geometry;
        }
    }

    pub fn set_window_states(&self, window: WindowId, states: Vec<String>) {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.states = states;
        }
    }

    pub fn set_window_types(&self, window: WindowId, types: Vec<String>) {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.types = types;
        }
    }

    pub fn set_window_desktop(&self, window: WindowId, desktop: Option<u32>) {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.desktop = desktop;
        }
    }

    pub fn set_pointer(&self, position: Point, left: bool) {
        let mut state = self.state.lock();
        state.pointer = PointerSample {
            position,
            left,
            middle: false,
            right: false,
        };
    }

    pub fn set_active(&self, window: WindowId) {
        self.state.lock().active = window;
    }

    pub fn set_desktop_count(&self, desktops: u32) {
        self.state.lock().desktops = desktops;
    }

    pub fn set_wm_name(&self, name: &str) {
        self.state.lock().wm_name = name.into();
    }

    pub fn set_strut(&self, window: WindowId, strut: StrutPartial) {
        self.state.lock().struts.insert(window, strut);
    }

    pub fn moves(&self) -> Vec<MoveCall> {
        self.state.lock().moves.clone()
    }

    pub fn clear_moves(&self) {
        self.state.lock().moves.clear();
    }

    pub fn state_requests(&self) -> Vec<(WindowId, StateAction, String)> {
        self.state.lock().state_requests.clone()
    }
}

impl WindowSystem for MockWindowSystem {
    fn wm_name(&self) -> String {
        self.state.lock().wm_name.clone()
    }

    fn root_geometry(&self) -> Result<Geometry> {
        let state = self.state.lock();
        let width = state.heads.iter().map(|h| h.geometry.right()).max().unwrap_or(0);
        let height = state.heads.iter().map(|h| h.geometry.bottom()).max().unwrap_or(0);
        Ok(Geometry::new(0, 0, width as u32, height as u32))
    }

    fn stacked_windows(&self) -> Result<Vec<WindowId>> {
        Ok(self.state.lock().stacked.clone())
    }

    fn active_window(&self) -> Result<WindowId> {
        Ok(self.state.lock().active)
    }

    fn set_active_window(&self, window: WindowId) -> Result<()> {
        self.state.lock().active = window;
        Ok(())
    }

    fn desktop_count(&self) -> Result<u32> {
        Ok(self.state.lock().desktops)
    }

    fn current_desktop(&self) -> Result<u32> {
        Ok(self.state.lock().current_desktop)
    }

    fn set_current_desktop(&self, desktop: u32) -> Result<()> {
        self.state.lock().current_desktop = desktop;
        Ok(())
    }

    fn heads(&self) -> Result<Vec<Head>> {
        Ok(self.state.lock().heads.clone())
    }

    fn pointer(&self) -> Result<PointerSample> {
        Ok(self.state.lock().pointer)
    }

    fn snapshot(&self, window: WindowId) -> Result<WindowSnapshot> {
        match self.state.lock().windows.get(&window) {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Ok(WindowSnapshot::default()),
        }
    }

    fn decor_geometry(&self, window: WindowId) -> Result<Geometry> {
        match self.state.lock().windows.get(&window) {
            Some(snapshot) => Ok(snapshot.dimensions.geometry),
            None => bail!("no such window: {window}"),
        }
    }

    fn move_resize_window(
        &self,
        window: WindowId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let geometry = Geometry::new(x, y, width, height);
        let mut state = self.state.lock();
        if let Some(snapshot) = state.windows.get_mut(&window) {
            snapshot.dimensions.geometry = geometry;
        }
        state.moves.push(MoveCall { window, geometry, resized: true });
        Ok(())
    }

    fn move_window(&self, window: WindowId, x: i32, y: i32) -> Result<()> {
        let mut state = self.state.lock();
        let mut geometry = state
            .windows
            .get(&window)
            .map(|s| s.dimensions.geometry)
            .unwrap_or_default();
        geometry.x = x;
        geometry.y = y;
        if let Some(snapshot) = state.windows.get_mut(&window) {
            snapshot.dimensions.geometry = geometry;
        }
        state.moves.push(MoveCall { window, geometry, resized: false });
        Ok(())
    }

    fn set_state(&self, window: WindowId, action: StateAction, state_atom: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(snapshot) = state.windows.get_mut(&window) {
            match action {
                StateAction::Add => {
                    if !snapshot.states.iter().any(|s| s == state_atom) {
                        snapshot.states.push(state_atom.into());
                    }
                }
                StateAction::Remove => snapshot.states.retain(|s| s != state_atom),
                StateAction::Toggle => {
                    if snapshot.states.iter().any(|s| s == state_atom) {
                        snapshot.states.retain(|s| s != state_atom);
                    } else {
                        snapshot.states.push(state_atom.into());
                    }
                }
            }
        }
        state
            .state_requests
            .push((window, action, state_atom.into()));
        Ok(())
    }

    fn set_desktop(&self, window: WindowId, desktop: u32) -> Result<()> {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.desktop = Some(desktop);
        }
        Ok(())
    }

    fn set_normal_hints(&self, window: WindowId, hints: &NormalHints) -> Result<()> {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.dimensions.hints.normal = *hints;
        }
        Ok(())
    }

    fn set_motif_hints(&self, window: WindowId, hints: &MotifHints) -> Result<()> {
        if let Some(snapshot) = self.state.lock().windows.get_mut(&window) {
            snapshot.dimensions.hints.motif = *hints;
        }
        Ok(())
    }

    fn strut_partial(&self, window: WindowId) -> Result<Option<StrutPartial>> {
        Ok(self.state.lock().struts.get(&window).copied())
    }

    fn listen_to_window(&self, _window: WindowId) -> Result<()> {
        Ok(())
    }
}
