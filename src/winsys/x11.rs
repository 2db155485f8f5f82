//! x11rb implementation of the window-system facade.
//!
//! All geometry requests go through EWMH client messages so the host window
//! manager stays in charge of actual placement. Transient read failures are
//! absorbed per field; only a vanished connection surfaces as an error.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use x11rb::connection::Connection;
use x11rb::properties::{WmClass, WmSizeHints};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConnectionExt as _,
    EventMask, PropMode, Window,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::atoms::Atoms;
use super::randr;
use super::{
    Dimensions, EventObserver, FrameExtents, Head, Hints, MotifHints, NormalHints,
    PointerSample, StateAction, StrutPartial, WindowId, WindowSnapshot, WindowSystem,
    SIZE_HINT_P_MIN_SIZE, SIZE_HINT_P_WIN_GRAVITY,
};
use crate::shared::{Geometry, Point};

/// EWMH source indication for requests from a normal application.
const SOURCE_INDICATION: u32 = 2;

/// `_NET_MOVERESIZE_WINDOW` presence bits for x, y, width, height.
const MOVERESIZE_X: u32 = 1 << 8;
const MOVERESIZE_Y: u32 = 1 << 9;
const MOVERESIZE_WIDTH: u32 = 1 << 10;
const MOVERESIZE_HEIGHT: u32 = 1 << 11;

pub struct X11WindowSystem {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
    wm_name: String,
    atom_ids: Mutex<HashMap<String, Atom>>,
    atom_names: Mutex<HashMap<Atom, String>>,
}

impl X11WindowSystem {
    /// Connect to the X server, retrying up to ten times. Fails only when no
    /// EWMH-compliant window manager can be reached at all.
    pub fn connect() -> Result<Self> {
        let retries = 10;
        let mut last_err = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                warn!("Retry in 1 second ({}/{})...", attempt, retries);
                thread::sleep(Duration::from_secs(1));
            }

            match Self::try_connect() {
                Ok(ws) => {
                    info!("Connected to X server [{}]", ws.wm_name);
                    return Ok(ws);
                }
                Err(e) => {
                    error!("Connection to X server failed: {e:#}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("X connection failed")))
    }

    fn try_connect() -> Result<Self> {
        let (conn, screen_num) =
            x11rb::connect(None).context("Failed to connect to X server")?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms::new(&conn)?;

        let mut ws = Self {
            conn,
            root,
            atoms,
            wm_name: String::new(),
            atom_ids: Mutex::new(HashMap::new()),
            atom_names: Mutex::new(HashMap::new()),
        };

        // EWMH compliance check via the supporting WM window
        let check = ws
            .property32(root, atoms.net_supporting_wm_check)
            .context("Window manager is not EWMH compliant")?;
        let wm_window = *check.first().context("No supporting WM check window")?;
        ws.wm_name = ws
            .text_property(wm_window, atoms.net_wm_name)
            .unwrap_or_default();

        // Root properties must be readable before the engine starts
        ws.property32(root, atoms.net_client_list_stacking)
            .context("Error retrieving root properties")?;

        Ok(ws)
    }

    pub fn root(&self) -> Window {
        self.root
    }

    /// Subscribe to root property and substructure events.
    pub fn listen_root(&self) -> Result<()> {
        self.conn.change_window_attributes(
            self.root,
            &ChangeWindowAttributesAux::new()
                .event_mask(EventMask::SUBSTRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// Blocking event pump; dispatches property and configure notifications
    /// to the observer until the connection dies.
    pub fn run_event_pump(&self, observer: Arc<dyn EventObserver>) -> Result<()> {
        loop {
            let event = self
                .conn
                .wait_for_event()
                .context("X connection lost")?;

            match event {
                Event::PropertyNotify(ev) => {
                    let atom = match self.atom_name(ev.atom) {
                        Ok(name) => name,
                        Err(e) => {
                            warn!("Error retrieving atom name: {e:#}");
                            continue;
                        }
                    };
                    if ev.window == self.root {
                        observer.root_property(&atom);
                    } else {
                        observer.window_property(ev.window, &atom);
                    }
                }
                Event::ConfigureNotify(ev) => {
                    observer.window_configure(ev.window);
                }
                _ => {}
            }
        }
    }

    fn atom(&self, name: &str) -> Result<Atom> {
        if let Some(atom) = self.atom_ids.lock().get(name) {
            return Ok(*atom);
        }
        let atom = self
            .conn
            .intern_atom(false, name.as_bytes())?
            .reply()
            .with_context(|| format!("Failed to intern atom {name}"))?
            .atom;
        self.atom_ids.lock().insert(name.into(), atom);
        self.atom_names.lock().insert(atom, name.into());
        Ok(atom)
    }

    fn atom_name(&self, atom: Atom) -> Result<String> {
        if let Some(name) = self.atom_names.lock().get(&atom) {
            return Ok(name.clone());
        }
        let reply = self.conn.get_atom_name(atom)?.reply()?;
        let name = String::from_utf8_lossy(&reply.name).into_owned();
        self.atom_names.lock().insert(atom, name.clone());
        self.atom_ids.lock().insert(name.clone(), atom);
        Ok(name)
    }

    fn property32(&self, window: Window, atom: Atom) -> Result<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, window, atom, AtomEnum::ANY, 0, 1024)?
            .reply()?;
        let values = reply
            .value32()
            .map(|iter| iter.collect())
            .unwrap_or_default();
        Ok(values)
    }

    fn text_property(&self, window: Window, atom: Atom) -> Result<String> {
        let reply = self
            .conn
            .get_property(false, window, atom, AtomEnum::ANY, 0, 1024)?
            .reply()?;
        if reply.value.is_empty() {
            bail!("empty text property");
        }
        Ok(String::from_utf8_lossy(&reply.value)
            .trim_end_matches('\0')
            .to_string())
    }

    /// Send a 32-bit client message to the root window, the EWMH request form.
    fn client_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent::new(32, window, message_type, data);
        self.conn.send_event(
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// Top-level ancestor of a window: the frame created by the window
    /// manager, or the window itself when unreparented.
    fn frame_window(&self, window: Window) -> Result<Window> {
        let mut current = window;
        loop {
            let tree = self.conn.query_tree(current)?.reply()?;
            if tree.parent == self.root || tree.parent == x11rb::NONE {
                return Ok(current);
            }
            current = tree.parent;
        }
    }

    fn window_types(&self, window: Window) -> Vec<String> {
        let atoms = match self.property32(window, self.atoms.net_wm_window_type) {
            Ok(atoms) => atoms,
            Err(e) => {
                trace!("Error on window type request: {e:#}");
                return Vec::new();
            }
        };
        atoms
            .into_iter()
            .filter_map(|a| self.atom_name(a).ok())
            .collect()
    }

    fn window_states(&self, window: Window) -> Vec<String> {
        let atoms = match self.property32(window, self.atoms.net_wm_state) {
            Ok(atoms) => atoms,
            Err(e) => {
                trace!("Error on window state request: {e:#}");
                return Vec::new();
            }
        };
        atoms
            .into_iter()
            .filter_map(|a| self.atom_name(a).ok())
            .collect()
    }

    fn frame_extents(&self, window: Window) -> (FrameExtents, bool, bool) {
        let net = self
            .property32(window, self.atoms.net_frame_extents)
            .unwrap_or_default();
        let gtk = self
            .property32(window, self.atoms.gtk_frame_extents)
            .unwrap_or_default();

        let mut ext = [0i64; 4];
        for (i, v) in net.iter().take(4).enumerate() {
            ext[i] += *v as i64;
        }
        for (i, v) in gtk.iter().take(4).enumerate() {
            ext[i] -= *v as i64;
        }

        let net_set = net.iter().any(|v| *v != 0);
        let gtk_set = gtk.iter().any(|v| *v != 0);

        (
            FrameExtents {
                left: ext[0] as i32,
                right: ext[1] as i32,
                top: ext[2] as i32,
                bottom: ext[3] as i32,
            },
            net_set,
            gtk_set,
        )
    }

    fn normal_hints(&self, window: Window) -> NormalHints {
        let reply = match WmSizeHints::get_normal_hints(&self.conn, window)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .flatten()
        {
            Some(hints) => hints,
            None => return NormalHints::default(),
        };

        let mut hints = NormalHints::default();
        if let Some((w, h)) = reply.min_size {
            hints.flags |= SIZE_HINT_P_MIN_SIZE;
            hints.min_width = w.max(0) as u32;
            hints.min_height = h.max(0) as u32;
        }
        if let Some(gravity) = reply.win_gravity {
            hints.flags |= SIZE_HINT_P_WIN_GRAVITY;
            hints.win_gravity = u32::from(gravity);
        }
        hints
    }

    fn motif_hints(&self, window: Window) -> MotifHints {
        let values = self
            .property32(window, self.atoms.motif_wm_hints)
            .unwrap_or_default();
        MotifHints {
            flags: values.first().copied().unwrap_or(0),
            decorations: values.get(2).copied().unwrap_or(0),
        }
    }
}

impl WindowSystem for X11WindowSystem {
    fn wm_name(&self) -> String {
        self.wm_name.clone()
    }

    fn root_geometry(&self) -> Result<Geometry> {
        let geom = self
            .conn
            .get_geometry(self.root)?
            .reply()
            .context("Error retrieving root geometry")?;
        Ok(Geometry::new(
            geom.x as i32,
            geom.y as i32,
            geom.width as u32,
            geom.height as u32,
        ))
    }

    fn stacked_windows(&self) -> Result<Vec<WindowId>> {
        self.property32(self.root, self.atoms.net_client_list_stacking)
    }

    fn active_window(&self) -> Result<WindowId> {
        let values = self.property32(self.root, self.atoms.net_active_window)?;
        values
            .first()
            .copied()
            .context("No active window property")
    }

    fn set_active_window(&self, window: WindowId) -> Result<()> {
        self.client_message(
            window,
            self.atoms.net_active_window,
            [SOURCE_INDICATION, 0, 0, 0, 0],
        )
    }

    fn desktop_count(&self) -> Result<u32> {
        let values = self.property32(self.root, self.atoms.net_number_of_desktops)?;
        values.first().copied().context("No desktop count property")
    }

    fn current_desktop(&self) -> Result<u32> {
        let values = self.property32(self.root, self.atoms.net_current_desktop)?;
        values
            .first()
            .copied()
            .context("No current desktop property")
    }

    fn set_current_desktop(&self, desktop: u32) -> Result<()> {
        self.client_message(
            self.root,
            self.atoms.net_current_desktop,
            [desktop, 0, 0, 0, 0],
        )
    }

    fn heads(&self) -> Result<Vec<Head>> {
        randr::physical_heads(&self.conn, self.root)
    }

    fn pointer(&self) -> Result<PointerSample> {
        let reply = self
            .conn
            .query_pointer(self.root)?
            .reply()
            .context("Error retrieving pointer position")?;
        let mask = u16::from(reply.mask);
        Ok(PointerSample {
            position: Point::new(reply.root_x as i32, reply.root_y as i32),
            left: mask & 0x100 != 0,
            middle: mask & 0x200 != 0,
            right: mask & 0x400 != 0,
        })
    }

    fn snapshot(&self, window: WindowId) -> Result<WindowSnapshot> {
        // Window class; an empty class marks a vanished window
        let class = WmClass::get(&self.conn, window)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .flatten()
            .map(|c| String::from_utf8_lossy(c.class()).into_owned())
            .unwrap_or_default();

        let name = self
            .text_property(window, self.atoms.net_wm_name)
            .or_else(|_| {
                self.text_property(window, AtomEnum::WM_NAME.into())
            })
            .unwrap_or_else(|_| class.clone());

        let geometry = self.decor_geometry(window).unwrap_or_default();

        let desktop = self
            .property32(window, self.atoms.net_wm_desktop)
            .ok()
            .and_then(|v| v.first().copied());

        let (extents, net_set, gtk_set) = self.frame_extents(window);
        let normal = self.normal_hints(window);
        let motif = self.motif_hints(window);

        Ok(WindowSnapshot {
            class,
            name,
            types: self.window_types(window),
            states: self.window_states(window),
            desktop,
            dimensions: Dimensions {
                geometry,
                hints: Hints { normal, motif },
                extents,
                adj_pos: (normal.win_gravity > 1 && net_set) || gtk_set,
                adj_size: net_set || gtk_set,
                adj_restore: gtk_set,
            },
        })
    }

    fn decor_geometry(&self, window: WindowId) -> Result<Geometry> {
        let frame = self.frame_window(window)?;
        let geom = self.conn.get_geometry(frame)?.reply()?;
        Ok(Geometry::new(
            geom.x as i32,
            geom.y as i32,
            geom.width as u32,
            geom.height as u32,
        ))
    }

    fn move_resize_window(
        &self,
        window: WindowId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        debug!("Move/resize window 0x{window:x} to {x},{y} {width}x{height}");
        let flags = MOVERESIZE_X
            | MOVERESIZE_Y
            | MOVERESIZE_WIDTH
            | MOVERESIZE_HEIGHT
            | (SOURCE_INDICATION << 12);
        self.client_message(
            window,
            self.atoms.net_moveresize_window,
            [flags, x as u32, y as u32, width, height],
        )
    }

    fn move_window(&self, window: WindowId, x: i32, y: i32) -> Result<()> {
        debug!("Move window 0x{window:x} to {x},{y}");
        let flags = MOVERESIZE_X | MOVERESIZE_Y | (SOURCE_INDICATION << 12);
        self.client_message(
            window,
            self.atoms.net_moveresize_window,
            [flags, x as u32, y as u32, 0, 0],
        )
    }

    fn set_state(&self, window: WindowId, action: StateAction, state: &str) -> Result<()> {
        let state_atom = self.atom(state)?;
        self.client_message(
            window,
            self.atoms.net_wm_state,
            [action.as_u32(), state_atom, 0, SOURCE_INDICATION, 0],
        )
    }

    fn set_desktop(&self, window: WindowId, desktop: u32) -> Result<()> {
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms.net_wm_desktop,
            AtomEnum::CARDINAL,
            &[desktop],
        )?;
        self.client_message(
            window,
            self.atoms.net_wm_desktop,
            [desktop, SOURCE_INDICATION, 0, 0, 0],
        )
    }

    fn set_normal_hints(&self, window: WindowId, hints: &NormalHints) -> Result<()> {
        let mut size_hints = WmSizeHints::new();
        if hints.flags & SIZE_HINT_P_MIN_SIZE != 0 {
            size_hints.min_size = Some((hints.min_width as i32, hints.min_height as i32));
        }
        size_hints
            .set_normal_hints(&self.conn, window)?
            .check()?;
        self.conn.flush()?;
        Ok(())
    }

    fn set_motif_hints(&self, window: WindowId, hints: &MotifHints) -> Result<()> {
        // Five CARD32s: flags, functions, decorations, input mode, status
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms.motif_wm_hints,
            self.atoms.motif_wm_hints,
            &[hints.flags, 0, hints.decorations, 0, 0],
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn strut_partial(&self, window: WindowId) -> Result<Option<StrutPartial>> {
        let values = self.property32(window, self.atoms.net_wm_strut_partial)?;
        if values.len() < 12 {
            return Ok(None);
        }
        Ok(Some(StrutPartial {
            left: values[0],
            right: values[1],
            top: values[2],
            bottom: values[3],
            left_start_y: values[4],
            left_end_y: values[5],
            right_start_y: values[6],
            right_end_y: values[7],
            top_start_x: values[8],
            top_end_x: values[9],
            bottom_start_x: values[10],
            bottom_end_x: values[11],
        }))
    }

    fn listen_to_window(&self, window: WindowId) -> Result<()> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::STRUCTURE_NOTIFY
                    | EventMask::PROPERTY_CHANGE
                    | EventMask::FOCUS_CHANGE,
            ),
        )?;
        self.conn.flush()?;
        Ok(())
    }
}
