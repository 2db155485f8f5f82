//! Interned EWMH/ICCCM atoms used by the x11rb adapter.

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, ConnectionExt as _};

/// Holds all atoms the adapter requests or reads eagerly.
#[derive(Debug, Clone, Copy)]
pub struct Atoms {
    pub utf8_string: Atom,
    pub net_supporting_wm_check: Atom,
    pub net_wm_name: Atom,
    pub net_client_list_stacking: Atom,
    pub net_active_window: Atom,
    pub net_number_of_desktops: Atom,
    pub net_current_desktop: Atom,
    pub net_wm_desktop: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_state: Atom,
    pub net_frame_extents: Atom,
    pub gtk_frame_extents: Atom,
    pub net_wm_strut_partial: Atom,
    pub net_moveresize_window: Atom,
    pub motif_wm_hints: Atom,
}

impl Atoms {
    /// Intern all required atoms.
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn
                .intern_atom(false, name.as_bytes())?
                .reply()
                .with_context(|| format!("Failed to intern atom {name}"))?
                .atom)
        };

        Ok(Self {
            utf8_string: intern("UTF8_STRING")?,
            net_supporting_wm_check: intern("_NET_SUPPORTING_WM_CHECK")?,
            net_wm_name: intern("_NET_WM_NAME")?,
            net_client_list_stacking: intern("_NET_CLIENT_LIST_STACKING")?,
            net_active_window: intern("_NET_ACTIVE_WINDOW")?,
            net_number_of_desktops: intern("_NET_NUMBER_OF_DESKTOPS")?,
            net_current_desktop: intern("_NET_CURRENT_DESKTOP")?,
            net_wm_desktop: intern("_NET_WM_DESKTOP")?,
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_frame_extents: intern("_NET_FRAME_EXTENTS")?,
            gtk_frame_extents: intern("_GTK_FRAME_EXTENTS")?,
            net_wm_strut_partial: intern("_NET_WM_STRUT_PARTIAL")?,
            net_moveresize_window: intern("_NET_MOVERESIZE_WINDOW")?,
            motif_wm_hints: intern("_MOTIF_WM_HINTS")?,
        })
    }
}
