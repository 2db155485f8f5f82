//! RandR head enumeration and hotplug watching.

use anyhow::{Context as _, Result};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as _, NotifyMask};
use x11rb::protocol::xproto::Window;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use super::Head;
use crate::shared::Geometry;

/// Enumerate connected physical heads, sorted by x-coordinate. The primary
/// output is flagged; without one, the largest head by area takes its place.
pub fn physical_heads<C: Connection>(conn: &C, root: Window) -> Result<Vec<Head>> {
    let resources = conn
        .randr_get_screen_resources_current(root)?
        .reply()
        .context("Error retrieving screen resources")?;
    let primary = conn
        .randr_get_output_primary(root)?
        .reply()
        .context("Error retrieving primary output")?;

    let mut heads: Vec<Head> = Vec::new();
    let mut has_primary = false;
    let mut biggest = 0usize;

    for output in resources.outputs {
        let oinfo = conn
            .randr_get_output_info(output, 0)?
            .reply()
            .context("Error retrieving output information")?;

        // Disconnected or powered-off outputs carry no head
        if oinfo.connection != randr::Connection::CONNECTED || oinfo.crtc == 0 {
            continue;
        }

        let cinfo = conn
            .randr_get_crtc_info(oinfo.crtc, 0)?
            .reply()
            .context("Error retrieving crtc information")?;

        let head = Head {
            id: output,
            name: String::from_utf8_lossy(&oinfo.name).into_owned(),
            primary: output == primary.output,
            geometry: Geometry::new(
                cinfo.x as i32,
                cinfo.y as i32,
                cinfo.width as u32,
                cinfo.height as u32,
            ),
        };

        has_primary |= head.primary;
        if head.geometry.area() > heads.get(biggest).map_or(0, |h: &Head| h.geometry.area()) {
            biggest = heads.len();
        }
        heads.push(head);
    }

    if !has_primary && !heads.is_empty() {
        heads[biggest].primary = true;
    }

    heads.sort_by_key(|h| h.geometry.x);
    Ok(heads)
}

const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Spawn the hotplug watcher. It owns a dedicated connection, re-selects
/// RandR input on every (re)connect, and invokes `on_change` for each screen
/// or output change. Connection loss is retried with exponential backoff and
/// never escalates.
pub fn spawn_watcher<F>(on_change: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    thread::Builder::new()
        .name("randr-watcher".into())
        .spawn(move || {
            let mut backoff = MIN_BACKOFF;

            loop {
                let (conn, screen_num) = match x11rb::connect(None) {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("RandR monitor connect failed; retrying: {e}");
                        thread::sleep(backoff);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                };
                let root = conn.setup().roots[screen_num].root;

                if let Err(e) = select_input(&conn, root) {
                    warn!("RandR select input failed; retrying: {e:#}");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }

                debug!("RandR event monitor started");
                backoff = MIN_BACKOFF;

                loop {
                    match conn.wait_for_event() {
                        Ok(Event::RandrScreenChangeNotify(_)) | Ok(Event::RandrNotify(_)) => {
                            debug!("RandR event: display cache invalidated");
                            on_change();
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("RandR monitor disconnected; will retry: {e}");
                            break;
                        }
                    }
                }

                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        })
        .expect("failed to spawn randr watcher thread")
}

fn select_input(conn: &RustConnection, root: Window) -> Result<()> {
    conn.randr_select_input(
        root,
        NotifyMask::SCREEN_CHANGE | NotifyMask::OUTPUT_CHANGE,
    )?
    .check()
    .context("randr select input rejected")?;
    Ok(())
}
