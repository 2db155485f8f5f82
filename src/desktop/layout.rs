//! Layout variants and their geometry math.
//!
//! Each layout owns a manager and turns its visible clients plus the
//! proportion tables into concrete geometry requests. The variant set is
//! closed: vertical (masters left), horizontal (masters top), maximized and
//! untiled pass-through.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::TilingConfig;
use crate::shared::Geometry;
use crate::store::client::Client;
use crate::store::manager::{Directions, Manager, ManagerRecord, ProportionRow};
use crate::store::workplace::Env;
use crate::store::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Vertical,
    Horizontal,
    Maximized,
    Untiled,
}

impl LayoutKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vertical => "vertical",
            Self::Horizontal => "horizontal",
            Self::Maximized => "maximized",
            Self::Untiled => "untiled",
        }
    }
}

/// Serialized layout state inside a workspace cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub name: String,
    pub manager: ManagerRecord,
}

pub struct Layout {
    kind: LayoutKind,
    manager: Manager,
}

/// The full closed set of layouts for one workspace location.
pub fn create_layouts(location: Location, config: &TilingConfig) -> Vec<Layout> {
    [
        LayoutKind::Vertical,
        LayoutKind::Horizontal,
        LayoutKind::Maximized,
        LayoutKind::Untiled,
    ]
    .into_iter()
    .map(|kind| Layout::new(kind, location, config))
    .collect()
}

impl Layout {
    pub fn new(kind: LayoutKind, location: Location, config: &TilingConfig) -> Self {
        Self {
            kind,
            manager: Manager::new(location, config),
        }
    }

    pub const fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub const fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn record(&self) -> LayoutRecord {
        LayoutRecord {
            name: self.name().into(),
            manager: self.manager.record(),
        }
    }

    /// Compute and request geometries for all visible clients.
    pub fn apply(&self, env: &Env) {
        match self.kind {
            LayoutKind::Vertical => self.apply_split(env, false),
            LayoutKind::Horizontal => self.apply_split(env, true),
            LayoutKind::Maximized => self.apply_maximized(env),
            LayoutKind::Untiled => {}
        }
    }

    fn apply_maximized(&self, env: &Env) {
        let workspace_rect = env.desktop_geometry(self.manager.location.screen);
        let order = env.stacked_windows();
        for client in self
            .manager
            .visible_masters(&order)
            .into_iter()
            .chain(self.manager.visible_slaves(&order))
        {
            client.move_window(
                env,
                workspace_rect.x,
                workspace_rect.y,
                workspace_rect.width as i32,
                workspace_rect.height as i32,
            );
        }
    }

    /// Two-region split. `horizontal` puts masters in the top band; the
    /// default puts them in the left column.
    fn apply_split(&self, env: &Env, horizontal: bool) {
        let workspace_rect = env.desktop_geometry(self.manager.location.screen);
        if workspace_rect.width == 0 || workspace_rect.height == 0 {
            return;
        }

        let order = env.stacked_windows();
        let masters = self.manager.visible_masters(&order);
        let slaves = self.manager.visible_slaves(&order);
        if masters.is_empty() && slaves.is_empty() {
            return;
        }
        debug!(
            "Apply {} layout [{} masters, {} slaves]",
            self.name(),
            masters.len(),
            slaves.len()
        );

        let proportions = self.manager.proportions();
        let master_share = proportions.master_slave[&2][0];

        let primary_total = if horizontal {
            workspace_rect.height
        } else {
            workspace_rect.width
        };
        let master_extent = if masters.is_empty() {
            0
        } else if slaves.is_empty() {
            primary_total
        } else {
            (primary_total as f64 * master_share).round() as u32
        };

        let (master_rect, slave_rect) = if horizontal {
            (
                Geometry::new(
                    workspace_rect.x,
                    workspace_rect.y,
                    workspace_rect.width,
                    master_extent,
                ),
                Geometry::new(
                    workspace_rect.x,
                    workspace_rect.y + master_extent as i32,
                    workspace_rect.width,
                    primary_total - master_extent,
                ),
            )
        } else {
            (
                Geometry::new(
                    workspace_rect.x,
                    workspace_rect.y,
                    master_extent,
                    workspace_rect.height,
                ),
                Geometry::new(
                    workspace_rect.x + master_extent as i32,
                    workspace_rect.y,
                    primary_total - master_extent,
                    workspace_rect.height,
                ),
            )
        };

        if !masters.is_empty() {
            let row = proportions
                .master_master
                .get(&masters.len())
                .cloned()
                .unwrap_or_default();
            stack_band(env, &masters, master_rect, &row, horizontal);
        }
        if !slaves.is_empty() {
            let row = proportions
                .slave_slave
                .get(&slaves.len())
                .cloned()
                .unwrap_or_default();
            stack_band(env, &slaves, slave_rect, &row, horizontal);
        }
    }

    /// Translate a drag on one window edge into a proportion mutation. Only
    /// the first matching edge is honored.
    pub fn update_proportions(&self, env: &Env, client: &Arc<Client>, directions: &Directions) {
        match self.kind {
            LayoutKind::Vertical => self.update_split_proportions(env, client, directions, false),
            LayoutKind::Horizontal => {
                self.update_split_proportions(env, client, directions, true);
            }
            LayoutKind::Maximized | LayoutKind::Untiled => {}
        }
    }

    fn update_split_proportions(
        &self,
        env: &Env,
        client: &Arc<Client>,
        directions: &Directions,
        horizontal: bool,
    ) {
        let geometry = match env.sys.decor_geometry(client.id()) {
            Ok(geometry) => geometry,
            Err(_) => return,
        };
        let workspace_rect = env.desktop_geometry(self.manager.location.screen);
        if workspace_rect.width == 0 || workspace_rect.height == 0 {
            return;
        }

        let (is_master, bucket_index, bucket_maximum) =
            if let Some(i) = self.manager.master_index(client) {
                (true, i, self.manager.masters_maximum())
            } else if let Some(i) = self.manager.slave_index(client) {
                (false, i, self.manager.slaves_maximum())
            } else {
                return;
            };
        if bucket_maximum == 0 {
            return;
        }
        let slot = bucket_index % bucket_maximum;

        let order = env.stacked_windows();
        let band_len = if is_master {
            self.manager.visible_masters(&order).len()
        } else {
            self.manager.visible_slaves(&order).len()
        };
        let row = if is_master {
            ProportionRow::MasterMaster
        } else {
            ProportionRow::SlaveSlave
        };

        let step = self.manager.proportion_step();
        let snap = |p: f64| (p / step).round() * step;

        // Fractions along the split axis and within the band
        let split_start = |g: Geometry| if horizontal { g.y } else { g.x };
        let split_end = |g: Geometry| if horizontal { g.bottom() } else { g.right() };
        let band_start = |g: Geometry| if horizontal { g.x } else { g.y };
        let band_end = |g: Geometry| if horizontal { g.right() } else { g.bottom() };
        let split_total = if horizontal {
            workspace_rect.height
        } else {
            workspace_rect.width
        } as f64;
        let band_total = if horizontal {
            workspace_rect.width
        } else {
            workspace_rect.height
        } as f64;

        let master_share_from = |edge: i32| {
            snap((edge - split_start(workspace_rect)) as f64 / split_total)
        };
        let band_boundary = |edge: i32, before: usize| {
            let fraction = (edge - band_start(workspace_rect)) as f64 / band_total;
            let prior: f64 = self.row_prefix(row, band_len, before);
            snap(fraction) - prior
        };

        // The split boundary reacts to the master/slave facing edges; band
        // boundaries react to edges between bucket neighbors.
        let (leading, trailing) = if horizontal {
            (directions.top, directions.bottom)
        } else {
            (directions.left, directions.right)
        };
        let (band_leading, band_trailing) = if horizontal {
            (directions.left, directions.right)
        } else {
            (directions.top, directions.bottom)
        };

        if leading && !is_master {
            let value = master_share_from(split_start(geometry));
            self.manager
                .set_proportions(ProportionRow::MasterSlave, 2, value, 0, 1);
            return;
        }
        if trailing && is_master {
            let value = master_share_from(split_end(geometry));
            self.manager
                .set_proportions(ProportionRow::MasterSlave, 2, value, 0, 1);
            return;
        }
        if band_leading && slot > 0 {
            let value = band_boundary(band_start(geometry), slot - 1);
            self.manager
                .set_proportions(row, band_len, value, slot - 1, slot);
            return;
        }
        if band_trailing && slot + 1 < band_len {
            let value = band_boundary(band_end(geometry), slot);
            self.manager.set_proportions(row, band_len, value, slot, slot + 1);
        }
    }

    /// Sum of the first `count` fractions of a row.
    fn row_prefix(&self, row: ProportionRow, key: usize, count: usize) -> f64 {
        let proportions = self.manager.proportions();
        let table = match row {
            ProportionRow::MasterSlave => &proportions.master_slave,
            ProportionRow::MasterMaster => &proportions.master_master,
            ProportionRow::SlaveSlave => &proportions.slave_slave,
        };
        table
            .get(&key)
            .map(|r| r.iter().take(count).sum())
            .unwrap_or(0.0)
    }
}

/// Stack clients inside one band, sliced by the given fractions along the
/// perpendicular axis. The last client absorbs rounding remainders.
fn stack_band(
    env: &Env,
    clients: &[Arc<Client>],
    band: Geometry,
    fractions: &[f64],
    horizontal: bool,
) {
    let total = if horizontal { band.width } else { band.height } as f64;
    let fallback = 1.0 / clients.len() as f64;

    let mut offset = 0.0;
    for (i, client) in clients.iter().enumerate() {
        let start = (total * offset).round() as i32;
        offset += fractions.get(i).copied().unwrap_or(fallback);
        let end = if i + 1 == clients.len() {
            total as i32
        } else {
            (total * offset).round() as i32
        };

        let geometry = if horizontal {
            Geometry::new(band.x + start, band.y, (end - start).max(1) as u32, band.height)
        } else {
            Geometry::new(band.x, band.y + start, band.width, (end - start).max(1) as u32)
        };
        client.move_window(
            env,
            geometry.x,
            geometry.y,
            geometry.width as i32,
            geometry.height as i32,
        );
    }
}
