//! Master/slave partitioning per workspace.
//!
//! The manager is the exclusive owner of its two client buckets and the
//! proportion tables. Every mutation holds the internal lock for its whole
//! duration; readers get copies.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::client::Client;
use super::Location;
use crate::config::TilingConfig;
use crate::winsys::WindowId;

/// Client list selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Masters followed by slaves, internal order.
    Stacked,
    /// Filtered by the current bottom-to-top stacking order.
    Ordered,
    /// Top clients per bucket, capped at the bucket maximum.
    Visible,
}

/// Which edges of a window a drag changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Directions {
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
    pub left: bool,
}

/// Proportion row selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProportionRow {
    MasterSlave,
    MasterMaster,
    SlaveSlave,
}

/// Partition-count indexed fraction tables; every row sums to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proportions {
    pub master_slave: HashMap<usize, Vec<f64>>,
    pub master_master: HashMap<usize, Vec<f64>>,
    pub slave_slave: HashMap<usize, Vec<f64>>,
}

/// Even splits for every partition count up to `n`.
pub fn calc_proportions(n: usize) -> HashMap<usize, Vec<f64>> {
    let mut table = HashMap::new();
    for i in 1..=n {
        table.insert(i, vec![1.0 / i as f64; i]);
    }
    table
}

struct Bucket {
    maximum: usize,
    stacked: Vec<Arc<Client>>,
}

impl Bucket {
    fn index_of(&self, client: &Client) -> Option<usize> {
        self.stacked.iter().position(|c| c.id() == client.id())
    }
}

struct Inner {
    proportions: Proportions,
    masters: Bucket,
    slaves: Bucket,
}

/// Serialized manager state; the client buckets themselves are rebuilt from
/// live windows on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub location: Location,
    pub proportions: Proportions,
    pub masters_maximum: usize,
    pub slaves_maximum: usize,
    pub decoration: bool,
}

pub struct Manager {
    pub location: Location,
    decoration: AtomicBool,
    masters_limit: usize,
    slaves_limit: usize,
    proportion_step: f64,
    proportion_min: f64,
    inner: Mutex<Inner>,
}

impl Manager {
    pub fn new(location: Location, config: &TilingConfig) -> Self {
        Self {
            location,
            decoration: AtomicBool::new(config.window_decoration),
            masters_limit: config.window_masters_max,
            slaves_limit: config.window_slaves_max,
            proportion_step: config.proportion_step,
            proportion_min: config.proportion_min,
            inner: Mutex::new(Inner {
                proportions: Proportions {
                    master_slave: calc_proportions(2),
                    master_master: calc_proportions(config.window_masters_max),
                    slave_slave: calc_proportions(config.window_slaves_max),
                },
                masters: Bucket { maximum: 1, stacked: Vec::new() },
                slaves: Bucket {
                    maximum: config.window_slaves_max,
                    stacked: Vec::new(),
                },
            }),
        }
    }

    // ---- decoration ----------------------------------------------------

    pub fn enable_decoration(&self) {
        self.decoration.store(true, Ordering::SeqCst);
    }

    pub fn disable_decoration(&self) {
        self.decoration.store(false, Ordering::SeqCst);
    }

    pub fn decoration_enabled(&self) -> bool {
        self.decoration.load(Ordering::SeqCst)
    }

    // ---- bucket mutation ----------------------------------------------

    /// Prepend to masters while below the cap, otherwise to slaves. Adding a
    /// client twice is a no-op.
    pub fn add_client(&self, client: &Arc<Client>) {
        let mut inner = self.inner.lock();
        if inner.masters.index_of(client).is_some() || inner.slaves.index_of(client).is_some()
        {
            return;
        }
        debug!(
            "Add client for manager [{}, manager-{}-{}]",
            client.latest().class,
            self.location.desktop,
            self.location.screen
        );

        if inner.masters.stacked.len() < inner.masters.maximum {
            inner.masters.stacked.insert(0, Arc::clone(client));
        } else {
            inner.slaves.stacked.insert(0, Arc::clone(client));
        }
    }

    /// Drop a client. A removed master is backfilled by the front slave so
    /// the master area never collapses while slaves remain.
    pub fn remove_client(&self, client: &Client) {
        let mut inner = self.inner.lock();
        debug!(
            "Remove client from manager [{}, manager-{}-{}]",
            client.latest().class,
            self.location.desktop,
            self.location.screen
        );

        if let Some(mi) = inner.masters.index_of(client) {
            if !inner.slaves.stacked.is_empty() {
                let replacement = inner.slaves.stacked.remove(0);
                inner.masters.stacked[mi] = replacement;
            } else {
                inner.masters.stacked.remove(mi);
            }
            return;
        }

        if let Some(si) = inner.slaves.index_of(client) {
            inner.slaves.stacked.remove(si);
        }
    }

    /// Swap the client with the current front master.
    pub fn make_master(&self, client: &Arc<Client>) {
        let mut inner = self.inner.lock();
        info!("Make window master [{}]", client.latest().class);

        if let Some(front) = inner.masters.stacked.first().cloned() {
            swap_in_buckets(&mut inner, client, &front);
        }
    }

    pub fn swap_clients(&self, a: &Arc<Client>, b: &Arc<Client>) {
        let mut inner = self.inner.lock();
        swap_in_buckets(&mut inner, a, b);
    }

    /// Grow the master area by taking the front slave.
    pub fn increase_master(&self) {
        let mut inner = self.inner.lock();
        if inner.slaves.stacked.len() > 1 && inner.masters.maximum < self.masters_limit {
            inner.masters.maximum += 1;
            let promoted = inner.slaves.stacked.remove(0);
            inner.masters.stacked.push(promoted);
        }
        info!("Increase masters to {}", inner.masters.maximum);
    }

    /// Shrink the master area, demoting the last master to the front slave.
    pub fn decrease_master(&self) {
        let mut inner = self.inner.lock();
        if !inner.masters.stacked.is_empty() {
            inner.masters.maximum -= 1;
            let demoted = inner.masters.stacked.pop().expect("non-empty masters");
            inner.slaves.stacked.insert(0, demoted);
        }
        info!("Decrease masters to {}", inner.masters.maximum);
    }

    pub fn increase_slave(&self) {
        let mut inner = self.inner.lock();
        if inner.slaves.maximum < self.slaves_limit {
            inner.slaves.maximum += 1;
        }
        info!("Increase slaves to {}", inner.slaves.maximum);
    }

    pub fn decrease_slave(&self) {
        let mut inner = self.inner.lock();
        if inner.slaves.maximum > 1 {
            inner.slaves.maximum -= 1;
        }
        info!("Decrease slaves to {}", inner.slaves.maximum);
    }

    // ---- proportions ---------------------------------------------------

    /// Step the master/slave split up, snapped to the step lattice.
    pub fn increase_proportion(&self) {
        let value = self.rounded_master_share() + self.proportion_step;
        self.set_proportions(ProportionRow::MasterSlave, 2, value, 0, 1);
    }

    /// Step the master/slave split down, snapped to the step lattice.
    pub fn decrease_proportion(&self) {
        let value = self.rounded_master_share() - self.proportion_step;
        self.set_proportions(ProportionRow::MasterSlave, 2, value, 0, 1);
    }

    fn rounded_master_share(&self) -> f64 {
        let inner = self.inner.lock();
        let current = inner.proportions.master_slave[&2][0];
        let precision = 1.0 / self.proportion_step;
        (current * precision).round() / precision
    }

    /// Mutate the proportion pair `(i, j)` of one row. Returns false without
    /// mutation when the indices are invalid or either value would leave the
    /// clamp range.
    pub fn set_proportions(
        &self,
        row: ProportionRow,
        key: usize,
        value: f64,
        i: usize,
        j: usize,
    ) -> bool {
        let mut inner = self.inner.lock();
        let table = match row {
            ProportionRow::MasterSlave => &mut inner.proportions.master_slave,
            ProportionRow::MasterMaster => &mut inner.proportions.master_master,
            ProportionRow::SlaveSlave => &mut inner.proportions.slave_slave,
        };
        let Some(row) = table.get_mut(&key) else {
            return false;
        };

        if i == j || i >= row.len() || j >= row.len() {
            return false;
        }

        let clamp = |p: f64| p.clamp(self.proportion_min, 1.0 - self.proportion_min);

        if value != clamp(value) {
            return false;
        }
        let neighbor = row[j] + (row[i] - value);
        if neighbor != clamp(neighbor) {
            return false;
        }

        row[i] = value;
        row[j] = neighbor;
        true
    }

    pub fn proportions(&self) -> Proportions {
        self.inner.lock().proportions.clone()
    }

    pub const fn proportion_step(&self) -> f64 {
        self.proportion_step
    }

    // ---- queries -------------------------------------------------------

    pub fn is_master(&self, client: &Client) -> bool {
        self.inner.lock().masters.index_of(client).is_some()
    }

    pub fn is_slave(&self, client: &Client) -> bool {
        self.inner.lock().slaves.index_of(client).is_some()
    }

    pub fn master_index(&self, client: &Client) -> Option<usize> {
        self.inner.lock().masters.index_of(client)
    }

    pub fn slave_index(&self, client: &Client) -> Option<usize> {
        self.inner.lock().slaves.index_of(client)
    }

    pub fn masters_maximum(&self) -> usize {
        self.inner.lock().masters.maximum
    }

    pub fn slaves_maximum(&self) -> usize {
        self.inner.lock().slaves.maximum
    }

    pub fn client_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.masters.stacked.len() + inner.slaves.stacked.len()
    }

    /// Clients by selector. `order` is the global bottom-to-top stacking
    /// order, consulted by the `Ordered` and `Visible` selectors.
    pub fn clients(&self, selection: Selection, order: &[WindowId]) -> Vec<Arc<Client>> {
        let inner = self.inner.lock();
        match selection {
            Selection::Stacked => inner
                .masters
                .stacked
                .iter()
                .chain(inner.slaves.stacked.iter())
                .cloned()
                .collect(),
            Selection::Ordered => {
                let mut clients = ordered(&inner.masters, order);
                clients.extend(ordered(&inner.slaves, order));
                clients
            }
            Selection::Visible => {
                let mut clients: Vec<Arc<Client>> =
                    visible_slots(&inner.masters, order).into_iter().flatten().collect();
                clients.extend(visible_slots(&inner.slaves, order).into_iter().flatten());
                clients
            }
        }
    }

    /// Visible masters in slot order.
    pub fn visible_masters(&self, order: &[WindowId]) -> Vec<Arc<Client>> {
        let inner = self.inner.lock();
        visible_slots(&inner.masters, order).into_iter().flatten().collect()
    }

    /// Visible slaves in slot order.
    pub fn visible_slaves(&self, order: &[WindowId]) -> Vec<Arc<Client>> {
        let inner = self.inner.lock();
        visible_slots(&inner.slaves, order).into_iter().flatten().collect()
    }

    /// The tracked client owning the active window, if any.
    pub fn active_client(&self, active: WindowId) -> Option<Arc<Client>> {
        self.clients(Selection::Stacked, &[])
            .into_iter()
            .find(|c| c.id() == active)
    }

    /// The client after the active one, wrapping around.
    pub fn next_client(&self, active: WindowId) -> Option<Arc<Client>> {
        let clients = self.clients(Selection::Stacked, &[]);
        let position = clients.iter().position(|c| c.id() == active)?;
        let next = (position + 1) % clients.len();
        Some(Arc::clone(&clients[next]))
    }

    /// The client before the active one, wrapping around.
    pub fn previous_client(&self, active: WindowId) -> Option<Arc<Client>> {
        let clients = self.clients(Selection::Stacked, &[]);
        let position = clients.iter().position(|c| c.id() == active)?;
        let previous = position.checked_sub(1).unwrap_or(clients.len() - 1);
        Some(Arc::clone(&clients[previous]))
    }

    // ---- persistence ---------------------------------------------------

    pub fn record(&self) -> ManagerRecord {
        let inner = self.inner.lock();
        ManagerRecord {
            location: self.location,
            proportions: inner.proportions.clone(),
            masters_maximum: inner.masters.maximum,
            slaves_maximum: inner.slaves.maximum,
            decoration: self.decoration.load(Ordering::SeqCst),
        }
    }

    /// Apply a cached record, validating each proportion row before use.
    pub fn apply_record(&self, record: &ManagerRecord) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.masters.maximum = record.masters_maximum.clamp(1, self.masters_limit);
        inner.slaves.maximum = record.slaves_maximum.clamp(1, self.slaves_limit);
        self.decoration.store(record.decoration, Ordering::SeqCst);

        let valid_row = |key: usize, row: &Vec<f64>| -> bool {
            row.len() == key
                && (row.iter().sum::<f64>() - 1.0).abs() < 1e-6
                && row
                    .iter()
                    .all(|p| *p >= self.proportion_min && *p <= 1.0 - self.proportion_min)
        };
        for (target, source) in [
            (&mut inner.proportions.master_slave, &record.proportions.master_slave),
            (&mut inner.proportions.master_master, &record.proportions.master_master),
            (&mut inner.proportions.slave_slave, &record.proportions.slave_slave),
        ] {
            for (key, row) in source {
                if valid_row(*key, row) && target.contains_key(key) {
                    target.insert(*key, row.clone());
                }
            }
        }
    }
}

/// Swap two clients across the four bucket membership cases. Order within
/// the uninvolved bucket positions is preserved.
fn swap_in_buckets(inner: &mut Inner, a: &Arc<Client>, b: &Arc<Client>) {
    info!("Swap clients [{}-{}]", a.latest().class, b.latest().class);

    let ma = inner.masters.index_of(a);
    let sa = inner.slaves.index_of(a);
    let mb = inner.masters.index_of(b);
    let sb = inner.slaves.index_of(b);

    match (ma, sa, mb, sb) {
        (Some(i), _, Some(j), _) => inner.masters.stacked.swap(i, j),
        (Some(i), _, _, Some(j)) => {
            inner.masters.stacked[i] = Arc::clone(b);
            inner.slaves.stacked[j] = Arc::clone(a);
        }
        (_, Some(i), Some(j), _) => {
            inner.slaves.stacked[i] = Arc::clone(b);
            inner.masters.stacked[j] = Arc::clone(a);
        }
        (_, Some(i), _, Some(j)) => inner.slaves.stacked.swap(i, j),
        _ => {}
    }
}

/// Bucket clients filtered by the global stacking order.
fn ordered(bucket: &Bucket, order: &[WindowId]) -> Vec<Arc<Client>> {
    let mut clients = Vec::new();
    for window in order {
        if let Some(client) = bucket.stacked.iter().find(|c| c.id() == *window) {
            clients.push(Arc::clone(client));
        }
    }
    clients
}

/// The top clients of a bucket placed at `index mod maximum`.
fn visible_slots(bucket: &Bucket, order: &[WindowId]) -> Vec<Option<Arc<Client>>> {
    let count = bucket.stacked.len().min(bucket.maximum);
    let mut slots: Vec<Option<Arc<Client>>> = vec![None; count];
    if bucket.maximum == 0 || count == 0 {
        return slots;
    }

    let source = if order.is_empty() {
        bucket.stacked.clone()
    } else {
        ordered(bucket, order)
    };
    for client in source {
        if let Some(index) = bucket.index_of(&client) {
            let slot = index % bucket.maximum;
            if slot < slots.len() {
                slots[slot] = Some(client);
            }
        }
    }
    slots
}
