//! Process entry point: wire the x11rb facade, the store, the tracker and
//! the input poller together and pump X events until the connection dies.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use retile::config::Config;
use retile::desktop::tracker::{Tracker, TrackerChannels};
use retile::input;
use retile::store::workplace::Env;
use retile::winsys::x11::X11WindowSystem;
use retile::winsys::{randr, EventObserver};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Starting retile {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("Failed to load configuration")?;

    // Bounded-retry connection; this is one of the two fatal paths
    let sys = Arc::new(X11WindowSystem::connect()?);
    sys.listen_root()?;

    let env = Env::new(sys.clone(), config).context("Failed to initialize workplace")?;
    env.wait_for_topology(10, Duration::from_millis(500));

    let (tracker, channels) = Tracker::new(Arc::clone(&env));

    // Initial scan of existing windows
    tracker.update();

    // Topology watcher invalidates the display cache on hotplug
    let _watcher = {
        let env = Arc::clone(&env);
        randr::spawn_watcher(move || env.invalidate_topology())
    };

    let _poller = input::spawn_poller(Arc::clone(&tracker));
    spawn_dispatcher(Arc::clone(&tracker), channels);

    // Blocking event pump; returns only when the connection is gone
    let observer: Arc<dyn EventObserver> = tracker.clone();
    let result = sys.run_event_pump(observer);

    warn!("Event pump stopped, flushing cache");
    tracker.flush();

    result
}

/// Drain the tracker's channels: actions feed the executor, events are only
/// observed. Consumers must always be draining so producers never block.
fn spawn_dispatcher(tracker: Arc<Tracker>, channels: TrackerChannels) {
    let TrackerChannels { events, actions } = channels;

    {
        let tracker = Arc::clone(&tracker);
        thread::Builder::new()
            .name("action-dispatcher".into())
            .spawn(move || {
                for action in actions {
                    input::execute_action(&tracker, &action);
                }
            })
            .expect("failed to spawn action dispatcher thread");
    }

    thread::Builder::new()
        .name("event-drain".into())
        .spawn(move || {
            for event in events {
                debug!("Event {event}");
            }
        })
        .expect("failed to spawn event drain thread");
}
