use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::hub::{DataHub, HubEvent};
use crate::registry::GenOsRegistry;
use crate::status;
use crate::store::PgRemoteStore;
use crate::traits::RemoteStore;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. Remote store client
    let store = PgRemoteStore::new(config.database.clone());

    // 2. Registry reader
    let registry = Arc::new(GenOsRegistry::new(config.registry.clone()));

    // 3. Hub
    let hub = DataHub::new(store.clone(), registry, config.refresh.clone());
    hub.initialize().await;

    // 4. Status server
    if config.status.enabled {
        let status_cfg = config.status.clone();
        let hub_for_status = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(e) = status::serve(&status_cfg, hub_for_status).await {
                tracing::error!("Status server error: {}", e);
            }
        });
    }

    // 5. Event log subscriber
    let mut events = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(HubEvent::DataChanged) => debug!("Data changed"),
                Ok(HubEvent::ConnectionChanged(state)) => {
                    info!("Connection state: {}", state.as_str());
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Event subscriber lagged by {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 6. Auto-connect (failure leaves the daemon in local-only mode)
    if config.refresh.auto_connect {
        if let Err(e) = hub.connect().await {
            warn!("Auto-connect failed, continuing local-only: {}", e);
        }
    }

    // 7. Initial refresh
    hub.refresh_all().await;

    // 8. Periodic refresh
    if config.refresh.interval_secs > 0 {
        let interval = Duration::from_secs(config.refresh.interval_secs);
        let hub_for_refresh = Arc::clone(&hub);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                hub_for_refresh.refresh_all().await;
            }
        });
    }

    // 9. Connection liveness probe. The pool has no out-of-band error
    // events, so a trivial query through the fail-soft path is what turns
    // background connection loss into the error transition and retry.
    if config.database.probe_interval_secs > 0 {
        let interval = Duration::from_secs(config.database.probe_interval_secs);
        let store_for_probe = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if store_for_probe.is_connected() {
                    store_for_probe.ping().await;
                }
            }
        });
    }

    // 10. Run until SIGINT
    info!("gendash v{} running", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    hub.disconnect().await;

    Ok(())
}
