pub mod config;
pub mod events;
pub mod filter;
pub mod logging;
pub mod models;
pub mod pomodoro;
pub mod remote;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transfer;
pub mod views;
pub mod workflow;

pub use config::AppConfig;
pub use events::{StoreEvent, SyncStatus};
pub use filter::TaskFilter;
pub use models::{ListPatch, NewList, NewTask, Priority, Subtask, Task, TaskList, TaskPatch};
pub use remote::{RemoteBackend, RemoteError};
pub use scheduler::{LogNotifier, Notifier};
pub use store::{StoreError, TaskStore};

#[cfg(feature = "app")]
pub const SYNC_INTERVAL_SECS: u64 = 60;

/// Daemon entry point: opens the store from the environment and keeps it in sync until Ctrl-C.
#[cfg(feature = "app")]
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    #[cfg(not(test))]
    logging::init_logging(&config.data_dir)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

#[cfg(feature = "app")]
async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;
    use std::time::Duration;

    let remote: Option<Arc<dyn RemoteBackend>> = match &config.remote {
        Some(remote_config) => {
            log::info!("remote backend url={}", remote_config.base_url);
            Some(Arc::new(remote::HttpBackend::new(remote_config)?))
        }
        None => {
            log::warn!("no remote configured; changes stay local");
            None
        }
    };
    let authenticated = config
        .remote
        .as_ref()
        .is_some_and(|remote_config| remote_config.token.is_some());
    if config.remote.is_some() && !authenticated {
        log::warn!("remote configured without a token; sync stays paused");
    }

    let store = TaskStore::open(&config, remote, Arc::new(LogNotifier)).await?;
    store.set_authenticated(authenticated).await?;
    store.set_online(true).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(SYNC_INTERVAL_SECS));
    // the first tick completes immediately and set_online already synced
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = store.sync_now().await {
                    log::error!("periodic sync failed err={err}");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    log::error!("failed to listen for ctrl-c err={err}");
                }
                break;
            }
        }
    }

    log::info!("shutting down pending={}", store.status().pending);
    Ok(())
}
