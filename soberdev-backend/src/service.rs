use std::sync::Arc;

use anyhow::Context as _;
use soberdev_log::LoggerGuard;
use soberdev_task::{ChildTask, ShutdownHandle, spawn_task};
use tokio::runtime::{self, Runtime};

use crate::AppState;
use crate::config::ConfHandle;
use crate::listener::BackendListener;
use crate::token::{self, CacheCleanupTask};

pub const SERVICE_NAME: &str = "soberdev-backend";

#[allow(clippy::large_enum_variant)] // `Running` variant is bigger than `Stopped` but we don't care
enum BackendState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct BackendService {
    conf_handle: ConfHandle,
    state: BackendState,
    _logger_guard: LoggerGuard,
}

impl BackendService {
    pub fn load(conf_handle: ConfHandle) -> anyhow::Result<Self> {
        let conf = conf_handle.get_conf();

        let logger_guard = soberdev_log::init(
            &conf.log_file,
            conf.verbosity_profile.to_log_filter(),
            conf.log_directive.as_deref(),
        )
        .context("failed to setup logger")?;

        info!(version = env!("CARGO_PKG_VERSION"));

        let conf_file = conf_handle.get_conf_file();
        trace!(?conf_file);

        if !conf.debug.is_default() {
            warn!(
                ?conf.debug,
                "**DEBUG OPTIONS ARE ENABLED, PLEASE DO NOT USE IN PRODUCTION**",
            );
        }

        Ok(BackendService {
            conf_handle,
            state: BackendState::Stopped,
            _logger_guard: logger_guard,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;

        let conf_handle = self.conf_handle.clone();
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        // Tasks must be spawned from inside the runtime to bind the sockets.
        let tasks = runtime.block_on(spawn_tasks(conf_handle, shutdown_signal))?;

        for task in tasks {
            task.detach();
        }

        self.state = BackendState::Running {
            shutdown_handle,
            runtime,
        };

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, BackendState::Stopped) {
            BackendState::Stopped => {
                info!("Attempted to stop the backend service, but it's already stopped");
            }
            BackendState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping the backend service");

                shutdown_handle.signal();

                runtime.shutdown_background();

                self.state = BackendState::Stopped;
            }
        }
    }
}

async fn spawn_tasks(
    conf_handle: ConfHandle,
    shutdown_signal: soberdev_task::ShutdownSignal,
) -> anyhow::Result<Vec<ChildTask<anyhow::Result<()>>>> {
    let conf = conf_handle.get_conf();

    let token_cache = Arc::new(token::new_token_cache());

    let user_store = crate::make_user_store(conf.database_path.as_str())
        .await
        .context("failed to open the user store")?;

    let state = AppState {
        conf_handle: conf_handle.clone(),
        token_cache: Arc::clone(&token_cache),
        user_store,
    };

    let mut tasks = Vec::with_capacity(conf.listeners.len() + 2);

    for listener_urls in &conf.listeners {
        let listener = BackendListener::init_and_bind(listener_urls, state.clone())
            .with_context(|| format!("failed to initialize {}", listener_urls.internal_url))?;

        tasks.push(spawn_task(listener, shutdown_signal.clone()));
    }

    tasks.push(spawn_task(CacheCleanupTask { cache: token_cache }, shutdown_signal.clone()));

    tasks.push(spawn_task(
        soberdev_log::LogDeleterTask {
            path: conf.log_file.clone(),
        },
        shutdown_signal,
    ));

    Ok(tasks)
}
