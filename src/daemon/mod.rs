//! The long-running scheduler.
//!
//! [`RetryLoop`] ticks every repository in turn, retrying failed ticks after
//! graduated delays, then sleeps and starts again. Ticks run on tokio's
//! blocking pool since they spawn git and make blocking HTTP calls.
//!
//! Shutdown goes through [`Shutdown`]: it wakes any sleep or retry wait
//! straight away and trips a [`CancelToken`] that the in-flight tick checks
//! between branches.

pub mod worker;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::notify::Notifier;

pub use worker::RepoWorker;

/// Set once shutdown is requested; never reset.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shutdown trigger shared by the signal handler and the loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    cancel: CancelToken,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            cancel: CancelToken::new(),
        }
    }

    pub fn trigger(&self) {
        self.cancel.cancel();
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Trigger `shutdown` on SIGTERM or SIGINT.
#[cfg(unix)]
pub fn spawn_signal_handler(shutdown: Shutdown) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        shutdown.trigger();
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_handler(shutdown: Shutdown) -> Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C");
        }
        shutdown.trigger();
    }))
}

/// One repository's unit of work, run on the blocking pool.
pub trait RepoTick: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn tick(&self, cancel: &CancelToken) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Pause between full passes over all repositories.
    pub sleep: Duration,
    /// Waits before each retry of a failed tick.
    pub retry_delays: Vec<Duration>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            sleep: Duration::from_secs(60),
            retry_delays: vec![Duration::from_secs(600), Duration::from_secs(3600)],
        }
    }
}

pub struct RetryLoop {
    repos: Vec<Arc<dyn RepoTick>>,
    options: LoopOptions,
    notifier: Arc<dyn Notifier>,
    shutdown: Shutdown,
    /// Repositories that exhausted their retries; they get one attempt per
    /// pass until a tick succeeds.
    paused: HashSet<String>,
}

impl RetryLoop {
    pub fn new(
        repos: Vec<Arc<dyn RepoTick>>,
        options: LoopOptions,
        notifier: Arc<dyn Notifier>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            repos,
            options,
            notifier,
            shutdown,
            paused: HashSet::new(),
        }
    }

    /// Run until shutdown, then tell the administrator arcyd stopped.
    pub async fn run(mut self) -> Result<()> {
        info!(repos = self.repos.len(), "starting");

        let repos = self.repos.clone();
        'passes: loop {
            for repo in &repos {
                if self.shutdown.is_triggered() {
                    break 'passes;
                }
                self.run_repo(repo).await;
            }

            if self.wait(self.options.sleep).await {
                break;
            }
        }

        info!("stopping");
        let notifier = Arc::clone(&self.notifier);
        tokio::task::spawn_blocking(move || notifier.stopped())
            .await
            .map_err(|e| anyhow!("stop notification panicked: {e}"))??;
        Ok(())
    }

    async fn tick_once(&self, repo: &Arc<dyn RepoTick>) -> Result<()> {
        let repo = Arc::clone(repo);
        let cancel = self.shutdown.token();
        tokio::task::spawn_blocking(move || repo.tick(&cancel))
            .await
            .map_err(|e| anyhow!("tick panicked: {e}"))?
    }

    async fn run_repo(&mut self, repo: &Arc<dyn RepoTick>) {
        let name = repo.name().to_string();
        let delays = if self.paused.contains(&name) {
            Vec::new()
        } else {
            self.options.retry_delays.clone()
        };
        let mut delays = delays.into_iter();

        loop {
            let err = match self.tick_once(repo).await {
                Ok(()) => {
                    if self.paused.remove(&name) {
                        info!(repo = %name, "resumed after successful tick");
                    }
                    return;
                }
                Err(err) => err,
            };

            if self.shutdown.is_triggered() {
                warn!(repo = %name, "tick failed during shutdown: {err:#}");
                return;
            }

            match delays.next() {
                Some(delay) => {
                    warn!(repo = %name, ?delay, "tick failed, will retry: {err:#}");
                    if self.wait(delay).await {
                        return;
                    }
                }
                None => {
                    error!(repo = %name, "tick failed, retries exhausted: {err:#}");
                    if self.paused.insert(name.clone()) {
                        self.report_paused(&name, &err).await;
                    }
                    return;
                }
            }
        }
    }

    async fn report_paused(&self, name: &str, err: &anyhow::Error) {
        let message = format!(
            "arcyd paused repository '{name}' after repeated failures. It will be \
             retried once per pass until it succeeds.\n\n{err:#}\n"
        );
        let notifier = Arc::clone(&self.notifier);
        let sent = tokio::task::spawn_blocking(move || notifier.system_exception(&message)).await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(repo = %name, "failed to notify administrator: {e:#}"),
            Err(e) => error!(repo = %name, "administrator notification panicked: {e}"),
        }
    }

    /// Sleep for `duration`; true if shutdown was requested instead.
    async fn wait(&self, duration: Duration) -> bool {
        let mut rx = self.shutdown.subscribe();
        if *rx.borrow_and_update() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = rx.changed() => changed.is_err() || *rx.borrow(),
        }
    }
}
