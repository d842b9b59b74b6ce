//! View-model repositories.
//!
//! Each repository owns the state of one displayed collection as a [`Section`]: the data, the
//! error of the last fetch (if any) and whether a fetch is in flight. State lives in a `watch`
//! channel, so presentation code can take a snapshot with `read()` or follow changes with
//! `subscribe()`, and repositories never lock each other.
//!
//! Repositories never patch their data locally after a mutation. They refetch the affected
//! section from the backend and replace it wholesale, then publish invalidations so other
//! repositories refetch too (see [`crate::invalidation`]).
//!
//! - [`projects::ProjectsRepository`]: the project list (sidebar and home page)
//! - [`project_page::ProjectPage`]: one project with its keys and DeviceCheck credential
//! - [`device_check::DeviceCheckPoolRepository`]: credentials that can be linked to projects
//! - [`users::UserRepository`]: the signed-in user and usage counters

pub mod device_check;
pub mod project_page;
pub mod projects;
pub mod users;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::Result;
use crate::invalidation::Subscription;

pub use device_check::DeviceCheckPoolRepository;
pub use project_page::{PageOutcome, ProjectPage};
pub use projects::ProjectsRepository;
pub use users::UserRepository;

/// State of one independently loaded piece of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Section<T> {
    pub data: T,
    /// User-facing message of the last failed fetch
    pub error: Option<String>,
    pub loading: bool,
}

impl<T: Default> Default for Section<T> {
    fn default() -> Self {
        Self {
            data: T::default(),
            error: None,
            loading: false,
        }
    }
}

/// A [`Section`] behind a `watch` channel.
///
/// Loads may overlap (a refresh loop and a mutation both refetching). Only the most recently
/// started one is stored; older ones finishing later are dropped.
#[derive(Debug)]
pub struct Store<T> {
    sender: watch::Sender<Section<T>>,
    /// Bumped by every load start and every clear
    generation: AtomicU64,
}

impl<T: Clone + Default> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> Store<T> {
    pub fn new() -> Self {
        Self {
            sender: watch::channel(Section::default()).0,
            generation: AtomicU64::new(0),
        }
    }

    pub fn read(&self) -> Section<T> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Section<T>> {
        self.sender.subscribe()
    }

    /// Run a fetch, tracking `loading` and storing the outcome.
    ///
    /// Success replaces the data wholesale and clears the error. Failure resets the data to its
    /// empty value and records the user-facing message; the error is logged, not returned.
    ///
    /// If another load started (or the store was cleared) while this one was in flight, the
    /// outcome is discarded and `loading` is left to the newer load.
    pub async fn load<F>(&self, fetch: F) -> Section<T>
    where
        F: Future<Output = Result<T>>,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender.send_modify(|section| section.loading = true);
        let result = fetch.await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(ok = result.is_ok(), "Discarding outdated fetch");
            return self.read();
        }
        self.sender.send_modify(|section| match result {
            Ok(data) => {
                *section = Section {
                    data,
                    error: None,
                    loading: false,
                };
            }
            Err(e) => {
                e.log();
                *section = Section {
                    data: T::default(),
                    error: Some(e.user_message()),
                    loading: false,
                };
            }
        });
        self.read()
    }

    /// Drop data and error, as if never loaded
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sender.send_replace(Section::default());
    }
}

/// Spawn a task that calls `refresh` every time `subscription` wakes, until `shutdown` fires.
///
/// Callers take the subscription before calling this, so nothing published afterwards is missed.
/// Invalidations published while a refresh is running are folded into one more refresh.
pub fn spawn_refresh_on<F, Fut>(
    mut subscription: Subscription,
    shutdown: CancellationToken,
    mut refresh: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let topic = subscription.topic();
    tokio::spawn(async move {
        info!(%topic, "Refresh loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(%topic, "Refresh loop shutting down");
                    break;
                }
                changed = subscription.changed() => {
                    if !changed {
                        debug!(%topic, "Invalidation bus closed");
                        break;
                    }
                    debug!(%topic, "Invalidated, refreshing");
                    refresh().await;
                }
            }
        }
    })
}
