//! The signed-in user, including the usage counters behind the low-limit banner.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{Section, Store, spawn_refresh_on};
use crate::api::ProxyApi;
use crate::api::models::users::User;
use crate::errors::Result;
use crate::invalidation::{InvalidationBus, Publisher, Topic};

pub struct UserRepository {
    api: Arc<dyn ProxyApi>,
    publisher: Publisher,
    state: Store<Option<User>>,
}

impl UserRepository {
    pub fn new(api: Arc<dyn ProxyApi>, bus: InvalidationBus) -> Self {
        Self {
            api,
            publisher: bus.publisher(),
            state: Store::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Section<Option<User>> {
        self.state.load(async { self.api.get_me().await.map(Some) }).await
    }

    pub fn read(&self) -> Section<Option<User>> {
        self.state.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<Section<Option<User>>> {
        self.state.subscribe()
    }

    /// Register the signed-in identity with the backend, then refetch.
    #[instrument(skip(self))]
    pub async fn register(&self) -> Result<User> {
        let user = self.api.register_me().await?;
        info!(user_id = %user.id, "User registered");
        self.fetch().await;
        self.publisher.publish(Topic::User);
        Ok(user)
    }

    /// Refetch whenever the user is invalidated elsewhere, until `shutdown` fires.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let subscription = self.publisher.subscribe(Topic::User);
        spawn_refresh_on(subscription, shutdown, move || {
            let repository = self.clone();
            async move {
                repository.fetch().await;
            }
        })
    }
}
