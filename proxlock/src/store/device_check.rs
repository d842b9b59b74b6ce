//! The user's pool of reusable DeviceCheck credentials.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{Section, Store, spawn_refresh_on};
use crate::api::ProxyApi;
use crate::api::models::device_check::DeviceCheckCredential;
use crate::invalidation::{InvalidationBus, Topic};

pub struct DeviceCheckPoolRepository {
    api: Arc<dyn ProxyApi>,
    bus: InvalidationBus,
    state: Store<Vec<DeviceCheckCredential>>,
}

impl DeviceCheckPoolRepository {
    pub fn new(api: Arc<dyn ProxyApi>, bus: InvalidationBus) -> Self {
        Self {
            api,
            bus,
            state: Store::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Section<Vec<DeviceCheckCredential>> {
        self.state.load(self.api.list_device_check_pool()).await
    }

    pub fn read(&self) -> Section<Vec<DeviceCheckCredential>> {
        self.state.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<Section<Vec<DeviceCheckCredential>>> {
        self.state.subscribe()
    }

    pub fn invalidate(&self) {
        self.bus.publish(Topic::DeviceCheckPool);
    }

    /// Find a pooled credential by team and key identifiers
    pub fn find(&self, team_id: &str, key_id: &str) -> Option<DeviceCheckCredential> {
        self.state
            .read()
            .data
            .into_iter()
            .find(|c| c.team_id == team_id && c.key_id == key_id)
    }

    /// Refetch whenever the pool is invalidated, until `shutdown` fires.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let subscription = self.bus.subscribe(Topic::DeviceCheckPool);
        spawn_refresh_on(subscription, shutdown, move || {
            let repository = self.clone();
            async move {
                repository.fetch().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryProxyApi;

    #[tokio::test]
    async fn test_fetch_and_find() {
        let api = Arc::new(InMemoryProxyApi::new());
        api.seed_pool_credential("ABCDE12345", "KEY1234567");
        let repo = DeviceCheckPoolRepository::new(api.clone(), InvalidationBus::new());

        assert!(repo.find("ABCDE12345", "KEY1234567").is_none(), "nothing before the first fetch");
        let section = repo.fetch().await;
        assert_eq!(section.data.len(), 1);
        assert!(repo.find("ABCDE12345", "KEY1234567").is_some());
        assert!(repo.find("ABCDE12345", "OTHER").is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_empties_pool() {
        let api = Arc::new(InMemoryProxyApi::new());
        api.seed_pool_credential("ABCDE12345", "KEY1234567");
        let repo = DeviceCheckPoolRepository::new(api.clone(), InvalidationBus::new());
        repo.fetch().await;

        api.fail_next("list_device_check_pool");
        let section = repo.fetch().await;
        assert!(section.data.is_empty());
        assert!(section.error.is_some());
    }
}
