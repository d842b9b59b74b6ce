//! The project list shown in the sidebar and on the home page.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{Section, Store, spawn_refresh_on};
use crate::api::ProxyApi;
use crate::api::models::projects::Project;
use crate::errors::Result;
use crate::forms::ProjectForm;
use crate::invalidation::{InvalidationBus, Publisher, Topic};

pub struct ProjectsRepository {
    api: Arc<dyn ProxyApi>,
    bus: InvalidationBus,
    publisher: Publisher,
    state: Store<Vec<Project>>,
}

impl ProjectsRepository {
    pub fn new(api: Arc<dyn ProxyApi>, bus: InvalidationBus) -> Self {
        Self {
            api,
            publisher: bus.publisher(),
            bus,
            state: Store::new(),
        }
    }

    /// Refetch the list from the backend and replace the local copy
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Section<Vec<Project>> {
        self.state.load(self.api.list_projects()).await
    }

    pub fn read(&self) -> Section<Vec<Project>> {
        self.state.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<Section<Vec<Project>>> {
        self.state.subscribe()
    }

    /// Ask every listener on the project list, this repository's refresh loop included, to
    /// refetch.
    pub fn invalidate(&self) {
        self.bus.publish(Topic::Projects);
    }

    /// Create a project, refetch the list so it shows up, and tell other project lists.
    #[instrument(skip(self, form))]
    pub async fn create_project(&self, form: &ProjectForm) -> Result<Project> {
        let project = self.api.create_project(&form.to_create()).await?;
        info!(project_id = %project.id, "Project created");
        self.fetch().await;
        self.publisher.publish(Topic::Projects);
        Ok(project)
    }

    /// Refetch whenever the project list is invalidated, until `shutdown` fires. Projects
    /// created through this repository are already refetched and do not trigger another fetch.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let subscription = self.publisher.subscribe(Topic::Projects);
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
    use std::time::Duration;

    fn repository(api: &Arc<InMemoryProxyApi>) -> Arc<ProjectsRepository> {
        Arc::new(ProjectsRepository::new(api.clone(), InvalidationBus::new()))
    }

    #[tokio::test]
    async fn test_fetch_replaces_list() {
        let api = Arc::new(InMemoryProxyApi::new());
        api.seed_project("Alpha", "first");
        let repo = repository(&api);

        let section = repo.fetch().await;
        assert_eq!(section.data.len(), 1);
        assert_eq!(section.data[0].display_name(), "Alpha");

        api.seed_project("Beta", "second");
        assert_eq!(repo.read().data.len(), 1, "read never hits the backend");
        assert_eq!(repo.fetch().await.data.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_error() {
        let api = Arc::new(InMemoryProxyApi::new());
        api.seed_project("Alpha", "");
        let repo = repository(&api);
        repo.fetch().await;

        api.fail_next("list_projects");
        let section = repo.fetch().await;
        assert!(section.data.is_empty());
        assert!(section.error.unwrap().starts_with("Failed to fetch projects"));
    }

    #[tokio::test]
    async fn test_create_project_refetches() {
        let api = Arc::new(InMemoryProxyApi::new());
        let repo = repository(&api);
        repo.fetch().await;

        let created = repo.create_project(&ProjectForm::new("", "no name")).await.unwrap();
        let list = repo.read().data;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, created.id);
        assert_eq!(list[0].display_name(), "Unnamed Project");
    }

    #[tokio::test]
    async fn test_failed_create_keeps_list() {
        let api = Arc::new(InMemoryProxyApi::new());
        api.seed_project("Alpha", "");
        let repo = repository(&api);
        repo.fetch().await;

        api.fail_next("create_project");
        assert!(repo.create_project(&ProjectForm::new("Beta", "")).await.is_err());
        assert_eq!(repo.read().data.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refresh_does_not_overwrite_created_project() {
        let api = Arc::new(InMemoryProxyApi::new());
        let repo = repository(&api);
        let shutdown = CancellationToken::new();
        let handle = repo.clone().run(shutdown.clone());

        // The refresh loop reads the empty list, then answers after the create below
        api.delay_next("list_projects", Duration::from_millis(100));
        repo.invalidate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(repo.read().loading);

        let created = repo.create_project(&ProjectForm::new("Beta", "")).await.unwrap();
        assert_eq!(repo.read().data.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let section = repo.read();
        assert_eq!(section.data, api.projects());
        assert_eq!(section.data[0].id, created.id);
        assert!(!section.loading);
        assert_eq!(api.calls("list_projects"), 2, "own create does not wake the loop");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidations_during_refresh_fold_into_one_more() {
        let api = Arc::new(InMemoryProxyApi::new());
        let repo = repository(&api);
        let shutdown = CancellationToken::new();
        let handle = repo.clone().run(shutdown.clone());

        api.delay_next("list_projects", Duration::from_millis(100));
        repo.invalidate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls("list_projects"), 1);

        // Published while the first refresh is still waiting on the backend
        repo.invalidate();
        repo.invalidate();
        repo.invalidate();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(api.calls("list_projects"), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_create_project_notifies_other_lists() {
        let api = Arc::new(InMemoryProxyApi::new());
        let bus = InvalidationBus::new();
        let repo = ProjectsRepository::new(api.clone(), bus.clone());
        let mut other = bus.subscribe(Topic::Projects);

        repo.create_project(&ProjectForm::new("Alpha", "")).await.unwrap();
        assert!(other.changed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refetches_once_per_burst() {
        let api = Arc::new(InMemoryProxyApi::new());
        let repo = repository(&api);
        let shutdown = CancellationToken::new();
        let handle = repo.clone().run(shutdown.clone());

        repo.invalidate();
        repo.invalidate();
        repo.invalidate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls("list_projects"), 1);

        repo.invalidate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls("list_projects"), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
