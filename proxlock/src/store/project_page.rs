//! View model of a single project: the project itself, its keys and its DeviceCheck credential.
//!
//! The three sections load independently. A failure in one leaves the others intact, so the
//! page can show the keys even when the project header failed to load (and the other way round).
//!
//! A running page ([`ProjectPage::run`]) also refetches a section when another view of the same
//! project invalidates it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{Section, Store};
use crate::api::ProxyApi;
use crate::api::models::{
    api_keys::ApiKey,
    device_check::{DeviceCheckCredential, DeviceCheckLink},
    projects::Project,
};
use crate::errors::{Error, Result};
use crate::forms::{DeviceCheckForm, KeyEditForm, KeyForm, ProjectForm};
use crate::invalidation::{InvalidationBus, Publisher, Topic};
use crate::reveal::SecretReveal;
use crate::types::{ApiKeyId, ProjectId, abbrev_uuid};

/// Where the presentation layer should go after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Stay,
    /// The project is gone; leave the page for the home view
    NavigateHome,
}

pub struct ProjectPage {
    project_id: ProjectId,
    api: Arc<dyn ProxyApi>,
    publisher: Publisher,
    project: Store<Option<Project>>,
    keys: Store<Vec<ApiKey>>,
    device_check: Store<Option<DeviceCheckCredential>>,
    outcome: watch::Sender<PageOutcome>,
}

impl ProjectPage {
    pub fn new(api: Arc<dyn ProxyApi>, bus: InvalidationBus, project_id: ProjectId) -> Self {
        Self {
            project_id,
            api,
            publisher: bus.publisher(),
            project: Store::new(),
            keys: Store::new(),
            device_check: Store::new(),
            outcome: watch::channel(PageOutcome::Stay).0,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn project(&self) -> Section<Option<Project>> {
        self.project.read()
    }

    pub fn keys(&self) -> Section<Vec<ApiKey>> {
        self.keys.read()
    }

    pub fn device_check(&self) -> Section<Option<DeviceCheckCredential>> {
        self.device_check.read()
    }

    pub fn outcome(&self) -> PageOutcome {
        *self.outcome.borrow()
    }

    pub fn subscribe_outcome(&self) -> watch::Receiver<PageOutcome> {
        self.outcome.subscribe()
    }

    /// Load every section concurrently. Each section records its own failure.
    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&self.project_id)))]
    pub async fn load(&self) {
        tokio::join!(self.fetch_project(), self.fetch_keys(), self.fetch_device_check());
    }

    pub async fn fetch_project(&self) -> Section<Option<Project>> {
        self.project
            .load(async { self.api.get_project(self.project_id).await.map(Some) })
            .await
    }

    pub async fn fetch_keys(&self) -> Section<Vec<ApiKey>> {
        self.keys.load(self.api.list_keys(self.project_id)).await
    }

    pub async fn fetch_device_check(&self) -> Section<Option<DeviceCheckCredential>> {
        self.device_check.load(self.api.get_device_check(self.project_id)).await
    }

    /// Refetch the project, keys or DeviceCheck section whenever another view invalidates it.
    ///
    /// Stops when `shutdown` fires or the project is deleted from this page.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut project = self.publisher.subscribe(Topic::Project(self.project_id));
        let mut keys = self.publisher.subscribe(Topic::Keys(self.project_id));
        let mut device_check = self.publisher.subscribe(Topic::DeviceCheck(self.project_id));
        let mut outcome = self.subscribe_outcome();

        tokio::spawn(async move {
            let project_id = abbrev_uuid(&self.project_id);
            info!(%project_id, "Project page refresh started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = async { outcome.wait_for(|state| *state == PageOutcome::NavigateHome).await.is_ok() } => {
                        debug!(%project_id, "Project deleted, stopping refresh");
                        break;
                    }
                    true = project.changed() => {
                        self.fetch_project().await;
                    }
                    true = keys.changed() => {
                        self.fetch_keys().await;
                    }
                    true = device_check.changed() => {
                        self.fetch_device_check().await;
                    }
                }
            }
        })
    }

    fn ensure_present(&self) -> Result<()> {
        match self.outcome() {
            PageOutcome::Stay => Ok(()),
            PageOutcome::NavigateHome => Err(Error::Validation {
                message: "This project has been deleted".to_string(),
            }),
        }
    }

    #[instrument(skip(self, form), fields(project_id = %abbrev_uuid(&self.project_id)))]
    pub async fn update_project(&self, form: &ProjectForm) -> Result<()> {
        self.ensure_present()?;
        self.api.update_project(self.project_id, &form.to_update()).await?;
        self.fetch_project().await;
        self.publisher.publish(Topic::Project(self.project_id));
        self.publisher.publish(Topic::Projects);
        Ok(())
    }

    /// Delete the project. On success the page is gone and the project list is invalidated.
    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&self.project_id)))]
    pub async fn delete_project(&self) -> Result<PageOutcome> {
        self.ensure_present()?;
        self.api.delete_project(self.project_id).await?;
        info!("Project deleted");

        self.project.clear();
        self.keys.clear();
        self.device_check.clear();
        self.outcome.send_replace(PageOutcome::NavigateHome);
        self.publisher.publish(Topic::Projects);
        Ok(PageOutcome::NavigateHome)
    }

    /// Create a key and hand its partial key to a fresh reveal flow.
    #[instrument(skip(self, form), fields(project_id = %abbrev_uuid(&self.project_id)))]
    pub async fn create_key(&self, form: KeyForm) -> Result<SecretReveal> {
        self.ensure_present()?;
        let request = form.into_create()?;
        let created = self.api.create_key(self.project_id, &request).await?;
        drop(request);
        info!(key_id = %abbrev_uuid(&created.key.id), "Key created");

        let mut reveal = SecretReveal::new();
        reveal.reveal(created)?;

        self.fetch_keys().await;
        self.publisher.publish(Topic::Keys(self.project_id));
        // The sidebar shows a key count per project
        self.publisher.publish(Topic::Projects);
        Ok(reveal)
    }

    #[instrument(skip(self, form), fields(project_id = %abbrev_uuid(&self.project_id), key_id = %abbrev_uuid(&key)))]
    pub async fn update_key(&self, key: ApiKeyId, form: &KeyEditForm) -> Result<()> {
        self.ensure_present()?;
        self.api.update_key(self.project_id, key, &form.to_update()).await?;
        self.fetch_keys().await;
        self.publisher.publish(Topic::Keys(self.project_id));
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&self.project_id), key_id = %abbrev_uuid(&key)))]
    pub async fn delete_key(&self, key: ApiKeyId) -> Result<()> {
        self.ensure_present()?;
        self.api.delete_key(self.project_id, key).await?;
        self.fetch_keys().await;
        self.publisher.publish(Topic::Keys(self.project_id));
        self.publisher.publish(Topic::Projects);
        Ok(())
    }

    #[instrument(skip(self, form), fields(project_id = %abbrev_uuid(&self.project_id)))]
    pub async fn upload_device_check(&self, form: DeviceCheckForm) -> Result<()> {
        self.ensure_present()?;
        let upload = form.into_upload()?;
        self.api.upload_device_check(self.project_id, &upload).await?;
        drop(upload);
        self.fetch_device_check().await;
        self.publisher.publish(Topic::DeviceCheck(self.project_id));
        // Uploaded credentials join the reusable pool
        self.publisher.publish(Topic::DeviceCheckPool);
        Ok(())
    }

    #[instrument(skip(self, credential), fields(project_id = %abbrev_uuid(&self.project_id), team_id = %credential.team_id))]
    pub async fn link_device_check(&self, credential: &DeviceCheckCredential) -> Result<()> {
        self.ensure_present()?;
        self.api
            .link_device_check(self.project_id, &DeviceCheckLink::from(credential))
            .await?;
        self.fetch_device_check().await;
        self.publisher.publish(Topic::DeviceCheck(self.project_id));
        Ok(())
    }
}
