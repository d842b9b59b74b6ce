//! Test utilities: an in-memory backend implementing [`ProxyApi`].
//!
//! Repositories and scenarios run against [`InMemoryProxyApi`] instead of a mock HTTP server. It
//! keeps its own source of truth, counts calls per operation and can be told to fail the next call
//! of an operation, which is how partial failures are simulated. Reads can also be slowed down:
//! a delayed read answers with the state from when it was called, which is how responses
//! arriving out of order are simulated.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

use crate::api::ProxyApi;
use crate::api::models::{
    api_keys::{ApiKey, CreatedKey, KeyCreate, KeyUpdate},
    device_check::{DeviceCheckCredential, DeviceCheckLink, DeviceCheckUpload},
    projects::{Project, ProjectCreate, ProjectUpdate},
    users::User,
};
use crate::errors::{Error, Result};
use crate::types::{ApiKeyId, ProjectId};

#[derive(Default)]
struct Backend {
    user: Option<User>,
    projects: Vec<Project>,
    keys: HashMap<ProjectId, Vec<ApiKey>>,
    device_checks: HashMap<ProjectId, DeviceCheckCredential>,
    pool: Vec<DeviceCheckCredential>,
    /// Upstream API keys as received, to check that they reached the backend
    received_api_keys: Vec<String>,
    failures: HashMap<&'static str, StatusCode>,
    delays: HashMap<&'static str, VecDeque<Duration>>,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
pub struct InMemoryProxyApi {
    backend: Mutex<Backend>,
}

impl InMemoryProxyApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user: User) -> Self {
        let api = Self::new();
        api.backend.lock().user = Some(user);
        api
    }

    pub fn test_user(current_request_usage: Option<u64>, request_limit: Option<u64>) -> User {
        User {
            id: "user_2abcTEST".to_string(),
            name: Some("Test User".to_string()),
            current_request_usage,
            request_limit,
            is_subscribed: false,
        }
    }

    pub fn set_usage(&self, current_request_usage: Option<u64>, request_limit: Option<u64>) {
        let mut backend = self.backend.lock();
        let user = backend.user.get_or_insert_with(|| Self::test_user(None, None));
        user.current_request_usage = current_request_usage;
        user.request_limit = request_limit;
    }

    pub fn seed_project(&self, name: &str, description: &str) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            name: (!name.is_empty()).then(|| name.to_string()),
            description: Some(description.to_string()),
            keys: None,
        };
        self.backend.lock().projects.push(project.clone());
        project
    }

    pub fn seed_key(&self, project: ProjectId, name: &str) -> ApiKey {
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: Some(name.to_string()),
            description: None,
            association_id: Some(format!("assoc-{}", Uuid::new_v4().simple())),
        };
        self.backend.lock().keys.entry(project).or_default().push(key.clone());
        key
    }

    /// Add a credential to the user's pool without attaching it to any project
    pub fn seed_pool_credential(&self, team_id: &str, key_id: &str) -> DeviceCheckCredential {
        let credential = DeviceCheckCredential {
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            bypass_token: Some(format!("bypass-{}", Uuid::new_v4().simple())),
        };
        self.backend.lock().pool.push(credential.clone());
        credential
    }

    /// The backend's own project list, for convergence checks
    pub fn projects(&self) -> Vec<Project> {
        let backend = self.backend.lock();
        backend.projects.iter().map(|p| backend.with_keys(p)).collect()
    }

    pub fn received_api_keys(&self) -> Vec<String> {
        self.backend.lock().received_api_keys.clone()
    }

    /// Fail the next call of `operation` (a [`ProxyApi`] method name) with a 500
    pub fn fail_next(&self, operation: &'static str) {
        self.fail_next_with(operation, StatusCode::INTERNAL_SERVER_ERROR);
    }

    pub fn fail_next_with(&self, operation: &'static str, status: StatusCode) {
        self.backend.lock().failures.insert(operation, status);
    }

    /// Delay the response of the next call of `operation`. Calls queue their delays in order.
    ///
    /// Only reads (`get_me`, `list_projects`, `get_project`, `list_keys`, `get_device_check` and
    /// `list_device_check_pool`) honour delays.
    pub fn delay_next(&self, operation: &'static str, delay: Duration) {
        self.backend.lock().delays.entry(operation).or_default().push_back(delay);
    }

    /// How many times `operation` was called
    pub fn calls(&self, operation: &'static str) -> usize {
        self.backend.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Record the call and apply any injected failure
    fn enter(&self, operation: &'static str, description: &str) -> Result<parking_lot::MutexGuard<'_, Backend>> {
        let mut backend = self.backend.lock();
        *backend.calls.entry(operation).or_default() += 1;
        if let Some(status) = backend.failures.remove(operation) {
            return Err(Error::api(description, status));
        }
        Ok(backend)
    }

    /// Wait out the delay queued for this call of `operation`, if any
    async fn respond(&self, operation: &'static str) {
        let delay = self
            .backend
            .lock()
            .delays
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Backend {
    fn with_keys(&self, project: &Project) -> Project {
        let keys = self.keys.get(&project.id).map(|keys| {
            keys.iter()
                .map(|k| serde_json::to_value(k).unwrap_or(serde_json::Value::Null))
                .collect()
        });
        Project {
            keys,
            ..project.clone()
        }
    }

    fn project_mut(&mut self, id: ProjectId, description: &str) -> Result<&mut Project> {
        self.projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::api(description, StatusCode::NOT_FOUND))
    }

    fn require_project(&self, id: ProjectId, description: &str) -> Result<()> {
        if self.projects.iter().any(|p| p.id == id) {
            Ok(())
        } else {
            Err(Error::api(description, StatusCode::NOT_FOUND))
        }
    }
}

#[async_trait]
impl ProxyApi for InMemoryProxyApi {
    async fn get_me(&self) -> Result<User> {
        let user = {
            let backend = self.enter("get_me", "fetch user")?;
            backend.user.clone().ok_or_else(|| Error::api("fetch user", StatusCode::NOT_FOUND))
        };
        self.respond("get_me").await;
        user
    }

    async fn register_me(&self) -> Result<User> {
        let mut backend = self.enter("register_me", "register user")?;
        Ok(backend
            .user
            .get_or_insert_with(|| Self::test_user(Some(0), Some(1000)))
            .clone())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects = {
            let backend = self.enter("list_projects", "fetch projects")?;
            backend.projects.iter().map(|p| backend.with_keys(p)).collect()
        };
        self.respond("list_projects").await;
        Ok(projects)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        let project = {
            let backend = self.enter("get_project", "fetch project")?;
            backend
                .projects
                .iter()
                .find(|p| p.id == id)
                .map(|p| backend.with_keys(p))
                .ok_or_else(|| Error::api("fetch project", StatusCode::NOT_FOUND))
        };
        self.respond("get_project").await;
        project
    }

    async fn create_project(&self, request: &ProjectCreate) -> Result<Project> {
        let mut backend = self.enter("create_project", "create project")?;
        let project = Project {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            description: Some(request.description.clone()),
            keys: None,
        };
        backend.projects.push(project.clone());
        Ok(project)
    }

    async fn update_project(&self, id: ProjectId, request: &ProjectUpdate) -> Result<Project> {
        let mut backend = self.enter("update_project", "update project")?;
        let project = backend.project_mut(id, "update project")?;
        if let Some(name) = &request.name {
            project.name = Some(name.clone());
        }
        project.description = Some(request.description.clone());
        Ok(project.clone())
    }

    async fn delete_project(&self, id: ProjectId) -> Result<()> {
        let mut backend = self.enter("delete_project", "delete project")?;
        backend.require_project(id, "delete project")?;
        backend.projects.retain(|p| p.id != id);
        backend.keys.remove(&id);
        backend.device_checks.remove(&id);
        Ok(())
    }

    async fn list_keys(&self, project: ProjectId) -> Result<Vec<ApiKey>> {
        let keys = {
            let backend = self.enter("list_keys", "fetch keys")?;
            backend
                .require_project(project, "fetch keys")
                .map(|()| backend.keys.get(&project).cloned().unwrap_or_default())
        };
        self.respond("list_keys").await;
        keys
    }

    async fn get_key(&self, project: ProjectId, key: ApiKeyId) -> Result<ApiKey> {
        let backend = self.enter("get_key", "fetch key")?;
        backend
            .keys
            .get(&project)
            .and_then(|keys| keys.iter().find(|k| k.id == key))
            .cloned()
            .ok_or_else(|| Error::api("fetch key", StatusCode::NOT_FOUND))
    }

    async fn create_key(&self, project: ProjectId, request: &KeyCreate) -> Result<CreatedKey> {
        let mut backend = self.enter("create_key", "create key")?;
        backend.require_project(project, "create key")?;
        let full = request.api_key.expose_secret().to_string();
        let partial = full.chars().skip(full.chars().count() / 2).collect::<String>();
        backend.received_api_keys.push(full);

        let key = ApiKey {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            description: request.description.clone(),
            association_id: Some(format!("assoc-{}", Uuid::new_v4().simple())),
        };
        backend.keys.entry(project).or_default().push(key.clone());
        Ok(CreatedKey {
            key,
            partial_key: Some(SecretString::from(format!("pk-{partial}"))),
        })
    }

    async fn update_key(&self, project: ProjectId, key: ApiKeyId, request: &KeyUpdate) -> Result<ApiKey> {
        let mut backend = self.enter("update_key", "update key")?;
        let existing = backend
            .keys
            .get_mut(&project)
            .and_then(|keys| keys.iter_mut().find(|k| k.id == key))
            .ok_or_else(|| Error::api("update key", StatusCode::NOT_FOUND))?;
        if request.name.is_some() {
            existing.name = request.name.clone();
        }
        if request.description.is_some() {
            existing.description = request.description.clone();
        }
        Ok(existing.clone())
    }

    async fn delete_key(&self, project: ProjectId, key: ApiKeyId) -> Result<()> {
        let mut backend = self.enter("delete_key", "delete key")?;
        let keys = backend
            .keys
            .get_mut(&project)
            .ok_or_else(|| Error::api("delete key", StatusCode::NOT_FOUND))?;
        let before = keys.len();
        keys.retain(|k| k.id != key);
        if keys.len() == before {
            return Err(Error::api("delete key", StatusCode::NOT_FOUND));
        }
        Ok(())
    }

    async fn get_device_check(&self, project: ProjectId) -> Result<Option<DeviceCheckCredential>> {
        let credential = {
            let backend = self.enter("get_device_check", "fetch DeviceCheck credential")?;
            backend
                .require_project(project, "fetch DeviceCheck credential")
                .map(|()| backend.device_checks.get(&project).cloned())
        };
        self.respond("get_device_check").await;
        credential
    }

    async fn upload_device_check(&self, project: ProjectId, request: &DeviceCheckUpload) -> Result<()> {
        let mut backend = self.enter("upload_device_check", "upload DeviceCheck credential")?;
        backend.require_project(project, "upload DeviceCheck credential")?;
        let credential = DeviceCheckCredential {
            team_id: request.team_id.to_string(),
            key_id: request.key_id.clone(),
            bypass_token: Some(format!("bypass-{}", Uuid::new_v4().simple())),
        };
        if !backend
            .pool
            .iter()
            .any(|c| c.team_id == credential.team_id && c.key_id == credential.key_id)
        {
            backend.pool.push(credential.clone());
        }
        backend.device_checks.insert(project, credential);
        Ok(())
    }

    async fn link_device_check(&self, project: ProjectId, request: &DeviceCheckLink) -> Result<()> {
        let mut backend = self.enter("link_device_check", "link DeviceCheck credential")?;
        backend.require_project(project, "link DeviceCheck credential")?;
        let credential = backend
            .pool
            .iter()
            .find(|c| c.team_id == request.team_id && c.key_id == request.key_id)
            .cloned()
            .ok_or_else(|| Error::api("link DeviceCheck credential", StatusCode::NOT_FOUND))?;
        backend.device_checks.insert(project, credential);
        Ok(())
    }

    async fn list_device_check_pool(&self) -> Result<Vec<DeviceCheckCredential>> {
        let pool = self.enter("list_device_check_pool", "fetch DeviceCheck credentials")?.pool.clone();
        self.respond("list_device_check_pool").await;
        Ok(pool)
    }
}
