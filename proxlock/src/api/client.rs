//! Authenticated HTTP client for the ProxLock backend.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use super::models::{
    api_keys::{ApiKey, CreatedKey, CreatedKeyBody, KeyCreate, KeyUpdate},
    device_check::{DeviceCheckCredential, DeviceCheckLink, DeviceCheckUpload},
    projects::{Project, ProjectCreate, ProjectUpdate},
    users::User,
};
use crate::auth::TokenProvider;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::types::{ApiKeyId, ProjectId, abbrev_uuid};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// One operation per backend endpoint under `/me`.
///
/// In practice this is implemented over http by [`ReqwestProxyApi`]; repositories only see the
/// trait so they can be exercised against an in-memory backend.
#[async_trait]
pub trait ProxyApi: Send + Sync {
    async fn get_me(&self) -> Result<User>;
    /// Register the signed-in identity with the backend on first use
    async fn register_me(&self) -> Result<User>;

    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn get_project(&self, id: ProjectId) -> Result<Project>;
    async fn create_project(&self, request: &ProjectCreate) -> Result<Project>;
    async fn update_project(&self, id: ProjectId, request: &ProjectUpdate) -> Result<Project>;
    async fn delete_project(&self, id: ProjectId) -> Result<()>;

    async fn list_keys(&self, project: ProjectId) -> Result<Vec<ApiKey>>;
    async fn get_key(&self, project: ProjectId, key: ApiKeyId) -> Result<ApiKey>;
    async fn create_key(&self, project: ProjectId, request: &KeyCreate) -> Result<CreatedKey>;
    async fn update_key(&self, project: ProjectId, key: ApiKeyId, request: &KeyUpdate) -> Result<ApiKey>;
    async fn delete_key(&self, project: ProjectId, key: ApiKeyId) -> Result<()>;

    /// `None` when the project has no credential yet
    async fn get_device_check(&self, project: ProjectId) -> Result<Option<DeviceCheckCredential>>;
    async fn upload_device_check(&self, project: ProjectId, request: &DeviceCheckUpload) -> Result<()>;
    async fn link_device_check(&self, project: ProjectId, request: &DeviceCheckLink) -> Result<()>;
    /// Credentials owned by the user that can be linked to any project
    async fn list_device_check_pool(&self) -> Result<Vec<DeviceCheckCredential>>;
}

/// The concrete implementation of `ProxyApi`.
pub struct ReqwestProxyApi {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl ReqwestProxyApi {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenProvider>, request_timeout: Duration) -> Result<Self> {
        // The cookie store keeps the backend session alive between calls
        let client = Client::builder().timeout(request_timeout).cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: ensure_slash(&base_url),
            tokens,
        })
    }

    pub fn from_config(config: &Config, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::new(config.api_url.clone(), tokens, config.request_timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to construct URL for {path}: {e}")))
    }

    /// Build an authenticated request. A token failure aborts before anything is sent.
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.tokens.token().await?;
        let url = self.url(path)?;
        debug!(%method, %url, "Building backend request");
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    /// Send the request and turn non-2xx statuses into [`Error::Api`].
    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.inspect_err(|e| {
            tracing::error!(operation, error = %e, "Backend request failed");
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(operation, %status, body = %body, "Backend rejected request");
            return Err(Error::api(operation, status));
        }
        Ok(response)
    }

    async fn decode_one<T: DeserializeOwned>(&self, operation: &str, response: Response) -> Result<T> {
        let body_text = response.text().await?;
        serde_json::from_str::<T>(&body_text).map_err(|e| {
            tracing::error!(operation, "Failed to parse response as JSON. Error: {}", e);
            tracing::debug!("Response body was: {}", body_text);
            Error::Decode {
                operation: operation.to_string(),
                message: e.to_string(),
            }
        })
    }

    async fn decode_list<T: DeserializeOwned>(&self, operation: &str, response: Response) -> Result<Vec<T>> {
        let body_text = response.text().await?;
        Ok(coerce_list(operation, &body_text))
    }
}

/// Makes sure a url has a trailing slash.
///
/// Joining '/v1', 'me' gives '/me', but '/v1/', 'me' gives '/v1/me'. Call this before calling
/// .join
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// Decode a collection body, coercing anything that is not an array to an empty collection and
/// skipping elements that do not decode.
pub(crate) fn coerce_list<T: DeserializeOwned>(operation: &str, body_text: &str) -> Vec<T> {
    let value = match serde_json::from_str::<serde_json::Value>(body_text) {
        Ok(value) => value,
        Err(e) => {
            warn!(operation, error = %e, "Collection response is not JSON, treating as empty");
            return Vec::new();
        }
    };

    let serde_json::Value::Array(items) = value else {
        warn!(operation, "Collection response is not an array, treating as empty");
        return Vec::new();
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(operation, index, error = %e, "Skipping malformed collection element");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ProxyApi for ReqwestProxyApi {
    #[instrument(skip(self))]
    async fn get_me(&self) -> Result<User> {
        let op = "fetch user";
        let response = self.execute(op, self.request(Method::GET, "me").await?).await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self))]
    async fn register_me(&self) -> Result<User> {
        let op = "register user";
        let response = self.execute(op, self.request(Method::POST, "me").await?).await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let op = "fetch projects";
        let response = self.execute(op, self.request(Method::GET, "me/projects").await?).await?;
        self.decode_list(op, response).await
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&id)))]
    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        let op = "fetch project";
        let response = self
            .execute(op, self.request(Method::GET, &format!("me/projects/{id}")).await?)
            .await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self, request))]
    async fn create_project(&self, request: &ProjectCreate) -> Result<Project> {
        let op = "create project";
        let response = self
            .execute(op, self.request(Method::POST, "me/projects").await?.json(request))
            .await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&id)))]
    async fn update_project(&self, id: ProjectId, request: &ProjectUpdate) -> Result<Project> {
        let op = "update project";
        let response = self
            .execute(op, self.request(Method::PUT, &format!("me/projects/{id}")).await?.json(request))
            .await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&id)))]
    async fn delete_project(&self, id: ProjectId) -> Result<()> {
        self.execute("delete project", self.request(Method::DELETE, &format!("me/projects/{id}")).await?)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&project)))]
    async fn list_keys(&self, project: ProjectId) -> Result<Vec<ApiKey>> {
        let op = "fetch keys";
        let response = self
            .execute(op, self.request(Method::GET, &format!("me/projects/{project}/keys")).await?)
            .await?;
        self.decode_list(op, response).await
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&project), key_id = %abbrev_uuid(&key)))]
    async fn get_key(&self, project: ProjectId, key: ApiKeyId) -> Result<ApiKey> {
        let op = "fetch key";
        let response = self
            .execute(op, self.request(Method::GET, &format!("me/projects/{project}/keys/{key}")).await?)
            .await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&project)))]
    async fn create_key(&self, project: ProjectId, request: &KeyCreate) -> Result<CreatedKey> {
        let op = "create key";
        let response = self
            .execute(
                op,
                self.request(Method::POST, &format!("me/projects/{project}/keys"))
                    .await?
                    .json(&request.body()),
            )
            .await?;
        let body: CreatedKeyBody = self.decode_one(op, response).await?;
        Ok(body.into())
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&project), key_id = %abbrev_uuid(&key)))]
    async fn update_key(&self, project: ProjectId, key: ApiKeyId, request: &KeyUpdate) -> Result<ApiKey> {
        let op = "update key";
        let response = self
            .execute(
                op,
                self.request(Method::PUT, &format!("me/projects/{project}/keys/{key}"))
                    .await?
                    .json(request),
            )
            .await?;
        self.decode_one(op, response).await
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&project), key_id = %abbrev_uuid(&key)))]
    async fn delete_key(&self, project: ProjectId, key: ApiKeyId) -> Result<()> {
        self.execute(
            "delete key",
            self.request(Method::DELETE, &format!("me/projects/{project}/keys/{key}")).await?,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&project)))]
    async fn get_device_check(&self, project: ProjectId) -> Result<Option<DeviceCheckCredential>> {
        let op = "fetch DeviceCheck credential";
        let request = self.request(Method::GET, &format!("me/projects/{project}/device-check")).await?;
        match self.execute(op, request).await {
            Ok(response) => self.decode_one(op, response).await.map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&project), team_id = %request.team_id))]
    async fn upload_device_check(&self, project: ProjectId, request: &DeviceCheckUpload) -> Result<()> {
        self.execute(
            "upload DeviceCheck credential",
            self.request(Method::POST, &format!("me/projects/{project}/device-check/"))
                .await?
                .json(&request.body()),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(project_id = %abbrev_uuid(&project), team_id = %request.team_id))]
    async fn link_device_check(&self, project: ProjectId, request: &DeviceCheckLink) -> Result<()> {
        self.execute(
            "link DeviceCheck credential",
            self.request(Method::PUT, &format!("me/projects/{project}/device-check/"))
                .await?
                .json(request),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_device_check_pool(&self) -> Result<Vec<DeviceCheckCredential>> {
        let op = "fetch DeviceCheck credentials";
        let response = self.execute(op, self.request(Method::GET, "me/device-check/").await?).await?;
        self.decode_list(op, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::device_check::TeamId;
    use crate::auth::session::StaticToken;
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ReqwestProxyApi {
        ReqwestProxyApi::new(
            server.uri().parse().unwrap(),
            Arc::new(StaticToken::new("test-token")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_projects_sends_auth_and_content_type() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/me/projects"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("content-type", JSON_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": id, "name": "Weather App", "description": "forecasts", "keys": [{}, {}]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let projects = client_for(&server).list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, id);
        assert_eq!(projects[0].key_count(), 2);
    }

    #[tokio::test]
    async fn test_token_failure_aborts_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let api = ReqwestProxyApi::new(
            server.uri().parse().unwrap(),
            Arc::new(StaticToken::signed_out()),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = api.list_projects().await.unwrap_err();
        assert!(matches!(err, Error::TokenUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_non_success_carries_status_text() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/me/projects/{id}")))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_project(id).await.unwrap_err();
        match &err {
            Error::Api { status, status_text, .. } => {
                assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(status_text, "Internal Server Error");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(err.to_string(), "Failed to fetch project: Internal Server Error");
    }

    #[tokio::test]
    async fn test_collections_are_coerced() {
        let server = MockServer::start().await;
        let project = Uuid::new_v4();
        let good_key = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/me/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "not a list"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/me/projects/{project}/keys")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": good_key, "name": "OpenAI"},
                {"name": "missing id"},
                42
            ])))
            .mount(&server)
            .await;

        let api = client_for(&server);
        assert!(api.list_projects().await.unwrap().is_empty());

        let keys = api.list_keys(project).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].id, good_key);
    }

    #[test]
    fn test_coerce_list_handles_garbage() {
        let parsed: Vec<Project> = coerce_list("fetch projects", "<html>oops</html>");
        assert!(parsed.is_empty());
        let parsed: Vec<Project> = coerce_list("fetch projects", "null");
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn test_single_entity_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).get_me().await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[tokio::test]
    async fn test_create_key_returns_partial_key() {
        let server = MockServer::start().await;
        let project = Uuid::new_v4();
        let key_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/me/projects/{project}/keys")))
            .and(body_json(json!({"name": "OpenAI", "apiKey": "sk-full-key"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": key_id,
                "name": "OpenAI",
                "associationId": "assoc-9",
                "userPartialKey": "pk-half"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client_for(&server)
            .create_key(
                project,
                &KeyCreate {
                    name: Some("OpenAI".to_string()),
                    description: None,
                    api_key: SecretString::from("sk-full-key".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.key.id, key_id);
        assert_eq!(created.partial_key.unwrap().expose_secret(), "pk-half");
    }

    #[tokio::test]
    async fn test_device_check_not_found_is_none() {
        let server = MockServer::start().await;
        let project = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/me/projects/{project}/device-check")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).get_device_check(project).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upload_and_link_device_check() {
        let server = MockServer::start().await;
        let project = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/me/projects/{project}/device-check/")))
            .and(body_json(json!({"teamID": "ABCDE12345", "keyID": "KEY1", "privateKey": "p8-blob"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/me/projects/{project}/device-check/")))
            .and(body_json(json!({"teamID": "ABCDE12345", "keyID": "KEY1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_for(&server);
        api.upload_device_check(
            project,
            &DeviceCheckUpload {
                team_id: TeamId::parse("ABCDE12345").unwrap(),
                key_id: "KEY1".to_string(),
                private_key: SecretString::from("p8-blob".to_string()),
            },
        )
        .await
        .unwrap();
        api.link_device_check(
            project,
            &DeviceCheckLink {
                team_id: "ABCDE12345".to_string(),
                key_id: "KEY1".to_string(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/device-check/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"teamID": "ABCDE12345", "keyID": "KEY1"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let api = ReqwestProxyApi::new(
            format!("{}/v1", server.uri()).parse().unwrap(),
            Arc::new(StaticToken::new("t")),
            Duration::from_secs(5),
        )
        .unwrap();
        let pool = api.list_device_check_pool().await.unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let api = ReqwestProxyApi::new(
            "http://127.0.0.1:1".parse().unwrap(),
            Arc::new(StaticToken::new("t")),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = api.get_me().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
