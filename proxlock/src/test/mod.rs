
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::api::ReqwestProxyApi;
use crate::auth::session::StaticToken;
use crate::forms::KeyForm;
use crate::invalidation::InvalidationBus;
use crate::reveal::RevealState;
use crate::store::{PageOutcome, ProjectPage, ProjectsRepository};

fn client(server: &MockServer) -> Arc<ReqwestProxyApi> {
    Arc::new(
        ReqwestProxyApi::new(
            server.uri().parse().unwrap(),
            Arc::new(StaticToken::new("sess_test")),
            Duration::from_secs(5),
        )
        .unwrap(),
    )
}

/// Full key creation journey over http: load the page, create a key, reveal the partial key
/// once, and see the refetched key list.
#[test_log::test(tokio::test)]
async fn test_e2e_create_key_over_http() {
    let server = MockServer::start().await;
    let project_id = Uuid::new_v4();
    let key_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/me/projects/{project_id}")))
        .and(header("authorization", "Bearer sess_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": project_id,
            "name": "Alpha",
            "description": "first"
        })))
        .mount(&server)
        .await;

    // First key listing is empty, later ones include the created key
    Mock::given(method("GET"))
        .and(path(format!("/me/projects/{project_id}/keys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/me/projects/{project_id}/keys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": key_id,
            "name": "OpenAI",
            "associationId": "assoc-1"
        }])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/me/projects/{project_id}/device-check")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/me/projects/{project_id}/keys")))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(body_json(json!({"name": "OpenAI", "apiKey": "sk-live-full"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": key_id,
            "name": "OpenAI",
            "associationId": "assoc-1",
            "userPartialKey": "pk-half"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = ProjectPage::new(client(&server), InvalidationBus::new(), project_id);
    page.load().await;
    assert_eq!(page.project().data.unwrap().display_name(), "Alpha");
    assert!(page.keys().data.is_empty());
    assert!(page.device_check().data.is_none());
    assert!(page.device_check().error.is_none(), "404 means no credential");

    let mut reveal = page
        .create_key(KeyForm::new("OpenAI", "", SecretString::from("sk-live-full".to_string())))
        .await
        .unwrap();
    assert_eq!(reveal.state(), RevealState::Revealed);
    assert_eq!(reveal.secret().unwrap().expose_secret(), "pk-half");
    assert_eq!(page.keys().data.len(), 1);

    reveal.dismiss();
    assert!(reveal.secret().is_none());
}

/// Deleting over http invalidates the project list, whose refresh loop drops the project.
#[test_log::test(tokio::test)]
async fn test_e2e_delete_project_refreshes_list() {
    let server = MockServer::start().await;
    let alpha = Uuid::new_v4();
    let beta = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/me/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": alpha, "name": "Alpha"},
            {"id": beta, "name": "Beta"}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": beta, "name": "Beta"}])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/me/projects/{alpha}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server);
    let bus = InvalidationBus::new();
    let sidebar = Arc::new(ProjectsRepository::new(api.clone(), bus.clone()));
    assert_eq!(sidebar.fetch().await.data.len(), 2);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let refresh = sidebar.clone().run(shutdown.clone());
    let mut list = sidebar.subscribe();

    let page = ProjectPage::new(api, bus, alpha);
    assert_eq!(page.delete_project().await.unwrap(), PageOutcome::NavigateHome);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            list.changed().await.unwrap();
            let section = list.borrow_and_update().clone();
            if !section.loading {
                return section;
            }
        }
    })
    .await
    .unwrap();

    let ids: Vec<_> = sidebar.read().data.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![beta]);

    shutdown.cancel();
    refresh.await.unwrap();
}

/// A signed-out session fails every section without sending anything.
#[test_log::test(tokio::test)]
async fn test_e2e_signed_out_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let api = Arc::new(
        ReqwestProxyApi::new(
            server.uri().parse().unwrap(),
            Arc::new(StaticToken::signed_out()),
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    let page = ProjectPage::new(api, InvalidationBus::new(), Uuid::new_v4());
    page.load().await;

    for error in [page.project().error, page.keys().error, page.device_check().error] {
        assert_eq!(
            error.as_deref(),
            Some("You are not signed in. Please sign in and try again.")
        );
    }
}
