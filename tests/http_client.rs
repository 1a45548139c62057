//! # Integration tests for the HTTP transport
//!
//! Drives [`ApiClient`] (directly and through the upload orchestrator and the
//! document library) against a wiremock server, checking request shapes,
//! envelope handling and error normalisation without a live backend.

use edgequake_proofdoc::{
    ApiClient, CapturedArtifact, ClientConfig, DocumentApi, DocumentFile, DocumentLibrary,
    PolicyCache, ProofError, SourceMethod, SubtypeKey, UploadOrchestrator, UploadOutcome,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ──────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client(server: &MockServer) -> Arc<ApiClient> {
    init_tracing();
    let config = ClientConfig::new(server.uri()).with_token("test-token");
    Arc::new(ApiClient::new(config).expect("client build"))
}

fn marksheet() -> SubtypeKey {
    SubtypeKey::new("academic", "marksheet")
}

fn artifact() -> CapturedArtifact {
    // ASCII payload keeps the multipart body matchable as text
    CapturedArtifact {
        file: DocumentFile::new("marks.jpg", "image/jpeg", b"not-really-a-jpeg".to_vec()),
        origin_name: "marks.jpg".into(),
        source: SourceMethod::File,
        page_count: 1,
    }
}

async fn mount_policy(server: &MockServer, issuer: &str, issue_vc: &str) {
    Mock::given(method("GET"))
        .and(path("/document-config"))
        .and(query_param("doc_type", "academic"))
        .and(query_param("doc_subtype", "marksheet"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200,
            "message": "ok",
            "data": {
                "doc_type": "academic",
                "doc_subtype": "marksheet",
                "issuer": issuer,
                "issue_vc": issue_vc
            }
        })))
        .mount(server)
        .await;
}

// ── Uploads ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn multipart_upload_carries_fields_and_issuer() {
    let server = MockServer::start().await;
    mount_policy(&server, "did:web:board.example", "no").await;

    Mock::given(method("POST"))
        .and(path("/user/upload-document"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_string_contains("name=\"docType\""))
        .and(body_string_contains("name=\"docSubtype\""))
        .and(body_string_contains("name=\"importedFrom\""))
        .and(body_string_contains("File Upload"))
        .and(body_string_contains("did:web:board.example"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "statusCode": 201,
            "message": "Document uploaded",
            "data": {
                "doc_id": "d-42",
                "user_id": "u-1",
                "doc_type": "academic",
                "doc_subtype": "marksheet",
                "doc_name": "Class X",
                "imported_from": "File Upload",
                "doc_datatype": "image/jpeg",
                "uploaded_at": "2025-05-01T10:00:00Z",
                "is_uploaded": true
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orch = UploadOrchestrator::new(client(&server), PolicyCache::new());
    let outcome = orch
        .upload_raw(&artifact(), &marksheet(), "Class X")
        .await
        .expect("upload");

    match outcome {
        UploadOutcome::Finalized(record) => {
            assert_eq!(record.doc_id.as_deref(), Some("d-42"));
            assert_eq!(record.is_uploaded, Some(true));
            assert!(record.uploaded_at.is_some());
        }
        other => panic!("expected finalized record, got {other:?}"),
    }
}

#[tokio::test]
async fn vc_subtype_upload_returns_pending_shape() {
    let server = MockServer::start().await;
    mount_policy(&server, "board", "yes").await;

    Mock::given(method("POST"))
        .and(path("/user/upload-document"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200,
            "message": "Pending issuance",
            "data": {
                "doc_type": "academic",
                "doc_subtype": "marksheet",
                "issue_vc": "yes",
                "mapped_data": { "name": "A. Student", "roll_no": "42" }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orch = UploadOrchestrator::new(client(&server), PolicyCache::new());
    let outcome = orch
        .upload_raw(&artifact(), &marksheet(), "Class X")
        .await
        .expect("upload");
    assert_eq!(outcome.doc_id(), None);
    match outcome {
        UploadOutcome::PendingIssuance(p) => assert_eq!(p.mapped_data["roll_no"], "42"),
        other => panic!("expected pending issuance, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_policy_uploads_without_issuer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/document-config"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "statusCode": 404, "message": "No config"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/user/upload-document"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "statusCode": 201,
            "data": { "doc_id": "d-1", "doc_type": "academic", "doc_subtype": "marksheet" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orch = UploadOrchestrator::new(client(&server), PolicyCache::new());
    orch.upload_raw(&artifact(), &marksheet(), "Class X")
        .await
        .expect("upload proceeds");

    let requests = server.received_requests().await.expect("recording on");
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/user/upload-document")
        .expect("upload sent");
    let body = String::from_utf8_lossy(&upload.body);
    assert!(!body.contains("name=\"issuer\""), "issuer must be omitted");
}

#[tokio::test]
async fn qr_upload_sends_camel_case_json() {
    let server = MockServer::start().await;
    mount_policy(&server, "board", "yes").await;

    Mock::given(method("POST"))
        .and(path("/user/upload-qr-document"))
        .and(body_json(json!({
            "docType": "academic",
            "docSubType": "marksheet",
            "docName": "Class X",
            "importedFrom": "QR Code",
            "qrContent": "VC123",
            "issuer": "board"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200, "message": "Queued", "data": { "queued": true }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orch = UploadOrchestrator::new(client(&server), PolicyCache::new());
    let data = orch
        .upload_qr("  VC123 ", &marksheet(), "Class X")
        .await
        .expect("qr upload");
    assert_eq!(data["queued"], true);
}

// ── Errors ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn field_errors_are_surfaced_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/user/upload-document"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "statusCode": 422,
            "message": "Validation failed",
            "errors": [
                { "field": "docName", "message": "docName is required" },
                { "field": "file", "message": "file type not allowed" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server);
    let request = edgequake_proofdoc::upload::UploadRequest {
        file: artifact().file,
        doc_type: "academic".into(),
        doc_subtype: "marksheet".into(),
        doc_name: String::new(),
        imported_from: "File Upload".into(),
        issuer: None,
    };
    let err = api.upload_document(request).await.unwrap_err();
    match &err {
        ProofError::Network { status, messages } => {
            assert_eq!(*status, Some(422));
            assert_eq!(messages, &["docName is required", "file type not allowed"]);
        }
        other => panic!("expected network error, got {other:?}"),
    }
}

#[tokio::test]
async fn error_status_inside_ok_envelope_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 401, "message": "Session expired"
        })))
        .mount(&server)
        .await;

    let err = client(&server).list_documents().await.unwrap_err();
    assert_eq!(err.display_messages(), vec!["Session expired"]);
}

#[tokio::test]
async fn unreadable_error_body_falls_back_to_generic_message() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/user/documents/d-1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server).delete_document("d-1").await.unwrap_err();
    assert!(matches!(err, ProofError::Network { status: Some(502), .. }));
    assert_eq!(
        err.display_messages(),
        vec![edgequake_proofdoc::error::GENERIC_NETWORK_MESSAGE]
    );
}

#[tokio::test]
async fn delete_id_cannot_escape_its_path_segment() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/user/documents/..%2Fadmin%3Fx=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200, "message": "Deleted"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server);
    api.delete_document("../admin?x=1").await.expect("delete");

    let err = api.delete_document("  ").await.unwrap_err();
    assert!(matches!(
        err,
        ProofError::Validation {
            code: edgequake_proofdoc::ValidationCode::Id,
            ..
        }
    ));

    let requests = server.received_requests().await.expect("recording on");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), None);
}

// ── Library ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_is_followed_by_a_refetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200,
            "data": [{
                "doc_id": "d-2",
                "doc_type": "academic",
                "doc_subtype": "degree",
                "doc_name": "B.Sc",
                "is_verified": true,
                "vc_status": null
            }]
        })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/user/documents/d-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200, "message": "Deleted"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let library = DocumentLibrary::new(client(&server), PolicyCache::new());
    library.refresh().await.expect("initial list");
    let docs = library.delete("d-1").await.expect("delete");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].doc_id.as_deref(), Some("d-2"));
}

#[tokio::test]
async fn policy_is_fetched_once_per_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/document-config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200,
            "data": { "doc_type": "academic", "doc_subtype": "marksheet", "issue_vc": true }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 200, "data": []
        })))
        .mount(&server)
        .await;

    let library = DocumentLibrary::new(client(&server), PolicyCache::new());
    library.refresh().await.expect("list");
    let keys = vec![marksheet(); 4];
    let statuses = library.statuses(&keys, chrono::Utc::now()).await;
    assert_eq!(statuses.len(), 4);
    for (_, s) in statuses {
        assert_eq!(s.state, edgequake_proofdoc::DocumentDisplayState::Incomplete);
        assert!(s.can_reupload);
    }
}

#[tokio::test]
async fn locale_is_sent_as_accept_language() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/documents"))
        .and(header("Accept-Language", "hi-IN"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::new(server.uri()).with_locale("hi-IN");
    let api = ApiClient::new(config).expect("client build");
    assert!(api.list_documents().await.expect("list").is_empty());
}

#[tokio::test]
async fn locale_switch_refetches_policy_in_new_language() {
    let server = MockServer::start().await;

    for (locale, issuer) in [("en-IN", "Board"), ("hi-IN", "बोर्ड")] {
        Mock::given(method("GET"))
            .and(path("/document-config"))
            .and(header("Accept-Language", locale))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statusCode": 200,
                "data": { "doc_type": "academic", "doc_subtype": "marksheet", "issuer": issuer }
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let api = Arc::new(
        ApiClient::new(ClientConfig::new(server.uri()).with_locale("en-IN")).expect("client build"),
    );
    let library = DocumentLibrary::new(api.clone(), PolicyCache::new());
    assert!(!library.set_locale("en-IN"));

    let issuer = |state: edgequake_proofdoc::PolicyState| match state {
        edgequake_proofdoc::PolicyState::Ready(p) => p.issuer,
        other => panic!("expected a policy, got {other:?}"),
    };
    assert_eq!(issuer(library.policy_state(&marksheet()).await).as_deref(), Some("Board"));

    assert!(library.set_locale("hi-IN"));
    assert_eq!(api.locale().as_deref(), Some("hi-IN"));
    assert_eq!(issuer(library.policy_state(&marksheet()).await).as_deref(), Some("बोर्ड"));
}
