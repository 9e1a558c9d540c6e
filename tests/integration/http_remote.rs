// tests/integration/http_remote.rs

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use nirikshan::remote::{
    FileUpload, Filter, HttpRemote, ListQuery, RecordBody, RemoteDataService, RemoteError,
};

const TOKEN: &str = "mock-auth-token";

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"status": 404, "message": "The requested resource wasn't found.", "data": {}})),
    )
        .into_response()
}

async fn request_otp(Json(body): Json<Value>) -> Response {
    if body["email"].as_str().unwrap_or_default().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": 400, "message": "Something went wrong.", "data": {"email": {"code": "validation_required", "message": "Missing required value."}}})),
        )
            .into_response();
    }
    Json(json!({"otpId": "otp_1"})).into_response()
}

async fn auth_with_otp(Json(body): Json<Value>) -> Response {
    if body["otpId"] == "otp_1" && body["password"] == "123456" {
        return Json(json!({
            "token": TOKEN,
            "record": {"id": "u1", "email": "asha@precinct.io", "name": "Asha"}
        }))
        .into_response();
    }
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": 400, "message": "Failed to authenticate.", "data": {}})),
    )
        .into_response()
}

async fn auth_methods() -> Json<Value> {
    Json(json!({
        "password": {"enabled": false},
        "oauth2": {
            "enabled": true,
            "providers": [{
                "name": "google",
                "displayName": "Google",
                "state": "st_1",
                "authURL": "https://accounts.google.example/o/oauth2/auth?state=st_1&redirect_uri=",
                "codeVerifier": "cv_1"
            }]
        }
    }))
}

async fn create_user(Json(body): Json<Value>) -> Response {
    if body["email"] == "taken@precinct.io" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": 400,
                "message": "Failed to create record.",
                "data": {"email": {"code": "validation_not_unique", "message": "Value must be unique."}}
            })),
        )
            .into_response();
    }
    let mut record = body;
    record["id"] = json!("u_new");
    Json(record).into_response()
}

async fn get_organisation(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(TOKEN) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"status": 403, "message": "Only admins can perform this action.", "data": {}})),
        )
            .into_response();
    }
    if id != "o1" {
        return not_found();
    }
    Json(json!({"id": "o1", "name": "Acme", "logo": "", "created_by": "u1"})).into_response()
}

async fn update_organisation(headers: HeaderMap, Path(id): Path<String>) -> Response {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"id": id, "name": "Acme", "logo": "crest_x1.png", "created_by": "u1", "contentType": content_type}))
        .into_response()
}

async fn delete_organisation(Path(id): Path<String>) -> Response {
    if id == "o1" {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found()
    }
}

async fn list_members(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    // в ответ кладём полученные параметры, чтобы тест мог их проверить
    Json(json!({
        "page": params.get("page").and_then(|p| p.parse::<u32>().ok()).unwrap_or(1),
        "perPage": params.get("perPage").and_then(|p| p.parse::<u32>().ok()).unwrap_or(30),
        "totalItems": 1,
        "totalPages": 1,
        "items": [{
            "id": "m1",
            "filter": params.get("filter").cloned().unwrap_or_default(),
            "sort": params.get("sort").cloned().unwrap_or_default()
        }]
    }))
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api/collections/users/request-otp", post(request_otp))
        .route("/api/collections/users/auth-with-otp", post(auth_with_otp))
        .route("/api/collections/users/auth-methods", get(auth_methods))
        .route("/api/collections/users/records", post(create_user))
        .route(
            "/api/collections/Organisation/records/:id",
            get(get_organisation).patch(update_organisation).delete(delete_organisation),
        )
        .route("/api/collections/OrganisationMembers/records", get(list_members));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn otp_flow_over_http() {
    let remote = HttpRemote::new(&serve().await).unwrap();

    let otp_id = assert_ok!(remote.request_otp("asha@precinct.io").await);
    assert_eq!(otp_id, "otp_1");

    let auth = assert_ok!(remote.auth_with_otp(&otp_id, "123456").await);
    assert_eq!(auth.token, TOKEN);
    assert_eq!(auth.record.id(), "u1");

    let err = assert_err!(remote.auth_with_otp(&otp_id, "000000").await);
    assert!(err.is_bad_request());
}

#[tokio::test]
async fn validation_errors_keep_field_codes() {
    let remote = HttpRemote::new(&serve().await).unwrap();

    let err = assert_err!(remote.request_otp("").await);
    match err {
        RemoteError::Api { status, fields, .. } => {
            assert_eq!(status, 400);
            assert_eq!(fields["email"].code, "validation_required");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let body = RecordBody::new()
        .field("email", "taken@precinct.io")
        .field("password", "x");
    let err = assert_err!(remote.create_record("users", body).await);
    assert!(err.is_duplicate());
}

#[tokio::test]
async fn auth_header_carries_raw_token() {
    let remote = HttpRemote::new(&serve().await).unwrap();

    let err = assert_err!(remote.get_record("Organisation", "o1").await);
    assert_eq!(err.status(), Some(403));

    remote.set_auth_token(Some(TOKEN.to_string()));
    let record = assert_ok!(remote.get_record("Organisation", "o1").await);
    assert_eq!(record.get_str("name"), Some("Acme"));

    let err = assert_err!(remote.get_record("Organisation", "missing").await);
    assert!(err.is_not_found());
}

#[tokio::test]
async fn list_query_is_encoded() {
    let remote = HttpRemote::new(&serve().await).unwrap();
    let query = ListQuery::filtered(Filter::eq("organisation", "o1").and(Filter::eq("status", "active")))
        .sort("-created")
        .per_page(1);

    let page = assert_ok!(remote.list_records("OrganisationMembers", &query).await);
    assert_eq!(page.per_page, 1);
    assert_eq!(page.total_items, 1);
    let item = &page.items[0];
    assert_eq!(item.get_str("filter"), Some("organisation = \"o1\" && status = \"active\""));
    assert_eq!(item.get_str("sort"), Some("-created"));
}

#[tokio::test]
async fn file_updates_are_sent_as_multipart() {
    let remote = HttpRemote::new(&serve().await).unwrap();
    let body = RecordBody::new()
        .field("name", "Acme")
        .field("created_by", "u1")
        .file(FileUpload {
            field: "logo".to_string(),
            filename: "crest.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        });

    let record = assert_ok!(remote.update_record("Organisation", "o1", body).await);
    assert!(record.get_str("contentType").unwrap().starts_with("multipart/form-data"));

    let plain = assert_ok!(remote.update_record("Organisation", "o1", RecordBody::new().field("name", "Acme")).await);
    assert_eq!(plain.get_str("contentType"), Some("application/json"));
}

#[tokio::test]
async fn delete_and_provider_listing() {
    let remote = HttpRemote::new(&serve().await).unwrap();

    assert_ok!(remote.delete_record("Organisation", "o1").await);
    let err = assert_err!(remote.delete_record("Organisation", "o2").await);
    assert!(err.is_not_found());

    let providers = assert_ok!(remote.auth_methods().await);
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].name, "google");
    assert_eq!(providers[0].code_verifier, "cv_1");
    assert!(providers[0].auth_url.ends_with("redirect_uri="));
}
