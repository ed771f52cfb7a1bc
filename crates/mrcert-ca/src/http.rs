//! HTTP routes for the certificate authority.
//!
//! Paths follow the browser client: `/api/...` for reads, `/files/...`
//! for downloads and `/<category>/...` for creation, signing and upload.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use mrcert_common::api::ErrorBody;
use mrcert_common::error::ErrorCode;
use mrcert_common::http::error_response;

use crate::bundle::{Category, FileRole};
use crate::error::CaError;
use crate::openssl_config::{DigestAlgorithm, Subject};
use crate::protocol::{
    CertParams, CertSummary, CreateIntermediateRequest, CreateLeafRequest, CreateRootRequest,
    CsrParams, HaveCertsQuery, HaveCertsResponse, ImportParams, NewCertResponse, SignCsrRequest,
    SignerRef, UploadSignedRequest,
};
use crate::CaCore;

// ── Route path constants ────────────────────────────────────────────

pub mod paths {
    pub const HAVE_CERTS: &str = "/api/have_certs";
    pub const LIST: &str = "/api/{category}";
    pub const GET: &str = "/api/{category}/{name}";
    pub const TEXT: &str = "/api/{category}/text/{file}";
    pub const FILES: &str = "/files/{category}/{file}";

    pub const ROOT_CREATE: &str = "/root/create-cert-file";
    pub const ROOT_UPLOAD: &str = "/root/upload-cert-file";
    pub const INTERMEDIATE_CREATE: &str = "/intermediate/create-cert-file";
    pub const INTERMEDIATE_UPLOAD: &str = "/intermediate/upload-cert-file";
    pub const SERVER_CREATE: &str = "/server/create-cert-file";
    pub const SERVER_SIGN: &str = "/server/sign-csr";
    pub const SERVER_UPLOAD: &str = "/server/upload-cert-file";
    pub const CLIENT_CREATE: &str = "/client/create-cert-file";
    pub const CLIENT_SIGN: &str = "/client/sign-csr";
    pub const CLIENT_UPLOAD: &str = "/client/upload-cert-file";
}

// ── OpenAPI schema ──────────────────────────────────────────────────

#[derive(utoipa::OpenApi)]
#[openapi(components(schemas(
    Category,
    DigestAlgorithm,
    Subject,
    SignerRef,
    CertParams,
    CsrParams,
    ImportParams,
    CreateRootRequest,
    CreateIntermediateRequest,
    CreateLeafRequest,
    SignCsrRequest,
    UploadSignedRequest,
    NewCertResponse,
    CertSummary,
    HaveCertsResponse,
    ErrorBody,
    ErrorCode,
)))]
pub struct CaApiDoc;

// ── Router constructor ──────────────────────────────────────────────

pub fn routes(core: CaCore) -> Router {
    Router::new()
        .route(paths::HAVE_CERTS, get(have_certs_handler))
        .route(paths::LIST, get(list_handler))
        .route(paths::GET, get(get_handler))
        .route(paths::TEXT, get(text_handler))
        .route(paths::FILES, get(file_handler))
        .route(paths::ROOT_CREATE, post(create_root_handler))
        .route(paths::ROOT_UPLOAD, post(upload_root_handler))
        .route(paths::INTERMEDIATE_CREATE, post(create_intermediate_handler))
        .route(paths::INTERMEDIATE_UPLOAD, post(upload_intermediate_handler))
        .route(paths::SERVER_CREATE, post(create_server_handler))
        .route(paths::SERVER_SIGN, post(sign_server_handler))
        .route(paths::SERVER_UPLOAD, post(upload_server_handler))
        .route(paths::CLIENT_CREATE, post(create_client_handler))
        .route(paths::CLIENT_SIGN, post(sign_client_handler))
        .route(paths::CLIENT_UPLOAD, post(upload_client_handler))
        .with_state(core)
}

// ── Helpers ─────────────────────────────────────────────────────────

fn map_error(e: CaError) -> Response {
    error_response(ErrorCode::from(&e), e.to_string())
}

fn parse_category(raw: &str) -> Result<Category, Response> {
    raw.parse::<Category>()
        .map_err(|_| error_response(ErrorCode::InvalidType, format!("unknown certificate type: {raw}")))
}

fn new_cert(result: Result<String, CaError>) -> Response {
    match result {
        Ok(name) => Json(NewCertResponse::for_name(&name)).into_response(),
        Err(e) => map_error(e),
    }
}

/// Split a download name into bundle name and file role.
///
/// `<name>.chain.crt` is the chain, `<name>.crt` the certificate and
/// `<name>.key` the private key.
pub fn parse_file_request(file: &str) -> Option<(&str, FileRole)> {
    let (name, role) = if let Some(name) = file.strip_suffix(".chain.crt") {
        (name, FileRole::Chain)
    } else if let Some(name) = file.strip_suffix(".crt") {
        (name, FileRole::Certificate)
    } else if let Some(name) = file.strip_suffix(".key") {
        (name, FileRole::Key)
    } else {
        return None;
    };
    (!name.is_empty()).then_some((name, role))
}

fn content_type(role: FileRole) -> &'static str {
    match role {
        FileRole::Key => "application/x-pem-file",
        _ => "application/x-x509-ca-cert",
    }
}

// ── Read handlers ───────────────────────────────────────────────────

/// GET /api/have_certs?types=root,intermediate
async fn have_certs_handler(
    State(core): State<CaCore>,
    Query(query): Query<HaveCertsQuery>,
) -> Response {
    match core.have_certs(&query.categories()).await {
        Ok(have_certs) => Json(HaveCertsResponse { have_certs }).into_response(),
        Err(e) => map_error(e),
    }
}

/// GET /api/{category}
async fn list_handler(State(core): State<CaCore>, Path(category): Path<String>) -> Response {
    let category = match parse_category(&category) {
        Ok(category) => category,
        Err(resp) => return resp,
    };
    match core.list(category).await {
        Ok(certs) => Json(certs).into_response(),
        Err(e) => map_error(e),
    }
}

/// GET /api/{category}/{name}
async fn get_handler(
    State(core): State<CaCore>,
    Path((category, name)): Path<(String, String)>,
) -> Response {
    let category = match parse_category(&category) {
        Ok(category) => category,
        Err(resp) => return resp,
    };
    match core.get(category, &name).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => map_error(e),
    }
}

/// GET /api/{category}/text/{name}.crt
async fn text_handler(
    State(core): State<CaCore>,
    Path((category, file)): Path<(String, String)>,
) -> Response {
    let category = match parse_category(&category) {
        Ok(category) => category,
        Err(resp) => return resp,
    };
    let Some(name) = file.strip_suffix(".crt").filter(|name| !name.is_empty()) else {
        return error_response(ErrorCode::NotFound, format!("no such file: {file}"));
    };
    match core.certificate_text(category, name).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Err(e) => map_error(e),
    }
}

/// GET /files/{category}/{name}.crt, .key or .chain.crt
async fn file_handler(
    State(core): State<CaCore>,
    Path((category, file)): Path<(String, String)>,
) -> Response {
    let category = match parse_category(&category) {
        Ok(category) => category,
        Err(resp) => return resp,
    };
    let Some((name, role)) = parse_file_request(&file) else {
        return error_response(ErrorCode::NotFound, format!("no such file: {file}"));
    };

    let contents = match core.file_path(category, name, role).await {
        Ok(path) => crate::file::read_file(&path).await.map_err(CaError::from),
        Err(e) => Err(e),
    };
    match contents {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, content_type(role).to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{file}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => map_error(e),
    }
}

// ── Create, sign and upload handlers ────────────────────────────────

/// POST /root/create-cert-file
async fn create_root_handler(
    State(core): State<CaCore>,
    Json(request): Json<CreateRootRequest>,
) -> Response {
    new_cert(core.create_root(&request).await)
}

/// POST /root/upload-cert-file
async fn upload_root_handler(
    State(core): State<CaCore>,
    Json(request): Json<ImportParams>,
) -> Response {
    new_cert(core.upload_root(&request).await)
}

/// POST /intermediate/create-cert-file
async fn create_intermediate_handler(
    State(core): State<CaCore>,
    Json(request): Json<CreateIntermediateRequest>,
) -> Response {
    new_cert(core.create_intermediate(&request).await)
}

/// POST /intermediate/upload-cert-file
async fn upload_intermediate_handler(
    State(core): State<CaCore>,
    Json(request): Json<UploadSignedRequest>,
) -> Response {
    new_cert(core.upload_signed(Category::Intermediate, &request).await)
}

/// POST /server/create-cert-file
async fn create_server_handler(
    State(core): State<CaCore>,
    Json(request): Json<CreateLeafRequest>,
) -> Response {
    new_cert(core.create_server(&request).await)
}

/// POST /server/sign-csr
async fn sign_server_handler(
    State(core): State<CaCore>,
    Json(request): Json<SignCsrRequest>,
) -> Response {
    new_cert(core.sign_server_csr(&request).await)
}

/// POST /server/upload-cert-file
async fn upload_server_handler(
    State(core): State<CaCore>,
    Json(request): Json<UploadSignedRequest>,
) -> Response {
    new_cert(core.upload_signed(Category::Server, &request).await)
}

/// POST /client/create-cert-file
async fn create_client_handler(
    State(core): State<CaCore>,
    Json(request): Json<CreateLeafRequest>,
) -> Response {
    new_cert(core.create_client(&request).await)
}

/// POST /client/sign-csr
async fn sign_client_handler(
    State(core): State<CaCore>,
    Json(request): Json<SignCsrRequest>,
) -> Response {
    new_cert(core.sign_client_csr(&request).await)
}

/// POST /client/upload-cert-file
async fn upload_client_handler(
    State(core): State<CaCore>,
    Json(request): Json<UploadSignedRequest>,
) -> Response {
    new_cert(core.upload_signed(Category::Client, &request).await)
}
