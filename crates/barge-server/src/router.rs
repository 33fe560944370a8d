//! HTTP dispatch: the four smart HTTP routes, repository management, and
//! the browse API.

use crate::actor::RepoRegistry;
use crate::auth::{parse_basic, AuthZ, Credentials, Decision, GitOp};
use crate::cache::ResultCache;
use crate::config::TimeoutsConfig;
use crate::error::ServerError;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use barge_git::{Oid, Repository};
use barge_protocol::Service;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository actors.
    pub registry: Arc<RepoRegistry>,
    /// Authorization gate.
    pub authz: Arc<dyn AuthZ>,
    /// Browse result cache.
    pub cache: Arc<ResultCache>,
    /// Request timeouts.
    pub timeouts: Arc<TimeoutsConfig>,
}

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Repository management
        .route("/api/repos", get(list_repos).post(create_repo))
        .route("/api/repos/{owner}/{repo}", get(get_repo))
        // Browse API
        .route("/api/repos/{owner}/{repo}/branches", get(api_branches))
        .route("/api/repos/{owner}/{repo}/log", get(api_log))
        .route("/api/repos/{owner}/{repo}/tree", get(api_tree))
        .route("/api/repos/{owner}/{repo}/blob", get(api_blob))
        .route("/api/repos/{owner}/{repo}/commits/{oid}", get(api_commit))
        // Git smart HTTP
        .route("/{owner}/{repo}/info/refs", get(git_info_refs))
        .route("/{owner}/{repo}/git-upload-pack", post(git_upload_pack))
        .route("/{owner}/{repo}/git-receive-pack", post(git_receive_pack))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn trim_git(repo: &str) -> &str {
    repo.strip_suffix(".git").unwrap_or(repo)
}

fn credentials_from(headers: &HeaderMap) -> Option<Credentials> {
    parse_basic(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
    op: GitOp,
) -> Result<(), ServerError> {
    let credentials = credentials_from(headers);
    match state.authz.authorize(owner, repo, op, credentials.as_ref()) {
        Decision::Allow => Ok(()),
        Decision::Deny => Err(ServerError::Unauthorized),
    }
}

fn wire_response(content_type: String, body: Vec<u8>) -> Result<Response, ServerError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .map_err(|e| ServerError::Internal(e.to_string()))
}

async fn collect_body(state: &AppState, body: Body) -> Result<Bytes, ServerError> {
    tokio::time::timeout(
        state.timeouts.request_read(),
        axum::body::to_bytes(body, usize::MAX),
    )
    .await
    .map_err(|_| ServerError::Timeout)?
    .map_err(|e| ServerError::BadRequest(format!("reading request body: {}", e)))
}

// ---- operational -------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ---- repository management ---------------------------------------------

/// Repository info for listing.
#[derive(Serialize, Deserialize)]
pub struct RepoInfo {
    pub owner: String,
    pub name: String,
}

/// Request to create a repository.
#[derive(Serialize, Deserialize)]
pub struct CreateRepoRequest {
    pub owner: String,
    pub name: String,
}

async fn list_repos(State(state): State<AppState>) -> impl IntoResponse {
    let repos: Vec<RepoInfo> = state
        .registry
        .list()
        .into_iter()
        .map(|(owner, name)| RepoInfo { owner, name })
        .collect();
    Json(repos)
}

async fn create_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRepoRequest>,
) -> Result<impl IntoResponse, ServerError> {
    authorize(&state, &headers, &req.owner, &req.name, GitOp::Write)?;
    let actor = state.registry.create(&req.owner, &req.name).await?;
    tracing::info!(repo = %actor.full_name(), "created via API");
    Ok((
        StatusCode::CREATED,
        Json(RepoInfo {
            owner: req.owner,
            name: req.name,
        }),
    ))
}

async fn get_repo(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    let repo = trim_git(&repo);
    authorize(&state, &headers, &owner, repo, GitOp::Read)?;
    state.registry.open(&owner, repo).await?;
    Ok(Json(RepoInfo {
        owner,
        name: repo.to_string(),
    }))
}

// ---- smart HTTP --------------------------------------------------------

async fn git_info_refs(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo);
    let service = Service::from_name(params.get("service").map(String::as_str).unwrap_or(""))?;
    let op = match service {
        Service::UploadPack => GitOp::Read,
        Service::ReceivePack => GitOp::Write,
    };
    authorize(&state, &headers, &owner, repo, op)?;

    let actor = match service {
        // A push flow may target a repository that only exists after its
        // first push; reads must not conjure repositories into existence.
        Service::UploadPack => state.registry.open(&owner, repo).await?,
        Service::ReceivePack => state.registry.open_or_init(&owner, repo).await?,
    };
    let body = actor.advertise(service).await?;
    wire_response(service.advertisement_content_type(), body)
}

async fn git_upload_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    let (parts, body) = request.into_parts();
    authorize(&state, &parts.headers, &owner, &repo, GitOp::Read)?;
    let body = collect_body(&state, body).await?;

    let actor = state.registry.open(&owner, &repo).await?;
    let response = actor.upload_pack(&body).await?;
    wire_response(Service::UploadPack.result_content_type(), response)
}

async fn git_receive_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    let (parts, body) = request.into_parts();
    authorize(&state, &parts.headers, &owner, &repo, GitOp::Write)?;
    let body = collect_body(&state, body).await?;

    let actor = state.registry.open_or_init(&owner, &repo).await?;
    let response = tokio::time::timeout(
        state.timeouts.receive_pack(),
        actor.receive_pack(&body, state.timeouts.index_pack()),
    )
    .await
    .map_err(|_| ServerError::Timeout)??;

    tracing::info!(owner = %owner, repo = %repo, bytes = body.len(), "push processed");
    wire_response(Service::ReceivePack.result_content_type(), response)
}

// ---- browse API --------------------------------------------------------

/// Runs a browse query through the result cache. The key embeds the tip
/// OID the query depends on, so stale entries can never be served.
async fn cached_browse<F>(
    state: &AppState,
    owner: &str,
    repo: &str,
    operation: &str,
    params: Vec<String>,
    rev: &str,
    query: F,
) -> Result<Response, ServerError>
where
    F: FnOnce(&Repository) -> Result<Vec<u8>, ServerError> + Send + 'static,
{
    let actor = state.registry.open(owner, repo).await?;
    let full_name = actor.full_name().to_string();
    let cache = state.cache.clone();
    let rev = rev.to_string();
    let operation = operation.to_string();

    let bytes = actor
        .read(move |r| -> Result<Vec<u8>, ServerError> {
            let tip = r.resolve_rev(&rev).map_err(ServerError::from)?;
            let param_refs: Vec<&str> = params.iter().map(String::as_str).collect();
            let key = ResultCache::key(&full_name, &operation, &param_refs, &tip);
            if let Some(hit) = cache.get(&key) {
                return Ok(hit);
            }
            let bytes = query(r)?;
            cache.put(key, bytes.clone());
            Ok(bytes)
        })
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(bytes))
        .map_err(|e| ServerError::Internal(e.to_string()))
}

async fn api_branches(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    authorize(&state, &headers, &owner, &repo, GitOp::Read)?;

    // Branch listing has no single tip to fingerprint; it is cheap enough
    // to compute every time.
    let actor = state.registry.open(&owner, &repo).await?;
    let (branches, current) = actor
        .read(|r| -> Result<_, ServerError> {
            Ok((r.branches()?, r.current_branch()?))
        })
        .await?;
    Ok(Json(serde_json::json!({
        "branches": branches,
        "current": current,
    }))
    .into_response())
}

async fn api_log(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    authorize(&state, &headers, &owner, &repo, GitOp::Read)?;

    let rev = params.get("ref").cloned().unwrap_or_else(|| "HEAD".to_string());
    let depth: Option<usize> = params.get("depth").and_then(|d| d.parse().ok());
    let path = params.get("path").cloned();

    let cache_params = vec![
        format!("depth={}", depth.map(|d| d.to_string()).unwrap_or_default()),
        format!("path={}", path.clone().unwrap_or_default()),
    ];
    let rev_for_query = rev.clone();
    cached_browse(&state, &owner, &repo, "log", cache_params, &rev, move |r| {
        let log = r.log(Some(&rev_for_query), depth, path.as_deref())?;
        Ok(serde_json::to_vec(&log)?)
    })
    .await
}

async fn api_tree(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    authorize(&state, &headers, &owner, &repo, GitOp::Read)?;

    let rev = params.get("ref").cloned().unwrap_or_else(|| "HEAD".to_string());
    let path = params.get("path").cloned();

    let cache_params = vec![format!("path={}", path.clone().unwrap_or_default())];
    let rev_for_query = rev.clone();
    cached_browse(&state, &owner, &repo, "tree", cache_params, &rev, move |r| {
        let entries = r.tree_entries(&rev_for_query, path.as_deref())?;
        Ok(serde_json::to_vec(&entries)?)
    })
    .await
}

#[derive(Serialize)]
struct BlobResponse {
    oid: Oid,
    size: usize,
    is_binary: bool,
    /// UTF-8 content; omitted for binary blobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

async fn api_blob(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    authorize(&state, &headers, &owner, &repo, GitOp::Read)?;

    let rev = params.get("ref").cloned().unwrap_or_else(|| "HEAD".to_string());
    let path = params
        .get("path")
        .cloned()
        .ok_or_else(|| ServerError::BadRequest("missing path parameter".to_string()))?;

    let cache_params = vec![format!("path={}", path)];
    let rev_for_query = rev.clone();
    cached_browse(&state, &owner, &repo, "blob", cache_params, &rev, move |r| {
        let blob = r.blob_at(&rev_for_query, &path)?;
        let text = if blob.is_binary {
            None
        } else {
            Some(String::from_utf8_lossy(&blob.content).to_string())
        };
        Ok(serde_json::to_vec(&BlobResponse {
            oid: blob.oid,
            size: blob.size,
            is_binary: blob.is_binary,
            text,
        })?)
    })
    .await
}

async fn api_commit(
    State(state): State<AppState>,
    Path((owner, repo, oid)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let repo = trim_git(&repo).to_string();
    authorize(&state, &headers, &owner, &repo, GitOp::Read)?;

    let oid = Oid::from_hex(&oid)
        .map_err(|_| ServerError::BadRequest(format!("invalid oid: {}", oid)))?;

    cached_browse(
        &state,
        &owner,
        &repo,
        "commit",
        Vec::new(),
        &oid.to_hex(),
        move |r| {
            let detail = r.commit_with_changes(&oid)?;
            Ok(serde_json::to_vec(&detail)?)
        },
    )
    .await
}
