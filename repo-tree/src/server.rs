//! HTTP surface: `GET /{owner}/{repo}` and `GET /{owner}/{repo}/{branch}`.
//!
//! Every request, whatever its method, is first admitted by the per-client
//! token bucket; only then is the method checked, the path percent-decoded and
//! parsed, and the tree pipeline run. Every response carries the
//! `X-RateLimit-*` headers; successful ones also carry `X-Cache` and
//! `Cache-Control`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warp::http::header::{HeaderMap, HeaderValue, ALLOW, CACHE_CONTROL};
use warp::http::{Method, StatusCode};
use warp::path::Tail;
use warp::reply::Response;
use warp::{Filter, Reply};

use repo_tree_core::contract::ListingSource;
use repo_tree_core::limiter::{Decision, TokenBucketLimiter};
use repo_tree_core::service::{TreeRequest, TreeService};
use repo_tree_core::ServiceError;

use crate::github::GitHubClient;
use crate::load_config::ServerConfig;

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
const X_CACHE: &str = "x-cache";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Process-wide state shared by every request handler.
pub struct AppState<S> {
    pub service: TreeService<S>,
    pub limiter: TokenBucketLimiter,
    pub cache_control: HeaderValue,
}

impl<S: ListingSource> AppState<S> {
    pub fn new(source: S, config: &ServerConfig) -> Result<Self> {
        let cache_control = HeaderValue::from_str(&config.cache_control)
            .with_context(|| format!("invalid cache_control value {:?}", config.cache_control))?;
        Ok(Self {
            service: TreeService::new(source, config.cache_ttl),
            limiter: TokenBucketLimiter::new(
                config.rate_limit.capacity,
                config.rate_limit.refill_per_second,
            ),
            cache_control,
        })
    }
}

/// Who a request counts against: first `X-Forwarded-For` hop, else the peer IP.
pub fn client_identity(forwarded_for: Option<&str>, remote: Option<SocketAddr>) -> String {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn with_state<S>(
    state: Arc<AppState<S>>,
) -> impl Filter<Extract = (Arc<AppState<S>>,), Error = std::convert::Infallible> + Clone
where
    S: ListingSource + 'static,
{
    warp::any().map(move || state.clone())
}

/// Every request reaches [`handle`]: method and query problems are answered
/// there, after admission, so nothing bypasses the limiter.
pub fn routes<S>(
    state: Arc<AppState<S>>,
) -> impl Filter<Extract = (Response,), Error = std::convert::Infallible> + Clone
where
    S: ListingSource + 'static,
{
    let identity = warp::header::headers_cloned()
        .and(warp::addr::remote())
        .map(|headers: HeaderMap, remote: Option<SocketAddr>| {
            let forwarded = headers
                .get(X_FORWARDED_FOR)
                .and_then(|value| value.to_str().ok());
            client_identity(forwarded, remote)
        });

    // A query string that does not decode is treated as absent.
    let query = warp::query::<HashMap<String, String>>()
        .or(warp::any().map(HashMap::<String, String>::new))
        .unify();

    warp::method()
        .and(warp::path::tail())
        .and(query)
        .and(identity)
        .and(with_state(state))
        .then(handle::<S>)
}

fn text(status: StatusCode, body: String) -> Response {
    warp::reply::with_status(body, status).into_response()
}

fn rate_limit_headers(mut response: Response, decision: &Decision) -> Response {
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.capacity));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_after_secs()));
    response
}

fn error_status(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Percent-decode the request path, as every route segment is matched on decoded text.
fn decode_path(raw: &str) -> Result<String, ServiceError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|e| ServiceError::InvalidRequest(format!("path is not valid UTF-8: {e}")))
}

async fn handle<S>(
    method: Method,
    tail: Tail,
    query: HashMap<String, String>,
    client: String,
    state: Arc<AppState<S>>,
) -> Response
where
    S: ListingSource + 'static,
{
    let decision = state.limiter.take(&client);
    if !decision.admitted {
        warn!(client = %client, path = tail.as_str(), "Rate limit exceeded");
        let response = text(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE.to_string());
        return rate_limit_headers(response, &decision);
    }

    if method != Method::GET {
        let mut response = text(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {method} not allowed"),
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return rate_limit_headers(response, &decision);
    }

    let bypass = query
        .get("nocache")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let request = decode_path(tail.as_str()).and_then(|path| TreeRequest::from_path(&path));
    let outcome = match request {
        Ok(request) => state.service.tree(&request.bypassing_cache(bypass)).await,
        Err(e) => Err(e),
    };

    let response = match outcome {
        Ok(outcome) => {
            debug!(
                client = %client,
                branch = %outcome.branch,
                cache = outcome.cache.as_str(),
                "Serving tree"
            );
            let mut response = text(StatusCode::OK, outcome.text);
            let headers = response.headers_mut();
            headers.insert(X_CACHE, HeaderValue::from_static(outcome.cache.as_str()));
            headers.insert(CACHE_CONTROL, state.cache_control.clone());
            response
        }
        Err(e) => {
            warn!(client = %client, path = tail.as_str(), error = %e, "Request failed");
            text(error_status(&e), e.to_string())
        }
    };
    rate_limit_headers(response, &decision)
}

/// Periodically forget idle rate buckets and expired cache entries.
pub fn spawn_sweeper<S>(state: Arc<AppState<S>>, every: Duration) -> JoinHandle<()>
where
    S: ListingSource + 'static,
{
    let full_refill = Duration::try_from_secs_f64(
        f64::from(state.limiter.capacity()) / state.limiter.refill_per_second(),
    )
    .unwrap_or(Duration::MAX);
    let max_idle = every.max(full_refill);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let buckets = state.limiter.sweep_idle(max_idle);
            let entries = state.service.purge_expired();
            debug!(buckets, entries, "Sweep complete");
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Serve trees from GitHub until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let client = GitHubClient::new(&config.github).map_err(|e| anyhow::anyhow!(e))?;
    let state = Arc::new(AppState::new(client, &config)?);
    let sweeper = spawn_sweeper(state.clone(), config.rate_limit.sweep_interval);

    let (addr, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(config.listen_addr, shutdown_signal())
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(%addr, "Listening");

    server.await;
    sweeper.abort();
    info!("Server stopped");
    Ok(())
}
