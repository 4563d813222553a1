use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use auth::AccessClaims;
use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::extract::State;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use governor::RateLimiter;

use crate::domain::user::models::UserId;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::router::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Extension type holding the caller resolved from a valid access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub claims: AccessClaims,
}

/// Middleware that validates Bearer access tokens and adds the caller to
/// request extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token_from_header(&req)?;

    let claims = state.auth_service.authenticate(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        ApiError::from(e)
    })?;

    let user_id = UserId::from_string(&claims.sub).map_err(|e| {
        tracing::warn!(error = %e, "Access token subject is not a user id");
        ApiError::Unauthorized("invalid_token", "Invalid token".to_string())
    })?;

    req.extensions_mut()
        .insert(AuthenticatedUser { user_id, claims });

    Ok(next.run(req).await)
}

fn extract_token_from_header(req: &Request) -> Result<&str, ApiError> {
    let auth_header = req.headers().get(header::AUTHORIZATION).ok_or_else(|| {
        ApiError::Unauthorized("unauthorized", "Missing authorization header".to_string())
    })?;

    auth_header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ApiError::Unauthorized(
                "unauthorized",
                "Invalid authorization header format".to_string(),
            )
        })
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-client request limiter keyed by peer address, or by the first
/// `X-Forwarded-For` entry when the service sits behind a trusted proxy.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiter: Arc<KeyedLimiter>,
    trust_forwarded_for: bool,
}

impl IpRateLimiter {
    /// # Arguments
    /// * `requests_per_minute` - Sustained rate per client
    /// * `burst` - Requests a client may make back to back
    pub fn new(requests_per_minute: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_minute(requests_per_minute).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            trust_forwarded_for: false,
        }
    }

    /// Key clients by `X-Forwarded-For`. Only safe when a proxy in front of
    /// the service overwrites that header.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Middleware that rejects clients over their request quota with 429.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_key(&req, state.rate_limiter.trust_forwarded_for);

    if !state.rate_limiter.check(&client) {
        tracing::warn!(client = %client, "Rate limit exceeded");
        return Err(ApiError::TooManyRequests(
            "Rate limit exceeded. Please try again later.".to_string(),
        ));
    }

    Ok(next.run(req).await)
}

/// Peer IP, or the first `X-Forwarded-For` entry when trusted.
fn client_key(req: &Request, trust_forwarded_for: bool) -> String {
    let forwarded = req
        .headers()
        .get(FORWARDED_FOR)
        .filter(|_| trust_forwarded_for)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
