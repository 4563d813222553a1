//! Wiring of configured components into an [`AppState`].

use std::sync::Arc;

use anyhow::Context;
use auth::identity::AppleIdentityVerifier;
use auth::identity::DevelopmentIdentityVerifier;
use auth::identity::GoogleIdentityVerifier;
use auth::Authenticator;
use auth::Clock;
use auth::IdentityVerifier;
use auth::JwtHandler;
use auth::PasswordHasher;

use crate::config::Config;
use crate::config::OAuthConfig;
use crate::domain::session::ports::RefreshTokenRepository;
use crate::domain::session::refresh_tokens::RefreshTokenStore;
use crate::domain::session::service::AuthService;
use crate::domain::user::ports::UserRepository;
use crate::domain::user::service::UserService;
use crate::inbound::http::middleware::IpRateLimiter;
use crate::inbound::http::router::AppState;

/// An enabled identity provider and the audience its tokens must carry.
pub struct ConfiguredVerifier {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub audience: String,
}

/// Build the identity verifiers enabled by configuration.
///
/// Apple is enabled only with a client id. Google is always enabled; without
/// a client id its audience is not checked. With `allow_mock_tokens` every
/// verifier also accepts the fixed development tokens.
///
/// # Errors
/// Fails when an HTTP client cannot be constructed.
pub fn identity_verifiers(oauth: &OAuthConfig) -> anyhow::Result<Vec<ConfiguredVerifier>> {
    let mut verifiers: Vec<ConfiguredVerifier> = Vec::new();

    match &oauth.apple_client_id {
        Some(client_id) => verifiers.push(ConfiguredVerifier {
            verifier: Arc::new(AppleIdentityVerifier::new().context("Apple verifier")?),
            audience: client_id.clone(),
        }),
        None => tracing::info!("Apple sign-in disabled: no client id configured"),
    }

    if oauth.google_client_id.is_none() {
        tracing::warn!("Google client id not configured; token audience will not be checked");
    }
    verifiers.push(ConfiguredVerifier {
        verifier: Arc::new(
            GoogleIdentityVerifier::with_endpoint(oauth.google_tokeninfo_url.clone())
                .context("Google verifier")?,
        ),
        audience: oauth.google_client_id.clone().unwrap_or_default(),
    });

    if oauth.allow_mock_tokens {
        tracing::warn!("Mock identity tokens are accepted");
        for configured in &mut verifiers {
            configured.verifier = Arc::new(DevelopmentIdentityVerifier::new(Arc::clone(
                &configured.verifier,
            )));
        }
    }

    Ok(verifiers)
}

/// Assemble services over the given repositories.
///
/// # Errors
/// Fails when the rate limit configuration is unusable.
pub fn build_app_state<UR, TR>(
    config: &Config,
    users: Arc<UR>,
    refresh_tokens: Arc<TR>,
    verifiers: Vec<ConfiguredVerifier>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AppState>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    let authenticator = Arc::new(Authenticator::new(
        PasswordHasher::with_cost(config.password.cost),
        JwtHandler::new(config.jwt.secret.as_bytes(), config.jwt.access_token_ttl())
            .with_clock(Arc::clone(&clock)),
    ));

    let store = RefreshTokenStore::new(
        refresh_tokens,
        config.jwt.refresh_token_ttl(),
        Arc::clone(&clock),
    );

    let auth_service = verifiers.into_iter().fold(
        AuthService::new(Arc::clone(&users), store.clone(), authenticator, clock),
        |service, configured| {
            tracing::info!(provider = %configured.verifier.provider(), "Identity provider enabled");
            service.with_identity_verifier(configured.verifier, configured.audience)
        },
    );
    let user_service = UserService::new(users, store);

    let (requests_per_minute, burst) = config.rate_limit.quota()?;

    Ok(AppState {
        auth_service: Arc::new(auth_service),
        user_service: Arc::new(user_service),
        rate_limiter: IpRateLimiter::new(requests_per_minute, burst)
            .trust_forwarded_for(config.rate_limit.trust_forwarded_for),
    })
}
