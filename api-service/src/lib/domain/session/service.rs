use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use auth::AccessClaims;
use auth::AuthenticationError;
use auth::Authenticator;
use auth::Clock;
use auth::IdentityProvider;
use auth::IdentityVerifier;
use auth::VerifiedIdentity;

use crate::domain::session::errors::AuthError;
use crate::domain::session::errors::ValidationError;
use crate::domain::session::models::AuthSession;
use crate::domain::session::models::LoginCommand;
use crate::domain::session::models::OAuthSignInCommand;
use crate::domain::session::models::RegisterCommand;
use crate::domain::session::models::RevokeOutcome;
use crate::domain::session::models::TokenPair;
use crate::domain::session::ports::AuthServicePort;
use crate::domain::session::ports::RefreshTokenRepository;
use crate::domain::session::refresh_tokens::RefreshTokenStore;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;
use crate::domain::user::models::UserName;
use crate::user::errors::EmailError;
use crate::user::errors::UserError;
use crate::user::ports::UserRepository;

struct RegisteredVerifier {
    verifier: Arc<dyn IdentityVerifier>,
    audience: String,
}

/// Domain service implementation for authentication and sessions.
///
/// Password hashing and verification run on the blocking thread pool. Every
/// error is mapped and returned immediately; nothing is retried.
pub struct AuthService<UR, TR>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    users: Arc<UR>,
    refresh_tokens: RefreshTokenStore<TR>,
    authenticator: Arc<Authenticator>,
    verifiers: HashMap<IdentityProvider, RegisteredVerifier>,
    clock: Arc<dyn Clock>,
}

impl<UR, TR> AuthService<UR, TR>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    /// Create a new authentication service with injected dependencies.
    ///
    /// # Arguments
    /// * `users` - User persistence implementation
    /// * `refresh_tokens` - Refresh token lifecycle
    /// * `authenticator` - Password and access token operations
    /// * `clock` - Time source for account timestamps
    pub fn new(
        users: Arc<UR>,
        refresh_tokens: RefreshTokenStore<TR>,
        authenticator: Arc<Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            refresh_tokens,
            authenticator,
            verifiers: HashMap::new(),
            clock,
        }
    }

    /// Enable sign-in through `verifier`'s provider.
    ///
    /// # Arguments
    /// * `verifier` - Identity token verifier
    /// * `audience` - Client identifier tokens must be issued to
    pub fn with_identity_verifier(
        mut self,
        verifier: Arc<dyn IdentityVerifier>,
        audience: impl Into<String>,
    ) -> Self {
        self.verifiers.insert(
            verifier.provider(),
            RegisteredVerifier {
                verifier,
                audience: audience.into(),
            },
        );
        self
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let authenticator = Arc::clone(&self.authenticator);
        tokio::task::spawn_blocking(move || authenticator.hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Mint an access/refresh pair for an authenticated user.
    async fn start_session(&self, user: User, access_token: Option<String>) -> Result<AuthSession, AuthError> {
        let access_token = match access_token {
            Some(token) => token,
            None => self
                .authenticator
                .issue_access_token(&user.id.to_string(), user.email.as_str())
                .map_err(|e| AuthError::Internal(e.to_string()))?,
        };
        let refresh_token = self.refresh_tokens.issue(&user.id).await?;

        Ok(AuthSession {
            tokens: TokenPair {
                access_token,
                refresh_token: refresh_token.token,
            },
            user,
        })
    }

    fn resolve_email(
        identity: &VerifiedIdentity,
        fallback_email: Option<String>,
    ) -> Result<EmailAddress, AuthError> {
        let email = identity
            .email
            .clone()
            .or(fallback_email)
            .ok_or(ValidationError::Email(EmailError::Required))?;

        Ok(EmailAddress::new(email).map_err(ValidationError::from)?)
    }

    async fn find_or_create_external_user(
        &self,
        email: EmailAddress,
        name: UserName,
        provider: IdentityProvider,
    ) -> Result<User, AuthError> {
        if let Some(user) = self.users.find_by_email(email.as_str()).await? {
            return Ok(user);
        }

        let user = User::new(name, email.clone(), None, self.clock.now());
        match self.users.create(user).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, provider = %provider, "User created from external identity");
                Ok(user)
            }
            // Lost a concurrent first sign-in; the winner's account is the one to use.
            Err(UserError::EmailAlreadyExists(_)) => self
                .users
                .find_by_email(email.as_str())
                .await?
                .ok_or(AuthError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }
}

/// Display name for a new external account: provider claim, then the
/// client-supplied name, then the email itself.
fn display_name(
    identity_name: Option<String>,
    full_name: Option<String>,
    email: &EmailAddress,
) -> Result<UserName, AuthError> {
    if let Some(name) = identity_name
        .into_iter()
        .chain(full_name)
        .find_map(|candidate| UserName::new(candidate).ok())
    {
        return Ok(name);
    }

    UserName::new(email.as_str().to_string()).map_err(|e| AuthError::Validation(e.into()))
}

#[async_trait]
impl<UR, TR> AuthServicePort for AuthService<UR, TR>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    async fn register(&self, command: RegisterCommand) -> Result<AuthSession, AuthError> {
        if self
            .users
            .find_by_email(command.email.as_str())
            .await?
            .is_some()
        {
            return Err(AuthError::EmailAlreadyRegistered(
                command.email.as_str().to_string(),
            ));
        }

        let password_hash = self.hash_password(command.password).await?;
        let user = User::new(
            command.name,
            command.email,
            Some(password_hash),
            self.clock.now(),
        );
        let user = self.users.create(user).await?;

        tracing::info!(user_id = %user.id, "User registered");
        self.start_session(user, None).await
    }

    async fn login(&self, command: LoginCommand) -> Result<AuthSession, AuthError> {
        let authenticator = Arc::clone(&self.authenticator);
        let password = command.password;

        let Some(user) = self.users.find_by_email(command.email.as_str()).await? else {
            tokio::task::spawn_blocking(move || authenticator.verify_against_dummy(&password))
                .await
                .map_err(|e| AuthError::Internal(e.to_string()))?;
            tracing::info!("Login rejected: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let stored_hash = user.password_hash.clone();
        let subject = user.id.to_string();
        let email = user.email.as_str().to_string();

        let result = tokio::task::spawn_blocking(move || {
            authenticator.authenticate(&password, stored_hash.as_deref(), &subject, &email)
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?;

        let access_token = match result {
            Ok(result) => result.access_token,
            Err(AuthenticationError::InvalidCredentials) => {
                tracing::info!(user_id = %user.id, "Login rejected: bad credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Err(AuthenticationError::PasswordError(e)) => {
                tracing::warn!(user_id = %user.id, error = %e, "Stored password hash is unusable");
                return Err(AuthError::InvalidCredentials);
            }
            Err(AuthenticationError::JwtError(e)) => return Err(AuthError::Internal(e.to_string())),
        };

        tracing::info!(user_id = %user.id, "User logged in");
        self.start_session(user, Some(access_token)).await
    }

    async fn oauth_sign_in(&self, command: OAuthSignInCommand) -> Result<AuthSession, AuthError> {
        let provider = command.provider;
        let registered = self
            .verifiers
            .get(&provider)
            .ok_or_else(|| AuthError::UnsupportedProvider(provider.to_string()))?;

        let identity = registered
            .verifier
            .verify(&command.identity_token, &registered.audience)
            .await
            .map_err(|e| {
                tracing::info!(provider = %provider, error = %e, "Identity token rejected");
                AuthError::ExternalVerification(e)
            })?;

        let email = Self::resolve_email(&identity, command.fallback_email)?;
        let name = display_name(identity.name, command.full_name, &email)?;
        let user = self
            .find_or_create_external_user(email, name, provider)
            .await?;

        tracing::info!(user_id = %user.id, provider = %provider, "User signed in with external identity");
        self.start_session(user, None).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        if refresh_token.is_empty() {
            return Err(ValidationError::RefreshTokenRequired.into());
        }

        let record = self.refresh_tokens.lookup(refresh_token).await?;
        if record.is_expired(self.refresh_tokens.now()) {
            return Err(AuthError::RefreshTokenExpired);
        }
        if record.is_revoked() {
            tracing::warn!(user_id = %record.user_id, "Revoked refresh token presented");
            return Err(AuthError::RefreshTokenRevoked);
        }

        let user = self
            .users
            .find_by_id(&record.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        // The revocation is the serialization point: of two concurrent
        // rotations only one observes `Revoked`.
        if self.refresh_tokens.revoke(refresh_token).await? == RevokeOutcome::AlreadyRevoked {
            tracing::warn!(user_id = %user.id, "Refresh token rotated concurrently");
            return Err(AuthError::RefreshTokenRevoked);
        }

        tracing::debug!(user_id = %user.id, "Refresh token rotated");
        self.start_session(user, None).await
    }

    async fn current_user(&self, claims: &AccessClaims) -> Result<User, AuthError> {
        let user_id = UserId::from_string(&claims.sub).map_err(|_| AuthError::UserNotFound)?;

        self.users
            .find_by_id(&user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if refresh_token.is_empty() {
            return Err(ValidationError::RefreshTokenRequired.into());
        }

        match self.refresh_tokens.revoke(refresh_token).await? {
            RevokeOutcome::Revoked => tracing::info!("Refresh token revoked by logout"),
            RevokeOutcome::AlreadyRevoked => tracing::debug!("Logout of already revoked token"),
        }

        Ok(())
    }

    async fn logout_everywhere(&self, user_id: &UserId) -> Result<u64, AuthError> {
        let revoked = self.refresh_tokens.revoke_all(user_id).await?;
        tracing::info!(user_id = %user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    async fn sweep_expired_sessions(&self) -> Result<u64, AuthError> {
        let deleted = self.refresh_tokens.sweep_expired().await?;
        if deleted > 0 {
            tracing::info!(deleted, "Expired refresh tokens swept");
        }
        Ok(deleted)
    }

    fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AuthError> {
        self.authenticator
            .validate_token(access_token)
            .map_err(AuthError::AccessToken)
    }
}

#[cfg(test)]
mod tests {
    use auth::clock::ManualClock;
    use auth::IdentityError;
    use auth::JwtError;
    use auth::JwtHandler;
    use auth::PasswordHasher;
    use chrono::DateTime;
    use chrono::Duration;
    use chrono::TimeZone;
    use chrono::Utc;
    use mockall::mock;

    use super::*;
    use crate::outbound::repositories::memory::InMemoryRefreshTokenRepository;
    use crate::outbound::repositories::memory::InMemoryUserRepository;

    mock! {
        pub TestUserRepository {}

        #[async_trait]
        impl UserRepository for TestUserRepository {
            async fn create(&self, user: User) -> Result<User, UserError>;
            async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, UserError>;
            async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserError>;
            async fn update(&self, user: User) -> Result<User, UserError>;
            async fn delete(&self, id: &UserId) -> Result<(), UserError>;
            async fn count(&self) -> Result<u64, UserError>;
        }
    }

    mock! {
        pub TestIdentityVerifier {}

        #[async_trait]
        impl IdentityVerifier for TestIdentityVerifier {
            fn provider(&self) -> IdentityProvider;
            async fn verify(
                &self,
                identity_token: &str,
                expected_audience: &str,
            ) -> Result<VerifiedIdentity, IdentityError>;
        }
    }

    const SECRET: &[u8] = b"test-secret-key-for-jwt-signing-at-least-32-bytes";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn authenticator(clock: Arc<ManualClock>) -> Arc<Authenticator> {
        Arc::new(Authenticator::new(
            PasswordHasher::with_cost(4),
            JwtHandler::new(SECRET, Duration::hours(24)).with_clock(clock),
        ))
    }

    fn service_with<UR: UserRepository>(
        users: Arc<UR>,
        clock: Arc<ManualClock>,
    ) -> AuthService<UR, InMemoryRefreshTokenRepository> {
        let store = RefreshTokenStore::new(
            Arc::new(InMemoryRefreshTokenRepository::new()),
            Duration::days(7),
            clock.clone(),
        );
        AuthService::new(users, store, authenticator(clock.clone()), clock)
    }

    fn service() -> (
        AuthService<InMemoryUserRepository, InMemoryRefreshTokenRepository>,
        Arc<ManualClock>,
    ) {
        let clock = Arc::new(ManualClock::new(start()));
        (
            service_with(Arc::new(InMemoryUserRepository::new()), clock.clone()),
            clock,
        )
    }

    fn register_ann() -> RegisterCommand {
        RegisterCommand::new(
            "Ann".to_string(),
            "ann@x.com".to_string(),
            "password123".to_string(),
        )
        .unwrap()
    }

    fn verifier_returning(
        provider: IdentityProvider,
        result: Result<VerifiedIdentity, IdentityError>,
    ) -> Arc<MockTestIdentityVerifier> {
        let mut verifier = MockTestIdentityVerifier::new();
        verifier.expect_provider().return_const(provider);
        verifier
            .expect_verify()
            .returning(move |_, _| result.clone());
        Arc::new(verifier)
    }

    fn identity(email: Option<&str>, name: Option<&str>) -> VerifiedIdentity {
        VerifiedIdentity {
            provider: IdentityProvider::Google,
            subject: "10987654321".to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_register_success() {
        let (service, _) = service();

        let session = service.register(register_ann()).await.unwrap();

        assert!(!session.tokens.access_token.is_empty());
        assert!(!session.tokens.refresh_token.is_empty());
        assert_eq!(session.user.email.as_str(), "ann@x.com");
        assert_eq!(session.user.name.as_str(), "Ann");
        assert!(session
            .user
            .password_hash
            .as_deref()
            .is_some_and(|h| h.starts_with("$2")));

        let claims = service.authenticate(&session.tokens.access_token).unwrap();
        assert_eq!(claims.sub, session.user.id.to_string());
        assert_eq!(claims.email, "ann@x.com");
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let (service, _) = service();
        service.register(register_ann()).await.unwrap();

        let err = service.register(register_ann()).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailAlreadyRegistered(_)));
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_register_storage_conflict_maps_to_conflict() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut users = MockTestUserRepository::new();
        users.expect_find_by_email().returning(|_| Ok(None));
        users
            .expect_create()
            .times(1)
            .returning(|user| Err(UserError::EmailAlreadyExists(user.email.to_string())));
        let service = service_with(Arc::new(users), clock);

        let err = service.register(register_ann()).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_register_storage_failure() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut users = MockTestUserRepository::new();
        users
            .expect_find_by_email()
            .returning(|_| Err(UserError::DatabaseError("connection refused".to_string())));
        users.expect_create().times(0);
        let service = service_with(Arc::new(users), clock);

        let err = service.register(register_ann()).await.unwrap_err();
        assert_eq!(err.kind(), "storage_error");
    }

    #[tokio::test]
    async fn test_login_success() {
        let (service, _) = service();
        let registered = service.register(register_ann()).await.unwrap();

        let session = service
            .login(LoginCommand::new("ann@x.com".to_string(), "password123".to_string()).unwrap())
            .await
            .unwrap();

        assert_eq!(session.user.id, registered.user.id);
        assert_ne!(session.tokens.refresh_token, registered.tokens.refresh_token);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (service, _) = service();
        service.register(register_ann()).await.unwrap();

        let wrong_password = service
            .login(LoginCommand::new("ann@x.com".to_string(), "wrong-password".to_string()).unwrap())
            .await
            .unwrap_err();
        let unknown_email = service
            .login(LoginCommand::new("bob@x.com".to_string(), "password123".to_string()).unwrap())
            .await
            .unwrap_err();

        assert_eq!(wrong_password.kind(), unknown_email.kind());
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.to_string(), "invalid email or password");
    }

    #[tokio::test]
    async fn test_unknown_email_login_runs_bcrypt() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = RefreshTokenStore::new(
            Arc::new(InMemoryRefreshTokenRepository::new()),
            Duration::days(7),
            clock.clone(),
        );
        let authenticator = Arc::new(Authenticator::new(
            PasswordHasher::with_cost(8),
            JwtHandler::new(SECRET, Duration::hours(24)).with_clock(clock.clone()),
        ));
        let service = AuthService::new(
            Arc::new(InMemoryUserRepository::new()),
            store,
            authenticator,
            clock,
        );
        service.register(register_ann()).await.unwrap();

        let login = |email: &str, password: &str| {
            LoginCommand::new(email.to_string(), password.to_string()).unwrap()
        };
        // Prepares the dummy hash.
        let _ = service.login(login("warm@x.com", "password123")).await;

        let started = std::time::Instant::now();
        let wrong_password = service.login(login("ann@x.com", "wrong-password")).await;
        let wrong_password_elapsed = started.elapsed();

        let started = std::time::Instant::now();
        let unknown_email = service.login(login("bob@x.com", "password123")).await;
        let unknown_email_elapsed = started.elapsed();

        assert!(matches!(wrong_password, Err(AuthError::InvalidCredentials)));
        assert!(matches!(unknown_email, Err(AuthError::InvalidCredentials)));
        assert!(
            unknown_email_elapsed * 4 >= wrong_password_elapsed,
            "unknown email took {unknown_email_elapsed:?}, wrong password took {wrong_password_elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_login_without_password_hash() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut users = MockTestUserRepository::new();
        users.expect_find_by_email().returning(move |email| {
            Ok(Some(User::new(
                UserName::new("Ann".to_string()).unwrap(),
                EmailAddress::new(email.to_string()).unwrap(),
                None,
                start(),
            )))
        });
        let service = service_with(Arc::new(users), clock);

        let err = service
            .login(LoginCommand::new("ann@x.com".to_string(), "password123".to_string()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let (service, _) = service();
        let session = service.register(register_ann()).await.unwrap();

        let rotated = service.refresh(&session.tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.tokens.refresh_token, session.tokens.refresh_token);
        assert_eq!(rotated.user.id, session.user.id);

        assert!(matches!(
            service.refresh(&session.tokens.refresh_token).await,
            Err(AuthError::RefreshTokenRevoked)
        ));
        assert!(service.refresh(&rotated.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_unknown_token() {
        let (service, _) = service();

        let err = service.refresh("never-issued").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));

        assert!(matches!(
            service.refresh("").await,
            Err(AuthError::Validation(ValidationError::RefreshTokenRequired))
        ));
    }

    #[tokio::test]
    async fn test_refresh_expired_reported_before_revoked() {
        let (service, clock) = service();
        let session = service.register(register_ann()).await.unwrap();
        service.logout(&session.tokens.refresh_token).await.unwrap();

        clock.advance(Duration::days(7));
        assert!(matches!(
            service.refresh(&session.tokens.refresh_token).await,
            Err(AuthError::RefreshTokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let (service, _) = service();
        let service = Arc::new(service);
        let session = service.register(register_ann()).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..2 {
            let service = Arc::clone(&service);
            let token = session.tokens.refresh_token.clone();
            tasks.spawn(async move { service.refresh(&token).await });
        }

        let mut winners = Vec::new();
        let mut losers = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(session) => winners.push(session),
                Err(AuthError::RefreshTokenRevoked) => losers += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(losers, 1);
        assert!(service.refresh(&winners[0].tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_everywhere_blocks_refresh() {
        let (service, _) = service();
        let first = service.register(register_ann()).await.unwrap();
        let second = service
            .login(LoginCommand::new("ann@x.com".to_string(), "password123".to_string()).unwrap())
            .await
            .unwrap();

        assert_eq!(service.logout_everywhere(&first.user.id).await.unwrap(), 2);

        for token in [&first.tokens.refresh_token, &second.tokens.refresh_token] {
            assert!(matches!(
                service.refresh(token).await,
                Err(AuthError::RefreshTokenRevoked)
            ));
        }
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, _) = service();
        let session = service.register(register_ann()).await.unwrap();

        assert!(service.logout(&session.tokens.refresh_token).await.is_ok());
        assert!(service.logout(&session.tokens.refresh_token).await.is_ok());
        assert!(matches!(
            service.logout("never-issued").await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_sweep_expired_sessions() {
        let (service, clock) = service();
        service.register(register_ann()).await.unwrap();

        assert_eq!(service.sweep_expired_sessions().await.unwrap(), 0);
        clock.advance(Duration::days(8));
        assert_eq!(service.sweep_expired_sessions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_access_token_expiry() {
        let (service, clock) = service();
        let session = service.register(register_ann()).await.unwrap();

        clock.advance(Duration::hours(24));
        let err = service.authenticate(&session.tokens.access_token).unwrap_err();
        assert!(matches!(err, AuthError::AccessToken(JwtError::Expired)));
        assert_eq!(err.kind(), "token_expired");
    }

    #[tokio::test]
    async fn test_current_user() {
        let (service, _) = service();
        let session = service.register(register_ann()).await.unwrap();
        let claims = service.authenticate(&session.tokens.access_token).unwrap();

        assert_eq!(service.current_user(&claims).await.unwrap(), session.user);

        let stranger = AccessClaims::new(UserId::new(), "x@x.com", start(), Duration::hours(1));
        assert!(matches!(
            service.current_user(&stranger).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_oauth_creates_user_once() {
        let (service, _) = service();
        let service = service.with_identity_verifier(
            verifier_returning(
                IdentityProvider::Google,
                Ok(identity(Some("bob@gmail.com"), Some("Bob Smith"))),
            ),
            "client",
        );
        let command = || {
            OAuthSignInCommand::new(IdentityProvider::Google, "token".to_string(), None, None)
                .unwrap()
        };

        let first = service.oauth_sign_in(command()).await.unwrap();
        let second = service.oauth_sign_in(command()).await.unwrap();

        assert_eq!(first.user.id, second.user.id);
        assert_eq!(first.user.name.as_str(), "Bob Smith");
        assert_eq!(first.user.password_hash, None);
        assert_eq!(service.users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oauth_verified_email_wins_over_fallback() {
        let (service, _) = service();
        let service = service.with_identity_verifier(
            verifier_returning(
                IdentityProvider::Google,
                Ok(identity(Some("bob@gmail.com"), None)),
            ),
            "client",
        );

        let session = service
            .oauth_sign_in(
                OAuthSignInCommand::new(
                    IdentityProvider::Google,
                    "token".to_string(),
                    Some("mallory@x.com".to_string()),
                    Some("Bob".to_string()),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(session.user.email.as_str(), "bob@gmail.com");
        assert_eq!(session.user.name.as_str(), "Bob");
    }

    #[tokio::test]
    async fn test_oauth_fallback_email_and_name() {
        let (service, _) = service();
        let service = service.with_identity_verifier(
            verifier_returning(IdentityProvider::Apple, Ok(identity(None, None))),
            "com.example.app",
        );

        let session = service
            .oauth_sign_in(
                OAuthSignInCommand::new(
                    IdentityProvider::Apple,
                    "token".to_string(),
                    Some("ann@x.com".to_string()),
                    None,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(session.user.email.as_str(), "ann@x.com");
        assert_eq!(session.user.name.as_str(), "ann@x.com");
    }

    #[tokio::test]
    async fn test_oauth_signs_into_existing_password_account() {
        let (service, _) = service();
        let service = service.with_identity_verifier(
            verifier_returning(
                IdentityProvider::Google,
                Ok(identity(Some("ann@x.com"), Some("Ann Google"))),
            ),
            "client",
        );
        let registered = service.register(register_ann()).await.unwrap();

        let session = service
            .oauth_sign_in(
                OAuthSignInCommand::new(IdentityProvider::Google, "token".to_string(), None, None)
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(session.user.id, registered.user.id);
        assert_eq!(session.user.name.as_str(), "Ann");
    }

    #[tokio::test]
    async fn test_oauth_without_any_email() {
        let (service, _) = service();
        let service = service.with_identity_verifier(
            verifier_returning(IdentityProvider::Google, Ok(identity(None, None))),
            "client",
        );

        let err = service
            .oauth_sign_in(
                OAuthSignInCommand::new(IdentityProvider::Google, "token".to_string(), None, None)
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_oauth_rejected_token() {
        let (service, _) = service();
        let service = service.with_identity_verifier(
            verifier_returning(IdentityProvider::Apple, Err(IdentityError::Expired)),
            "com.example.app",
        );

        let err = service
            .oauth_sign_in(
                OAuthSignInCommand::new(IdentityProvider::Apple, "token".to_string(), None, None)
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::ExternalVerification(IdentityError::Expired)
        ));
        assert_eq!(service.users.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oauth_unconfigured_provider() {
        let (service, _) = service();

        let err = service
            .oauth_sign_in(
                OAuthSignInCommand::new(IdentityProvider::Apple, "token".to_string(), None, None)
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedProvider(_)));
    }

    #[tokio::test]
    async fn test_oauth_lost_create_race_reuses_winner() {
        let clock = Arc::new(ManualClock::new(start()));
        let winner = User::new(
            UserName::new("Bob".to_string()).unwrap(),
            EmailAddress::new("bob@gmail.com".to_string()).unwrap(),
            None,
            start(),
        );
        let winner_id = winner.id;

        let mut users = MockTestUserRepository::new();
        let mut lookups = 0;
        users.expect_find_by_email().times(2).returning(move |_| {
            lookups += 1;
            Ok((lookups > 1).then(|| winner.clone()))
        });
        users
            .expect_create()
            .times(1)
            .returning(|user| Err(UserError::EmailAlreadyExists(user.email.to_string())));

        let service = service_with(Arc::new(users), clock).with_identity_verifier(
            verifier_returning(
                IdentityProvider::Google,
                Ok(identity(Some("bob@gmail.com"), None)),
            ),
            "client",
        );

        let session = service
            .oauth_sign_in(
                OAuthSignInCommand::new(IdentityProvider::Google, "token".to_string(), None, None)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(session.user.id, winner_id);
    }
}
