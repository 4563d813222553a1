use std::net::SocketAddr;
use std::sync::Arc;

use api_service::bootstrap::build_app_state;
use api_service::bootstrap::identity_verifiers;
use api_service::config::Config;
use api_service::config::CorsConfig;
use api_service::config::DatabaseConfig;
use api_service::config::JwtConfig;
use api_service::config::OAuthConfig;
use api_service::config::PasswordConfig;
use api_service::config::RateLimitConfig;
use api_service::config::RuntimeEnvironment;
use api_service::config::ServerConfig;
use api_service::config::SessionsConfig;
use api_service::inbound::http::router::create_router;
use api_service::outbound::repositories::InMemoryRefreshTokenRepository;
use api_service::outbound::repositories::InMemoryUserRepository;
use auth::clock::ManualClock;
use auth::JwtHandler;
use chrono::Utc;
use serde_json::json;
use serde_json::Value;

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-signing-at-least-32-bytes";
pub const TEST_PASSWORD: &str = "correct horse battery";

/// Test application that spawns a real server over in-memory storage
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub api_client: reqwest::Client,
    pub clock: Arc<ManualClock>,
    pub config: Config,
}

/// Tokens and user id returned by a successful sign-in
pub struct TestSession {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestSession {
    pub fn from_body(body: &Value) -> Self {
        Self {
            user_id: body["user"]["id"].as_str().expect("user id").to_string(),
            access_token: body["accessToken"]
                .as_str()
                .expect("access token")
                .to_string(),
            refresh_token: body["refreshToken"]
                .as_str()
                .expect("refresh token")
                .to_string(),
        }
    }
}

/// Configuration used by every test server: cheap bcrypt cost, mock identity
/// tokens, and limits high enough to stay out of the way.
pub fn test_config() -> Config {
    Config {
        environment: RuntimeEnvironment::Test,
        server: ServerConfig::default(),
        database: DatabaseConfig::default(),
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            ..JwtConfig::default()
        },
        password: PasswordConfig { cost: 4 },
        oauth: OAuthConfig {
            // Nothing listens here, so real tokens fail verification quickly.
            google_tokeninfo_url: "http://127.0.0.1:9/tokeninfo".to_string(),
            allow_mock_tokens: true,
            ..OAuthConfig::default()
        },
        rate_limit: RateLimitConfig {
            requests_per_minute: 10_000,
            burst: 1_000,
            trust_forwarded_for: false,
        },
        cors: CorsConfig::default(),
        sessions: SessionsConfig::default(),
    }
}

impl TestApp {
    /// Spawn the application in a background task and return TestApp
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    /// Spawn with a caller-adjusted configuration
    pub async fn spawn_with(config: Config) -> Self {
        // Use random port (0 = OS assigns)
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();
        let address = format!("http://127.0.0.1:{}", port);

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let verifiers =
            identity_verifiers(&config.oauth).expect("Failed to build identity verifiers");

        let state = build_app_state(
            &config,
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(InMemoryRefreshTokenRepository::new()),
            verifiers,
            clock.clone(),
        )
        .expect("Failed to build application state");

        let router = create_router(state, &config.cors.allowed_origins);

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server error");
        });

        Self {
            address,
            port,
            api_client: reqwest::Client::new(),
            clock,
            config,
        }
    }

    /// Handler for forging tokens with the server's secret at a chosen time
    pub fn jwt_handler(&self) -> JwtHandler {
        JwtHandler::new(TEST_JWT_SECRET.as_bytes(), self.config.jwt.access_token_ttl())
            .with_clock(self.clock.clone())
    }

    /// Helper to make GET request
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.get(&format!("{}{}", self.address, path))
    }

    /// Helper to make POST request
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.api_client.post(&format!("{}{}", self.address, path))
    }

    /// Helper to make GET request with Bearer token
    pub fn get_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.get(path).bearer_auth(token)
    }

    /// Helper to make POST request with Bearer token
    pub fn post_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.post(path).bearer_auth(token)
    }

    /// Helper to make PUT request with Bearer token
    pub fn put_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.api_client
            .put(&format!("{}{}", self.address, path))
            .bearer_auth(token)
    }

    /// Helper to make DELETE request with Bearer token
    pub fn delete_authenticated(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.api_client
            .delete(&format!("{}{}", self.address, path))
            .bearer_auth(token)
    }

    /// Register a user and return its session
    pub async fn register(&self, name: &str, email: &str) -> TestSession {
        let response = self
            .post("/api/v1/auth/register")
            .json(&json!({
                "name": name,
                "email": email,
                "password": TEST_PASSWORD
            }))
            .send()
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("Failed to parse response");
        TestSession::from_body(&body)
    }
}
