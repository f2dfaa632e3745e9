use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;

use super::error::LoginError;
use super::models::{AuthFlow, Credentials, LoginAttempt, LoginTarget};
use super::www_authenticate::Challenge;
use super::RegistryClient;

/// Token server response of the registry token authentication protocol
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    /// OAuth2-compatible alias of `token`
    #[serde(default)]
    access_token: Option<String>,
}

/// Login handshake state
#[derive(Debug)]
enum Handshake {
    /// Anonymous request to `/v2/` to discover what the registry wants
    Probing,
    /// Answering the challenge returned by the probe
    Authenticating(Challenge),
    Done(AuthFlow),
}

/// Registry client speaking the distribution API over reqwest
///
/// A fresh `reqwest::Client` is built for each verification so that
/// `skip_tls_verify` never leaks into other calls.
pub struct HttpRegistryClient {
    timeout: Duration,
    connect_timeout: Duration,
    use_system_proxy: bool,
}

impl HttpRegistryClient {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            timeout,
            // A connect phase longer than the whole deadline is meaningless
            connect_timeout: connect_timeout.min(timeout),
            use_system_proxy: true,
        }
    }

    /// Ignore `HTTP_PROXY`/`HTTPS_PROXY` and always connect directly
    pub fn without_proxy(mut self) -> Self {
        self.use_system_proxy = false;
        self
    }

    fn build_client(&self, target: &LoginTarget) -> Result<Client, LoginError> {
        let mut builder = Client::builder();
        if !self.use_system_proxy {
            builder = builder.no_proxy();
        }

        builder
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(target.skip_tls_verify)
            .user_agent(concat!("repo-vault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoginError::Network(format!("failed to build HTTP client: {}", e)))
    }

    async fn handshake(
        &self,
        client: &Client,
        target: &LoginTarget,
    ) -> Result<AuthFlow, LoginError> {
        let url = target.version_check_url();
        let mut state = Handshake::Probing;

        loop {
            tracing::debug!(registry = %target.api_host(), state = ?state, "Registry login step");
            state = match state {
                Handshake::Probing => self.probe(client, &url, target).await?,
                Handshake::Authenticating(challenge) => {
                    self.authenticate(client, &url, target.credentials.as_ref(), challenge)
                        .await?
                }
                Handshake::Done(flow) => return Ok(flow),
            };
        }
    }

    async fn probe(
        &self,
        client: &Client,
        url: &str,
        target: &LoginTarget,
    ) -> Result<Handshake, LoginError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        match response.status() {
            status if status.is_success() => Ok(Handshake::Done(AuthFlow::Anonymous)),
            StatusCode::UNAUTHORIZED => {
                let challenge = Challenge::from_header(
                    response
                        .headers()
                        .get(header::WWW_AUTHENTICATE)
                        .and_then(|v| v.to_str().ok()),
                );
                // Public registries hand out anonymous bearer tokens; basic
                // auth cannot be answered without credentials
                if target.credentials.is_none() && challenge == Challenge::Basic {
                    return Err(missing_credentials());
                }
                Ok(Handshake::Authenticating(challenge))
            }
            status => Err(unexpected_status(status, url)),
        }
    }

    async fn authenticate(
        &self,
        client: &Client,
        url: &str,
        credentials: Option<&Credentials>,
        challenge: Challenge,
    ) -> Result<Handshake, LoginError> {
        match challenge {
            Challenge::Basic => {
                let Some(credentials) = credentials else {
                    return Err(missing_credentials());
                };
                let response = client
                    .get(url)
                    .basic_auth(&credentials.username, Some(&credentials.password))
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;

                match response.status() {
                    status if status.is_success() => Ok(Handshake::Done(AuthFlow::Basic)),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LoginError::Auth(
                        format!("{} returned {}", url, response.status()),
                    )),
                    status => Err(unexpected_status(status, url)),
                }
            }
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let realm_url = reqwest::Url::parse(&realm).map_err(|e| {
                    LoginError::Network(format!("registry sent an invalid token realm '{}': {}", realm, e))
                })?;

                let mut query = Vec::new();
                if let Some(service) = service.as_deref() {
                    query.push(("service", service));
                }
                if let Some(scope) = scope.as_deref() {
                    query.push(("scope", scope));
                }

                let mut request = client.get(realm_url).query(&query);
                if let Some(credentials) = credentials {
                    request = request.basic_auth(&credentials.username, Some(&credentials.password));
                }
                let response = request.send().await.map_err(|e| self.classify(e))?;

                let status = response.status();
                match status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if credentials.is_none() => {
                        return Err(missing_credentials())
                    }
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        return Err(LoginError::Auth(format!(
                            "token server {} returned {}",
                            realm, status
                        )))
                    }
                    status if !status.is_success() => {
                        return Err(unexpected_status(status, &realm))
                    }
                    _ => {}
                }

                let body: TokenResponse = response.json().await.map_err(|e| {
                    if e.is_timeout() {
                        LoginError::Timeout(self.timeout)
                    } else {
                        LoginError::Network(format!("token server {} sent an invalid response", realm))
                    }
                })?;

                match body.token.or(body.access_token) {
                    Some(token) if !token.is_empty() => Ok(Handshake::Done(match credentials {
                        Some(_) => AuthFlow::Bearer,
                        None => AuthFlow::Anonymous,
                    })),
                    _ => Err(LoginError::Network(format!(
                        "token server {} issued no token",
                        realm
                    ))),
                }
            }
        }
    }

    /// Map a transport failure onto the login error taxonomy
    ///
    /// Anything that fails while establishing the connection (including the
    /// connect timeout) is a network problem; a stalled answer after that is
    /// a timeout.
    fn classify(&self, err: reqwest::Error) -> LoginError {
        if err.is_connect() {
            LoginError::Network(error_chain(&err))
        } else if err.is_timeout() {
            LoginError::Timeout(self.timeout)
        } else {
            LoginError::Network(error_chain(&err))
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn verify_login(&self, target: &LoginTarget) -> Result<LoginAttempt, LoginError> {
        let started = Instant::now();
        let client = self.build_client(target)?;

        // Dropping the handshake future on expiry closes its connection
        let result = match tokio::time::timeout(self.timeout, self.handshake(&client, target)).await
        {
            Ok(result) => result,
            Err(_) => Err(LoginError::Timeout(self.timeout)),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(flow) => {
                tracing::info!(
                    registry = %target.api_host(),
                    flow = ?flow,
                    latency_ms,
                    "Registry login succeeded"
                );
                Ok(LoginAttempt {
                    success: true,
                    flow,
                    latency_ms,
                    checked_at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    registry = %target.api_host(),
                    kind = e.kind(),
                    latency_ms,
                    error = %e,
                    "Registry login failed"
                );
                Err(e)
            }
        }
    }
}

fn missing_credentials() -> LoginError {
    LoginError::Auth("registry requires authentication but no credentials are configured".into())
}

fn unexpected_status(status: StatusCode, url: &str) -> LoginError {
    LoginError::Network(format!("unexpected status {} from {}", status, url))
}

/// Format an error and its causes, e.g. to surface the TLS failure reason
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = vec![error.to_string()];
    let mut current = error.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RepoProtocol;
    use axum::{
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::net::SocketAddr;

    const USER: &str = "admin";
    const PASS: &str = "s3cret";

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn expected_basic() -> String {
        format!("Basic {}", BASE64.encode(format!("{}:{}", USER, PASS)))
    }

    fn has_valid_basic(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected_basic())
            .unwrap_or(false)
    }

    /// Registry that only accepts basic auth on `/v2/`
    async fn basic_registry() -> SocketAddr {
        let app = Router::new().route(
            "/v2/",
            get(|headers: HeaderMap| async move {
                if has_valid_basic(&headers) {
                    (AxumStatus::OK, "{}").into_response()
                } else {
                    (
                        AxumStatus::UNAUTHORIZED,
                        [("www-authenticate", r#"Basic realm="Registry Realm""#)],
                        "unauthorized",
                    )
                        .into_response()
                }
            }),
        );
        serve(app).await
    }

    /// Registry that hands out tokens from its own `/token` endpoint
    async fn bearer_registry() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let challenge = format!(
            r#"Bearer realm="http://{}/token",service="mock-registry""#,
            addr
        );

        let app = Router::new()
            .route(
                "/v2/",
                get(move || {
                    let challenge = challenge.clone();
                    async move {
                        (
                            AxumStatus::UNAUTHORIZED,
                            [("www-authenticate", challenge)],
                            "unauthorized",
                        )
                    }
                }),
            )
            .route(
                "/token",
                get(|headers: HeaderMap| async move {
                    if has_valid_basic(&headers) {
                        Json(serde_json::json!({ "token": "abc.def.ghi", "expires_in": 300 }))
                            .into_response()
                    } else {
                        AxumStatus::UNAUTHORIZED.into_response()
                    }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Public registry: anonymous token requests get a pull token unless
    /// `allow_anonymous` is off
    async fn anonymous_bearer_registry(allow_anonymous: bool) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let challenge = format!(
            r#"Bearer realm="http://{}/token",service="public-registry""#,
            addr
        );

        let app = Router::new()
            .route(
                "/v2/",
                get(move || {
                    let challenge = challenge.clone();
                    async move {
                        (
                            AxumStatus::UNAUTHORIZED,
                            [("www-authenticate", challenge)],
                            "unauthorized",
                        )
                    }
                }),
            )
            .route(
                "/token",
                get(move |headers: HeaderMap| async move {
                    if has_valid_basic(&headers) {
                        Json(serde_json::json!({ "token": "user-token" })).into_response()
                    } else if allow_anonymous && !headers.contains_key("authorization") {
                        Json(serde_json::json!({ "token": "anon" })).into_response()
                    } else {
                        AxumStatus::UNAUTHORIZED.into_response()
                    }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Self-signed certificate for `localhost` / `127.0.0.1`
    fn self_signed_identity() -> native_tls::Identity {
        use openssl::{
            asn1::Asn1Time,
            bn::{BigNum, MsbOption},
            hash::MessageDigest,
            pkey::PKey,
            rsa::Rsa,
            x509::{extension::SubjectAlternativeName, X509NameBuilder, X509},
        };

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "localhost").unwrap();
        let name = name.build();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        native_tls::Identity::from_pkcs8(
            &cert.to_pem().unwrap(),
            &key.private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap()
    }

    /// Open registry served over HTTPS with a self-signed certificate
    async fn self_signed_registry() -> SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let acceptor = tokio_native_tls::TlsAcceptor::from(
            native_tls::TlsAcceptor::new(self_signed_identity()).unwrap(),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    // Verifying clients abort the handshake
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };

                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let _ = tls
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                              content-length: 2\r\nconnection: close\r\n\r\n{}",
                        )
                        .await;
                    let _ = tls.shutdown().await;
                });
            }
        });
        addr
    }

    fn target(addr: impl ToString, password: Option<&str>) -> LoginTarget {
        LoginTarget {
            endpoint: addr.to_string(),
            protocol: RepoProtocol::Http,
            skip_tls_verify: false,
            credentials: password.map(|p| Credentials {
                username: USER.to_string(),
                password: p.to_string(),
            }),
        }
    }

    fn client() -> HttpRegistryClient {
        HttpRegistryClient::new(Duration::from_secs(5), Duration::from_secs(2)).without_proxy()
    }

    #[tokio::test]
    async fn test_open_registry_is_anonymous() {
        let addr = serve(Router::new().route("/v2/", get(|| async { "{}" }))).await;
        let attempt = client().verify_login(&target(addr, None)).await.unwrap();
        assert!(attempt.success);
        assert_eq!(attempt.flow, AuthFlow::Anonymous);
    }

    #[tokio::test]
    async fn test_basic_auth_success() {
        let addr = basic_registry().await;
        let attempt = client()
            .verify_login(&target(addr, Some(PASS)))
            .await
            .unwrap();
        assert_eq!(attempt.flow, AuthFlow::Basic);
    }

    #[tokio::test]
    async fn test_basic_auth_rejected_is_auth_error() {
        let addr = basic_registry().await;
        let err = client()
            .verify_login(&target(addr, Some("wrong")))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::Auth(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_bearer_token_exchange() {
        let addr = bearer_registry().await;
        let attempt = client()
            .verify_login(&target(addr, Some(PASS)))
            .await
            .unwrap();
        assert_eq!(attempt.flow, AuthFlow::Bearer);
    }

    #[tokio::test]
    async fn test_bearer_rejected_is_auth_error() {
        let addr = bearer_registry().await;
        let err = client()
            .verify_login(&target(addr, Some("wrong")))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::Auth(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_challenge_without_credentials_is_auth_error() {
        let addr = basic_registry().await;
        let err = client().verify_login(&target(addr, None)).await.unwrap_err();
        assert!(matches!(err, LoginError::Auth(_)));
    }

    #[tokio::test]
    async fn test_public_registry_issues_anonymous_token() {
        let addr = anonymous_bearer_registry(true).await;
        let attempt = client().verify_login(&target(addr, None)).await.unwrap();
        assert!(attempt.success);
        assert_eq!(attempt.flow, AuthFlow::Anonymous);

        // Credentials still take the authenticated path
        let attempt = client()
            .verify_login(&target(addr, Some(PASS)))
            .await
            .unwrap();
        assert_eq!(attempt.flow, AuthFlow::Bearer);
    }

    #[tokio::test]
    async fn test_anonymous_token_refused_is_auth_error() {
        let addr = anonymous_bearer_registry(false).await;
        let err = client().verify_login(&target(addr, None)).await.unwrap_err();
        assert!(matches!(err, LoginError::Auth(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_skip_tls_verify_applies_to_single_call() {
        let addr = self_signed_registry().await;
        let client = client();

        let mut strict = target(addr, None);
        strict.protocol = RepoProtocol::Https;
        let mut lenient = strict.clone();
        lenient.skip_tls_verify = true;

        let err = client.verify_login(&strict).await.unwrap_err();
        assert!(matches!(err, LoginError::Network(_)), "got {:?}", err);

        let attempt = client.verify_login(&lenient).await.unwrap();
        assert_eq!(attempt.flow, AuthFlow::Anonymous);

        // The lenient call must not have relaxed the shared client
        let err = client.verify_login(&strict).await.unwrap_err();
        assert!(matches!(err, LoginError::Network(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_server_error_is_network_error() {
        let app = Router::new().route(
            "/v2/",
            get(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let addr = serve(app).await;
        let err = client()
            .verify_login(&target(addr, Some(PASS)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::Network(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client()
            .verify_login(&target(addr, Some(PASS)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::Network(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_stalled_registry_times_out() {
        let app = Router::new().route(
            "/v2/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "late"
            }),
        );
        let addr = serve(app).await;
        let client = HttpRegistryClient::new(Duration::from_millis(300), Duration::from_millis(300))
            .without_proxy();

        let started = Instant::now();
        let err = client
            .verify_login(&target(addr, Some(PASS)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::Timeout(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unroutable_host_fails_within_deadline() {
        let client =
            HttpRegistryClient::new(Duration::from_secs(2), Duration::from_secs(1)).without_proxy();

        let started = Instant::now();
        let err = client
            .verify_login(&target("10.255.255.1:5000", Some(PASS)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::Network(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
