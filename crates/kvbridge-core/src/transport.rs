//! Single authenticated JSON exchange with the Vault HTTP API.

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::{RemoteRequestError, VaultError};
use crate::types::RemoteErrorBody;

/// API version prefix inserted between the base address and every path.
const API_PREFIX: &str = "v1";

/// Authenticated HTTP transport bound to one Vault address and token.
///
/// Cloning is cheap: the underlying `reqwest::Client` shares its pool.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl Transport {
    /// Create a transport for `base_url` authenticated with `token`.
    ///
    /// One trailing `/` is stripped from the address.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidConfig`] if the token is empty or the
    /// address is not an absolute URL.
    pub fn new(base_url: &str, token: &str) -> Result<Self, VaultError> {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Like [`Transport::new`] but with a caller-supplied HTTP client.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::new`].
    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        token: &str,
    ) -> Result<Self, VaultError> {
        if token.trim().is_empty() {
            return Err(VaultError::InvalidConfig("token must not be empty".to_owned()));
        }
        reqwest::Url::parse(base_url).map_err(|e| {
            VaultError::InvalidConfig(format!("invalid vault address '{base_url}': {e}"))
        })?;

        let base_url = base_url.strip_suffix('/').unwrap_or(base_url).to_owned();

        Ok(Self {
            http,
            base_url,
            token: token.to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{API_PREFIX}/{path}", self.base_url)
    }

    /// Issue one request and return the parsed body.
    ///
    /// `path` is relative to `/v1/` and may carry a query string. A body is
    /// only sent when `body` is `Some`. Returns `Ok(None)` for 204 and for
    /// empty success bodies.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Remote`] on any non-2xx status.
    /// - [`VaultError::Transport`] when the request could not be completed.
    /// - [`VaultError::Decode`] when a success body is not JSON.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, VaultError> {
        let mut req = self
            .http
            .request(method.clone(), self.url(path))
            .header("X-Vault-Token", &self.token);

        // `.json()` also sets `Content-Type: application/json`.
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        debug!(%method, path, status = status.as_u16(), "vault request");

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let text = resp.text().await?;

        if !status.is_success() {
            return Err(RemoteRequestError {
                method,
                path: path.to_owned(),
                status,
                messages: remote_messages(&text),
            }
            .into());
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| VaultError::Decode {
                path: path.to_owned(),
                source,
            })
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Join the `errors` array of a failure body with `; `.
fn remote_messages(body: &str) -> Option<String> {
    let errors = serde_json::from_str::<RemoteErrorBody>(body).ok()?.errors?;
    if errors.is_empty() {
        return None;
    }
    Some(errors.join("; "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    #[test]
    fn strips_one_trailing_slash() {
        let t = Transport::new("http://127.0.0.1:8200/", "hvs.test").unwrap();
        assert_eq!(t.base_url(), "http://127.0.0.1:8200");
        assert_eq!(t.url("sys/policies/acl"), "http://127.0.0.1:8200/v1/sys/policies/acl");

        let t = Transport::new("http://127.0.0.1:8200//", "hvs.test").unwrap();
        assert_eq!(t.base_url(), "http://127.0.0.1:8200/");
    }

    #[test]
    fn rejects_empty_token_and_bad_address() {
        assert!(matches!(
            Transport::new("http://127.0.0.1:8200", "  "),
            Err(VaultError::InvalidConfig(_))
        ));
        assert!(matches!(
            Transport::new("not a url", "hvs.test"),
            Err(VaultError::InvalidConfig(_))
        ));
    }

    #[test]
    fn debug_hides_token() {
        let t = Transport::new("http://127.0.0.1:8200", "hvs.supersecret").unwrap();
        assert!(!format!("{t:?}").contains("supersecret"));
    }

    #[test]
    fn remote_messages_parsing() {
        assert_eq!(
            remote_messages(r#"{"errors":["a","b"]}"#),
            Some("a; b".to_owned())
        );
        assert_eq!(remote_messages(r#"{"errors":[]}"#), None);
        assert_eq!(remote_messages("<html>bad gateway</html>"), None);
        assert_eq!(remote_messages(""), None);
    }

    #[tokio::test]
    async fn sends_token_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/secret/data/app"))
            .and(header("x-vault-token", "hvs.test"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "data": { "k": "v" } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "version": 1 } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let t = Transport::new(&server.uri(), "hvs.test").unwrap();
        let resp = t
            .request(
                Method::POST,
                "secret/data/app",
                Some(&json!({ "data": { "k": "v" } })),
            )
            .await
            .unwrap();
        assert_eq!(resp, Some(json!({ "data": { "version": 1 } })));
    }

    #[tokio::test]
    async fn bodyless_request_sends_no_body_or_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/metadata/app"))
            .and(query_param("list", "true"))
            .and(header_exists("x-vault-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "keys": [] } })),
            )
            .mount(&server)
            .await;

        let t = Transport::new(&server.uri(), "hvs.test").unwrap();
        t.request(Method::GET, "secret/metadata/app?list=true", None)
            .await
            .unwrap();

        let received: Vec<Request> = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].body.is_empty());
        assert!(!received[0].headers.contains_key("content-type"));
    }

    #[tokio::test]
    async fn no_content_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/secret/metadata/app"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let t = Transport::new(&server.uri(), "hvs.test").unwrap();
        let resp = t
            .request(Method::DELETE, "secret/metadata/app", None)
            .await
            .unwrap();
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn forbidden_carries_status_and_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({ "errors": ["permission denied"] })),
            )
            .mount(&server)
            .await;

        let t = Transport::new(&server.uri(), "hvs.test").unwrap();
        let err = t
            .request(Method::GET, "secret/data/app", None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        let msg = err.to_string();
        assert_eq!(msg, "GET secret/data/app failed with 403: permission denied");
    }

    #[tokio::test]
    async fn unparseable_error_body_uses_base_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let t = Transport::new(&server.uri(), "hvs.test").unwrap();
        let err = t
            .request(Method::GET, "sys/policies/acl", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "GET sys/policies/acl failed with 502");
    }

    #[tokio::test]
    async fn invalid_success_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let t = Transport::new(&server.uri(), "hvs.test").unwrap();
        let err = t
            .request(Method::GET, "secret/data/app", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Decode { .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let t = Transport::new("http://127.0.0.1:9", "hvs.test").unwrap();
        let err = t
            .request(Method::GET, "secret/data/app", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Transport(_)));
        assert!(err.status().is_none());
    }
}
