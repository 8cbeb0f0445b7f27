//! Generic HTTP+JSON remote object store.
//!
//! Objects live at `{base_url}/{name}`; new objects are created with a POST
//! to `{base_url}/{collection}`. Version tokens travel as `ETag` /
//! `If-Match` headers, and a `409` or `412` answer to a write is an
//! optimistic-concurrency conflict.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use super::client::{FetchResult, ResourceClient};
use crate::error::RemoteError;
use crate::resource::{FieldPath, Resource, ResourceKey};
use crate::schema::{ConvertMode, KindSchema, OperationName, masked_json, resource_from_json};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient read failures.
const MAX_READ_ATTEMPTS: u32 = 3;

/// Delay between read attempts in milliseconds.
const RETRY_DELAY_MS: u64 = 500;

/// How a named operation maps to an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationBinding {
    /// HTTP method, e.g. `PATCH` or `POST`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Suffix appended to the object URL, e.g. `:relabel`.
    #[serde(default)]
    pub suffix: String,
}

fn default_method() -> String {
    String::from("PATCH")
}

impl Default for OperationBinding {
    fn default() -> Self {
        Self {
            method: default_method(),
            suffix: String::new(),
        }
    }
}

/// HTTP store for one resource kind.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    collection: String,
    token: Option<String>,
    schema: KindSchema,
    operations: BTreeMap<String, OperationBinding>,
}

impl HttpStore {
    /// Creates a store for `schema`'s kind under `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        base_url: &str,
        collection: &str,
        schema: KindSchema,
        timeout: Option<Duration>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.trim_matches('/').to_string(),
            token: None,
            schema,
            operations: BTreeMap::new(),
        })
    }

    /// Sends `Authorization: Bearer {token}` with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Binds an operation name to a custom request shape.
    #[must_use]
    pub fn with_operation(mut self, name: impl Into<String>, binding: OperationBinding) -> Self {
        self.operations.insert(name.into(), binding);
        self
    }

    fn object_url(&self, name: &str) -> String {
        let name = name.trim_matches('/');
        if name.contains('/') {
            format!("{}/{name}", self.base_url)
        } else {
            format!("{}/{}/{name}", self.base_url, self.collection)
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        trace!("{} {}", method, url);
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, id: &str) -> Result<Response, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound { id: id.to_string() },
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::conflict(id, body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::AuthenticationFailed {
                message: format!("{status}: {body}"),
            },
            _ => RemoteError::api_error(status.as_u16(), body),
        })
    }

    async fn parse(&self, response: Response) -> Result<Resource, RemoteError> {
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        let json: serde_json::Value = response.json().await.map_err(|e| RemoteError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })?;
        let body_etag = json.get("etag").and_then(|v| v.as_str()).map(str::to_string);

        let resource = resource_from_json(&self.schema, &json, ConvertMode::Lenient).map_err(|e| {
            RemoteError::InvalidResponse {
                message: e.to_string(),
            }
        })?;
        Ok(resource.with_version(etag.or(body_etag)))
    }

    async fn get_once(&self, key: &ResourceKey) -> Result<FetchResult, RemoteError> {
        let url = self.object_url(&key.name);
        match self.send(self.request(Method::GET, &url), &key.name).await {
            Ok(response) => Ok(FetchResult::Found(self.parse(response).await?)),
            Err(RemoteError::NotFound { .. }) => Ok(FetchResult::Absent),
            Err(e) => Err(e),
        }
    }
}

const fn is_transient(error: &RemoteError) -> bool {
    matches!(
        error,
        RemoteError::Network { .. } | RemoteError::ApiRequestFailed { status: 429 | 502 | 503 | 504, .. }
    )
}

#[async_trait]
impl ResourceClient for HttpStore {
    async fn get(&self, key: &ResourceKey) -> Result<FetchResult, RemoteError> {
        let mut attempt = 1;
        loop {
            match self.get_once(key).await {
                Err(e) if is_transient(&e) && attempt < MAX_READ_ATTEMPTS => {
                    debug!("Transient error fetching {}: {} (attempt {})", key, e, attempt);
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt))).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn create(&self, desired: &Resource) -> Result<Resource, RemoteError> {
        let url = format!("{}/{}", self.base_url, self.collection);
        let response = self
            .send(self.request(Method::POST, &url).json(&desired.to_json()), &self.collection)
            .await?;
        let created = self.parse(response).await?;
        debug!("Created {} resource {}", self.schema.kind, created.get(&self.schema.identity));
        Ok(created)
    }

    async fn run_operation(
        &self,
        operation: &OperationName,
        resource: &Resource,
        field_mask: &[FieldPath],
    ) -> Result<(), RemoteError> {
        let key = self.schema.key_of(resource).ok_or_else(|| {
            RemoteError::invalid_request(format!("cannot run {operation} on a resource without identity"))
        })?;
        let binding = self.operations.get(operation.as_str()).cloned().unwrap_or_default();
        let method = Method::from_bytes(binding.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| RemoteError::invalid_request(format!("Invalid method for {operation}: {e}")))?;

        let mask: Vec<String> = field_mask.iter().map(ToString::to_string).collect();
        let url = format!("{}{}", self.object_url(&key.name), binding.suffix);
        let mut builder = self
            .request(method, &url)
            .query(&[("updateMask", mask.join(","))])
            .json(&masked_json(resource, field_mask));
        if let Some(version) = resource.version() {
            builder = builder.header(header::IF_MATCH, format!("\"{version}\""));
        }

        self.send(builder, &key.name).await?;
        debug!("Ran {} on {} with mask [{}]", operation, key, mask.join(", "));
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let url = self.object_url(&key.name);
        self.send(self.request(Method::DELETE, &url), &key.name).await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;
    use crate::schema::fixtures::key_schema;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> HttpStore {
        HttpStore::new(&server.uri(), "projects/p/keys", key_schema(), None)
            .expect("client")
            .with_token("secret")
    }

    #[tokio::test]
    async fn test_get_found_with_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/p/keys/k1"))
            .and(header_is("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"7\"")
                    .set_body_json(json!({
                        "name": "projects/p/keys/k1",
                        "displayName": "foo",
                        "etag": "ignored-when-header-present",
                        "webSettings": {"integrationType": "SCORE"}
                    })),
            )
            .mount(&server)
            .await;

        let result = store(&server)
            .await
            .get(&ResourceKey::new("Key", "projects/p/keys/k1"))
            .await
            .expect("get");
        let FetchResult::Found(resource) = result else {
            panic!("expected resource");
        };
        assert_eq!(resource.version(), Some("7"));
        assert_eq!(resource.get("displayName"), &Value::from("foo"));
    }

    #[tokio::test]
    async fn test_get_404_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = store(&server)
            .await
            .get(&ResourceKey::new("Key", "k1"))
            .await
            .expect("get");
        assert_eq!(result, FetchResult::Absent);
    }

    #[tokio::test]
    async fn test_create_posts_to_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/p/keys"))
            .and(body_json(json!({"displayName": "foo"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/p/keys/generated",
                "displayName": "foo",
                "createTime": "2024-01-01T00:00:00Z",
                "etag": "1"
            })))
            .mount(&server)
            .await;

        let created = store(&server)
            .await
            .create(&Resource::new("Key").with("displayName", "foo"))
            .await
            .expect("create");
        assert_eq!(created.get("name"), &Value::from("projects/p/keys/generated"));
        assert_eq!(created.version(), Some("1"));
    }

    #[tokio::test]
    async fn test_update_sends_mask_and_if_match() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/projects/p/keys/k1"))
            .and(query_param("updateMask", "displayName"))
            .and(header_is("if-match", "\"7\""))
            .and(body_json(json!({"displayName": "bar"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let resource = Resource::new("Key")
            .with("name", "projects/p/keys/k1")
            .with("displayName", "bar")
            .with("labels", Value::map([("env", "prod")]))
            .with_version(Some(String::from("7")));
        store(&server)
            .await
            .run_operation(
                &OperationName::new("Update"),
                &resource,
                &[FieldPath::parse("displayName")],
            )
            .await
            .expect("update");
    }

    #[tokio::test]
    async fn test_precondition_failed_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(412).set_body_string("etag mismatch"))
            .mount(&server)
            .await;

        let resource = Resource::new("Key").with("name", "projects/p/keys/k1");
        let err = store(&server)
            .await
            .run_operation(&OperationName::new("Update"), &resource, &[])
            .await
            .expect_err("conflict");
        assert!(matches!(err, RemoteError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_custom_operation_binding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/p/keys/k1:relabel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let resource = Resource::new("Key")
            .with("name", "projects/p/keys/k1")
            .with("labels", Value::map([("env", "prod")]));
        store(&server)
            .await
            .with_operation(
                "Relabel",
                OperationBinding {
                    method: String::from("post"),
                    suffix: String::from(":relabel"),
                },
            )
            .run_operation(
                &OperationName::new("Relabel"),
                &resource,
                &[FieldPath::parse("labels")],
            )
            .await
            .expect("relabel");
    }

    #[tokio::test]
    async fn test_bad_method_binding_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .with_operation(
                "Relabel",
                OperationBinding {
                    method: String::from("not a method"),
                    suffix: String::from(":relabel"),
                },
            )
            .run_operation(
                &OperationName::new("Relabel"),
                &Resource::new("Key").with("name", "projects/p/keys/k1"),
                &[FieldPath::parse("labels")],
            )
            .await
            .expect_err("invalid method");
        assert!(matches!(err, RemoteError::InvalidRequest { .. }));
        assert!(!is_transient(&err));
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .delete(&ResourceKey::new("Key", "projects/p/keys/k1"))
            .await
            .expect_err("forbidden");
        assert!(matches!(err, RemoteError::AuthenticationFailed { .. }));
    }
}
