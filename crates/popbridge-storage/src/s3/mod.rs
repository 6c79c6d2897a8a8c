//! S3-compatible object storage backend
//!
//! Every object under the store's key prefix is one message. The message id
//! is the object key with the prefix trimmed; objects whose key ends in `/`
//! are folder markers and are skipped.

mod listing;
mod sigv4;

pub use listing::{ListPage, ObjectEntry};
pub use sigv4::Credentials;

use crate::message::{Message, Payload, Snapshot};
use crate::store::MessageStore;
use async_trait::async_trait;
use chrono::Utc;
use popbridge_common::config::S3Config;
use popbridge_common::{Error, Exclusions, MessageNumber, Result};
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often to check that a deleted object is gone
const DELETE_WAIT_ATTEMPTS: u32 = 5;
const DELETE_WAIT_INTERVAL: Duration = Duration::from_millis(200);

/// Handle to one bucket, shared by every session
#[derive(Clone)]
pub struct S3Bucket {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    credentials: Option<Credentials>,
}

impl std::fmt::Debug for S3Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Bucket")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl S3Bucket {
    /// Create a bucket handle from configuration.
    ///
    /// Credentials missing from the configuration are taken from the
    /// standard `AWS_*` environment variables. Without any credentials
    /// requests are sent unsigned.
    pub fn from_config(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(Error::Config("storage.s3.bucket is required".to_string()));
        }
        if config.region.is_empty() {
            return Err(Error::Config("storage.s3.region is required".to_string()));
        }

        let access_key_id = config
            .access_key_id
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok());
        let secret_access_key = config
            .secret_access_key
            .clone()
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok());
        let session_token = config
            .session_token
            .clone()
            .or_else(|| std::env::var("AWS_SESSION_TOKEN").ok());

        let credentials = match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token,
            }),
            _ => {
                warn!(bucket = %config.bucket, "No S3 credentials found, requests will be unsigned");
                None
            }
        };

        let client = Client::builder()
            .build()
            .map_err(|e| Error::Storage(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "Configured S3 message store"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config
                .endpoint
                .as_ref()
                .map(|endpoint| endpoint.trim_end_matches('/').to_string()),
            credentials,
        })
    }

    /// URL of a key (or of the bucket itself for an empty key).
    ///
    /// Custom endpoints use path-style addressing, AWS uses virtual hosts.
    fn url(&self, key: &str, query: &[(&str, &str)]) -> Result<Url> {
        let path = sigv4::uri_encode(key, true);
        let mut url = match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint,
                sigv4::uri_encode(&self.bucket, false),
                path
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, path
            ),
        };
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }
        Url::parse(&url).map_err(|e| Error::Storage(format!("Invalid S3 URL {}: {}", url, e)))
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response> {
        let mut request = self.client.request(method.clone(), url.clone());

        if let Some(credentials) = &self.credentials {
            let headers = sigv4::sign(
                method.as_str(),
                &url,
                sigv4::EMPTY_PAYLOAD_SHA256,
                credentials,
                &self.region,
                Utc::now(),
            );
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        request
            .send()
            .await
            .map_err(|e| Error::Storage(format!("S3 {} request failed: {}", method, e)))
    }

    async fn fail(operation: &str, response: Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = listing::parse_error(&body).unwrap_or_else(|| status.to_string());
        Error::Storage(format!("S3 {} failed ({}): {}", operation, status, detail))
    }

    /// List every object under a prefix, following continuation tokens
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = &token {
                query.push(("continuation-token", token.as_str()));
            }
            let url = self.url("", &query)?;

            let response = self.send(Method::GET, url).await?;
            if !response.status().is_success() {
                return Err(Self::fail("ListObjectsV2", response).await);
            }
            let body = response
                .text()
                .await
                .map_err(|e| Error::Storage(format!("Failed to read S3 listing: {}", e)))?;
            let page = listing::parse_list_page(&body)
                .map_err(|e| Error::Storage(format!("Invalid S3 listing: {}", e)))?;

            debug!(prefix = %prefix, objects = page.objects.len(), "Fetched S3 listing page");

            objects.extend(page.objects);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(objects)
    }

    /// Download an object
    pub async fn get_object(&self, key: &str) -> Result<Payload> {
        let response = self.send(Method::GET, self.url(key, &[])?).await?;
        if !response.status().is_success() {
            return Err(Self::fail("GetObject", response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("Failed to read S3 object {}: {}", key, e)))?;
        Ok(Payload::from(bytes))
    }

    /// Delete an object
    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let response = self.send(Method::DELETE, self.url(key, &[])?).await?;
        if !response.status().is_success() {
            return Err(Self::fail("DeleteObject", response).await);
        }
        Ok(())
    }

    /// Whether an object exists
    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, self.url(key, &[])?).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::fail("HeadObject", response).await),
        }
    }

    /// Delete an object and wait until it is no longer visible
    pub async fn delete_and_wait(&self, key: &str) -> Result<()> {
        self.delete_object(key).await?;

        for attempt in 1..=DELETE_WAIT_ATTEMPTS {
            if !self.object_exists(key).await? {
                return Ok(());
            }
            debug!(key = %key, attempt, "Deleted S3 object still visible");
            tokio::time::sleep(DELETE_WAIT_INTERVAL).await;
        }

        Err(Error::Storage(format!(
            "S3 object {} still exists after delete",
            key
        )))
    }
}

/// Session view over the objects under a key prefix
#[derive(Debug)]
pub struct S3Store {
    bucket: S3Bucket,
    prefix: String,
    cache: Option<Snapshot>,
}

impl S3Store {
    pub fn new(bucket: S3Bucket, prefix: impl Into<String>) -> Self {
        Self {
            bucket,
            prefix: prefix.into(),
            cache: None,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn cache(&mut self) -> Result<&mut Snapshot> {
        if self.cache.is_none() {
            let snapshot: Snapshot = self
                .bucket
                .list_objects(&self.prefix)
                .await?
                .into_iter()
                .filter_map(|object| {
                    let id = object.key.strip_prefix(&self.prefix)?;
                    if id.is_empty() || id.ends_with('/') {
                        return None;
                    }
                    if !Message::is_valid_id(id) {
                        warn!(key = %object.key, "Skipping object whose key cannot be used as a message id");
                        return None;
                    }
                    Some(Message::new(id, object.size))
                })
                .zip(1..)
                .map(|(message, number)| (number, message))
                .collect();

            debug!(prefix = %self.prefix, messages = snapshot.len(), "Loaded S3 mailbox listing");
            self.cache = Some(snapshot);
        }
        Ok(self.cache.get_or_insert_with(Snapshot::new))
    }
}

#[async_trait]
impl MessageStore for S3Store {
    async fn list(&mut self, excluded: &Exclusions) -> Result<Snapshot> {
        Ok(self
            .cache()
            .await?
            .iter()
            .filter(|(number, _)| !excluded.contains(number))
            .map(|(number, message)| (*number, message.clone()))
            .collect())
    }

    async fn payload(&mut self, number: MessageNumber, excluded: &Exclusions) -> Result<Payload> {
        if excluded.contains(&number) {
            return Err(Error::NoSuchMessage(number));
        }
        let id = match self.cache().await?.get(&number) {
            Some(Message {
                payload: Some(payload),
                ..
            }) => return Ok(payload.clone()),
            Some(message) => message.id.clone(),
            None => return Err(Error::NoSuchMessage(number)),
        };

        let payload = self.bucket.get_object(&self.key(&id)).await?;
        debug!(id = %id, size = payload.len(), "Fetched S3 message");

        if let Some(message) = self.cache().await?.get_mut(&number) {
            message.payload = Some(payload.clone());
        }
        Ok(payload)
    }

    async fn delete(&mut self, number: MessageNumber) -> Result<()> {
        let id = self
            .cache()
            .await?
            .get(&number)
            .map(|message| message.id.clone())
            .ok_or(Error::NoSuchMessage(number))?;

        self.bucket.delete_and_wait(&self.key(&id)).await?;
        debug!(id = %id, "Deleted S3 message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bucket_config(server: &MockServer) -> S3Config {
        S3Config {
            bucket: "mail".to_string(),
            region: "us-east-1".to_string(),
            prefix: "alice/".to_string(),
            endpoint: Some(format!("{}/", server.uri())),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            session_token: None,
        }
    }

    fn listing(objects: &[(&str, u64)], next_token: Option<&str>) -> String {
        let contents: String = objects
            .iter()
            .map(|(key, size)| format!("<Contents><Key>{}</Key><Size>{}</Size></Contents>", key, size))
            .collect();
        let truncated = match next_token {
            Some(token) => format!(
                "<IsTruncated>true</IsTruncated><NextContinuationToken>{}</NextContinuationToken>",
                token
            ),
            None => "<IsTruncated>false</IsTruncated>".to_string(),
        };
        format!("<ListBucketResult>{}{}</ListBucketResult>", truncated, contents)
    }

    #[test]
    fn test_from_config_requires_bucket_and_region() {
        let config = S3Config {
            region: "eu-west-1".to_string(),
            ..Default::default()
        };
        assert!(matches!(S3Bucket::from_config(&config), Err(Error::Config(_))));

        let config = S3Config {
            bucket: "mail".to_string(),
            ..Default::default()
        };
        assert!(matches!(S3Bucket::from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_virtual_host_url() {
        let config = S3Config {
            bucket: "mail".to_string(),
            region: "eu-west-1".to_string(),
            ..Default::default()
        };
        let bucket = S3Bucket::from_config(&config).unwrap();
        let url = bucket.url("alice/a b.eml", &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://mail.s3.eu-west-1.amazonaws.com/alice/a%20b.eml"
        );
    }

    #[tokio::test]
    async fn test_listing_follows_continuation_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/mail/"))
            .and(query_param("continuation-token", "page2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&[("alice/c.eml", 30)], None)),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/mail/"))
            .and(query_param("list-type", "2"))
            .and(query_param("prefix", "alice/"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(
                &[("alice/", 0), ("alice/a.eml", 10), ("alice/b.eml", 20)],
                Some("page2"),
            )))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let bucket = S3Bucket::from_config(&bucket_config(&server)).unwrap();
        let mut store = S3Store::new(bucket, "alice/");

        let snapshot = store.list(&Exclusions::new()).await.unwrap();
        assert_eq!(
            snapshot.values().cloned().collect::<Vec<_>>(),
            vec![
                Message::new("a.eml", 10),
                Message::new("b.eml", 20),
                Message::new("c.eml", 30),
            ]
        );

        // listing is cached for the session
        let again = store.list(&Exclusions::new()).await.unwrap();
        assert_eq!(snapshot, again);
    }

    #[tokio::test]
    async fn test_listing_skips_keys_unusable_as_ids() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/mail/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(
                &[
                    ("alice/a.eml", 10),
                    ("alice/with space.eml", 11),
                    ("alice/x&#10;.&#13;&#10;", 12),
                    ("alice/b.eml", 20),
                ],
                None,
            )))
            .mount(&server)
            .await;

        let bucket = S3Bucket::from_config(&bucket_config(&server)).unwrap();
        let mut store = S3Store::new(bucket, "alice/");

        let snapshot = store.list(&Exclusions::new()).await.unwrap();
        assert_eq!(
            snapshot.into_iter().collect::<Vec<_>>(),
            vec![(1, Message::new("a.eml", 10)), (2, Message::new("b.eml", 20))]
        );
    }

    #[tokio::test]
    async fn test_payload_is_fetched_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/mail/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&[("alice/a.eml", 18)], None)),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/mail/alice/a.eml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Subject: a\r\n\r\nhi\r\n"))
            .expect(1)
            .mount(&server)
            .await;

        let bucket = S3Bucket::from_config(&bucket_config(&server)).unwrap();
        let mut store = S3Store::new(bucket, "alice/");

        let first = store.payload(1, &Exclusions::new()).await.unwrap();
        let second = store.payload(1, &Exclusions::new()).await.unwrap();
        assert_eq!(first.as_bytes().as_ref(), b"Subject: a\r\n\r\nhi\r\n");
        assert_eq!(first, second);
        assert!(store.payload(2, &Exclusions::new()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_waits_for_removal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/mail/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing(&[("alice/a.eml", 18)], None)),
            )
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/mail/alice/a.eml"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/mail/alice/a.eml"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let bucket = S3Bucket::from_config(&bucket_config(&server)).unwrap();
        let mut store = S3Store::new(bucket, "alice/");

        store.delete(1).await.unwrap();
        assert!(store.delete(2).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_error_body_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/mail/"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
            ))
            .mount(&server)
            .await;

        let bucket = S3Bucket::from_config(&bucket_config(&server)).unwrap();
        let mut store = S3Store::new(bucket, "alice/");

        let err = store.list(&Exclusions::new()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("AccessDenied: Access Denied"));
    }
}
