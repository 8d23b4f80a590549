//! `ObjectStore` over the managed storage REST API (`/storage/v1`).
//!
//! Requests carry the service-role key both as a bearer token and as the
//! `apikey` header. Error bodies look like
//! `{"statusCode": "409", "error": "Duplicate", "message": "..."}` and are
//! mapped onto `StoreError` by status.

use crate::{
    models::{bucket::Bucket, item::ListedEntry},
    services::backend::{ListOptions, ObjectStore, StoreError, StoreResult, UploadOptions},
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
    #[serde(rename = "sortBy")]
    sort_by: SortBy<'a>,
}

#[derive(Serialize)]
struct SortBy<'a> {
    column: &'a str,
    order: &'a str,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> StoreResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/storage/v1{}", self.base_url, path)
    }

    fn object_url(&self, route: &str, bucket: &str, key: &str) -> String {
        self.url(&format!(
            "/object/{}{}/{}",
            route,
            encode_segment(bucket),
            encode_key(key)
        ))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> StoreResult<T> {
        let response = self.authorized(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Turn a non-success response into a `StoreError`, keeping the backend's message.
async fn check_status(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .message
        .or(body.error.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("storage request failed with status {}", status));
    debug!("storage api answered {}: {}", status, message);

    let duplicate = body.error.as_deref() == Some("Duplicate")
        || message.to_ascii_lowercase().contains("already exists");
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::CONFLICT => StoreError::AlreadyExists(message),
        _ if duplicate => StoreError::AlreadyExists(message),
        _ => StoreError::Rejected(message),
    })
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        self.send(self.client.get(self.url("/bucket"))).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ListedEntry>> {
        let body = ListRequest {
            prefix,
            limit: options.limit,
            offset: options.offset,
            sort_by: SortBy {
                column: options.sort_column,
                order: if options.ascending { "asc" } else { "desc" },
            },
        };
        let url = self.url(&format!("/object/list/{}", encode_segment(bucket)));
        self.send(self.client.post(url).json(&body)).await
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String> {
        let request = self
            .client
            .post(self.object_url("", bucket, key))
            .header(header::CONTENT_TYPE, &options.content_type)
            .header(
                header::CACHE_CONTROL,
                format!("max-age={}", options.cache_control),
            )
            .header("x-upsert", options.upsert.to_string())
            .body(body);
        let response = self.authorized(request).send().await?;
        check_status(response).await?;
        Ok(key.to_string())
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<Vec<ListedEntry>> {
        let url = self.url(&format!("/object/{}", encode_segment(bucket)));
        self.send(
            self.client
                .delete(url)
                .json(&json!({ "prefixes": keys })),
        )
        .await
    }

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> StoreResult<()> {
        let request = self.client.post(self.url("/object/move")).json(&json!({
            "bucketId": bucket,
            "sourceKey": from,
            "destinationKey": to,
        }));
        let response = self.authorized(request).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StoreResult<String> {
        let request = self
            .client
            .post(self.object_url("sign/", bucket, key))
            .json(&json!({ "expiresIn": expires_in.as_secs() }));
        let signed: SignedUrlResponse = self.send(request).await?;
        Ok(self.url(&signed.signed_url))
    }

    async fn public_url(&self, bucket: &str, key: &str) -> StoreResult<Option<String>> {
        Ok(Some(self.object_url("public/", bucket, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_encoded_per_segment() {
        assert_eq!(
            encode_key("projects/My Kitchen/a b.png"),
            "projects/My%20Kitchen/a%20b.png"
        );
    }

    #[test]
    fn object_urls_are_rooted_at_storage_api() {
        let backend =
            RestBackend::new("https://example.test/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.object_url("public/", "site", "hero/cover.jpg"),
            "https://example.test/storage/v1/object/public/site/hero/cover.jpg"
        );
        assert_eq!(
            backend.object_url("", "site", "a.png"),
            "https://example.test/storage/v1/object/site/a.png"
        );
    }

    #[test]
    fn listed_entries_parse_null_ids_as_folders() {
        let raw = r#"[
            {"name": "projects", "id": null, "updated_at": null, "created_at": null,
             "last_accessed_at": null, "metadata": null},
            {"name": "a.png", "id": "3f1c", "updated_at": "2024-05-01T10:00:00.000Z",
             "created_at": "2024-05-01T10:00:00.000Z", "last_accessed_at": "2024-05-01T10:00:00.000Z",
             "metadata": {"eTag": "\"abc\"", "size": 2048, "mimetype": "image/png",
                          "cacheControl": "max-age=3600"}}
        ]"#;
        let entries: Vec<ListedEntry> = serde_json::from_str(raw).unwrap();
        assert!(entries[0].id.is_none());
        let metadata = entries[1].metadata.as_ref().unwrap();
        assert_eq!(metadata.size, Some(2048));
        assert_eq!(metadata.mimetype.as_deref(), Some("image/png"));
        assert!(metadata.extra.contains_key("eTag"));
    }
}
