//! Yandex Disk REST connector
//!
//! Implements [`RemoteDisk`] over `cloud-api.yandex.net/v1/disk`.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{ByteStream, HttpClient, HttpMethod, HttpRequest};
use bridge_traits::{RemoteDisk, RemoteFileDescriptor};
use core_runtime::retry::{RetryError, RetryExecutor, RetryPolicy};
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::check_status;
use crate::types::{api_path, DownloadLink, Resource, ResourceKind};

/// Disk REST API base URL
pub const DISK_API_BASE: &str = "https://cloud-api.yandex.net/v1/disk";

/// Maximum entries per listing page accepted by the API
pub const MAX_PAGE_SIZE: u32 = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Yandex Disk connector
///
/// # Features
///
/// - Breadth-first tree walk, one folder page per request
/// - Transient page failures retried in place through [`RetryExecutor`]
/// - Downloads streamed from the short-lived link the API hands out
/// - OAuth token authentication via `HttpClient`
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
/// use provider_yandex_disk::YandexDiskConnector;
///
/// let disk = YandexDiskConnector::new(http_client, token);
/// let mut entries = disk.list_tree("/Documents");
/// while let Some(entry) = entries.next().await {
///     println!("{}", entry?.path);
/// }
/// ```
pub struct YandexDiskConnector {
    http_client: Arc<dyn HttpClient>,
    token: String,
    api_base: String,
    page_size: u32,
    listing_retry: RetryPolicy,
}

impl YandexDiskConnector {
    /// Create a connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `token` - OAuth token with `cloud_api:disk.read` access
    pub fn new(http_client: Arc<dyn HttpClient>, token: impl Into<String>) -> Self {
        Self {
            http_client,
            token: token.into(),
            api_base: DISK_API_BASE.to_string(),
            page_size: MAX_PAGE_SIZE,
            listing_retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn with_listing_retry(mut self, policy: RetryPolicy) -> Self {
        self.listing_retry = policy;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let request = HttpRequest::new(HttpMethod::Get, url)
            .oauth_token(&self.token)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT);

        let response = check_status(self.http_client.execute(request).await?)?;
        response.json()
    }

    /// One page of the folder at `path`
    #[instrument(skip(self), fields(path = %path, offset))]
    async fn fetch_page(&self, path: &str, offset: u64) -> Result<Resource> {
        let url = format!(
            "{}/resources?path={}&limit={}&offset={}",
            self.api_base,
            urlencoding::encode(&api_path(path)),
            self.page_size,
            offset
        );

        RetryExecutor::new(self.listing_retry.clone())
            .run("list_page", |_| self.get_json::<Resource>(&url))
            .await
            .map_err(RetryError::into_inner)
    }
}

/// Walk state: folder pages still to fetch and entries ready to yield
struct Walk {
    pending: VecDeque<(String, u64)>,
    ready: VecDeque<RemoteFileDescriptor>,
}

impl Walk {
    fn new(root: &str) -> Self {
        Self {
            pending: VecDeque::from([(root.to_string(), 0)]),
            ready: VecDeque::new(),
        }
    }

    /// Queue the entries of one fetched page. Further pages of the same
    /// folder go first so a folder is finished before its subfolders.
    fn absorb(&mut self, dir: String, offset: u64, resource: Resource, page_size: u32) -> Result<()> {
        let Some(page) = resource.embedded else {
            // The root names a file
            if offset == 0 && resource.kind == ResourceKind::File {
                self.ready.push_back(resource.to_descriptor()?);
            }
            return Ok(());
        };

        let count = page.items.len() as u64;
        let mut subfolders = Vec::new();
        for item in &page.items {
            let descriptor = item.to_descriptor()?;
            if descriptor.is_dir() {
                subfolders.push((descriptor.path.clone(), 0));
            }
            self.ready.push_back(descriptor);
        }

        let more = match page.total {
            Some(total) => offset + count < total,
            None => count == u64::from(page_size),
        };
        if more && count > 0 {
            self.pending.push_front((dir, offset + count));
        }
        self.pending.extend(subfolders);
        Ok(())
    }
}

#[async_trait]
impl RemoteDisk for YandexDiskConnector {
    fn list_tree<'a>(&'a self, root: &'a str) -> BoxStream<'a, Result<RemoteFileDescriptor>> {
        info!(root = %root, "Listing Yandex Disk tree");

        stream::try_unfold(Walk::new(root), move |mut walk| async move {
            loop {
                if let Some(entry) = walk.ready.pop_front() {
                    return Ok(Some((entry, walk)));
                }
                let Some((dir, offset)) = walk.pending.pop_front() else {
                    debug!("Tree walk finished");
                    return Ok(None);
                };
                let resource = self.fetch_page(&dir, offset).await?;
                walk.absorb(dir, offset, resource, self.page_size)?;
            }
        })
        .boxed()
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn download(&self, path: &str) -> Result<ByteStream> {
        let url = format!(
            "{}/resources/download?path={}",
            self.api_base,
            urlencoding::encode(&api_path(path))
        );
        let link: DownloadLink = self.get_json(&url).await?;

        debug!("Download link resolved");
        self.http_client.download_stream(link.href).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use futures::TryStreamExt;
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
            async fn download_stream(&self, url: String) -> Result<ByteStream>;
        }
    }

    fn json(status: u16, body: String) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body),
        }
    }

    fn file(path: &str, size: u64) -> String {
        format!(
            r#"{{"name":"{}","path":"disk:{}","type":"file","size":{},"modified":"2024-03-01T10:00:00+00:00"}}"#,
            path.rsplit('/').next().unwrap(),
            path,
            size
        )
    }

    fn dir(path: &str) -> String {
        format!(
            r#"{{"name":"{}","path":"disk:{}","type":"dir","modified":"2024-03-01T10:00:00+00:00"}}"#,
            path.rsplit('/').next().unwrap(),
            path
        )
    }

    fn folder(path: &str, items: &[String], offset: u64, total: u64) -> String {
        format!(
            r#"{{"name":"x","path":"disk:{}","type":"dir","modified":"2024-03-01T10:00:00+00:00",
                "_embedded":{{"items":[{}],"limit":2,"offset":{},"total":{}}}}}"#,
            path,
            items.join(","),
            offset,
            total
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_list_tree_walks_pages_then_subfolders() {
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(|req| {
            assert_eq!(req.headers.get("Authorization").map(String::as_str), Some("OAuth t0ken"));
            let url = req.url.as_str();
            let body = if url.contains("path=%2FDocs&") && url.ends_with("offset=0") {
                folder("/Docs", &[file("/Docs/a.csv", 10), dir("/Docs/sub")], 0, 3)
            } else if url.contains("path=%2FDocs&") && url.ends_with("offset=2") {
                folder("/Docs", &[file("/Docs/b.txt", 20)], 2, 3)
            } else if url.contains("path=%2FDocs%2Fsub&") {
                folder("/Docs/sub", &[file("/Docs/sub/c.mp4", 30)], 0, 1)
            } else {
                panic!("unexpected request {}", url);
            };
            Ok(json(200, body))
        });

        let disk = YandexDiskConnector::new(Arc::new(http), "t0ken").with_page_size(2);
        let entries: Vec<RemoteFileDescriptor> = disk.list_tree("/Docs").try_collect().await.unwrap();

        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Docs/a.csv", "Docs/sub", "Docs/b.txt", "Docs/sub/c.mp4"]);
        assert!(entries[1].is_dir());
        assert_eq!(entries[3].size, 30);
    }

    #[tokio::test]
    async fn test_listing_retries_transient_page_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(json(503, String::new()));
            }
            Ok(json(200, folder("/", &[file("/only.txt", 1)], 0, 1)))
        });

        let disk = YandexDiskConnector::new(Arc::new(http), "t").with_listing_retry(fast_retry());
        let entries: Vec<_> = disk.list_tree("/").try_collect().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "only.txt");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_listing_error_ends_the_stream() {
        let mut http = MockHttpClient::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(json(
                401,
                r#"{"error":"UnauthorizedError","description":"Unauthorized"}"#.to_string(),
            ))
        });

        let disk = YandexDiskConnector::new(Arc::new(http), "expired").with_listing_retry(fast_retry());
        let mut entries = disk.list_tree("/");

        assert!(matches!(entries.next().await, Some(Err(BridgeError::Unauthorized(_)))));
        assert!(entries.next().await.is_none());
    }

    #[tokio::test]
    async fn test_root_naming_a_file_yields_it() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(json(200, file("/single.pdf", 99))));

        let disk = YandexDiskConnector::new(Arc::new(http), "t");
        let entries: Vec<_> = disk.list_tree("single.pdf").try_collect().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "single.pdf");
    }

    #[tokio::test]
    async fn test_download_follows_link() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .withf(|req| req.url.ends_with("/resources/download?path=%2FDocs%2F%D0%BE%D1%82%D1%87%D0%B5%D1%82.pdf"))
            .returning(|_| {
                Ok(json(
                    200,
                    r#"{"href":"https://downloader.disk.yandex.ru/disk/abc","method":"GET"}"#.to_string(),
                ))
            });
        http.expect_download_stream()
            .times(1)
            .withf(|url| url == "https://downloader.disk.yandex.ru/disk/abc")
            .returning(|_| Ok(Box::new(std::io::Cursor::new(b"%PDF-1.4".to_vec()))));

        let disk = YandexDiskConnector::new(Arc::new(http), "t");
        let mut body = disk.download("Docs/отчет.pdf").await.unwrap();
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_download_of_missing_path_is_not_found() {
        let mut http = MockHttpClient::new();
        http.expect_execute().returning(|_| {
            Ok(json(
                404,
                r#"{"error":"DiskNotFoundError","description":"Resource not found."}"#.to_string(),
            ))
        });

        let disk = YandexDiskConnector::new(Arc::new(http), "t");
        let err = match disk.download("gone.txt").await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, BridgeError::NotFound(_)));
        assert!(!err.is_transient());
    }
}
