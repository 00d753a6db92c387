//! Document fetcher.
//!
//! Resolves an article link to `<base><link>/pdf`, downloads the body and
//! writes it under the configured download directory. The file name is
//! derived from the link alone, so fetching the same article twice lands on
//! the same path (the second fetch overwrites the first).
//!
//! The body is streamed into `<name>.pdf.part` and renamed into place once
//! complete. The partial file is removed if the download fails or the fetch
//! future is dropped (deadline or cancellation).

use crate::config::Config;
use crate::error::{Error, Result};
use crate::utils::{document_stem, endpoint_url, ensure_writable_dir};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Anything that can bring an article's document to local storage.
#[async_trait]
pub trait DocumentFetch: Send + Sync {
    /// Download the document for `link` and return its local path.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] on transport failure or a non-success status
    /// - [`Error::Storage`] if the destination cannot be created or written
    async fn fetch(&self, link: &str) -> Result<PathBuf>;
}

/// Fetches article PDFs over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    download_dir: PathBuf,
    link_prefix: String,
}

impl HttpFetcher {
    /// Build a fetcher from the catalog base URL, download directory and
    /// link prefix in `config`.
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.catalog_base_url.clone(),
            download_dir: config.download_dir.clone(),
            link_prefix: config.link_prefix.clone(),
        }
    }

    /// The local path a link's document is stored at.
    ///
    /// # Arguments
    ///
    /// * `link` - Canonical article link
    ///
    /// # Returns
    ///
    /// `<download_dir>/<stem>.pdf`, where the stem comes from
    /// [`document_stem`].
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if no file name can be derived from `link`.
    pub fn destination(&self, link: &str) -> Result<PathBuf> {
        let stem = document_stem(link, &self.link_prefix).ok_or_else(|| {
            Error::storage(
                &self.download_dir,
                format!("cannot derive a file name from link {link:?}"),
            )
        })?;
        Ok(self.download_dir.join(format!("{stem}.pdf")))
    }

    /// The remote URL of a link's document: `<base><link>/pdf`.
    pub fn document_url(&self, link: &str) -> String {
        endpoint_url(&self.base_url, &format!("{}/pdf", link.trim_end_matches('/')))
    }
}

#[async_trait]
impl DocumentFetch for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%link))]
    async fn fetch(&self, link: &str) -> Result<PathBuf> {
        let t0 = Instant::now();
        let dest = self.destination(link)?;
        ensure_writable_dir(&self.download_dir).await?;

        let url = self.document_url(link);
        debug!(%url, dest = %dest.display(), "Requesting document");
        let mut resp = self.client.get(&url).send().await.map_err(Error::network)?;

        let status = resp.status();
        if !status.is_success() {
            warn!(%url, %status, "Document request failed");
            return Err(Error::Network(format!("GET {url} returned {status}")));
        }

        let partial = PartialFile::new(dest.with_extension("pdf.part"));
        let written = stream_to_file(&mut resp, partial.path()).await?;
        fs::rename(partial.path(), &dest)
            .await
            .map_err(|e| Error::storage(&dest, e))?;
        partial.keep();

        info!(
            bytes = written,
            path = %dest.display(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched document"
        );
        Ok(dest)
    }
}

/// Removes an in-progress download on drop unless [`PartialFile::keep`] ran.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file has been moved into place; nothing to clean up.
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            // Drop can't await; a sync unlink is fine for one file.
            if std::fs::remove_file(&self.path).is_ok() {
                debug!(path = %self.path.display(), "Removed partial download");
            }
        }
    }
}

async fn stream_to_file(resp: &mut reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| Error::storage(path, e))?;

    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await.map_err(Error::network)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::storage(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| Error::storage(path, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(base_url: String, dir: &Path) -> HttpFetcher {
        let config = Config {
            catalog_base_url: base_url,
            download_dir: dir.to_path_buf(),
            ..Config::default()
        };
        HttpFetcher::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn test_destination_is_stable_and_distinct() {
        let tmp = TempDir::new().unwrap();
        let f = fetcher("http://localhost".to_string(), tmp.path());
        let a1 = f.destination("/article/n/first").unwrap();
        let a2 = f.destination("/article/n/first").unwrap();
        let b = f.destination("/article/n/second").unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1, tmp.path().join("first.pdf"));
    }

    #[test]
    fn test_destination_rejects_bare_prefix() {
        let tmp = TempDir::new().unwrap();
        let f = fetcher("http://localhost".to_string(), tmp.path());
        let err = f.destination("/article/n/").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_document_url() {
        let tmp = TempDir::new().unwrap();
        let f = fetcher("https://cyberleninka.ru/".to_string(), tmp.path());
        assert_eq!(
            f.document_url("/article/n/slug"),
            "https://cyberleninka.ru/article/n/slug/pdf"
        );
    }

    #[tokio::test]
    async fn test_fetch_writes_body_and_creates_dir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article/n/graph-paper/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.5 fake".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("not").join("yet");
        let f = fetcher(server.uri(), &dir);

        let first = f.fetch("/article/n/graph-paper").await.unwrap();
        assert_eq!(first, dir.join("graph-paper.pdf"));
        assert_eq!(std::fs::read(&first).unwrap(), b"%PDF-1.5 fake");
        assert!(!dir.join("graph-paper.pdf.part").exists());

        let second = f.fetch("/article/n/graph-paper").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_distinct_links_never_collide() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article/n/a/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"A".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/article/n/b/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"B".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let f = fetcher(server.uri(), tmp.path());
        let (a, b) = tokio::join!(f.fetch("/article/n/a"), f.fetch("/article/n/b"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);
        assert_eq!(std::fs::read(a).unwrap(), b"A");
        assert_eq!(std::fs::read(b).unwrap(), b"B");
    }

    #[test]
    fn test_destinations_never_collide_for_look_alike_links() {
        let tmp = TempDir::new().unwrap();
        let f = fetcher("http://localhost".to_string(), tmp.path());
        let pairs = [
            ("/article/n/a/b", "/article/n/a_b"),
            ("/other/x", "/article/n/other/x"),
        ];
        for (left, right) in pairs {
            let l = f.destination(left).unwrap();
            let r = f.destination(right).unwrap();
            assert_ne!(l, r, "{left} and {right} share a destination");
            assert_eq!(l.parent(), Some(tmp.path()));
            assert_eq!(r.parent(), Some(tmp.path()));
        }
    }

    #[tokio::test]
    async fn test_look_alike_links_fetch_to_separate_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article/n/a/b/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"slash".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/article/n/a_b/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"underscore".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let f = fetcher(server.uri(), tmp.path());
        let (slash, underscore) =
            tokio::join!(f.fetch("/article/n/a/b"), f.fetch("/article/n/a_b"));
        let (slash, underscore) = (slash.unwrap(), underscore.unwrap());
        assert_ne!(slash, underscore);
        assert_eq!(std::fs::read(slash).unwrap(), b"slash");
        assert_eq!(std::fs::read(underscore).unwrap(), b"underscore");
    }

    #[tokio::test]
    async fn test_dropped_fetch_removes_partial_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        // Sends headers and part of the body, then stalls.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\n%PDF-1.5 partial")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });

        let tmp = TempDir::new().unwrap();
        let f = fetcher(format!("http://{addr}"), tmp.path());
        let part = f
            .destination("/article/n/stalled")
            .unwrap()
            .with_extension("pdf.part");

        let task = tokio::spawn(async move { f.fetch("/article/n/stalled").await });
        for _ in 0..500 {
            if part.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(part.exists(), "download never started");

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!part.exists());
        assert!(!tmp.path().join("stalled.pdf").exists());
    }

    #[tokio::test]
    async fn test_dead_link_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let f = fetcher(server.uri(), tmp.path());
        let err = f.fetch("/article/n/gone").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!tmp.path().join("gone.pdf").exists());
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let f = fetcher("http://127.0.0.1:9".to_string(), &blocker);
        let err = f.fetch("/article/n/a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
