use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use canvas_core::{CanvasClient, CanvasError};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::paths::PathError;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote error: {0}")]
    Remote(#[from] CanvasError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("file has no download url")]
    MissingUrl,
}

/// Where file contents come from.
pub trait RemoteSource: Send + Sync + 'static {
    fn fetch_stream(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<ByteStream, TransferError>> + Send;
}

/// Where directories and file contents go.
pub trait LocalStore: Send + Sync + 'static {
    fn create_dir(&self, path: &Path) -> impl Future<Output = Result<(), TransferError>> + Send;

    /// Persists `stream` at `path`, returning the number of bytes written.
    fn store_path(
        &self,
        path: &Path,
        stream: ByteStream,
    ) -> impl Future<Output = Result<u64, TransferError>> + Send;
}

#[derive(Clone)]
pub struct CanvasSource {
    client: CanvasClient,
}

impl CanvasSource {
    pub fn new(client: CanvasClient) -> Self {
        Self { client }
    }
}

impl RemoteSource for CanvasSource {
    async fn fetch_stream(&self, url: &str) -> Result<ByteStream, TransferError> {
        if url.is_empty() {
            return Err(TransferError::MissingUrl);
        }
        let stream = self.client.fetch_stream(url).await?;
        Ok(stream.map_err(TransferError::from).boxed())
    }
}

/// Local filesystem store on top of `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl LocalStore for FsStore {
    async fn create_dir(&self, path: &Path) -> Result<(), TransferError> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn store_path(&self, path: &Path, mut stream: ByteStream) -> Result<u64, TransferError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(path);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;

        let copied: Result<(), TransferError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&partial, path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        Ok(written)
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(*part)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[test]
    fn partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("course/slides.pdf")),
            PathBuf::from("course/slides.pdf.partial")
        );
        assert_eq!(
            partial_path(Path::new("course/README")),
            PathBuf::from("course/README.partial")
        );
    }

    #[tokio::test]
    async fn store_path_writes_all_chunks() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/out.txt");

        let written = FsStore
            .store_path(&target, chunks(&[b"hel", b"lo"]))
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_file_behind() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("broken.bin");
        let failing: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(TransferError::Io(io::Error::other("connection reset"))),
        ])
        .boxed();

        let err = FsStore.store_path(&target, failing).await.unwrap_err();

        assert!(matches!(err, TransferError::Io(_)));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn failed_rename_removes_partial_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("occupied");
        std::fs::create_dir_all(target.join("inside")).unwrap();

        let err = FsStore
            .store_path(&target, chunks(&[b"data"]))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Io(_)));
        assert!(target.is_dir());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn canvas_source_streams_file_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/10/download"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload"))
            .mount(&server)
            .await;

        let client = CanvasClient::new(&server.uri(), "test-token").unwrap();
        let source = CanvasSource::new(client);
        let dir = tempdir().unwrap();
        let target = dir.path().join("payload.bin");

        let stream = source
            .fetch_stream(&format!("{}/files/10/download", server.uri()))
            .await
            .unwrap();
        FsStore.store_path(&target, stream).await.unwrap();

        assert_eq!(std::fs::read(target).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn canvas_source_rejects_missing_url() {
        let client = CanvasClient::new("https://canvas.example", "test-token").unwrap();
        let source = CanvasSource::new(client);
        assert!(matches!(
            source.fetch_stream("").await,
            Err(TransferError::MissingUrl)
        ));
    }
}
