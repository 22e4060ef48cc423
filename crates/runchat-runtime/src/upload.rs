//! Bounded upload pool for image inputs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use runchat_core::capability::BlobUploader;
use runchat_core::input::{ImageSource, ImageValue, InputValues, sniff_content_type};
use runchat_core::schema::PortRef;
use runchat_core::upload::UploadStatus;
use runchat_core::{Error, Result};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::TRACING_TARGET_UPLOAD;

/// Content type sent when neither the caller nor the magic bytes say otherwise.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Observes the status of one enqueued upload.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    port: PortRef,
    status: watch::Receiver<UploadStatus>,
}

impl UploadHandle {
    /// Port the image is bound to.
    pub fn port(&self) -> &PortRef {
        &self.port
    }

    /// Current status.
    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    /// Waits until the upload reaches a terminal status.
    pub async fn wait(&mut self) -> UploadStatus {
        if let Ok(status) = self.status.wait_for(UploadStatus::is_terminal).await {
            return status.clone();
        }
        self.status.borrow().clone()
    }
}

/// Totals returned by [`UploadCoordinator::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Uploads that produced a URL.
    pub uploaded: usize,
    /// Uploads that failed.
    pub failed: usize,
}

impl UploadSummary {
    /// Total number of uploads joined.
    pub fn total(&self) -> usize {
        self.uploaded + self.failed
    }
}

/// A spawned upload paired with its port.
///
/// Resolves to every status the upload moved through, in order.
struct PendingUpload {
    port: PortRef,
    task: JoinHandle<Vec<UploadStatus>>,
}

impl Future for PendingUpload {
    type Output = (PortRef, Vec<UploadStatus>);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let steps = match ready!(Pin::new(&mut self.task).poll(cx)) {
            Ok(steps) => steps,
            Err(error) => vec![UploadStatus::Failed(format!("upload task failed: {error}"))],
        };
        Poll::Ready((self.port.clone(), steps))
    }
}

fn outcome(steps: &[UploadStatus]) -> UploadStatus {
    steps.last().cloned().unwrap_or_default()
}

/// Uploads image inputs on a bounded worker pool.
///
/// A coordinator collects the uploads of one request; [`scoped`] creates a
/// coordinator for another request that shares the same pool. Failed uploads
/// are never retried, and dropping the coordinator aborts uploads that were
/// not joined.
///
/// [`scoped`]: Self::scoped
pub struct UploadCoordinator {
    uploader: Arc<dyn BlobUploader>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
    pending: FuturesUnordered<PendingUpload>,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("max_concurrent", &self.max_concurrent)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl UploadCoordinator {
    /// Creates a coordinator running at most `max_concurrent` uploads at once.
    pub fn new(uploader: Arc<dyn BlobUploader>, max_concurrent: usize, timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);

        tracing::debug!(
            target: TRACING_TARGET_UPLOAD,
            max_concurrent,
            timeout_ms = timeout.as_millis(),
            "Upload coordinator initialized"
        );

        Self {
            uploader,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
            pending: FuturesUnordered::new(),
        }
    }

    /// Creates an empty coordinator sharing this coordinator's worker pool.
    pub fn scoped(&self) -> Self {
        Self {
            uploader: Arc::clone(&self.uploader),
            semaphore: Arc::clone(&self.semaphore),
            max_concurrent: self.max_concurrent,
            timeout: self.timeout,
            pending: FuturesUnordered::new(),
        }
    }

    /// Number of uploads enqueued and not joined yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Starts uploading `image` for `port`.
    ///
    /// Only images without a URL are accepted: `Pending` ones, or `Failed`
    /// ones being submitted again.
    pub fn enqueue(&mut self, port: PortRef, image: &ImageValue) -> Result<UploadHandle> {
        if !image.needs_upload() {
            return Err(Error::invalid_input()
                .with_port(port)
                .with_message("image already has a URL"));
        }

        let (sender, receiver) = watch::channel(UploadStatus::Pending);
        let job = UploadJob {
            uploader: Arc::clone(&self.uploader),
            semaphore: Arc::clone(&self.semaphore),
            timeout: self.timeout,
            port: port.clone(),
            filename: image.filename(),
            source: image.source.clone(),
            status: sender,
        };

        tracing::debug!(
            target: TRACING_TARGET_UPLOAD,
            port = %port,
            filename = %job.filename,
            "Upload enqueued"
        );

        self.pending.push(PendingUpload {
            port: port.clone(),
            task: tokio::spawn(job.run()),
        });

        Ok(UploadHandle {
            port,
            status: receiver,
        })
    }

    /// Waits for the next enqueued upload to finish.
    pub async fn next_finished(&mut self) -> Option<(PortRef, UploadStatus)> {
        let (port, steps) = self.pending.next().await?;
        Some((port, outcome(&steps)))
    }

    /// Waits for every enqueued upload and writes the terminal statuses into `values`.
    ///
    /// Each result is replayed through [`UploadStatus::advance`] on the
    /// image it belongs to. Images that meanwhile gained a URL or started
    /// another upload keep their status.
    pub async fn join(&mut self, values: &mut InputValues) -> UploadSummary {
        self.join_with(values, |_, _| {}).await
    }

    /// Like [`join`](Self::join), calling `on_finished` as each upload completes.
    pub async fn join_with<F>(
        &mut self,
        values: &mut InputValues,
        mut on_finished: F,
    ) -> UploadSummary
    where
        F: FnMut(&PortRef, &UploadStatus),
    {
        let mut summary = UploadSummary::default();

        while let Some((port, steps)) = self.pending.next().await {
            let status = outcome(&steps);
            match &status {
                UploadStatus::Uploaded(_) => summary.uploaded += 1,
                _ => summary.failed += 1,
            }

            on_finished(&port, &status);
            match values.image_mut(&port) {
                Some(image) => {
                    let mut replayed = image.status.clone();
                    let applied = replayed.resubmit().and_then(|()| {
                        steps.into_iter().try_for_each(|step| replayed.advance(step))
                    });
                    match applied {
                        Ok(()) => image.status = replayed,
                        Err(error) => tracing::warn!(
                            target: TRACING_TARGET_UPLOAD,
                            port = %port,
                            current = %image.status,
                            error = %error,
                            "Upload result rejected"
                        ),
                    }
                }
                None => tracing::debug!(
                    target: TRACING_TARGET_UPLOAD,
                    port = %port,
                    "Upload finished for an input that is no longer an image"
                ),
            }
        }

        summary
    }
}

impl Drop for UploadCoordinator {
    fn drop(&mut self) {
        for upload in self.pending.iter() {
            upload.task.abort();
        }
    }
}

struct UploadJob {
    uploader: Arc<dyn BlobUploader>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    port: PortRef,
    filename: String,
    source: ImageSource,
    status: watch::Sender<UploadStatus>,
}

impl UploadJob {
    async fn run(self) -> Vec<UploadStatus> {
        let mut steps = Vec::with_capacity(2);
        let status = self.transfer(&mut steps).await;
        match &status {
            UploadStatus::Uploaded(url) => tracing::debug!(
                target: TRACING_TARGET_UPLOAD,
                port = %self.port,
                url = %url,
                "Upload finished"
            ),
            UploadStatus::Failed(reason) => tracing::warn!(
                target: TRACING_TARGET_UPLOAD,
                port = %self.port,
                filename = %self.filename,
                reason = %reason,
                "Upload failed"
            ),
            _ => {}
        }

        self.set(&mut steps, status);
        steps
    }

    /// Publishes `next` if the current status may move to it.
    fn set(&self, steps: &mut Vec<UploadStatus>, next: UploadStatus) {
        let accepted = self
            .status
            .send_if_modified(|current| current.advance(next.clone()).is_ok());

        if accepted {
            steps.push(next);
        } else {
            let current = self.status.borrow().clone();
            tracing::warn!(
                target: TRACING_TARGET_UPLOAD,
                port = %self.port,
                current = %current,
                next = %next,
                "Upload status transition rejected"
            );
        }
    }

    async fn transfer(&self, steps: &mut Vec<UploadStatus>) -> UploadStatus {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return UploadStatus::Failed("upload pool closed".to_owned());
        };

        let (data, content_type) = match self.read().await {
            Ok(read) => read,
            Err(error) => return UploadStatus::Failed(error.to_string()),
        };

        self.set(steps, UploadStatus::Uploading(0.0));
        let started = Instant::now();

        let upload = self.uploader.upload(data, &content_type, &self.filename);
        match tokio::time::timeout(self.timeout, upload).await {
            Ok(Ok(url)) => {
                tracing::trace!(
                    target: TRACING_TARGET_UPLOAD,
                    port = %self.port,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Upload transferred"
                );
                UploadStatus::Uploaded(url)
            }
            Ok(Err(error)) => UploadStatus::Failed(error.to_string()),
            Err(_) => UploadStatus::Failed(format!("upload timed out after {:?}", self.timeout)),
        }
    }

    async fn read(&self) -> Result<(Bytes, String)> {
        let (data, declared) = match &self.source {
            ImageSource::File(path) => {
                let data = tokio::fs::read(path).await.map_err(|error| {
                    Error::from(error)
                        .with_message(format!("cannot read {}", path.display()))
                })?;
                (Bytes::from(data), None)
            }
            ImageSource::Bytes {
                data, content_type, ..
            } => (data.clone(), content_type.clone()),
            ImageSource::Remote(_) => {
                return Err(Error::invalid_input().with_message("remote images are not uploaded"));
            }
        };

        let content_type = declared
            .or_else(|| sniff_content_type(&data).map(str::to_owned))
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_owned());

        Ok((data, content_type))
    }
}

#[cfg(test)]
mod tests {
    use runchat_core::ErrorKind;
    use runchat_test::{MockBlobUploader, TINY_PNG};
    use url::Url;

    use super::*;

    fn port(name: &str) -> PortRef {
        PortRef::new(name, "1")
    }

    fn coordinator(uploader: &MockBlobUploader, max: usize) -> UploadCoordinator {
        UploadCoordinator::new(Arc::new(uploader.clone()), max, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_upload_writes_terminal_status() {
        let uploader = MockBlobUploader::new();
        let mut uploads = coordinator(&uploader, 3);

        let image = ImageValue::from_bytes(TINY_PNG, "capture.png");
        let mut values = InputValues::new().with(port("image"), image.clone());

        let mut handle = uploads.enqueue(port("image"), &image).unwrap();
        let summary = uploads.join(&mut values).await;

        assert_eq!(summary, UploadSummary { uploaded: 1, failed: 0 });
        let uploaded = values.image_mut(&port("image")).unwrap();
        assert_eq!(
            uploaded.uploaded_url().map(Url::as_str),
            Some("https://uploads.test/capture.png")
        );
        assert!(handle.wait().await.is_terminal());

        let recorded = uploader.uploads();
        assert_eq!(recorded[0].content_type, "image/png");
    }

    #[tokio::test]
    async fn test_join_keeps_url_set_meanwhile() {
        let uploader = MockBlobUploader::new();
        let mut uploads = coordinator(&uploader, 3);

        let image = ImageValue::from_bytes(TINY_PNG, "capture.png");
        let mut handle = uploads.enqueue(port("image"), &image).unwrap();

        let existing = Url::parse("https://cdn.test/existing.png").unwrap();
        let mut values =
            InputValues::new().with(port("image"), ImageValue::from_url(existing.clone()));
        let summary = uploads.join(&mut values).await;

        assert_eq!(summary.uploaded, 1);
        assert!(handle.wait().await.url().is_some());
        let kept = values.image_mut(&port("image")).unwrap();
        assert_eq!(kept.uploaded_url(), Some(&existing));
    }

    #[tokio::test]
    async fn test_join_replaces_previous_failure() {
        let uploader = MockBlobUploader::new();
        let mut uploads = coordinator(&uploader, 3);

        let mut image = ImageValue::from_bytes(TINY_PNG, "retry.png");
        image.status = UploadStatus::Failed("network".into());
        let mut values = InputValues::new().with(port("image"), image.clone());

        uploads.enqueue(port("image"), &image).unwrap();
        uploads.join(&mut values).await;

        let uploaded = values.image_mut(&port("image")).unwrap();
        assert_eq!(
            uploaded.uploaded_url().map(Url::as_str),
            Some("https://uploads.test/retry.png")
        );
    }

    #[tokio::test]
    async fn test_rejects_image_with_url() {
        let uploader = MockBlobUploader::new();
        let mut uploads = coordinator(&uploader, 3);

        let image = ImageValue::from_url(Url::parse("https://cdn.test/a.png").unwrap());
        let error = uploads.enqueue(port("image"), &image).unwrap_err();

        assert_eq!(error.kind, ErrorKind::InvalidInput);
        assert_eq!(error.port, Some(port("image")));
        assert_eq!(uploads.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_not_retried() {
        let uploader = MockBlobUploader::new().failing_on("bad.png");
        let mut uploads = coordinator(&uploader, 3);

        let good = ImageValue::from_bytes(TINY_PNG, "good.png");
        let bad = ImageValue::from_bytes(TINY_PNG, "bad.png");
        let mut values = InputValues::new()
            .with(port("good"), good.clone())
            .with(port("bad"), bad.clone());

        uploads.enqueue(port("good"), &good).unwrap();
        uploads.enqueue(port("bad"), &bad).unwrap();
        let summary = uploads.join(&mut values).await;

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(uploader.uploads().len(), 2);

        let failed = values.image_mut(&port("bad")).unwrap();
        assert!(failed.status.failure().is_some());
        assert!(failed.needs_upload());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let uploader = MockBlobUploader::new().with_delay(Duration::from_millis(20));
        let mut uploads = coordinator(&uploader, 2);
        let mut values = InputValues::new();

        for index in 0..6 {
            let key = port(&format!("image{index}"));
            let image = ImageValue::from_bytes(TINY_PNG, format!("{index}.png"));
            uploads.enqueue(key.clone(), &image).unwrap();
            values.insert(key, image);
        }

        let summary = uploads.join(&mut values).await;
        assert_eq!(summary.total(), 6);
        assert!(uploader.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_scoped_coordinators_share_the_pool() {
        let uploader = MockBlobUploader::new().with_delay(Duration::from_millis(20));
        let base = coordinator(&uploader, 1);
        let mut first = base.scoped();
        let mut second = base.scoped();

        let image = ImageValue::from_bytes(TINY_PNG, "a.png");
        let mut first_values = InputValues::new().with(port("a"), image.clone());
        let mut second_values = InputValues::new().with(port("a"), image.clone());
        first.enqueue(port("a"), &image).unwrap();
        second.enqueue(port("a"), &image).unwrap();

        tokio::join!(first.join(&mut first_values), second.join(&mut second_values));
        assert_eq!(uploader.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_uploading() {
        let uploader = MockBlobUploader::new();
        let mut uploads = coordinator(&uploader, 3);

        let dir = tempfile::tempdir().unwrap();
        let image = ImageValue::from_path(dir.path().join("missing.png"));
        let mut values = InputValues::new().with(port("image"), image.clone());

        let mut handle = uploads.enqueue(port("image"), &image).unwrap();
        uploads.join(&mut values).await;

        let status = handle.wait().await;
        assert!(status.failure().unwrap().contains("missing.png"));
        assert!(uploader.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_reads_file_and_sniffs_type() {
        let uploader = MockBlobUploader::new();
        let mut uploads = coordinator(&uploader, 3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render");
        tokio::fs::write(&path, TINY_PNG).await.unwrap();

        let image = ImageValue::from_path(&path);
        let mut values = InputValues::new().with(port("image"), image.clone());
        uploads.enqueue(port("image"), &image).unwrap();
        uploads.join(&mut values).await;

        let recorded = uploader.uploads();
        assert_eq!(recorded[0].filename, "render");
        assert_eq!(recorded[0].content_type, "image/png");
        assert_eq!(recorded[0].size, TINY_PNG.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_upload() {
        let uploader = MockBlobUploader::new().with_delay(Duration::from_secs(120));
        let mut uploads =
            UploadCoordinator::new(Arc::new(uploader.clone()), 3, Duration::from_millis(500));

        let image = ImageValue::from_bytes(TINY_PNG, "slow.png");
        let mut values = InputValues::new().with(port("image"), image.clone());
        uploads.enqueue(port("image"), &image).unwrap();
        uploads.join(&mut values).await;

        let status = &values.image_mut(&port("image")).unwrap().status;
        assert_eq!(status.failure(), Some("upload timed out after 500ms"));
    }
}
