//! Mock implementations.

mod capability;
mod provider;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use capability::{
    MockBlobUploader, MockMediaFetcher, MockViewportCapture, RecordedUpload,
    RecordingAssetImporter, RecordingClipboard, RecordingImageSink, RecordingJsonSink, TINY_PNG,
};
pub use provider::{MockWorkflowProvider, RecordedExecution};

/// Locks a mutex, recovering the guard if it was poisoned.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
