//! Progress-callback trait for per-image batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] into the batch functions in
//! [`crate::batch`] to receive events as each image is processed. The CLI
//! drives an `indicatif` bar from these; library users can forward them to
//! a channel, a log or nowhere at all.
//!
//! # Example
//!
//! ```rust
//! use rxparse::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, file: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}", index, total, file);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each image.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Images are processed one at a time, so events for
/// different images never interleave.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first image.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before an image is processed.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position in the batch
    /// * `total`: number of images in the batch
    /// * `file`: filename of the image
    fn on_image_start(&self, index: usize, total: usize, file: &str) {
        let _ = (index, total, file);
    }

    /// Called when an image was processed successfully.
    fn on_image_complete(&self, index: usize, total: usize, file: &str) {
        let _ = (index, total, file);
    }

    /// Called when an image failed; the batch continues.
    fn on_image_error(&self, index: usize, total: usize, file: &str, error: &str) {
        let _ = (index, total, file, error);
    }

    /// Called before the pause that follows each image.
    fn on_pause(&self, seconds: f64) {
        let _ = seconds;
    }

    /// Called once after every image has been attempted.
    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback type.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        total: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total: usize) {
            self.total.store(total, Ordering::SeqCst);
        }
        fn on_image_start(&self, _index: usize, _total: usize, _file: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_image_complete(&self, _index: usize, _total: usize, _file: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_image_error(&self, _index: usize, _total: usize, _file: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3);
        cb.on_image_start(1, 3, "a.jpg");
        cb.on_image_complete(1, 3, "a.jpg");
        cb.on_image_error(2, 3, "b.jpg", "decode failed");
        cb.on_pause(21.5);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = TrackingCallback::default();
        t.on_batch_start(2);
        t.on_image_start(1, 2, "a.jpg");
        t.on_image_complete(1, 2, "a.jpg");
        t.on_image_start(2, 2, "b.jpg");
        t.on_image_error(2, 2, "b.jpg", "no JSON");
        assert_eq!(t.total.load(Ordering::SeqCst), 2);
        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_image_complete(1, 10, "x.png");
    }
}
