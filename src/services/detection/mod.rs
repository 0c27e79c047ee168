// Detection model adapter
//
// Wraps the opaque detection capability behind `DetectionModel` and owns the
// process-wide, lazily constructed model handle.

pub mod yolo;

use crate::core::errors::PredictionError;
use crate::core::types::Detection;
use image::DynamicImage;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

pub use yolo::{OnnxModelLoader, OnnxYoloDetector};

/// A loaded detection model: image in, located and classified regions out.
///
/// `infer` is synchronous and CPU-bound; call it from the blocking pool.
/// Returns an empty vec (not an error) when nothing is found.
pub trait DetectionModel: Send + Sync {
    fn infer(&self, image: &DynamicImage) -> anyhow::Result<Vec<Detection>>;

    /// Execution backend name, for logs and health output
    fn backend(&self) -> &str;
}

pub type ModelHandle = Arc<dyn DetectionModel>;

/// Constructs the model. Called at most once per successful load.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<ModelHandle, PredictionError>;

    /// Whether the weights artifact is present
    fn artifact_exists(&self) -> bool {
        true
    }

    /// Whether the inference runtime initialized
    fn runtime_available(&self) -> bool {
        true
    }
}

/// Lazily loads the model once and hands out the shared handle.
///
/// Concurrent first callers wait on the same construction. A failed load leaves
/// the cell empty so the next call retries. The load runs on a task the adapter
/// owns, so a caller dropped mid-load does not abandon it.
pub struct ModelAdapter {
    state: Arc<AdapterState>,
}

struct AdapterState {
    loader: Arc<dyn ModelLoader>,
    handle: OnceCell<ModelHandle>,
    last_error: RwLock<Option<String>>,
}

impl AdapterState {
    async fn load_once(&self) -> Result<ModelHandle, PredictionError> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let started = std::time::Instant::now();

                let result = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| PredictionError::ModelUnavailable {
                        reason: format!("model load task failed: {}", e),
                    })
                    .and_then(|loaded| loaded);

                match &result {
                    Ok(model) => {
                        info!(
                            "Detection model ready on {} in {:.2}s",
                            model.backend(),
                            started.elapsed().as_secs_f64()
                        );
                        *self.last_error.write() = None;
                    }
                    Err(e) => {
                        warn!("Detection model load failed: {}", e);
                        *self.last_error.write() = Some(e.to_string());
                    }
                }
                result
            })
            .await?;

        Ok(Arc::clone(handle))
    }
}

impl ModelAdapter {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            state: Arc::new(AdapterState {
                loader,
                handle: OnceCell::new(),
                last_error: RwLock::new(None),
            }),
        }
    }

    /// Cached handle, loading the model on first call
    pub async fn handle(&self) -> Result<ModelHandle, PredictionError> {
        if let Some(handle) = self.state.handle.get() {
            return Ok(Arc::clone(handle));
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move { state.load_once().await })
            .await
            .map_err(|e| PredictionError::ModelUnavailable {
                reason: format!("model load task failed: {}", e),
            })?
    }

    /// Run inference on the blocking pool
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub async fn infer(
        &self,
        handle: &ModelHandle,
        image: Arc<DynamicImage>,
    ) -> Result<Vec<Detection>, PredictionError> {
        let model = Arc::clone(handle);
        tokio::task::spawn_blocking(move || model.infer(&image))
            .await
            .map_err(PredictionError::inference)?
            .map_err(PredictionError::inference)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.handle.initialized()
    }

    pub fn model_exists(&self) -> bool {
        self.state.loader.artifact_exists()
    }

    pub fn runtime_available(&self) -> bool {
        self.state.loader.runtime_available()
    }

    /// Text of the most recent load failure, cleared by a successful load
    pub fn last_error(&self) -> Option<String> {
        self.state.last_error.read().clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Model that returns a fixed detection list
    pub struct FixedModel(pub Vec<Detection>);

    impl DetectionModel for FixedModel {
        fn infer(&self, _image: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
            Ok(self.0.clone())
        }

        fn backend(&self) -> &str {
            "fixed"
        }
    }

    /// Model whose inference always fails
    pub struct BrokenModel;

    impl DetectionModel for BrokenModel {
        fn infer(&self, _image: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
            anyhow::bail!("tensor shape mismatch")
        }

        fn backend(&self) -> &str {
            "broken"
        }
    }

    /// Loader that counts calls, optionally failing the first `fail_first` of them
    pub struct CountingLoader {
        pub calls: AtomicUsize,
        pub fail_first: usize,
        pub delay: std::time::Duration,
        pub model: ModelHandle,
    }

    impl CountingLoader {
        pub fn new(model: ModelHandle) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                delay: std::time::Duration::ZERO,
                model,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ModelLoader for CountingLoader {
        fn load(&self) -> Result<ModelHandle, PredictionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if call < self.fail_first {
                return Err(PredictionError::ModelFileMissing {
                    path: "model/best.onnx".into(),
                });
            }
            Ok(Arc::clone(&self.model))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    impl std::fmt::Debug for dyn DetectionModel {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("dyn DetectionModel")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_loads_once() {
        let mut loader = CountingLoader::new(Arc::new(FixedModel(vec![])));
        loader.delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let adapter = Arc::new(ModelAdapter::new(loader.clone()));

        let a = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.handle().await }
        });
        let b = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.handle().await }
        });

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();

        assert_eq!(loader.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(adapter.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_does_not_poison() {
        let mut loader = CountingLoader::new(Arc::new(FixedModel(vec![])));
        loader.fail_first = 1;
        let loader = Arc::new(loader);
        let adapter = ModelAdapter::new(loader.clone());

        let err = adapter.handle().await.err().unwrap();
        assert!(matches!(err, PredictionError::ModelFileMissing { .. }));
        assert!(!adapter.is_loaded());
        assert!(adapter.last_error().unwrap().contains("best.onnx"));

        assert!(adapter.handle().await.is_ok());
        assert_eq!(loader.calls(), 2);
        assert!(adapter.last_error().is_none());

        // Cached from here on
        adapter.handle().await.unwrap();
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_dropped_first_caller_does_not_reload() {
        let mut loader = CountingLoader::new(Arc::new(FixedModel(vec![])));
        loader.delay = Duration::from_millis(300);
        let loader = Arc::new(loader);
        let adapter = Arc::new(ModelAdapter::new(loader.clone()));

        let first = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.handle().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        adapter.handle().await.unwrap();
        assert_eq!(loader.calls(), 1);
        assert!(adapter.is_loaded());
    }

    #[tokio::test]
    async fn test_inference_error_is_wrapped() {
        let adapter = ModelAdapter::new(Arc::new(CountingLoader::new(Arc::new(BrokenModel))));
        let handle = adapter.handle().await.unwrap();
        let image = Arc::new(DynamicImage::new_rgb8(8, 8));

        let err = adapter.infer(&handle, image).await.unwrap_err();
        assert!(matches!(err, PredictionError::InferenceFailure { .. }));
        assert!(err.to_string().contains("tensor shape mismatch"));
    }
}
