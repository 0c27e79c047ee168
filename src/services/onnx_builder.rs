// ONNX Runtime session construction and pooling for the detection model

use crate::core::config::InferenceBackend;
use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, info, warn};

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

/// Intra-op threads per session, split across the pool so sessions don't fight over cores.
///
/// Windows is capped at 6: thread synchronization overhead outweighs extra cores there.
/// Reference: https://github.com/microsoft/onnxruntime/issues/3713
pub fn intra_op_threads(pool_size: usize) -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let budget = std::cmp::min(6, total_cores);

    #[cfg(not(target_os = "windows"))]
    let budget = total_cores;

    let per_session = (budget / pool_size.max(1)).max(1);
    debug!(
        "CPU threads: {} total cores, {} per session across {} sessions",
        total_cores, per_session, pool_size
    );
    per_session
}

/// Initialize the ONNX Runtime environment once per process.
///
/// The outcome is the runtime capability flag: an error here means every later
/// model load reports the runtime as unavailable.
pub fn init_runtime() -> Result<()> {
    ort::init()
        .with_name("crop-doctor")
        .commit()
        .map(|_| ())
        .map_err(|e| anyhow!("Failed to initialize ONNX Runtime: {}", e))
}

/// Fixed-size pool of ONNX sessions
///
/// `Session::run` needs `&mut self`, so each in-flight inference checks out its own session.
/// Uses a crossbeam bounded channel instead of a mutex-guarded queue.
pub struct OnnxSessionPool {
    sender: Sender<Session>,
    receiver: Receiver<Session>,
    capacity: usize,
}

impl OnnxSessionPool {
    pub fn new(sessions: Vec<Session>) -> Self {
        let capacity = sessions.len().max(1);
        let (sender, receiver) = bounded(capacity);
        for session in sessions {
            // Capacity equals the number of sessions, so this never blocks
            let _ = sender.send(session);
        }
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a session is free. Call from blocking threads only.
    pub fn acquire(&self) -> Result<PooledSession<'_>> {
        let session = self
            .receiver
            .recv()
            .map_err(|_| anyhow!("ONNX session pool is closed"))?;
        Ok(PooledSession {
            session: Some(session),
            pool: self,
        })
    }

    fn release(&self, session: Session) {
        if self.sender.send(session).is_err() {
            warn!("ONNX session pool closed while returning a session");
        }
    }
}

/// Checked-out session, returned to its pool on drop (including on panic or early return)
pub struct PooledSession<'a> {
    session: Option<Session>,
    pool: &'a OnnxSessionPool,
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Only taken in Drop
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

fn build_cpu(model_path: &Path, threads: usize) -> Result<Session> {
    Session::builder()
        .context("Failed to create ONNX session builder")?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context("Failed to configure CPU execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set graph optimization level")?
        .with_intra_threads(threads)
        .context("Failed to configure intra-op threads")?
        .with_inter_threads(1)
        .context("Failed to configure inter-op threads")?
        .commit_from_file(model_path)
        .with_context(|| {
            format!(
                "Failed to load ONNX model from {}. This usually indicates a corrupted export \
                 or an opset the bundled runtime does not support",
                model_path.display()
            )
        })
}

#[cfg(feature = "cuda")]
fn try_cuda(model_path: &Path, threads: usize) -> Option<Session> {
    Session::builder()
        .and_then(|b| b.with_execution_providers([CUDAExecutionProvider::default().build()]))
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(threads))
        .and_then(|b| b.with_inter_threads(1))
        .and_then(|b| b.commit_from_file(model_path))
        .ok()
}

#[cfg(all(target_os = "macos", feature = "coreml"))]
fn try_coreml(model_path: &Path, threads: usize) -> Option<Session> {
    Session::builder()
        .and_then(|b| b.with_execution_providers([CoreMLExecutionProvider::default().build()]))
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(threads))
        .and_then(|b| b.with_inter_threads(1))
        .and_then(|b| b.commit_from_file(model_path))
        .ok()
}

/// Build one session, trying accelerators compiled in via cargo features before CPU.
///
/// A forced backend that is not compiled in, or fails to initialize, falls back to CPU
/// with a warning rather than failing the load.
///
/// Returns (backend_name, Session)
pub fn build_session(
    model_path: &Path,
    backend: InferenceBackend,
    threads: usize,
) -> Result<(String, Session)> {
    let try_cuda_first = matches!(backend, InferenceBackend::Auto | InferenceBackend::Cuda);
    let try_coreml_first = matches!(backend, InferenceBackend::Auto | InferenceBackend::CoreMl);

    if try_cuda_first {
        #[cfg(feature = "cuda")]
        {
            if let Some(session) = try_cuda(model_path, threads) {
                info!("✓ Using CUDA acceleration for detection");
                return Ok(("CUDA".to_string(), session));
            }
        }
        if backend == InferenceBackend::Cuda {
            warn!("INFERENCE_BACKEND=CUDA but CUDA is unavailable in this build, using CPU");
        }
    }

    if try_coreml_first {
        #[cfg(all(target_os = "macos", feature = "coreml"))]
        {
            if let Some(session) = try_coreml(model_path, threads) {
                info!("✓ Using CoreML acceleration for detection");
                return Ok(("CoreML".to_string(), session));
            }
        }
        if backend == InferenceBackend::CoreMl {
            warn!("INFERENCE_BACKEND=COREML but CoreML is unavailable in this build, using CPU");
        }
    }

    let session = build_cpu(model_path, threads)?;
    if backend == InferenceBackend::Cpu {
        info!("✓ Forced CPU backend for detection");
    } else {
        warn!("Using CPU-only inference for detection (no GPU acceleration available)");
    }
    Ok(("CPU".to_string(), session))
}

/// Build `pool_size` sessions over the same model file
pub fn build_pool(
    model_path: &Path,
    backend: InferenceBackend,
    pool_size: usize,
) -> Result<(String, OnnxSessionPool)> {
    let pool_size = pool_size.max(1);
    let threads = intra_op_threads(pool_size);
    let mut sessions = Vec::with_capacity(pool_size);
    let mut backend_name = String::from("CPU");

    for index in 0..pool_size {
        let (name, session) = build_session(model_path, backend, threads)
            .with_context(|| format!("Failed to build detection session {}", index + 1))?;
        backend_name = name;
        sessions.push(session);
    }

    info!(
        "Detection session pool ready: {} sessions on {}",
        pool_size, backend_name
    );
    Ok((backend_name, OnnxSessionPool::new(sessions)))
}
