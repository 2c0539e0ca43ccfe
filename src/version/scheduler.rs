//! Bounded pool for registry requests
//!
//! Every registry fetch goes through [`RequestScheduler::submit`]. Requests are
//! queued the moment `submit` is called, and a single dispatcher hands out
//! slots in that order. With a pool size of N > 0 at most N fetches run at
//! once; a pool size of 0 disables queuing entirely.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::debug;

use crate::version::error::RegistryError;
use crate::version::registry::{RawMetadata, Registry};

type FetchReply = oneshot::Sender<Result<RawMetadata, RegistryError>>;

/// One queued request
struct Job {
    package_name: String,
    endpoint: String,
    reply: FetchReply,
}

pub struct RequestScheduler {
    registry: Arc<dyn Registry>,
    pool_size: usize,
    permits: Option<Arc<Semaphore>>,
    running: Arc<AtomicUsize>,
    /// Started lazily so construction does not need a runtime
    queue: OnceLock<mpsc::UnboundedSender<Job>>,
}

impl RequestScheduler {
    pub fn new(registry: Arc<dyn Registry>, pool_size: usize) -> Self {
        Self {
            registry,
            pool_size,
            permits: (pool_size > 0).then(|| Arc::new(Semaphore::new(pool_size))),
            running: Arc::new(AtomicUsize::new(0)),
            queue: OnceLock::new(),
        }
    }

    /// Queue one fetch and return a future resolving to its result.
    ///
    /// The request takes its place in the queue before this returns, so the
    /// order of `submit` calls is the order in which slots are granted. The
    /// fetch runs even if the returned future is dropped. A slot is released
    /// when its fetch finishes, whether it succeeded or not.
    pub fn submit(
        &self,
        package_name: &str,
        endpoint: &str,
    ) -> impl Future<Output = Result<RawMetadata, RegistryError>> + Send + use<> {
        let (reply, response) = oneshot::channel();
        let job = Job {
            package_name: package_name.to_string(),
            endpoint: endpoint.to_string(),
            reply,
        };
        if self.queue().send(job).is_err() {
            debug!("Request queue closed, dropping {}", package_name);
        }

        let package_name = package_name.to_string();
        async move {
            response
                .await
                .unwrap_or_else(|_| Err(RegistryError::Dropped(package_name)))
        }
    }

    fn queue(&self) -> &mpsc::UnboundedSender<Job> {
        self.queue.get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(dispatch(
                receiver,
                Arc::clone(&self.registry),
                self.permits.clone(),
                Arc::clone(&self.running),
                self.pool_size,
            ));
            sender
        })
    }

    /// Number of fetches currently executing
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

/// Grant slots to queued requests in arrival order. Ends once the scheduler
/// is dropped.
async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<Job>,
    registry: Arc<dyn Registry>,
    permits: Option<Arc<Semaphore>>,
    running: Arc<AtomicUsize>,
    pool_size: usize,
) {
    while let Some(job) = queue.recv().await {
        let permit: Option<OwnedSemaphorePermit> = match &permits {
            // The semaphore is never closed
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        let registry = Arc::clone(&registry);
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            let result = {
                let _permit = permit;
                let _slot = RunningSlot::enter(&running, pool_size);

                debug!("Fetching {} from {}", job.package_name, job.endpoint);
                registry.fetch(&job.package_name, &job.endpoint).await
            };
            // The caller may have stopped waiting
            let _ = job.reply.send(result);
        });
    }
}

/// Keeps the running counter in step with executing fetches
struct RunningSlot<'a> {
    running: &'a AtomicUsize,
}

impl<'a> RunningSlot<'a> {
    fn enter(running: &'a AtomicUsize, pool_size: usize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert!(
            pool_size == 0 || now <= pool_size,
            "{now} fetches running with a pool of {pool_size}"
        );
        Self { running }
    }
}

impl Drop for RunningSlot<'_> {
    fn drop(&mut self) {
        let previous = self.running.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "running fetch counter underflow");
    }
}
