use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};

use super::transform::{Pipeline, TransformError};
use crate::domain::{
    entities::request::ImageRequest,
    services::source::{SourceError, SourceResolver},
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("error decode image: {0}")]
    Decode(image::ImageError),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("error encode image: {0}")]
    Encode(image::ImageError),
    #[error("worker pool is closed")]
    Closed,
    #[error("worker dropped the job without a result")]
    NoReply,
    #[error("worker panicked: {0}")]
    Panicked(String),
}

type Reply = oneshot::Sender<Result<Bytes, WorkerError>>;

struct Job {
    resolver: SourceResolver,
    req: ImageRequest,
    reply: Reply,
}

type JobSender = flume::Sender<Job>;
type JobReceiver = flume::Receiver<Job>;

/// A fixed number of workers fed through a queue that holds as many jobs as
/// there are workers.
///
/// Submitting waits while the queue is full. Closing the pool lets the
/// workers finish every job already queued before they exit.
pub struct WorkerPool {
    tx: Mutex<Option<JobSender>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(num_workers: usize, pipeline: Pipeline) -> Self {
        let num_workers = num_workers.max(1);
        let (tx, rx) = flume::bounded(num_workers);
        let pipeline = Arc::new(pipeline);

        let handles = (0..num_workers)
            .map(|id| tokio::spawn(run_worker(id, rx.clone(), pipeline.clone())))
            .collect();

        info!("started {num_workers} workers");

        Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            num_workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Queues a job and waits for its result. Exactly one result is delivered
    /// per job; dropping the returned future does not cancel the job.
    pub async fn submit(
        &self,
        resolver: &SourceResolver,
        req: ImageRequest,
    ) -> Result<Bytes, WorkerError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WorkerError::Closed)?;

        let (reply, rx) = oneshot::channel();
        let job = Job {
            resolver: resolver.clone(),
            req,
            reply,
        };

        tx.send_async(job).await.map_err(|_| WorkerError::Closed)?;
        // the pool only drains once every sender is gone
        drop(tx);

        rx.await.map_err(|_| WorkerError::NoReply)?
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub fn close(&self) {
        if self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("closing worker pool");
        }
    }

    /// Closes the pool and waits for the workers to drain the queue.
    pub async fn shutdown(&self) {
        self.close();

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker did not exit cleanly: {e}");
            }
        }

        info!("worker pool shut down");
    }
}

async fn run_worker(id: usize, rx: JobReceiver, pipeline: Arc<Pipeline>) {
    debug!("worker {id} started");

    while let Ok(Job {
        resolver,
        req,
        reply,
    }) = rx.recv_async().await
    {
        let url = req.url.clone();
        let result = process(&resolver, req, &pipeline).await;
        if let Err(e) = &result {
            debug!("worker {id}: job {url} failed: {e}");
        }

        if reply.send(result).is_err() {
            debug!("worker {id}: caller for {url} went away");
        }
    }

    debug!("worker {id} exited");
}

async fn process(
    resolver: &SourceResolver,
    req: ImageRequest,
    pipeline: &Arc<Pipeline>,
) -> Result<Bytes, WorkerError> {
    let source = resolver.get_source_bytes(&req).await?;

    let pipeline = pipeline.clone();
    match tokio::task::spawn_blocking(move || pipeline.run(&req, &source)).await {
        Ok(result) => result,
        Err(e) => Err(WorkerError::Panicked(e.to_string())),
    }
}
