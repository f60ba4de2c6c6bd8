// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Device Submission Queues
//!
//! The execution backend behind completion handles. A submission queue
//! accepts work items - a kernel closure plus the completion handles it
//! depends on - and executes them on its own worker threads:
//!
//! - the **GPU queue** runs one worker, modelling the accelerator's
//!   in-order command queue; submissions are executed in FIFO order and a
//!   submitted kernel never occupies a pipeline worker thread;
//! - the **CPU queue** runs one worker per configured core and serves the
//!   event-chained engine's host-side submissions.
//!
//! A work item waits for its dependencies before running, marks its handle
//! started/complete around the kernel, and propagates kernel failures into
//! the handle so waiters observe them. Dropping the queue drains in-flight
//! items and joins the workers.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use hybrid_pipeline_domain::entities::CompletionHandle;
use hybrid_pipeline_domain::value_objects::DeviceKind;
use hybrid_pipeline_domain::PipelineError;

type Job = Box<dyn FnOnce() -> Result<(), PipelineError> + Send + 'static>;

struct WorkItem {
    deps: Vec<CompletionHandle>,
    job: Job,
    handle: CompletionHandle,
}

/// Dependency-aware FIFO work queue backed by worker threads.
pub struct SubmissionQueue {
    tx: Option<Sender<WorkItem>>,
    workers: Vec<JoinHandle<()>>,
    label: String,
}

impl std::fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("label", &self.label)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl SubmissionQueue {
    /// Creates a queue with `workers` executor threads.
    pub fn new(label: impl Into<String>, workers: usize) -> Self {
        let label = label.into();
        let (tx, rx) = unbounded::<WorkItem>();
        let worker_count = workers.max(1);
        let mut joins = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let rx: Receiver<WorkItem> = rx.clone();
            let name = format!("{}-{}", label, index);
            let join = std::thread::Builder::new()
                .name(name)
                .spawn(move || {
                    while let Ok(item) = rx.recv() {
                        Self::run_item(item);
                    }
                })
                .expect("failed to spawn submission worker");
            joins.push(join);
        }
        tracing::debug!(label = %label, workers = worker_count, "submission queue started");
        Self {
            tx: Some(tx),
            workers: joins,
            label,
        }
    }

    fn run_item(item: WorkItem) {
        for dep in &item.deps {
            if let Err(error) = dep.wait() {
                tracing::error!(error = %error, "dependency failed, skipping work item");
                item.handle.mark_failed(format!("dependency failed: {}", error));
                return;
            }
        }
        item.handle.mark_started();
        match (item.job)() {
            Ok(()) => item.handle.mark_complete(),
            Err(error) => {
                tracing::error!(error = %error, "kernel failed");
                item.handle.mark_failed(error.to_string());
            }
        }
    }

    /// Enqueues a work item that runs after `deps` complete. Returns the
    /// handle tracking it.
    pub fn submit<F>(&self, deps: &[CompletionHandle], job: F) -> CompletionHandle
    where
        F: FnOnce() -> Result<(), PipelineError> + Send + 'static,
    {
        let handle = CompletionHandle::pending();
        let item = WorkItem {
            deps: deps.to_vec(),
            job: Box::new(job),
            handle: handle.clone(),
        };
        if let Some(tx) = &self.tx {
            if tx.send(item).is_err() {
                handle.mark_failed("submission queue shut down");
            }
        } else {
            handle.mark_failed("submission queue shut down");
        }
        handle
    }

    /// Number of executor threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        // Closing the channel lets workers drain and exit.
        self.tx.take();
        for join in self.workers.drain(..) {
            let _ = join.join();
        }
        tracing::debug!(label = %self.label, "submission queue stopped");
    }
}

/// The per-device submission queues of one run.
#[derive(Debug, Clone)]
pub struct DeviceQueues {
    cpu: Arc<SubmissionQueue>,
    gpu: Arc<SubmissionQueue>,
}

impl DeviceQueues {
    /// Builds both queues: `cpu_workers` host executors and the single
    /// in-order GPU executor.
    pub fn new(cpu_workers: usize) -> Self {
        Self {
            cpu: Arc::new(SubmissionQueue::new("cpu-queue", cpu_workers)),
            gpu: Arc::new(SubmissionQueue::new("gpu-queue", 1)),
        }
    }

    /// The queue of one device.
    pub fn queue(&self, kind: DeviceKind) -> &Arc<SubmissionQueue> {
        match kind {
            DeviceKind::Cpu => &self.cpu,
            DeviceKind::Gpu => &self.gpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_submission_completes_handle() {
        let queue = SubmissionQueue::new("test", 1);
        let handle = queue.submit(&[], || Ok(()));
        handle.wait().unwrap();
        assert!(handle.profile().is_some());
    }

    #[test]
    fn test_dependencies_order_execution() {
        let queue = SubmissionQueue::new("test", 2);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first_order = Arc::clone(&order);
        let first = queue.submit(&[], move || {
            std::thread::sleep(Duration::from_millis(20));
            first_order.lock().push(1);
            Ok(())
        });

        let second_order = Arc::clone(&order);
        let second = queue.submit(&[first], move || {
            second_order.lock().push(2);
            Ok(())
        });

        second.wait().unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_single_worker_preserves_fifo() {
        let queue = SubmissionQueue::new("test", 1);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for expected in 0..16 {
            let counter = Arc::clone(&counter);
            handles.push(queue.submit(&[], move || {
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(seen, expected);
                Ok(())
            }));
        }
        for handle in handles {
            handle.wait().unwrap();
        }
    }

    #[test]
    fn test_failure_propagates_to_dependents() {
        let queue = SubmissionQueue::new("test", 1);
        let failed = queue.submit(&[], || Err(PipelineError::processing_failed("boom")));
        let dependent = queue.submit(&[failed.clone()], || Ok(()));

        assert!(failed.wait().is_err());
        let err = dependent.wait().unwrap_err();
        assert!(err.to_string().contains("dependency failed"));
    }

    #[test]
    fn test_device_queues_routing() {
        let queues = DeviceQueues::new(2);
        assert_eq!(queues.queue(DeviceKind::Gpu).workers(), 1);
        assert_eq!(queues.queue(DeviceKind::Cpu).workers(), 2);
    }
}
