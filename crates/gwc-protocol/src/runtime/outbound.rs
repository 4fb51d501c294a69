//! Outbound TCP sends, one queue and worker task per remote listener.
//!
//! The reactor only enqueues. A worker connects and writes its frames in
//! order, so a slow or dead peer holds up its own queue and nothing else.
//! Failed sends come back to the loop on the `failures` channel, tagged with
//! whoever caused them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use gwc_transport::PortRole;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::types::Kind;

use super::effect::SendFailure;
use super::transport::Transport;
use super::UiSessionId;

/// Frames waiting for one peer before further sends to it fail.
const PEER_QUEUE: usize = 128;
/// A worker with nothing to send for this long exits.
const IDLE_AFTER: Duration = Duration::from_secs(30);

/// Who hears about a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SendOrigin {
    /// A transient command; its reply waits for the outcome.
    Reply,
    /// An attached window gets a `[SYSTEM]` line.
    Ui(UiSessionId),
    Log,
}

#[derive(Debug)]
pub(super) struct FailedSend {
    pub failure: SendFailure,
    pub origin: SendOrigin,
}

/// Outcome of one queued send, handed out for [`SendOrigin::Reply`].
pub(super) type Delivery = oneshot::Receiver<Result<(), SendFailure>>;

struct Job {
    frame: Vec<u8>,
    role: PortRole,
    kind: Kind,
    origin: SendOrigin,
    done: Option<oneshot::Sender<Result<(), SendFailure>>>,
}

struct Worker {
    queue: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

pub(super) struct Outbound<T: Transport> {
    transport: T,
    workers: HashMap<SocketAddr, Worker>,
    failures: mpsc::UnboundedSender<FailedSend>,
    idle_after: Duration,
}

impl<T: Transport> Outbound<T> {
    pub fn new(transport: T, failures: mpsc::UnboundedSender<FailedSend>) -> Self {
        Self {
            transport,
            workers: HashMap::new(),
            failures,
            idle_after: IDLE_AFTER,
        }
    }

    /// For sends that never wait on a connect: UDP and replies.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue `envelope` for `addr`. Never waits on the network.
    pub fn enqueue(
        &mut self,
        addr: SocketAddr,
        role: PortRole,
        envelope: &Envelope,
        origin: SendOrigin,
    ) -> Option<Delivery> {
        let (done, delivery) = match origin {
            SendOrigin::Reply => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            SendOrigin::Ui(_) | SendOrigin::Log => (None, None),
        };
        let job = Job {
            frame: envelope.encode(),
            role,
            kind: envelope.kind(),
            origin,
            done,
        };
        if let Err(job) = self.queue(addr, job) {
            warn!("send queue to {addr} is full, {} dropped", job.kind);
            fail(&self.failures, addr, job);
        }
        delivery
    }

    /// Hand a job to the worker for `addr`, starting one if needed.
    /// Gives the job back when that worker's queue is full.
    fn queue(&mut self, addr: SocketAddr, job: Job) -> Result<(), Job> {
        let job = match self.workers.get(&addr) {
            Some(worker) => match worker.queue.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(job)) => return Err(job),
                // the worker went idle and stopped
                Err(TrySendError::Closed(job)) => job,
            },
            None => job,
        };

        self.workers.retain(|_, w| !w.task.is_finished());
        let (queue, rx) = mpsc::channel(PEER_QUEUE);
        let task = tokio::spawn(run_worker(
            self.transport.clone(),
            addr,
            rx,
            self.failures.clone(),
            self.idle_after,
        ));
        let queued = queue.try_send(job).map_err(TrySendError::into_inner);
        self.workers.insert(addr, Worker { queue, task });
        queued
    }

    /// Number of peers with a live worker.
    pub fn active_peers(&self) -> usize {
        self.workers.values().filter(|w| !w.task.is_finished()).count()
    }

    /// Stop taking frames and give the queued ones up to `limit` to go out.
    pub async fn drain(self, limit: Duration) {
        let tasks: Vec<JoinHandle<()>> = self.workers.into_values().map(|w| w.task).collect();
        if tasks.is_empty() {
            return;
        }
        let waiting = tasks.len();
        let flushed = tokio::time::timeout(limit, async {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await;
        if flushed.is_err() {
            warn!("{waiting} send queue(s) still busy after {limit:?}, abandoning them");
        }
    }
}

async fn run_worker<T: Transport>(
    transport: T,
    addr: SocketAddr,
    mut queue: mpsc::Receiver<Job>,
    failures: mpsc::UnboundedSender<FailedSend>,
    idle_after: Duration,
) {
    loop {
        match tokio::time::timeout(idle_after, queue.recv()).await {
            Ok(Some(job)) => deliver(&transport, addr, job, &failures).await,
            Ok(None) => return,
            Err(_) => break,
        }
    }
    // Refuse new jobs, then finish the ones that raced in.
    queue.close();
    while let Some(job) = queue.recv().await {
        deliver(&transport, addr, job, &failures).await;
    }
    debug!("send queue to {addr} idle, worker stopped");
}

async fn deliver<T: Transport>(
    transport: &T,
    addr: SocketAddr,
    job: Job,
    failures: &mpsc::UnboundedSender<FailedSend>,
) {
    match transport.send_tcp(addr, job.role, &job.frame).await {
        Ok(()) => {
            if let Some(done) = job.done {
                let _ = done.send(Ok(()));
            }
        }
        Err(e) => {
            warn!("{} to {addr} ({}) failed: {e}", job.kind, job.role);
            fail(failures, addr, job);
        }
    }
}

fn fail(failures: &mpsc::UnboundedSender<FailedSend>, addr: SocketAddr, job: Job) {
    let failure = SendFailure {
        addr,
        role: job.role,
        kind: job.kind,
    };
    if let Some(done) = job.done {
        let _ = done.send(Err(failure.clone()));
    }
    let _ = failures.send(FailedSend {
        failure,
        origin: job.origin,
    });
}
