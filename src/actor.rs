//! Module that contains the actor serializing every action on a process.
//!
//! Local API calls and inbound peer lines are queued on one unbounded channel and applied to the
//! [`ProcessCore`] strictly in arrival order by a single task, so the protocol state needs no lock.

use crate::{
    error::{ActorClosed, LockError},
    log,
    mutex::{GrantNotifier, LockState},
    process::ProcessCore,
    server::InboundHandler,
    ProcessId, SnapshotId, Timestamp,
};
use color_print::cformat;
use std::panic::{self, AssertUnwindSafe};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};

pub enum Action {
    RequestLock {
        notify: GrantNotifier,
    },
    ReleaseLock {
        reply: oneshot::Sender<Result<Vec<ProcessId>, LockError>>,
    },
    InitiateSnapshot {
        reply: oneshot::Sender<Option<SnapshotId>>,
    },
    Inbound(String),
    Status {
        reply: oneshot::Sender<ProcessStatus>,
    },
}

/// Point-in-time view of a process, for monitoring and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub id: ProcessId,
    pub time: Timestamp,
    pub lock_state: LockState,
    pub snapshot_in_progress: Option<SnapshotId>,
    pub last_snapshot: Option<SnapshotId>,
}

pub struct Actor {
    core: ProcessCore,
    actions: UnboundedReceiver<Action>,
}

impl Actor {
    pub fn new(core: ProcessCore) -> (Self, ActorHandle) {
        let (tx, actions) = mpsc::unbounded_channel();
        (Self { core, actions }, ActorHandle { actions: tx })
    }

    /// Function that runs the actor on its own task. The task ends once every handle is dropped.
    pub fn spawn(core: ProcessCore) -> (ActorHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(core);
        (handle, tokio::spawn(actor.run()))
    }

    pub async fn run(mut self) {
        while let Some(action) = self.actions.recv().await {
            self.dispatch(action);
        }

        log::info(&cformat!(
            "Process <bold>{}</bold> actor shutting down.",
            self.core.id()
        ));
    }

    /// A panic while handling one action is logged and the loop carries on with the next one.
    fn dispatch(&mut self, action: Action) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle(action)));

        if let Err(panic_info) = outcome {
            let message = if let Some(msg) = panic_info.downcast_ref::<&str>() {
                msg.to_string()
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                msg.clone()
            } else {
                "<unknown panic>".to_string()
            };
            log::error(&cformat!("<red, bold>Action aborted:</red, bold> {message}"));
        }
    }

    fn handle(&mut self, action: Action) {
        match action {
            Action::RequestLock { notify } => {
                if let Err(e) = self.core.request_lock(notify) {
                    log::warn(&cformat!("Rejected lock request: {e}"));
                }
            }
            Action::ReleaseLock { reply } => {
                let result = self.core.release_lock();
                if let Err(e) = &result {
                    log::warn(&cformat!("Rejected lock release: {e}"));
                }
                let _ = reply.send(result);
            }
            Action::InitiateSnapshot { reply } => {
                let _ = reply.send(self.core.initiate_snapshot());
            }
            Action::Inbound(line) => {
                match self.core.handle_line(&line) {
                    Ok(()) => {}
                    Err(e) if e.is_unknown_kind() => {
                        log::debug(&cformat!("Ignoring `{line}`: {e}"));
                    }
                    Err(e) => log::warn(&cformat!("Discarding `{line}`: {e}")),
                }
            }
            Action::Status { reply } => {
                let _ = reply.send(ProcessStatus {
                    id: self.core.id(),
                    time: self.core.time(),
                    lock_state: self.core.lock_state(),
                    snapshot_in_progress: self
                        .core
                        .snapshot()
                        .active()
                        .map(|state| state.snapshot_id),
                    last_snapshot: self.core.snapshot().last_completed(),
                });
            }
        }
    }
}

/// Resolves once the lock is held, or with the reason the request was refused.
pub struct LockGrant(oneshot::Receiver<Result<(), LockError>>);

impl LockGrant {
    pub async fn acquired(self) -> Result<(), LockError> {
        self.0.await.unwrap_or(Err(LockError::Abandoned))
    }
}

/// Cloneable entry point into an [`Actor`].
#[derive(Clone)]
pub struct ActorHandle {
    actions: UnboundedSender<Action>,
}

impl ActorHandle {
    /// Queues a lock request without waiting for it. Await [`LockGrant::acquired`] before
    /// entering the critical section, then call [`ActorHandle::release_lock`] exactly once.
    pub fn request_lock(&self) -> LockGrant {
        let (notify, grant) = oneshot::channel();
        if let Err(mpsc::error::SendError(Action::RequestLock { notify })) =
            self.actions.send(Action::RequestLock { notify })
        {
            let _ = notify.send(Err(ActorClosed.into()));
        }
        LockGrant(grant)
    }

    pub async fn release_lock(&self) -> Result<Vec<ProcessId>, LockError> {
        let (reply, result) = oneshot::channel();
        self.actions
            .send(Action::ReleaseLock { reply })
            .map_err(|_| ActorClosed)?;
        result.await.map_err(|_| ActorClosed)?
    }

    /// Returns the id of the new snapshot, or `None` if one was already in progress.
    pub async fn initiate_snapshot(&self) -> Result<Option<SnapshotId>, ActorClosed> {
        let (reply, result) = oneshot::channel();
        self.actions
            .send(Action::InitiateSnapshot { reply })
            .map_err(|_| ActorClosed)?;
        result.await.map_err(|_| ActorClosed)
    }

    pub async fn status(&self) -> Result<ProcessStatus, ActorClosed> {
        let (reply, result) = oneshot::channel();
        self.actions
            .send(Action::Status { reply })
            .map_err(|_| ActorClosed)?;
        result.await.map_err(|_| ActorClosed)
    }

    /// Queues an inbound line and returns immediately.
    pub fn deliver(&self, line: String) -> Result<(), ActorClosed> {
        self.actions
            .send(Action::Inbound(line))
            .map_err(|_| ActorClosed)
    }
}

impl InboundHandler for ActorHandle {
    fn on_message(&self, line: String) {
        if self.deliver(line).is_err() {
            log::warn("Inbound message dropped: the process actor has stopped.");
        }
    }
}
