//! Ricart-Agrawala mutual exclusion.
//!
//! A process broadcasts a timestamped `REQUEST` and enters the critical section once every peer
//! has answered with a `REPLY`. A peer withholds its reply while it holds the lock, or while its
//! own request is older than the incoming one, and sends all withheld replies in one batch when
//! it releases.

use crate::{
    error::LockError,
    log,
    message::Message,
    process::Context,
    request::{Request, RequestOrder},
    snapshot::LocalState,
    ProcessId, Timestamp,
};
use color_print::cformat;
use std::collections::BTreeSet;
use tokio::sync::oneshot;

/// Single-assignment signal completed when the lock is granted, or when the request is rejected.
pub type GrantNotifier = oneshot::Sender<Result<(), LockError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Requesting,
    Holding,
}

/// Peers that granted permission for the current request.
#[derive(Debug, Default, Clone)]
pub struct ReplyTracker(BTreeSet<ProcessId>);

impl ReplyTracker {
    pub fn insert(&mut self, id: ProcessId) -> bool {
        self.0.insert(id)
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn covers<I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = ProcessId>,
    {
        ids.into_iter().all(|id| self.0.contains(&id))
    }

    pub fn iter(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct MutexEngine {
    id: ProcessId,
    state: LockState,
    own_request: Option<Request>,
    requests: RequestOrder,
    grants: ReplyTracker,
    pending_grant: Option<GrantNotifier>,
}

impl MutexEngine {
    pub fn new(id: ProcessId) -> Self {
        Self {
            id,
            state: LockState::Idle,
            own_request: None,
            requests: RequestOrder::new(),
            grants: ReplyTracker::default(),
            pending_grant: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn own_request(&self) -> Option<Request> {
        self.own_request
    }

    pub fn requests(&self) -> &RequestOrder {
        &self.requests
    }

    pub fn grants(&self) -> &ReplyTracker {
        &self.grants
    }

    /// Idle -> Requesting. Broadcasts `REQUEST` and parks `notify` until the grant condition holds.
    ///
    /// A second request before release is rejected: `notify` is completed with the error and no
    /// state changes.
    pub fn request_lock(
        &mut self,
        ctx: &mut Context<'_>,
        notify: GrantNotifier,
    ) -> Result<Timestamp, LockError> {
        if self.state != LockState::Idle || self.pending_grant.is_some() {
            let err = LockError::AlreadyRequested(self.state);
            let _ = notify.send(Err(err.clone()));
            return Err(err);
        }

        let time = ctx.tick();
        let request = Request::new(time, self.id);
        self.requests.insert(request);
        self.grants.clear();
        self.own_request = Some(request);
        self.state = LockState::Requesting;
        self.pending_grant = Some(notify);

        log::info(&cformat!("Requesting the lock at time <bold>{time}</bold>."));
        ctx.broadcast(&Message::Request {
            time,
            sender: self.id,
        });

        self.try_grant(ctx);
        Ok(time)
    }

    /// Handles `REQUEST(time, sender)`. The clock has already observed `time`.
    pub fn on_request(&mut self, ctx: &mut Context<'_>, time: Timestamp, sender: ProcessId) {
        let incoming = Request::new(time, sender);
        self.requests.remove_where(|r| r.process_id == sender);
        self.requests.insert(incoming);

        if self.should_defer() {
            log::debug(&cformat!(
                "Deferring the reply to process <bold>{sender}</bold> (request at {time})."
            ));
            return;
        }

        self.requests.remove_where(|r| *r == incoming);
        let time = ctx.tick();
        ctx.send(
            sender,
            &Message::Reply {
                time,
                sender: self.id,
            },
        );
    }

    /// Handles `REPLY(_, sender)`. The clock has already observed the reply's timestamp.
    pub fn on_reply(&mut self, ctx: &mut Context<'_>, sender: ProcessId) {
        self.grants.insert(sender);
        log::debug(&cformat!(
            "Reply from process <bold>{sender}</bold> ({}/{}).",
            self.grants.len(),
            ctx.peers.len()
        ));
        self.try_grant(ctx);
    }

    /// Holding -> Idle. Sends one `REPLY` to every deferred requester, all stamped with the same
    /// time, and returns their ids in the order they were answered.
    pub fn release_lock(&mut self, ctx: &mut Context<'_>) -> Result<Vec<ProcessId>, LockError> {
        if self.state != LockState::Holding {
            return Err(LockError::NotHolding(self.state));
        }

        let id = self.id;
        self.requests.remove_where(|r| r.process_id == id);
        self.own_request = None;
        self.grants.clear();
        self.pending_grant = None;
        self.state = LockState::Idle;

        let time = ctx.tick();
        let released: Vec<ProcessId> = self
            .requests
            .drain()
            .into_iter()
            .map(|request| request.process_id)
            .collect();

        for &owner in &released {
            ctx.send(owner, &Message::Reply { time, sender: id });
        }

        log::info(&cformat!(
            "Released the lock at time <bold>{time}</bold>, answered {} deferred request(s).",
            released.len()
        ));
        Ok(released)
    }

    /// Frozen copy of the mutex state for a snapshot.
    pub fn capture(&self, time: Timestamp) -> LocalState {
        LocalState {
            time,
            in_critical_section: self.state == LockState::Holding,
            wants_critical_section: self.state == LockState::Requesting,
            requests: self
                .requests
                .iter()
                .filter(|r| r.process_id != self.id)
                .copied()
                .collect(),
            replies: self.grants.iter().collect(),
        }
    }

    /// A reply is withheld while holding, or while the local request is the oldest one queued.
    fn should_defer(&self) -> bool {
        match self.state {
            LockState::Holding => true,
            LockState::Requesting => self.requests.peek_min() == self.own_request.as_ref(),
            LockState::Idle => false,
        }
    }

    fn try_grant(&mut self, ctx: &Context<'_>) {
        if self.state != LockState::Requesting {
            return;
        }
        if self.requests.peek_min() != self.own_request.as_ref() {
            return;
        }
        if !self.grants.covers(ctx.peers.iter().map(|peer| peer.id)) {
            return;
        }

        self.state = LockState::Holding;
        log::info(&cformat!("<green, bold>Lock granted.</green, bold>"));
        if let Some(notify) = self.pending_grant.take() {
            let _ = notify.send(Ok(()));
        }
    }
}
