//! COMMAND_ACK bookkeeping for one vehicle.
//!
//! Every acknowledgement wakes every waiter through a `watch` channel; each
//! waiter then re-checks whether the acknowledgement is one it may consume.
//! Which acknowledgements a waiter may consume depends on [`AckPolicy`].

use crate::config::AckPolicy;
use crate::dialect::{MavCmd, MavResult};
use crate::error::VehicleError;
use crate::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AckOutcome {
    Accepted,
    Rejected(MavResult),
    /// Nothing usable arrived before the deadline.
    Pending,
}

impl AckOutcome {
    fn from_result(result: MavResult) -> Self {
        if result == MavResult::MAV_RESULT_ACCEPTED {
            AckOutcome::Accepted
        } else {
            AckOutcome::Rejected(result)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckRecord {
    pub command: MavCmd,
    pub result: MavResult,
    seq: u64,
}

#[derive(Debug)]
struct PendingCommand {
    ticket: u64,
    command: MavCmd,
    resolved: Option<MavResult>,
}

#[derive(Debug, Default)]
struct AckInner {
    last: Option<AckRecord>,
    seq: u64,
    next_ticket: u64,
    pending: VecDeque<PendingCommand>,
    closed: bool,
}

#[derive(Debug)]
pub struct AckTracker {
    policy: AckPolicy,
    inner: Mutex<AckInner>,
    signal: watch::Sender<u64>,
}

impl AckTracker {
    pub fn new(policy: AckPolicy) -> Arc<Self> {
        let (signal, _) = watch::channel(0);
        Arc::new(Self {
            policy,
            inner: Mutex::new(AckInner::default()),
            signal,
        })
    }

    pub fn policy(&self) -> AckPolicy {
        self.policy
    }

    /// Registers interest in the next acknowledgement for `command`. Must be
    /// called before the command frame goes out.
    pub fn begin(self: &Arc<Self>, command: MavCmd) -> AckTicket {
        let mut inner = lock(&self.inner);
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        if self.policy == AckPolicy::Correlated {
            inner.pending.push_back(PendingCommand {
                ticket,
                command,
                resolved: None,
            });
        }
        AckTicket {
            tracker: Arc::clone(self),
            id: ticket,
            command,
            baseline: inner.seq,
        }
    }

    /// Called by ingestion for every COMMAND_ACK from the vehicle.
    pub fn record(&self, command: MavCmd, result: MavResult) {
        if result == MavResult::MAV_RESULT_IN_PROGRESS {
            return;
        }
        {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return;
            }
            inner.seq += 1;
            let seq = inner.seq;
            inner.last = Some(AckRecord {
                command,
                result,
                seq,
            });
            if let Some(waiting) = inner
                .pending
                .iter_mut()
                .find(|p| p.command == command && p.resolved.is_none())
            {
                waiting.resolved = Some(result);
            }
        }
        self.signal.send_modify(|v| *v += 1);
    }

    pub fn last(&self) -> Option<AckRecord> {
        lock(&self.inner).last
    }

    /// Ends every outstanding and future wait with `Disconnected`.
    pub fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            inner.pending.clear();
        }
        self.signal.send_modify(|v| *v += 1);
    }

    fn check(&self, ticket: &AckTicket) -> Result<Option<AckOutcome>, VehicleError> {
        let inner = lock(&self.inner);
        if inner.closed {
            return Err(VehicleError::Disconnected);
        }
        let outcome = match self.policy {
            AckPolicy::LastWriteWins => inner
                .last
                .filter(|rec| rec.seq > ticket.baseline && rec.command == ticket.command)
                .map(|rec| AckOutcome::from_result(rec.result)),
            AckPolicy::Correlated => inner
                .pending
                .iter()
                .find(|p| p.ticket == ticket.id)
                .and_then(|p| p.resolved)
                .map(AckOutcome::from_result),
        };
        Ok(outcome)
    }
}

/// One outstanding command's claim on the tracker. Dropping it withdraws the
/// claim.
#[derive(Debug)]
pub struct AckTicket {
    tracker: Arc<AckTracker>,
    id: u64,
    command: MavCmd,
    baseline: u64,
}

impl AckTicket {
    pub fn command(&self) -> MavCmd {
        self.command
    }

    /// Waits until an acknowledgement this ticket may consume arrives, the
    /// timeout passes, or the tracker closes.
    pub async fn wait(&self, timeout: Duration) -> Result<AckOutcome, VehicleError> {
        let deadline = Instant::now() + timeout;
        let mut wake = self.tracker.signal.subscribe();
        loop {
            if let Some(outcome) = self.tracker.check(self)? {
                return Ok(outcome);
            }
            match tokio::time::timeout_at(deadline, wake.changed()).await {
                Err(_) => return Ok(AckOutcome::Pending),
                Ok(Err(_)) => return Err(VehicleError::Disconnected),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Forgets anything already seen so the next wait only counts
    /// acknowledgements that arrive from now on.
    pub fn rearm(&mut self) {
        let mut inner = lock(&self.tracker.inner);
        self.baseline = inner.seq;
        if let Some(p) = inner.pending.iter_mut().find(|p| p.ticket == self.id) {
            p.resolved = None;
        }
    }
}

impl Drop for AckTicket {
    fn drop(&mut self) {
        let mut inner = lock(&self.tracker.inner);
        inner.pending.retain(|p| p.ticket != self.id);
    }
}
