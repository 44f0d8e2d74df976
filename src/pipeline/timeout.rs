//! Single-slot step watchdog.
//!
//! At most one deadline is live. Arming replaces (never layers) the previous
//! one. When a deadline elapses the guard hands it to a fixed callback; the
//! callback owner decides what a missed deadline means.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::types::Subject;

/// A deadline for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline {
    /// Generation number; unique per guard.
    pub id: u64,
    pub subject: Subject,
    pub step: &'static str,
    pub fires_at: DateTime<Utc>,
}

/// Invoked with the deadline that elapsed.
pub type FireFn = Arc<dyn Fn(Deadline) + Send + Sync>;

struct LiveDeadline {
    deadline: Deadline,
    timer: JoinHandle<()>,
}

/// Single-slot watchdog. Must be armed from within a tokio runtime.
pub struct TimeoutGuard {
    duration: Duration,
    on_fire: FireFn,
    next_id: u64,
    live: Option<LiveDeadline>,
}

impl TimeoutGuard {
    pub fn new(duration: Duration, on_fire: FireFn) -> Self {
        Self {
            duration,
            on_fire,
            next_id: 0,
            live: None,
        }
    }

    /// Arm a deadline for `step`, cancelling any live one. Every step gets
    /// the same duration.
    pub fn arm(&mut self, subject: Subject, step: &'static str) -> Deadline {
        self.disarm();
        let duration = self.duration;

        self.next_id += 1;
        let fires_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let deadline = Deadline {
            id: self.next_id,
            subject,
            step,
            fires_at,
        };

        let on_fire = Arc::clone(&self.on_fire);
        let fired = deadline.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire(fired);
        });

        trace!(id = deadline.id, subject = %subject, step, "Deadline armed");
        self.live = Some(LiveDeadline {
            deadline: deadline.clone(),
            timer,
        });
        deadline
    }

    /// Cancel the live deadline, if any.
    pub fn disarm(&mut self) -> Option<Deadline> {
        let live = self.live.take()?;
        live.timer.abort();
        trace!(id = live.deadline.id, step = live.deadline.step, "Deadline disarmed");
        Some(live.deadline)
    }

    /// Confirm that a fired deadline is still the live one and clear the slot.
    ///
    /// A timer can elapse and invoke the callback just before it is replaced
    /// or disarmed; such a deadline is stale and this returns `false`.
    pub fn take_if_live(&mut self, fired: &Deadline) -> bool {
        match &self.live {
            Some(live) if live.deadline.id == fired.id => {
                self.live = None;
                true
            }
            _ => {
                debug!(id = fired.id, step = fired.step, "Ignoring stale deadline");
                false
            }
        }
    }

    pub fn live(&self) -> Option<&Deadline> {
        self.live.as_ref().map(|l| &l.deadline)
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ContextId;
    use tokio::sync::mpsc;

    fn guard(duration: Duration) -> (TimeoutGuard, mpsc::UnboundedReceiver<Deadline>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = TimeoutGuard::new(
            duration,
            Arc::new(move |d| {
                let _ = tx.send(d);
            }),
        );
        (guard, rx)
    }

    #[tokio::test]
    async fn armed_deadline_fires_with_subject_and_step() {
        let (mut guard, mut rx) = guard(Duration::from_millis(20));
        let armed = guard.arm(Subject::Item(ContextId(7)), "extract");

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, armed);
        assert_eq!(fired.subject, Subject::Item(ContextId(7)));
        assert_eq!(fired.step, "extract");
        assert!(guard.take_if_live(&fired));
        assert!(guard.live().is_none());
    }

    #[tokio::test]
    async fn rearming_replaces_previous_deadline() {
        let (mut guard, mut rx) = guard(Duration::from_millis(30));
        let first = guard.arm(Subject::Catalog, "scan");
        let second = guard.arm(Subject::Item(ContextId(1)), "open");
        assert_ne!(first.id, second.id);
        assert_eq!(guard.live(), Some(&second));

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.id, second.id);

        // Nothing else fires.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disarm_prevents_fire() {
        let (mut guard, mut rx) = guard(Duration::from_millis(20));
        guard.arm(Subject::Catalog, "scan");
        let disarmed = guard.disarm();
        assert!(disarmed.is_some());
        assert!(guard.disarm().is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_deadline_is_rejected() {
        let (mut guard, _rx) = guard(Duration::from_secs(60));
        let old = guard.arm(Subject::Item(ContextId(1)), "generate");
        let _new = guard.arm(Subject::Item(ContextId(2)), "open");
        assert!(!guard.take_if_live(&old));
        assert!(guard.live().is_some());
    }
}
