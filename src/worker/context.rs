//! Worker context manager. Tracks one context at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::ContextError;
use crate::pipeline::types::{ContextId, Item};
use crate::worker::provider::{ContextProvider, TaskRequest};

/// A ready worker context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextHandle {
    pub id: ContextId,
    pub item_url: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Empty,
    Opening(ContextId),
    Open(ContextHandle),
}

impl Slot {
    fn context(&self) -> Option<ContextId> {
        match self {
            Self::Empty => None,
            Self::Opening(id) => Some(*id),
            Self::Open(handle) => Some(handle.id),
        }
    }
}

/// Opens, relays to, and closes worker contexts through a provider.
///
/// Tracks at most one context. A context that is released (abandoned or left
/// open after a failure) stays open at the provider but is no longer tracked.
pub struct WorkerContextManager {
    provider: Arc<dyn ContextProvider>,
    slot: Mutex<Slot>,
}

impl WorkerContextManager {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            provider,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Open a context for `item` and wait until it is ready.
    pub async fn open(&self, context: ContextId, item: &Item) -> Result<ContextHandle, ContextError> {
        {
            let mut slot = self.slot.lock().await;
            if let Some(active) = slot.context() {
                error!(
                    active = %active,
                    requested = %context,
                    "Refusing to open a second worker context"
                );
                return Err(ContextError::AlreadyOpen {
                    active,
                    requested: context,
                });
            }
            *slot = Slot::Opening(context);
        }

        debug!(context = %context, url = %item.url, provider = self.provider.name(), "Opening worker context");
        let opened = self.provider.open(context, item).await;

        let mut slot = self.slot.lock().await;
        let still_wanted = *slot == Slot::Opening(context);
        match opened {
            Ok(()) if still_wanted => {
                let handle = ContextHandle {
                    id: context,
                    item_url: item.url.clone(),
                    opened_at: Utc::now(),
                };
                *slot = Slot::Open(handle.clone());
                info!(context = %context, url = %item.url, "Worker context ready");
                Ok(handle)
            }
            Ok(()) => {
                debug!(context = %context, "Worker context became ready after it was abandoned");
                Err(ContextError::Abandoned { context })
            }
            Err(e) => {
                if still_wanted {
                    *slot = Slot::Empty;
                }
                Err(e)
            }
        }
    }

    /// Relay a request to the task runner of an open context.
    pub async fn relay(&self, handle: &ContextHandle, request: TaskRequest) -> Result<(), ContextError> {
        debug!(context = %handle.id, request = request.label(), "Relaying task request");
        self.provider.send(handle.id, request).await
    }

    /// Stop tracking `context` without closing it. Returns whether it was
    /// the tracked one.
    pub async fn release(&self, context: ContextId) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.context() == Some(context) {
            *slot = Slot::Empty;
            true
        } else {
            false
        }
    }

    /// Close `context` at the provider, releasing it first if still tracked.
    pub async fn close(&self, context: ContextId) -> Result<(), ContextError> {
        self.release(context).await;
        self.provider.close(context).await?;
        debug!(context = %context, "Worker context closed");
        Ok(())
    }

    /// The tracked context, if any.
    pub async fn active(&self) -> Option<ContextId> {
        self.slot.lock().await.context()
    }
}
