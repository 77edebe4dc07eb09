use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Debounces lookups per client and lets a newer lookup supersede an older one.
///
/// Each call first waits out the debounce delay. A later call with the same
/// key cancels the earlier one, whether it is still waiting or already
/// fetching; the cancelled call resolves to `None`.
#[derive(Clone)]
pub struct SearchGate {
    debounce: Duration,
    inflight: Arc<Mutex<Inflight>>,
    next_ticket: Arc<AtomicU64>,
}

type Inflight = HashMap<String, (u64, CancellationToken)>;

fn lock(inflight: &Mutex<Inflight>) -> MutexGuard<'_, Inflight> {
    inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears a call's slot when the call finishes or its future is dropped,
/// unless a newer call has already taken the slot over.
struct Slot<'a> {
    inflight: &'a Mutex<Inflight>,
    key: &'a str,
    ticket: u64,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut guard = lock(self.inflight);
        if guard.get(self.key).is_some_and(|(t, _)| *t == self.ticket) {
            guard.remove(self.key);
        }
    }
}

impl SearchGate {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run<F, T>(&self, key: &str, fetch: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = lock(&self.inflight).insert(key.to_string(), (ticket, token.clone()));
        if let Some((_, previous)) = previous {
            debug!("Superseding pending search for {}", key);
            previous.cancel();
        }
        let _slot = Slot {
            inflight: &self.inflight,
            key,
            ticket,
        };

        tokio::select! {
            _ = token.cancelled() => None,
            res = async {
                tokio::time::sleep(self.debounce).await;
                fetch.await
            } => Some(res),
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        lock(&self.inflight).len()
    }
}
