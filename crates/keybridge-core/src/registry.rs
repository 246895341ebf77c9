use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

/// Live bridge workers keyed by forwarded port.
pub struct WorkerRegistry {
    workers: DashMap<u16, Instant>,
    active: watch::Sender<usize>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            workers: DashMap::new(),
            active,
        }
    }

    /// Returns `false` if a worker is already registered for `port`.
    pub fn register(&self, port: u16) -> bool {
        let inserted = match self.workers.entry(port) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        };
        if inserted {
            self.publish();
        }
        inserted
    }

    /// Removes the worker for `port`, returning how long it ran.
    pub fn remove(&self, port: u16) -> Option<Duration> {
        let removed = self
            .workers
            .remove(&port)
            .map(|(_, started)| started.elapsed());
        self.publish();
        removed
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.workers.iter().map(|entry| *entry.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Resolves once no workers are registered.
    pub async fn wait_idle(&self) {
        let mut active = self.active.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
    }

    // The count is read under the channel's lock so the last publisher
    // always leaves the current size behind.
    fn publish(&self) {
        self.active.send_modify(|count| *count = self.workers.len());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn register_rejects_duplicate_ports() {
        let registry = WorkerRegistry::new();
        assert!(registry.register(2222));
        assert!(!registry.register(2222));
        assert!(registry.register(2223));
        assert_eq!(registry.ports(), vec![2222, 2223]);

        assert!(registry.remove(2222).is_some());
        assert!(registry.remove(2222).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_last_removal() {
        let registry = Arc::new(WorkerRegistry::new());
        registry.wait_idle().await;

        registry.register(1);
        registry.register(2);
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_idle().await })
        };

        registry.remove(1);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.remove(2);
        waiter.await.unwrap();
        assert!(registry.is_empty());
    }
}
