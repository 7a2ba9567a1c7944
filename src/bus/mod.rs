use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::reporter::spec::{Measurements, Metadata};

/// One named event with its measurement and metadata payloads.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: Arc<str>,
    pub measurements: Measurements,
    pub metadata: Metadata,
}

impl Event {
    pub fn new(name: &str, measurements: Measurements, metadata: Metadata) -> Self {
        Self {
            name: Arc::from(name),
            measurements,
            metadata,
        }
    }
}

/// In-process pub/sub bus fanning events out by name.
///
/// Producers on any thread publish synchronously; each subscriber funnels
/// all of its names into one bounded channel consumed by a single task.
/// Delivery is best-effort `try_send`: a full subscriber channel drops the
/// event for that subscriber and counts it.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<Arc<str>, Vec<Registration>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

struct Registration {
    id: u64,
    tx: mpsc::Sender<Event>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one subscriber for the given event names. All matching
    /// events arrive on the returned receiver; dropping the guard removes
    /// every registration it made.
    pub fn subscribe(
        &self,
        names: &[Arc<str>],
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.inner.topics.write();
        let mut subscribed = Vec::with_capacity(names.len());
        for name in names {
            let regs = topics.entry(Arc::clone(name)).or_default();
            if regs.iter().any(|r| r.id == id) {
                continue;
            }
            regs.push(Registration { id, tx: tx.clone() });
            subscribed.push(Arc::clone(name));
        }

        let subscription = Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            names: subscribed,
        };
        (subscription, rx)
    }

    /// Publishes one event to every subscriber of its name. Returns how
    /// many subscriber channels accepted it.
    pub fn publish(&self, event: Event) -> usize {
        let topics = self.inner.topics.read();
        let Some(regs) = topics.get(&event.name) else {
            return 0;
        };

        let mut delivered = 0;
        for reg in regs {
            match reg.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(event = %event.name, dropped, "subscriber channel full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Total events dropped on full subscriber channels since startup.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn unsubscribe(inner: &BusInner, id: u64, names: &[Arc<str>]) {
        let mut topics = inner.topics.write();
        for name in names {
            if let Some(regs) = topics.get_mut(name) {
                regs.retain(|r| r.id != id);
                if regs.is_empty() {
                    topics.remove(name);
                }
            }
        }
    }
}

/// RAII guard over one subscriber's registrations. Dropping it removes them
/// from the bus, so teardown happens on every exit path of the consumer.
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
    names: Vec<Arc<str>>,
}

impl Subscription {
    /// Event names covered by this subscription.
    pub fn names(&self) -> &[Arc<str>] {
        &self.names
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            Bus::unsubscribe(&inner, self.id, &self.names);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> Event {
        Event::new(name, Measurements::new(), Metadata::new())
    }

    fn names(list: &[&str]) -> Vec<Arc<str>> {
        list.iter().map(|s| Arc::from(*s)).collect()
    }

    #[test]
    fn events_reach_matching_subscriber() {
        let bus = Bus::new();
        let (_sub, mut rx) = bus.subscribe(&names(&["a.b", "c.d"]), 8);

        assert_eq!(bus.publish(event("a.b")), 1);
        assert_eq!(bus.publish(event("c.d")), 1);
        assert_eq!(bus.publish(event("x.y")), 0);

        assert_eq!(rx.try_recv().unwrap().name.as_ref(), "a.b");
        assert_eq!(rx.try_recv().unwrap().name.as_ref(), "c.d");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_of_a_name_receives() {
        let bus = Bus::new();
        let (_sub_a, mut rx_a) = bus.subscribe(&names(&["a.b"]), 8);
        let (_sub_b, mut rx_b) = bus.subscribe(&names(&["a.b"]), 8);

        assert_eq!(bus.publish(event("a.b")), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn duplicate_names_register_once() {
        let bus = Bus::new();
        let (_sub, mut rx) = bus.subscribe(&names(&["a.b", "a.b"]), 8);

        assert_eq!(bus.publish(event("a.b")), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropping_the_guard_unsubscribes() {
        let bus = Bus::new();
        let (sub, _rx) = bus.subscribe(&names(&["a.b"]), 8);
        assert_eq!(sub.names().len(), 1);

        drop(sub);
        assert_eq!(bus.publish(event("a.b")), 0);
    }

    #[test]
    fn full_subscriber_channel_drops_events() {
        let bus = Bus::new();
        let (_sub, mut rx) = bus.subscribe(&names(&["a.b"]), 1);

        assert_eq!(bus.publish(event("a.b")), 1);
        assert_eq!(bus.publish(event("a.b")), 0);
        assert_eq!(bus.dropped(), 1);

        // The consumer still sees the first event.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
