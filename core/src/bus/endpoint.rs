use super::registry::{self, next_id, PublisherId, PublisherLink, SlotKey, SubscriberId};
use super::sender;
use crate::context::Context;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// A type that can receive signal deliveries.
///
/// Implementors embed an [`Endpoint`], which fixes the context their slots run in and carries their
/// side of the connection registry.
pub trait Subscriber: Send + Sync + 'static {
    fn endpoint(&self) -> &Endpoint;
}

/// Subscriber-side registration handle.
///
/// Dropping the endpoint (normally together with the object that embeds it) removes every
/// connection that targets it.
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

impl Endpoint {
    /// Creates an endpoint whose slots run in `context`.
    pub fn new(context: &Context) -> Self {
        Endpoint {
            shared: Arc::new(EndpointShared {
                id: SubscriberId(next_id()),
                context: context.clone(),
                links: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.shared.id
    }

    /// The context this subscriber's slots are dispatched to.
    pub fn context(&self) -> &Context {
        &self.shared.context
    }

    /// Returns the publisher currently delivering to this subscriber on the calling thread.
    ///
    /// Only meaningful from inside a slot; returns `None` elsewhere.
    pub fn signal_sender(&self) -> Option<PublisherId> {
        sender::current_sender(self.shared.id)
    }

    /// Number of distinct publishers with at least one edge to this subscriber.
    pub fn publisher_count(&self) -> usize {
        self.shared.publishers().len()
    }

    /// Removes every edge to this subscriber.
    pub fn disconnect_all(&self) {
        registry::detach_subscriber(&self.shared, None);
    }

    /// Removes every edge to this subscriber that uses `slot`.
    pub fn disconnect_slot<S, A>(&self, slot: fn(&S, A)) {
        registry::detach_subscriber(&self.shared, Some(SlotKey::of(slot)));
    }

    pub(crate) fn shared(&self) -> &Arc<EndpointShared> {
        &self.shared
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        registry::detach_subscriber(&self.shared, None);
    }
}

struct PublisherRef {
    id: PublisherId,
    link: Weak<dyn PublisherLink>,
}

/// The subscriber's local table: slot → publishers it is connected to through that slot.
#[doc(hidden)]
pub struct EndpointShared {
    id: SubscriberId,
    context: Context,
    links: Mutex<HashMap<SlotKey, Vec<PublisherRef>>>,
}

impl EndpointShared {
    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SlotKey, Vec<PublisherRef>>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, slot: SlotKey, id: PublisherId, link: Weak<dyn PublisherLink>) {
        self.lock()
            .entry(slot)
            .or_default()
            .push(PublisherRef { id, link });
    }

    pub(crate) fn detach_local(&self, slot: Option<SlotKey>, publisher: Option<PublisherId>) {
        let mut links = self.lock();
        match (slot, publisher) {
            (None, None) => links.clear(),
            (Some(slot), None) => {
                links.remove(&slot);
            }
            (None, Some(publisher)) => {
                for publishers in links.values_mut() {
                    publishers.retain(|p| p.id != publisher);
                }
                links.retain(|_, publishers| !publishers.is_empty());
            }
            (Some(slot), Some(publisher)) => {
                if let Some(publishers) = links.get_mut(&slot) {
                    publishers.retain(|p| p.id != publisher);
                    if publishers.is_empty() {
                        links.remove(&slot);
                    }
                }
            }
        }
    }

    /// Distinct publishers across all slots.
    pub(crate) fn publishers(&self) -> Vec<Weak<dyn PublisherLink>> {
        let links = self.lock();
        let mut seen = Vec::new();
        let mut publishers = Vec::new();
        for p in links.values().flatten() {
            if !seen.contains(&p.id) {
                seen.push(p.id);
                publishers.push(Weak::clone(&p.link));
            }
        }
        publishers
    }
}
