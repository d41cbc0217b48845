use super::endpoint::{Endpoint, EndpointShared, Subscriber};
use super::registry::{
    self, next_id, registry_lock, Publisher, PublisherId, PublisherLink, SlotKey, SubscriberId,
};
use super::sender::SenderFrame;
use crate::context::Context;
use crate::dispatch::{dispatch, DispatchError, DispatchMode};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;

type Deliver<A> = Arc<dyn Fn(A) -> Result<(), DispatchError> + Send + Sync>;

struct Connection<A> {
    slot: SlotKey,
    mode: DispatchMode,
    deliver: Deliver<A>,
}

struct SubscriberEntry<A> {
    endpoint: Weak<EndpointShared>,
    connections: Vec<Connection<A>>,
}

/// The publisher's local table: subscriber → connections, both in registration order.
struct SignalShared<A> {
    id: PublisherId,
    subscribers: Mutex<IndexMap<SubscriberId, SubscriberEntry<A>>>,
}

impl<A> SignalShared<A> {
    fn lock(&self) -> MutexGuard<'_, IndexMap<SubscriberId, SubscriberEntry<A>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Send + 'static> PublisherLink for SignalShared<A> {
    fn id(&self) -> PublisherId {
        self.id
    }

    fn detach_local(&self, slot: Option<SlotKey>, subscriber: Option<SubscriberId>) {
        let mut subscribers = self.lock();
        match (slot, subscriber) {
            (None, None) => subscribers.clear(),
            (None, Some(subscriber)) => {
                subscribers.shift_remove(&subscriber);
            }
            (Some(slot), Some(subscriber)) => {
                if let Some(entry) = subscribers.get_mut(&subscriber) {
                    entry.connections.retain(|c| c.slot != slot);
                    if entry.connections.is_empty() {
                        subscribers.shift_remove(&subscriber);
                    }
                }
            }
            (Some(slot), None) => {
                for entry in subscribers.values_mut() {
                    entry.connections.retain(|c| c.slot != slot);
                }
                subscribers.retain(|_, entry| !entry.connections.is_empty());
            }
        }
    }

    fn subscribers(&self) -> Vec<Weak<EndpointShared>> {
        self.lock()
            .values()
            .map(|entry| Weak::clone(&entry.endpoint))
            .collect()
    }
}

/// A typed publisher.
///
/// Subscribers are connected through a slot function `fn(&S, A)` and a [`DispatchMode`]. Invoking
/// the signal dispatches one callable per connection into the subscriber's context. A signal is
/// itself a [`Subscriber`] living in the context it was created with, so signals can be chained by
/// connecting [`Signal::relay`].
///
/// Dropping a signal removes all of its connections.
pub struct Signal<A: Send + 'static> {
    shared: Arc<SignalShared<A>>,
    endpoint: Endpoint,
}

impl<A: Send + 'static> Signal<A> {
    /// Creates a signal. `context` is only used when the signal is subscribed to another signal.
    pub fn new(context: &Context) -> Self {
        Signal {
            shared: Arc::new(SignalShared {
                id: PublisherId(next_id()),
                subscribers: Mutex::new(IndexMap::new()),
            }),
            endpoint: Endpoint::new(context),
        }
    }

    pub fn id(&self) -> PublisherId {
        self.shared.id
    }

    /// Connects `slot` on `subscriber`.
    ///
    /// Returns `false`, changing nothing, when this (subscriber, slot) edge already exists. The
    /// connection holds only a weak reference to the subscriber.
    pub fn connect<S: Subscriber>(
        &self,
        subscriber: &Arc<S>,
        slot: fn(&S, A),
        mode: DispatchMode,
    ) -> bool {
        let key = SlotKey::of(slot);
        let endpoint = subscriber.endpoint();
        let subscriber_id = endpoint.id();

        let _global = registry_lock();
        {
            let mut subscribers = self.shared.lock();
            let entry = subscribers
                .entry(subscriber_id)
                .or_insert_with(|| SubscriberEntry {
                    endpoint: Arc::downgrade(endpoint.shared()),
                    connections: Vec::new(),
                });
            if entry.connections.iter().any(|c| c.slot == key) {
                return false;
            }
            entry.connections.push(Connection {
                slot: key,
                mode,
                deliver: delivery(self.shared.id, subscriber, slot, mode),
            });
        }
        let weak = Arc::downgrade(&self.shared);
        let link: Weak<dyn PublisherLink> = weak;
        endpoint.shared().register(key, self.shared.id, link);
        log::trace!(
            "Connected {} -> {} ({}) in {}",
            self.shared.id,
            subscriber_id,
            mode,
            endpoint.context()
        );
        true
    }

    /// Dispatches `args` to every connection, subscribers in the order they first connected and
    /// each subscriber's slots in the order they were connected.
    ///
    /// Each connection gets its own copy of `args`. Only `BlockingQueued` connections make the
    /// caller wait. Returns the number of connections dispatched; deliveries to stopped contexts
    /// are skipped.
    pub fn invoke(&self, args: A) -> usize
    where
        A: Clone,
    {
        let targets: Vec<(SubscriberId, DispatchMode, Deliver<A>)> = self
            .shared
            .lock()
            .iter()
            .flat_map(|(id, entry)| {
                entry
                    .connections
                    .iter()
                    .map(move |c| (*id, c.mode, Arc::clone(&c.deliver)))
            })
            .collect();

        let Some(((last_id, last_mode, last), rest)) = targets.split_last() else {
            return 0;
        };
        let mut dispatched = 0;
        for (id, mode, deliver) in rest {
            dispatched += self.tally(*id, *mode, deliver(args.clone()));
        }
        dispatched + self.tally(*last_id, *last_mode, last(args))
    }

    /// Slot that re-publishes its argument on this signal.
    pub fn relay(&self, args: A)
    where
        A: Clone,
    {
        self.invoke(args);
    }

    fn tally(
        &self,
        subscriber: SubscriberId,
        mode: DispatchMode,
        result: Result<(), DispatchError>,
    ) -> usize {
        match result {
            Ok(()) => 1,
            Err(e) => {
                log::debug!(
                    "Skipped {} delivery from {} to {}: {}",
                    mode,
                    self.shared.id,
                    subscriber,
                    e
                );
                0
            }
        }
    }

    /// Removes every connection of this signal.
    pub fn disconnect_all(&self) {
        registry::detach_publisher(self.shared.as_ref(), None);
    }

    /// Removes every connection of this signal that uses `slot`.
    pub fn disconnect_slot<S>(&self, slot: fn(&S, A)) {
        registry::detach_publisher(self.shared.as_ref(), Some(SlotKey::of(slot)));
    }

    /// Removes every connection between this signal and `subscriber`.
    pub fn disconnect_subscriber(&self, subscriber: &Endpoint) {
        registry::detach_edge(self.shared.as_ref(), subscriber.shared(), None);
    }

    /// Number of subscribers with at least one connection.
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.shared
            .lock()
            .values()
            .map(|entry| entry.connections.len())
            .sum()
    }
}

impl<A: Send + 'static> Publisher for Signal<A> {
    fn publisher_id(&self) -> PublisherId {
        self.shared.id
    }

    fn link(&self) -> Arc<dyn PublisherLink> {
        Arc::clone(&self.shared) as Arc<dyn PublisherLink>
    }
}

impl<A: Send + 'static> Subscriber for Signal<A> {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl<A: Send + 'static> Drop for Signal<A> {
    fn drop(&mut self) {
        registry::detach_publisher(self.shared.as_ref(), None);
    }
}

/// Builds the callable stored in a connection. It holds the subscriber weakly and pushes a sender
/// frame around the slot call.
fn delivery<S, A>(
    publisher: PublisherId,
    subscriber: &Arc<S>,
    slot: fn(&S, A),
    mode: DispatchMode,
) -> Deliver<A>
where
    S: Subscriber,
    A: Send + 'static,
{
    let context = subscriber.endpoint().context().clone();
    let subscriber_id = subscriber.endpoint().id();
    let target = Arc::downgrade(subscriber);
    Arc::new(move |args: A| {
        let target = Weak::clone(&target);
        dispatch(&context, mode, move || {
            if let Some(target) = target.upgrade() {
                let _frame = SenderFrame::enter(subscriber_id, publisher);
                slot(&target, args);
            }
        })
    })
}
