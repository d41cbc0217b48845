//! The process-wide side of the connection registry.
//!
//! Every mutation of a connection, whether registration or teardown, takes [`REGISTRY_LOCK`] before
//! touching any publisher's or subscriber's local table, and takes those local locks one at a time.
//! Keeping to this order on every path is what makes concurrent connect, disconnect and drop of
//! publishers and subscribers deadlock-free.

use super::endpoint::{Endpoint, EndpointShared};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

lazy_static! {
    static ref REGISTRY_LOCK: Mutex<()> = Mutex::new(());
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn registry_lock() -> MutexGuard<'static, ()> {
    REGISTRY_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity of a publisher, as reported by [`Endpoint::signal_sender`].
#[derive(Debug, Copy, Clone, Hash, Ord, Eq, PartialEq, PartialOrd)]
pub struct PublisherId(pub(crate) u64);

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Identity of a subscriber endpoint.
#[derive(Debug, Copy, Clone, Hash, Ord, Eq, PartialEq, PartialOrd)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Identity of a slot function.
///
/// Two connections are the same edge when they join the same subscriber to the same slot
/// function. Slots with identical bodies may be merged by the compiler and then share a key.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct SlotKey(usize);

impl SlotKey {
    pub fn of<S, A>(slot: fn(&S, A)) -> Self {
        SlotKey(slot as usize)
    }
}

/// Anything that can appear on the publisher side of a [`disconnect`].
pub trait Publisher: Send + Sync {
    fn publisher_id(&self) -> PublisherId;

    #[doc(hidden)]
    fn link(&self) -> Arc<dyn PublisherLink>;
}

/// The publisher's local table, as seen by the registry.
#[doc(hidden)]
pub trait PublisherLink: Send + Sync {
    fn id(&self) -> PublisherId;

    /// Removes local edges matching `slot` (all when `None`) towards `subscriber` (every
    /// subscriber when `None`). Caller holds the registry lock.
    fn detach_local(&self, slot: Option<SlotKey>, subscriber: Option<SubscriberId>);

    /// Subscribers this publisher currently has at least one edge to.
    fn subscribers(&self) -> Vec<Weak<EndpointShared>>;
}

/// Removes connections.
///
/// `None` is a wildcard in each position, but at least one of `publisher` and `subscriber` must be
/// given; otherwise this is a no-op.
///
/// - publisher and subscriber: removes the edges between them matching `slot` (all edges when
///   `slot` is `None`);
/// - subscriber only: removes that subscriber's edges matching `slot` across all publishers;
/// - publisher only: removes that publisher's edges matching `slot` across all subscribers.
///
/// Removing an edge that does not exist is a no-op. Callables already dispatched through an edge
/// are not retracted.
pub fn disconnect(
    slot: Option<SlotKey>,
    publisher: Option<&dyn Publisher>,
    subscriber: Option<&Endpoint>,
) {
    match (publisher, subscriber) {
        (Some(publisher), Some(subscriber)) => {
            detach_edge(publisher.link().as_ref(), subscriber.shared(), slot)
        }
        (None, Some(subscriber)) => detach_subscriber(subscriber.shared(), slot),
        (Some(publisher), None) => detach_publisher(publisher.link().as_ref(), slot),
        (None, None) => {}
    }
}

pub(crate) fn detach_edge(publisher: &dyn PublisherLink, subscriber: &EndpointShared, slot: Option<SlotKey>) {
    let _global = registry_lock();
    publisher.detach_local(slot, Some(subscriber.id()));
    subscriber.detach_local(slot, Some(publisher.id()));
}

pub(crate) fn detach_subscriber(subscriber: &EndpointShared, slot: Option<SlotKey>) {
    let _global = registry_lock();
    for publisher in subscriber.publishers() {
        if let Some(publisher) = publisher.upgrade() {
            publisher.detach_local(slot, Some(subscriber.id()));
        }
    }
    subscriber.detach_local(slot, None);
}

pub(crate) fn detach_publisher(publisher: &dyn PublisherLink, slot: Option<SlotKey>) {
    let _global = registry_lock();
    for subscriber in publisher.subscribers() {
        if let Some(subscriber) = subscriber.upgrade() {
            subscriber.detach_local(slot, Some(publisher.id()));
        }
    }
    publisher.detach_local(slot, None);
}
