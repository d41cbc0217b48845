//! Per-thread record of which publisher is delivering to which subscriber.

use super::registry::{PublisherId, SubscriberId};

use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static FRAMES: RefCell<Vec<(SubscriberId, PublisherId)>> = const { RefCell::new(Vec::new()) };
}

/// Marks `publisher` as the sender for `subscriber` on this thread until dropped.
///
/// Frames nest: a slot that invokes another signal pushes a second frame on top of its own.
pub(crate) struct SenderFrame {
    // Frames must be popped on the thread that pushed them.
    _not_send: PhantomData<*const ()>,
}

impl SenderFrame {
    pub(crate) fn enter(subscriber: SubscriberId, publisher: PublisherId) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push((subscriber, publisher)));
        SenderFrame {
            _not_send: PhantomData,
        }
    }
}

impl Drop for SenderFrame {
    fn drop(&mut self) {
        let _ = FRAMES.try_with(|frames| frames.borrow_mut().pop());
    }
}

/// Innermost publisher currently delivering to `subscriber` on this thread.
pub(crate) fn current_sender(subscriber: SubscriberId) -> Option<PublisherId> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .rev()
            .find(|(s, _)| *s == subscriber)
            .map(|(_, p)| *p)
    })
}

#[cfg(test)]
pub(crate) fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}
