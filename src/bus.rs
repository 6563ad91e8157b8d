//! Single-topic publish/subscribe with optional replay of the last value
//!
//! The bus delivers synchronously: `publish` invokes every subscriber before
//! returning, in subscription order. A replay-enabled bus hands the most
//! recent value to new subscribers inside `subscribe`, ahead of any later
//! publication. No lock is held while subscriber callbacks run, so a
//! callback may publish or subscribe again.

use std::sync::{Arc, Mutex};

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies a subscription for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct BusState<T> {
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
    last: Option<T>,
    next_id: u64,
}

pub struct EventBus<T> {
    replay_last: bool,
    state: Mutex<BusState<T>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(replay_last: bool) -> Self {
        Self {
            replay_last,
            state: Mutex::new(BusState {
                subscribers: Vec::new(),
                last: None,
                next_id: 0,
            }),
        }
    }

    /// Register a subscriber. Replay-enabled buses deliver the last
    /// published value (if any) before this returns.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let f: Subscriber<T> = Arc::new(f);
        let (id, replay) = {
            let mut state = self.state.lock().unwrap();
            let id = SubscriptionId(state.next_id);
            state.next_id += 1;
            let replay = if self.replay_last {
                state.last.clone()
            } else {
                None
            };
            state.subscribers.push((id, f.clone()));
            (id, replay)
        };

        if let Some(value) = replay {
            f(&value);
        }

        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(sid, _)| *sid != id);
    }

    /// Publish a value to every subscriber, in subscription order.
    pub fn publish(&self, value: T) {
        let subscribers: Vec<Subscriber<T>> = {
            let mut state = self.state.lock().unwrap();
            state.last = Some(value.clone());
            state.subscribers.iter().map(|(_, f)| f.clone()).collect()
        };
        for f in subscribers {
            f(&value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    /// Last published value, if any.
    pub fn last(&self) -> Option<T> {
        self.state.lock().unwrap().last.clone()
    }
}
