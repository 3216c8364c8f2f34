//-
// Copyright (c) 2026, The Tmpbox Authors
//
// This file is part of Tmpbox.
//
// Tmpbox is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Tmpbox is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Tmpbox. If not, see <http://www.gnu.org/licenses/>.

//! Fan-out of events to connected subscribers.
//!
//! Delivery is best effort. A subscriber which cannot keep up misses events;
//! nothing that broadcasts ever waits for a subscriber.

pub mod feed;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::store::model::Mail;
use crate::support::error::Error;

/// Event type sent when mail is stored.
pub const NEW_EMAIL: &str = "NEW_EMAIL";

/// How many events may be queued for one subscriber.
const SUBSCRIBER_QUEUE: usize = 16;

pub type SubscriberId = u64;

/// A serialised event, shared between all subscribers.
pub type EventText = Arc<str>;

#[derive(Serialize)]
struct Event<'a, T> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a T,
}

/// The payload of a `NEW_EMAIL` event.
#[derive(Serialize)]
pub struct NewEmail<'a> {
    pub mailbox_id: &'a str,
    pub email: &'a Mail,
}

pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<EventText>,
}

#[derive(Default)]
struct Registry {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::Sender<EventText>>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Notifier {
    registry: SharedRegistry,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(send_timeout: Duration) -> Self {
        Notifier {
            registry: Arc::default(),
            send_timeout,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, tx);
        Subscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        lock(&self.registry).subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Send `{"type": event_type, "data": payload}` to every subscriber.
    ///
    /// Within a tokio runtime, each subscriber is sent to on its own task and
    /// given `send_timeout` to make room for the event. Outside a runtime,
    /// subscribers with a full queue simply miss the event. Subscribers found
    /// to be gone are removed either way.
    ///
    /// Only a failure to serialise `payload` is reported.
    pub fn broadcast<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
    ) -> Result<(), Error> {
        let text: EventText = serde_json::to_string(&Event {
            event_type,
            data: payload,
        })?
        .into();

        let subscribers = lock(&self.registry)
            .subscribers
            .iter()
            .map(|(&id, tx)| (id, tx.clone()))
            .collect::<Vec<_>>();
        debug!(
            "Broadcasting {} to {} subscriber(s)",
            event_type,
            subscribers.len()
        );

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                for (id, tx) in subscribers {
                    let registry = Arc::clone(&self.registry);
                    let text = Arc::clone(&text);
                    let send_timeout = self.send_timeout;
                    runtime.spawn(async move {
                        match tokio::time::timeout(send_timeout, tx.send(text))
                            .await
                        {
                            Ok(Ok(())) => (),
                            Ok(Err(_)) => {
                                lock(&registry).subscribers.remove(&id);
                            },
                            Err(_) => {
                                warn!("Subscriber {} timed out; event dropped", id)
                            },
                        }
                    });
                }
            },

            Err(_) => {
                for (id, tx) in subscribers {
                    match tx.try_send(Arc::clone(&text)) {
                        Ok(()) => (),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Subscriber {} is full; event dropped", id)
                        },
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            self.unsubscribe(id);
                        },
                    }
                }
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn broadcast_without_runtime() {
        let notifier = Notifier::new(Duration::from_secs(1));
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_ne!(a.id, b.id);
        assert_eq!(2, notifier.subscriber_count());

        notifier.broadcast("PING", &json!({ "n": 1 })).unwrap();
        let received = a.events.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(json!({ "type": "PING", "data": { "n": 1 } }), parsed);
        assert_eq!(received, b.events.try_recv().unwrap());

        notifier.unsubscribe(a.id);
        notifier.broadcast("PING", &json!(null)).unwrap();
        assert!(a.events.try_recv().is_err());
        assert!(b.events.try_recv().is_ok());
    }

    #[test]
    fn closed_subscribers_are_removed() {
        let notifier = Notifier::new(Duration::from_secs(1));
        let keep = notifier.subscribe();
        drop(notifier.subscribe());
        assert_eq!(2, notifier.subscriber_count());

        notifier.broadcast("PING", &()).unwrap();
        assert_eq!(1, notifier.subscriber_count());
        drop(keep);
    }

    #[test]
    fn full_subscriber_misses_events() {
        let notifier = Notifier::new(Duration::from_secs(1));
        let mut sub = notifier.subscribe();
        for n in 0..SUBSCRIBER_QUEUE + 4 {
            notifier.broadcast("N", &n).unwrap();
        }

        let mut received = 0;
        while sub.events.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(SUBSCRIBER_QUEUE, received);
        assert_eq!(1, notifier.subscriber_count());
    }

    #[tokio::test]
    async fn broadcast_within_runtime() {
        let notifier = Notifier::new(Duration::from_millis(100));
        let mut sub = notifier.subscribe();
        notifier.broadcast("PING", &"x").unwrap();

        let received = sub.events.recv().await.unwrap();
        assert_eq!(r#"{"type":"PING","data":"x"}"#, &*received);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_broadcast() {
        let notifier = Notifier::new(Duration::from_millis(10));
        let mut slow = notifier.subscribe();
        for n in 0..SUBSCRIBER_QUEUE * 2 {
            // Returns immediately even though nobody is reading.
            notifier.broadcast("N", &n).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut received = 0;
        while slow.events.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(SUBSCRIBER_QUEUE, received);
    }
}
