//! A pool that matches pushed items to waiting consumers.
//!
//! Consumers either take items in FIFO order (`next`) or wait for the item
//! carrying a specific request id (`next_for`). The two modes cannot be
//! mixed on one pool. Waiters are resumed outside the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum PoolError {
    #[error("cannot mix FIFO and request-id waits on the same pool")]
    MixedWaitingModes,
    #[error("a waiter is already registered for request id {0}")]
    DuplicateRequestIdWait(String),
    #[error("next() called while another FIFO wait is pending")]
    NextCalledTwice,
    #[error("the pool was dropped while waiting")]
    Closed,
}

enum State<T> {
    Buffer(VecDeque<(String, T)>),
    WaitingForAny(oneshot::Sender<(String, T)>),
    WaitingForSpecific {
        waiters: HashMap<String, oneshot::Sender<T>>,
        buffer: VecDeque<(String, T)>,
    },
}

pub(crate) struct Pool<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            state: Arc::clone(&self.state),
        }
    }
}

enum Take<T> {
    Ready(T),
    Wait(oneshot::Receiver<T>),
}

impl<T: Send + 'static> Pool<T> {
    pub(crate) fn new() -> Pool<T> {
        Pool {
            state: Arc::new(Mutex::new(State::Buffer(VecDeque::new()))),
        }
    }

    /// Push an item, waking a matching waiter when one is registered.
    pub(crate) fn push(&self, id: String, item: T) {
        enum Wake<T> {
            Any(oneshot::Sender<(String, T)>),
            Specific(oneshot::Sender<T>),
        }

        let wake = {
            let mut state = self.state.lock().expect("pool lock poisoned");
            match &mut *state {
                State::Buffer(buffer) => {
                    buffer.push_back((id, item));
                    return;
                }
                State::WaitingForAny(_) => {
                    let State::WaitingForAny(tx) =
                        std::mem::replace(&mut *state, State::Buffer(VecDeque::new()))
                    else {
                        unreachable!()
                    };
                    Wake::Any(tx)
                }
                State::WaitingForSpecific { waiters, buffer } => match waiters.remove(&id) {
                    Some(tx) => {
                        if waiters.is_empty() {
                            let remaining = std::mem::take(buffer);
                            *state = State::Buffer(remaining);
                        }
                        Wake::Specific(tx)
                    }
                    None => {
                        buffer.push_back((id, item));
                        return;
                    }
                },
            }
        };

        // resume outside the lock; a cancelled waiter re-buffers the item
        match wake {
            Wake::Any(tx) => {
                if let Err((id, item)) = tx.send((id, item)) {
                    self.push(id, item);
                }
            }
            Wake::Specific(tx) => {
                if let Err(item) = tx.send(item) {
                    self.push(id, item);
                }
            }
        }
    }

    /// Take the oldest item, whatever its id.
    pub(crate) async fn next(&self) -> Result<(String, T), PoolError> {
        let take = {
            let mut state = self.state.lock().expect("pool lock poisoned");
            match &mut *state {
                State::Buffer(buffer) => match buffer.pop_front() {
                    Some(entry) => Take::Ready(entry),
                    None => {
                        let (tx, rx) = oneshot::channel();
                        *state = State::WaitingForAny(tx);
                        Take::Wait(rx)
                    }
                },
                State::WaitingForAny(tx) => {
                    if tx.is_closed() {
                        // the previous waiter went away, take its place
                        let (tx, rx) = oneshot::channel();
                        *state = State::WaitingForAny(tx);
                        Take::Wait(rx)
                    } else {
                        return Err(PoolError::NextCalledTwice);
                    }
                }
                State::WaitingForSpecific { waiters, buffer } => {
                    waiters.retain(|_, tx| !tx.is_closed());
                    if !waiters.is_empty() {
                        return Err(PoolError::MixedWaitingModes);
                    }
                    // every targeted waiter went away, fall back to FIFO
                    let mut buffer = std::mem::take(buffer);
                    match buffer.pop_front() {
                        Some(entry) => {
                            *state = State::Buffer(buffer);
                            Take::Ready(entry)
                        }
                        None => {
                            let (tx, rx) = oneshot::channel();
                            *state = State::WaitingForAny(tx);
                            Take::Wait(rx)
                        }
                    }
                }
            }
        };

        match take {
            Take::Ready(entry) => Ok(entry),
            Take::Wait(rx) => rx.await.map_err(|_| PoolError::Closed),
        }
    }

    /// Take the item pushed for `id`, waiting until it arrives.
    pub(crate) async fn next_for(&self, id: &str) -> Result<T, PoolError> {
        let take = {
            let mut state = self.state.lock().expect("pool lock poisoned");
            match &mut *state {
                State::Buffer(buffer) => {
                    match buffer.iter().position(|(buffered, _)| buffered == id) {
                        Some(index) => {
                            let (_, item) = buffer.remove(index).expect("position was just found");
                            Take::Ready(item)
                        }
                        None => {
                            let (tx, rx) = oneshot::channel();
                            let buffer = std::mem::take(buffer);
                            let mut waiters = HashMap::new();
                            waiters.insert(id.to_string(), tx);
                            *state = State::WaitingForSpecific { waiters, buffer };
                            Take::Wait(rx)
                        }
                    }
                }
                State::WaitingForAny(tx) if !tx.is_closed() => {
                    return Err(PoolError::MixedWaitingModes)
                }
                State::WaitingForAny(_) => {
                    let (tx, rx) = oneshot::channel();
                    let mut waiters = HashMap::new();
                    waiters.insert(id.to_string(), tx);
                    *state = State::WaitingForSpecific {
                        waiters,
                        buffer: VecDeque::new(),
                    };
                    Take::Wait(rx)
                }
                State::WaitingForSpecific { waiters, buffer } => {
                    waiters.retain(|_, tx| !tx.is_closed());
                    match buffer.iter().position(|(buffered, _)| buffered == id) {
                        Some(index) => {
                            let (_, item) = buffer.remove(index).expect("position was just found");
                            Take::Ready(item)
                        }
                        None => {
                            if waiters.contains_key(id) {
                                return Err(PoolError::DuplicateRequestIdWait(id.to_string()));
                            }
                            let (tx, rx) = oneshot::channel();
                            waiters.insert(id.to_string(), tx);
                            Take::Wait(rx)
                        }
                    }
                }
            }
        };

        match take {
            Take::Ready(item) => Ok(item),
            Take::Wait(rx) => rx.await.map_err(|_| PoolError::Closed),
        }
    }
}
