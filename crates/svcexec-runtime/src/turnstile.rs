//! Per-session turnstiles
//!
//! Executors that run each readiness wait on its own thread use a ticket
//! lock per session to keep callbacks in registration order. Tickets are
//! taken on the registering thread; the thread holding ticket `n` waits
//! until `n` is served, and serving advances when its `Turn` drops.
//!
//! Lock order: the map, then a lane.

use crate::locks::{lock, wait};
use svcexec_core::session::SessionId;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex};

struct LaneState {
    next_ticket: u64,
    serving: u64,
    /// Tickets dropped before their turn came up
    abandoned: BTreeSet<u64>,
}

struct Lane {
    state: Mutex<LaneState>,
    turn: Condvar,
}

#[derive(Default)]
pub(crate) struct SessionTurnstiles {
    lanes: Mutex<HashMap<SessionId, Arc<Lane>>>,
}

impl SessionTurnstiles {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket for `id`. Never blocks on other turns.
    pub(crate) fn enter(self: &Arc<Self>, id: SessionId) -> Turn {
        let mut lanes = lock(&self.lanes);
        let lane = lanes
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Lane {
                    state: Mutex::new(LaneState {
                        next_ticket: 0,
                        serving: 0,
                        abandoned: BTreeSet::new(),
                    }),
                    turn: Condvar::new(),
                })
            })
            .clone();
        let ticket = {
            let mut s = lock(&lane.state);
            let t = s.next_ticket;
            s.next_ticket += 1;
            t
        };
        Turn {
            owner: Arc::clone(self),
            id,
            lane,
            ticket,
        }
    }

    /// Sessions with outstanding tickets
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        lock(&self.lanes).len()
    }
}

/// One ticket in a session's turnstile
pub(crate) struct Turn {
    owner: Arc<SessionTurnstiles>,
    id: SessionId,
    lane: Arc<Lane>,
    ticket: u64,
}

impl Turn {
    /// Block until every earlier ticket for this session has been released
    pub(crate) fn wait(&self) {
        let mut s = lock(&self.lane.state);
        while s.serving != self.ticket {
            s = wait(&self.lane.turn, s);
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut lanes = lock(&self.owner.lanes);
        let mut guard = lock(&self.lane.state);
        let s = &mut *guard;
        if s.serving == self.ticket {
            s.serving += 1;
            while s.abandoned.remove(&s.serving) {
                s.serving += 1;
            }
            self.lane.turn.notify_all();
        } else {
            s.abandoned.insert(self.ticket);
        }
        if s.serving == s.next_ticket {
            lanes.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_turns_in_ticket_order() {
        let ts = Arc::new(SessionTurnstiles::new());
        let id = SessionId::next();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        // Take tickets on this thread, then start threads in reverse order.
        let turns: Vec<Turn> = (0..4).map(|_| ts.enter(id)).collect();
        for (i, turn) in turns.into_iter().enumerate().rev() {
            let order = order.clone();
            handles.push(thread::spawn(move || {
                turn.wait();
                order.lock().unwrap().push(i);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(ts.active(), 0);
    }

    #[test]
    fn test_sessions_independent() {
        let ts = Arc::new(SessionTurnstiles::new());
        let a = ts.enter(SessionId::next());
        let b = ts.enter(SessionId::next());
        a.wait();
        b.wait();
        assert_eq!(ts.active(), 2);
        drop(a);
        drop(b);
        assert_eq!(ts.active(), 0);
    }

    #[test]
    fn test_abandoned_ticket_is_skipped() {
        let ts = Arc::new(SessionTurnstiles::new());
        let id = SessionId::next();
        let first = ts.enter(id);
        let second = ts.enter(id);
        let third = ts.enter(id);

        drop(second);
        let (tx, rx) = mpsc::channel();
        let h = thread::spawn(move || {
            third.wait();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        first.wait();
        drop(first);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        h.join().unwrap();
        assert_eq!(ts.active(), 0);
    }
}
