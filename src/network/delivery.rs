//! Immediate or deferred event delivery
//!
//! In deferred mode events are parked on a crossbeam channel and handed to
//! the application only when it calls `tick()`.

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::config::Delivery;

pub(crate) struct Dispatcher<E> {
    mode: Delivery,
    tx: Sender<E>,
    rx: Receiver<E>,
}

impl<E> Dispatcher<E> {
    pub(crate) fn new(mode: Delivery) -> Self {
        let (tx, rx) = unbounded();
        Self { mode, tx, rx }
    }

    /// Run `handle` now, or queue the event for the next drain
    pub(crate) fn deliver(&self, event: E, handle: impl FnOnce(E)) {
        match self.mode {
            Delivery::Immediate => handle(event),
            Delivery::Deferred => {
                // Both ends live in self, so the channel cannot be disconnected
                let _ = self.tx.send(event);
            }
        }
    }

    /// Hand every event queued before this call to `handle`, in order
    pub(crate) fn drain(&self, mut handle: impl FnMut(E)) -> usize {
        if self.mode == Delivery::Immediate {
            return 0;
        }

        let pending = self.rx.len();
        let mut delivered = 0;
        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(event) => {
                    handle(event);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }
        delivered
    }

    pub(crate) fn pending(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn mode(&self) -> Delivery {
        self.mode
    }
}
