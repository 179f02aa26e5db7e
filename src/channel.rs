//! Overwrite-on-full message passing between acquisition, the session tick
//! and the game consumer.
//!
//! Built on bounded `crossbeam-channel` queues. A writer that finds its queue
//! full evicts the oldest item through its own receiver handle and retries,
//! so producers never stall on a slow consumer.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation signal shared between threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the token can guard a new phase.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Writing half of a bounded overwrite-on-full queue.
pub struct OverwriteSender<T> {
    sender: Sender<T>,
    evictor: Receiver<T>,
    overwritten: Arc<AtomicU64>,
}

/// Reading half of a bounded overwrite-on-full queue.
pub struct OverwriteReceiver<T> {
    receiver: Receiver<T>,
    overwritten: Arc<AtomicU64>,
}

/// Create a queue holding at most `capacity` items; pushing to a full queue
/// drops the oldest item.
pub fn overwrite_buffer<T>(capacity: usize) -> (OverwriteSender<T>, OverwriteReceiver<T>) {
    let (sender, receiver) = bounded(capacity.max(1));
    let overwritten = Arc::new(AtomicU64::new(0));
    (
        OverwriteSender {
            sender,
            evictor: receiver.clone(),
            overwritten: overwritten.clone(),
        },
        OverwriteReceiver {
            receiver,
            overwritten,
        },
    )
}

impl<T> OverwriteSender<T> {
    /// Push an item, evicting the oldest one when full.
    pub fn push(&self, mut item: T) {
        loop {
            match self.sender.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.evictor.try_recv().is_ok() {
                        self.overwritten.fetch_add(1, Ordering::Relaxed);
                    }
                    item = back;
                }
                // The sender holds its own receiver, so the queue cannot close.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl<T> OverwriteReceiver<T> {
    /// Take everything currently queued, oldest first, without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Wait at most `timeout` for the next item.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Number of items dropped to make room for newer ones.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Single-writer half of the latest-value slot.
pub struct SlotWriter<T> {
    inner: OverwriteSender<T>,
}

/// Single-reader half of the latest-value slot.
///
/// Late readers see only the newest value, never a backlog.
pub struct SlotReader<T> {
    receiver: Receiver<T>,
    latest: Option<T>,
}

/// Create a slot that holds only the most recently published value.
pub fn latest_slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let (inner, reader) = overwrite_buffer(1);
    (
        SlotWriter { inner },
        SlotReader {
            receiver: reader.receiver,
            latest: None,
        },
    )
}

impl<T> SlotWriter<T> {
    /// Replace the slot contents.
    pub fn publish(&self, value: T) {
        self.inner.push(value);
    }
}

impl<T: Clone> SlotReader<T> {
    /// The newest published value, if anything was ever published.
    pub fn latest(&mut self) -> Option<T> {
        self.refresh();
        self.latest.clone()
    }

    /// Take a value published since the last call, if any.
    pub fn take_fresh(&mut self) -> Option<T> {
        let fresh = self.receiver.try_iter().last();
        if let Some(ref value) = fresh {
            self.latest = Some(value.clone());
        }
        fresh
    }

    /// Wait up to `timeout` for a fresh value.
    pub fn wait_fresh(&mut self, timeout: Duration) -> Option<T> {
        if let Some(value) = self.take_fresh() {
            return Some(value);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => {
                self.latest = Some(value.clone());
                Some(value)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn refresh(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => self.latest = Some(value),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_keeps_newest() {
        let (tx, rx) = overwrite_buffer(3);
        for i in 0..10 {
            tx.push(i);
        }
        assert_eq!(rx.drain(), vec![7, 8, 9]);
        assert_eq!(rx.overwritten(), 7);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_slot_sees_only_latest() {
        let (writer, mut reader) = latest_slot();
        assert_eq!(reader.latest(), None);

        writer.publish(1);
        writer.publish(2);
        writer.publish(3);

        assert_eq!(reader.latest(), Some(3));
        // Value persists for late readers.
        assert_eq!(reader.latest(), Some(3));
        assert_eq!(reader.take_fresh(), None);

        writer.publish(4);
        assert_eq!(reader.take_fresh(), Some(4));
    }

    #[test]
    fn test_slot_across_threads() {
        let (writer, mut reader) = latest_slot();
        let handle = std::thread::spawn(move || {
            for i in 0..1000u32 {
                writer.publish(i);
            }
        });
        handle.join().unwrap();
        assert_eq!(reader.latest(), Some(999));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
