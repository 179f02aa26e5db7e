//! Tick-side views of signal sources.
//!
//! A [`SampleFeed`] hands the session everything a channel acquired up to a
//! point in session time, without blocking. [`InlineFeed`] polls its source on
//! the caller's thread; [`ThreadedFeed`] runs the source on a dedicated
//! producer thread behind an overwrite-on-full buffer.

use crate::channel::{overwrite_buffer, CancelToken, OverwriteReceiver, OverwriteSender};
use crate::error::SensorError;
use crate::source::types::{Channel, RawSample, SignalSource};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Samples acquired since the previous pull, plus the most relevant fault.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedBatch {
    pub samples: Vec<RawSample>,
    pub fault: Option<SensorError>,
}

impl FeedBatch {
    fn record_fault(&mut self, fault: SensorError) {
        // A disconnect outranks a timeout.
        let keep_existing = matches!(self.fault, Some(ref f) if f.is_disconnect());
        if !keep_existing {
            self.fault = Some(fault);
        }
    }
}

/// Non-blocking, per-channel sample supply for the session tick.
pub trait SampleFeed: Send {
    fn channel(&self) -> Channel;

    /// Everything acquired with `timestamp <= until`.
    fn pull(&mut self, until: f64) -> FeedBatch;

    /// Attempt to re-establish the link. Returns within a bounded time.
    fn reconnect(&mut self) -> Result<(), SensorError>;

    /// Samples lost to buffer overflow.
    fn overwritten(&self) -> u64 {
        0
    }
}

impl<F: SampleFeed + ?Sized> SampleFeed for Box<F> {
    fn channel(&self) -> Channel {
        (**self).channel()
    }

    fn pull(&mut self, until: f64) -> FeedBatch {
        (**self).pull(until)
    }

    fn reconnect(&mut self) -> Result<(), SensorError> {
        (**self).reconnect()
    }

    fn overwritten(&self) -> u64 {
        (**self).overwritten()
    }
}

/// Polls the source directly on the tick thread.
///
/// Suited to sources that generate or replay samples on demand; reads use a
/// zero timeout so a pull never waits.
pub struct InlineFeed<S> {
    source: S,
    pending: Option<RawSample>,
}

impl<S: SignalSource> InlineFeed<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pending: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: SignalSource> SampleFeed for InlineFeed<S> {
    fn channel(&self) -> Channel {
        self.source.channel()
    }

    fn pull(&mut self, until: f64) -> FeedBatch {
        let mut batch = FeedBatch::default();
        loop {
            let sample = match self.pending.take() {
                Some(sample) => sample,
                None => match self.source.read(Duration::ZERO) {
                    Ok(sample) => sample,
                    Err(fault) => {
                        batch.record_fault(fault);
                        break;
                    }
                },
            };
            if sample.timestamp > until {
                self.pending = Some(sample);
                break;
            }
            batch.samples.push(sample);
        }
        batch
    }

    fn reconnect(&mut self) -> Result<(), SensorError> {
        self.source.reconnect()
    }
}

enum Command {
    Reconnect,
}

/// Runs a source on its own producer thread.
///
/// Samples travel through a bounded overwrite-on-full buffer, so a stalled
/// session never blocks acquisition; the oldest samples are dropped instead.
/// After a disconnect the producer stops reading until asked to reconnect.
pub struct ThreadedFeed {
    channel: Channel,
    receiver: OverwriteReceiver<Result<RawSample, SensorError>>,
    commands: Sender<Command>,
    acks: Receiver<Result<(), SensorError>>,
    pending: VecDeque<RawSample>,
    down: bool,
    reconnect_timeout: Duration,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl ThreadedFeed {
    /// Start the producer thread.
    ///
    /// `read_timeout` bounds every blocking read inside the producer and
    /// therefore how quickly the thread notices shutdown.
    pub fn spawn<S>(source: S, capacity: usize, read_timeout: Duration) -> Self
    where
        S: SignalSource + 'static,
    {
        let channel = source.channel();
        let (sender, receiver) = overwrite_buffer(capacity);
        let (command_tx, command_rx) = bounded(4);
        let (ack_tx, ack_rx) = bounded(4);
        let cancel = CancelToken::new();

        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name(format!("acquire-{channel}"))
            .spawn(move || produce(source, sender, command_rx, ack_tx, token, read_timeout));

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%channel, error = %e, "Failed to spawn acquisition thread");
                None
            }
        };

        Self {
            channel,
            receiver,
            commands: command_tx,
            acks: ack_rx,
            pending: VecDeque::new(),
            down: handle.is_none(),
            reconnect_timeout: read_timeout * 4,
            cancel,
            handle,
        }
    }

    /// Stop the producer and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn produce<S: SignalSource>(
    mut source: S,
    sender: OverwriteSender<Result<RawSample, SensorError>>,
    commands: Receiver<Command>,
    acks: Sender<Result<(), SensorError>>,
    cancel: CancelToken,
    read_timeout: Duration,
) {
    let channel = source.channel();
    let mut down = false;
    debug!(%channel, "Acquisition thread started");

    while !cancel.is_cancelled() {
        if down {
            match commands.recv_timeout(read_timeout) {
                Ok(Command::Reconnect) => {
                    let result = source.reconnect();
                    down = result.is_err();
                    debug!(%channel, ok = !down, "Reconnect attempt");
                    let _ = acks.try_send(result);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            continue;
        }

        match source.read(read_timeout) {
            Ok(sample) => sender.push(Ok(sample)),
            Err(fault) if fault.is_disconnect() => {
                debug!(%channel, %fault, "Source disconnected");
                sender.push(Err(fault));
                down = true;
            }
            // Timeouts just mean nothing arrived yet; the tick notices the gap.
            Err(_) => {}
        }
    }

    debug!(%channel, "Acquisition thread stopped");
}

impl SampleFeed for ThreadedFeed {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn pull(&mut self, until: f64) -> FeedBatch {
        let mut batch = FeedBatch::default();
        for item in self.receiver.drain() {
            match item {
                Ok(sample) => self.pending.push_back(sample),
                Err(fault) => {
                    self.down = true;
                    batch.record_fault(fault);
                }
            }
        }
        while let Some(sample) = self.pending.front() {
            if sample.timestamp > until {
                break;
            }
            batch.samples.extend(self.pending.pop_front());
        }
        if self.down && batch.fault.is_none() {
            batch.fault = Some(SensorError::disconnected(self.channel, "awaiting reconnect"));
        }
        batch
    }

    fn reconnect(&mut self) -> Result<(), SensorError> {
        if !self.down {
            return Ok(());
        }
        if self.handle.is_none() {
            return Err(SensorError::disconnected(self.channel, "no acquisition thread"));
        }
        // Discard acks from attempts that timed out earlier.
        while self.acks.try_recv().is_ok() {}

        if self.commands.try_send(Command::Reconnect).is_err() {
            return Err(SensorError::disconnected(self.channel, "acquisition thread gone"));
        }
        match self.acks.recv_timeout(self.reconnect_timeout) {
            Ok(Ok(())) => {
                self.down = false;
                Ok(())
            }
            Ok(Err(fault)) => Err(fault),
            Err(_) => Err(SensorError::Timeout {
                channel: self.channel,
                waited_ms: self.reconnect_timeout.as_millis() as u64,
            }),
        }
    }

    fn overwritten(&self) -> u64 {
        self.receiver.overwritten()
    }
}

impl Drop for ThreadedFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits `count` samples 10 ms apart, then optionally disconnects.
    struct Scripted {
        channel: Channel,
        next: usize,
        count: usize,
        disconnect_at_end: bool,
        reconnects: usize,
    }

    impl Scripted {
        fn new(count: usize, disconnect_at_end: bool) -> Self {
            Self {
                channel: Channel::Eda,
                next: 0,
                count,
                disconnect_at_end,
                reconnects: 0,
            }
        }
    }

    impl SignalSource for Scripted {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorError> {
            if self.next < self.count {
                let sample = RawSample::new(self.channel, self.next as f64 * 0.01, 1.0);
                self.next += 1;
                Ok(sample)
            } else if self.disconnect_at_end {
                Err(SensorError::disconnected(self.channel, "cable"))
            } else {
                std::thread::sleep(timeout);
                Err(SensorError::Timeout {
                    channel: self.channel,
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }

        fn reconnect(&mut self) -> Result<(), SensorError> {
            self.reconnects += 1;
            self.disconnect_at_end = false;
            Ok(())
        }
    }

    #[test]
    fn test_inline_feed_splits_at_until() {
        let mut feed = InlineFeed::new(Scripted::new(100, false));
        let first = feed.pull(0.095);
        assert_eq!(first.samples.len(), 10);
        assert!(first.fault.is_none());

        let second = feed.pull(0.195);
        assert_eq!(second.samples.len(), 10);
        assert_eq!(second.samples[0].timestamp, 10.0 * 0.01);
    }

    #[test]
    fn test_inline_feed_reports_disconnect() {
        let mut feed = InlineFeed::new(Scripted::new(5, true));
        let batch = feed.pull(10.0);
        assert_eq!(batch.samples.len(), 5);
        assert!(batch.fault.unwrap().is_disconnect());

        feed.reconnect().unwrap();
        assert_eq!(feed.into_inner().reconnects, 1);
    }

    #[test]
    fn test_threaded_feed_delivers_and_recovers() {
        let mut feed = ThreadedFeed::spawn(Scripted::new(20, true), 64, Duration::from_millis(5));

        let mut samples = Vec::new();
        let mut fault = None;
        for _ in 0..200 {
            let batch = feed.pull(f64::MAX);
            samples.extend(batch.samples);
            if batch.fault.is_some() {
                fault = batch.fault;
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(samples.len(), 20);
        assert!(fault.unwrap().is_disconnect());

        // Still down until reconnected.
        assert!(feed.pull(f64::MAX).fault.is_some());
        feed.reconnect().unwrap();
        assert!(feed.pull(f64::MAX).fault.is_none());
        feed.shutdown();
    }

    #[test]
    fn test_threaded_feed_overwrites_when_not_drained() {
        let mut feed = ThreadedFeed::spawn(Scripted::new(500, false), 8, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(100));
        let batch = feed.pull(f64::MAX);
        assert!(batch.samples.len() <= 8);
        assert_eq!(batch.samples.last().unwrap().timestamp, 499.0 * 0.01);
        assert!(feed.overwritten() >= 492);
    }
}
