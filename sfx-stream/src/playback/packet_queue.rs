//! Packet Queue
//!
//! Tracks which submitted packets are still unplayed, measured against a
//! [`TimeSource`]. The owning buffer asks [`PacketQueue::need_packet`]
//! before every submission; the queue first drops spans the clock has
//! passed, then reports whether there is room for another packet.
//!
//! ## Wrap-around
//!
//! A looping stream restarts its tick positions at zero each iteration, and
//! every span remembers the iteration it was submitted in. The head span is
//! always the oldest unplayed one, so the clock can only be behind its start
//! once it has wrapped: a head from an earlier iteration than the newest
//! submission is then done.
//!
//! ## Late packets
//!
//! With drop mode on, a packet whose span has already fully played when it
//! is submitted never reaches the consumer. The running tick total still
//! advances so the following packets keep their positions. Looping queues
//! never drop: after a wrap a fresh packet would be compared against the
//! previous iteration's clock.

use crate::stream::Packet;
use crate::time_source::TimeSource;
use std::collections::VecDeque;
use tracing::trace;

/// Receiver of packets that survive the queue's drop policy
pub trait PacketConsumer {
    fn write(&mut self, packet: Packet);
}

/// Tick span of one submitted packet, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedSpan {
    pub start: u64,
    pub end: u64,
}

impl QueuedSpan {
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    span: QueuedSpan,
    iteration: u64,
}

/// Bounded queue of unplayed packet spans
#[derive(Debug)]
pub struct PacketQueue<T: TimeSource> {
    time_source: T,
    max_queued: usize,
    drop_late: bool,
    looping: bool,
    spans: VecDeque<Entry>,

    /// Loop iteration new submissions belong to
    iteration: u64,

    /// End tick of the most recent submission
    total_queued_ticks: u64,

    /// Known once the final packet has been submitted
    total_ticks: Option<u64>,

    dropped_packets: u64,
}

impl<T: TimeSource> PacketQueue<T> {
    pub fn new(time_source: T, max_queued: usize, drop_late: bool, looping: bool) -> Self {
        Self {
            time_source,
            max_queued: max_queued.max(1),
            drop_late,
            looping,
            spans: VecDeque::with_capacity(max_queued),
            iteration: 0,
            total_queued_ticks: 0,
            total_ticks: None,
            dropped_packets: 0,
        }
    }

    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    pub fn time_source_mut(&mut self) -> &mut T {
        &mut self.time_source
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.spans.len() >= self.max_queued
    }

    pub fn capacity(&self) -> usize {
        self.max_queued
    }

    pub fn total_queued_ticks(&self) -> u64 {
        self.total_queued_ticks
    }

    pub fn total_ticks(&self) -> Option<u64> {
        self.total_ticks
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    pub fn spans(&self) -> impl Iterator<Item = &QueuedSpan> {
        self.spans.iter().map(|entry| &entry.span)
    }

    /// Evict played spans, then report whether another packet fits
    pub fn need_packet(&mut self) -> bool {
        let tick = self.time_source.tick();

        while let Some(head) = self.spans.front().copied() {
            if head.span.end <= tick || self.wrapped_past(&head, tick) {
                trace!(
                    "Evicting span [{}, {}) at tick {}",
                    head.span.start,
                    head.span.end,
                    tick
                );
                self.spans.pop_front();
            } else {
                break;
            }
        }

        self.spans.len() < self.max_queued
    }

    fn wrapped_past(&self, head: &Entry, tick: u64) -> bool {
        self.looping && tick < head.span.start && head.iteration < self.iteration
    }

    /// Submit a packet lasting `duration_ticks`
    ///
    /// The span starts at `explicit_start` when given (first packet after a
    /// seek), otherwise where the previous submission ended. Returns whether
    /// the packet reached the consumer.
    pub fn submit_packet<C: PacketConsumer + ?Sized>(
        &mut self,
        consumer: &mut C,
        packet: Packet,
        duration_ticks: u64,
        is_last: bool,
        explicit_start: Option<u64>,
    ) -> bool {
        let start = explicit_start.unwrap_or(self.total_queued_ticks);
        let span = QueuedSpan {
            start,
            end: start + duration_ticks,
        };
        self.total_queued_ticks = span.end;

        let tick = self.time_source.tick();
        let written = if self.drop_late && !self.looping && tick >= span.end {
            self.dropped_packets += 1;
            trace!(
                "Dropping late packet {} [{}, {}) at tick {}",
                packet.sequence,
                span.start,
                span.end,
                tick
            );
            false
        } else {
            consumer.write(packet);
            self.spans.push_back(Entry {
                span,
                iteration: self.iteration,
            });
            true
        };

        if is_last && self.total_ticks.is_none() {
            self.total_ticks = Some(span.end);
        }

        written
    }

    /// Restart the running total for the next loop iteration
    pub fn begin_loop(&mut self) {
        self.total_queued_ticks = 0;
        self.iteration += 1;
    }

    /// Playback has consumed everything the stream will ever deliver
    pub fn is_at_end(&self) -> bool {
        if self.looping {
            return false;
        }
        let Some(total) = self.total_ticks else {
            return false;
        };
        let tick = self.time_source.tick();
        tick >= total && (self.drop_late || self.total_queued_ticks <= tick)
    }
}
