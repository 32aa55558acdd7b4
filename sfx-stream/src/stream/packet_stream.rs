//! Asynchronous packet streams
//!
//! A [`PacketStream`] reads a [`SourceStream`] ahead of playback on the
//! reader pool and hands the results out as [`Packet`]s, strictly in read
//! order.
//!
//! ## Design
//!
//! ```text
//! SourceStream → read job (reader pool) → push → FIFO (read_ahead + 1) → read() → buffer
//!                    ↑                                                      │
//!                    └─────────────── request_reads() ◄─────────────────────┘
//! ```
//!
//! At most one read per stream is in flight at any time. A finished read
//! queues the next one itself while fewer than `read_ahead` packets are
//! buffered; the consumer re-arms the chain whenever it takes a packet.
//!
//! ## Stopping
//!
//! [`PacketStream::stop`] marks the stream stopped and discards buffered
//! packets. If a read is still in flight its result is thrown away when it
//! completes, and the stream sends [`StreamNotice::Quiesced`] on its notice
//! channel so the owner knows the stream can now be released.

use crate::stream::packet::Packet;
use crate::stream::reader_pool::{ReadJob, ReaderPoolHandle};
use crate::stream::source_stream::SourceStream;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use sfx_common::{SampleFormat, SoundDescription};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, trace, warn};

/// Read size for whole-resource reads
const WHOLE_READ_CHUNK: usize = 64 * 1024;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique packet stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Notices sent from reader threads to the stream's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamNotice {
    /// A stopped stream's last in-flight read has completed
    Quiesced(StreamId),
}

/// How a stream packetizes its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStreamConfig {
    /// Samples per packet (incremental mode)
    pub packet_samples: u64,

    /// Packets to keep buffered ahead of the consumer
    pub read_ahead: usize,

    /// `false` reads the whole source into one packet
    pub incremental: bool,

    /// Append one packet of silence after the final packet
    pub read_silence_at_end: bool,

    /// Rewind to the start after the final packet and keep reading
    pub looping: bool,
}

impl PacketStreamConfig {
    /// Whole resource in a single read
    pub fn whole() -> Self {
        Self {
            packet_samples: 0,
            read_ahead: 1,
            incremental: false,
            read_silence_at_end: false,
            looping: false,
        }
    }

    /// Fixed-size packets with read-ahead
    pub fn incremental(packet_samples: u64, read_ahead: usize) -> Self {
        Self {
            packet_samples: packet_samples.max(1),
            read_ahead: read_ahead.max(1),
            incremental: true,
            read_silence_at_end: false,
            looping: false,
        }
    }

    /// Packetization for a sound description
    ///
    /// Non-streaming sounds are read whole. Streaming sounds never pad a
    /// looping stream, since it has no end to pad.
    pub fn for_description(description: &SoundDescription, format: SampleFormat) -> Self {
        if !description.is_streaming {
            return Self::whole();
        }
        Self {
            read_silence_at_end: description.stream_read_silence_at_end
                && !description.is_looping,
            looping: description.is_looping,
            ..Self::incremental(
                format.seconds_to_samples(description.stream_packet_duration),
                description.stream_read_ahead as usize,
            )
        }
    }

    /// FIFO capacity: read-ahead plus room for the trailing silence packet
    pub fn fifo_capacity(&self) -> usize {
        self.read_ahead + 1
    }
}

/// Read-scheduling state, guarded by one mutex
#[derive(Debug, Default)]
struct ReadSchedule {
    /// A read job is queued or running
    in_flight: bool,

    /// Packets sitting in the FIFO
    buffered: usize,

    /// No further reads will be issued
    finished: bool,

    /// Owner stopped the stream
    stopped: bool,

    next_sequence: u64,

    /// Samples read since the last rewind
    iteration_samples: u64,

    /// Completed loop iterations
    loops: u64,
}

/// Result of one source read, before scheduling decisions
struct ReadResult {
    packet: Packet,
    rewound: bool,
}

struct StreamShared {
    id: StreamId,
    format: SampleFormat,
    config: PacketStreamConfig,

    /// Only the in-flight read job touches the source
    source: Mutex<Box<dyn SourceStream>>,

    /// FIFO producer (reader threads)
    prod: Mutex<HeapProd<Packet>>,

    /// FIFO consumer (owner thread)
    cons: Mutex<HeapCons<Packet>>,

    schedule: Mutex<ReadSchedule>,

    /// Signalled whenever a packet arrives or the stream finishes
    packet_ready: Condvar,

    notices: Option<UnboundedSender<StreamNotice>>,
}

impl StreamShared {
    fn read_job(self: &Arc<Self>, pool: &ReaderPoolHandle) -> ReadJob {
        let shared = Arc::clone(self);
        let pool = pool.clone();
        Box::new(move || shared.run_read(&pool))
    }

    /// Body of one read job
    fn run_read(self: &Arc<Self>, pool: &ReaderPoolHandle) {
        let sequence = {
            let schedule = self.schedule.lock().unwrap();
            if schedule.stopped {
                drop(schedule);
                self.complete_stopped();
                return;
            }
            schedule.next_sequence
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.read_source(sequence)));
        let result = match result {
            Ok(result) => result,
            Err(_) => {
                error!("{}: source panicked during read, treating as end of stream", self.id);
                ReadResult {
                    packet: Packet::new(Vec::new(), self.format, true, sequence),
                    rewound: false,
                }
            }
        };

        let mut schedule = self.schedule.lock().unwrap();
        schedule.in_flight = false;

        if schedule.stopped {
            drop(schedule);
            trace!("{}: discarding read {} from stopped stream", self.id, sequence);
            self.notify_quiesced();
            return;
        }

        schedule.next_sequence += 1;
        schedule.iteration_samples += result.packet.samples();

        let mut at_end = false;
        if result.packet.is_last {
            if self.config.looping && result.rewound && schedule.iteration_samples > 0 {
                schedule.iteration_samples = 0;
                schedule.loops += 1;
                debug!("{}: loop {} complete, rewound", self.id, schedule.loops);
            } else {
                at_end = true;
            }
        }

        self.push(result.packet, &mut schedule);

        if at_end {
            schedule.finished = true;
            if self.config.read_silence_at_end {
                let silence =
                    Packet::silence(self.format, self.config.packet_samples, schedule.next_sequence);
                schedule.next_sequence += 1;
                self.push(silence, &mut schedule);
            }
            debug!("{}: end of stream after {} packets", self.id, schedule.next_sequence);
        }

        self.packet_ready.notify_all();

        let chain = !schedule.finished && schedule.buffered < self.config.read_ahead;
        if chain {
            schedule.in_flight = true;
        }
        drop(schedule);

        if chain {
            if let Err(e) = pool.submit(self.read_job(pool)) {
                self.abandon_read(&e.to_string());
            }
        }
    }

    /// Read one packet's worth of data from the source
    fn read_source(&self, sequence: u64) -> ReadResult {
        let mut source = self.source.lock().unwrap();

        let (data, is_last) = if self.config.incremental {
            let wanted = self.format.samples_to_bytes(self.config.packet_samples) as usize;
            let data = read_up_to(source.as_mut(), wanted);
            let short = data.len() < wanted;
            (data, short)
        } else {
            (read_to_end(source.as_mut()), true)
        };

        let rewound = is_last && self.config.looping && source.set_position(0);
        ReadResult {
            packet: Packet::new(data, self.format, is_last, sequence),
            rewound,
        }
    }

    fn push(&self, packet: Packet, schedule: &mut ReadSchedule) {
        let sequence = packet.sequence;
        match self.prod.lock().unwrap().try_push(packet) {
            Ok(()) => schedule.buffered += 1,
            Err(_) => warn!("{}: FIFO full, packet {} lost", self.id, sequence),
        }
    }

    fn complete_stopped(&self) {
        self.schedule.lock().unwrap().in_flight = false;
        self.notify_quiesced();
    }

    /// The next read could not be queued; end the stream here
    fn abandon_read(&self, reason: &str) {
        warn!("{}: could not schedule read ({}), ending stream", self.id, reason);
        let mut schedule = self.schedule.lock().unwrap();
        schedule.in_flight = false;
        schedule.finished = true;
        let stopped = schedule.stopped;
        drop(schedule);
        self.packet_ready.notify_all();
        if stopped {
            self.notify_quiesced();
        }
    }

    fn notify_quiesced(&self) {
        if let Some(notices) = &self.notices {
            // Receiver gone means the owner no longer cares
            let _ = notices.send(StreamNotice::Quiesced(self.id));
        }
    }
}

/// Read until `wanted` bytes arrive or the source stops producing
fn read_up_to(source: &mut dyn SourceStream, wanted: usize) -> Vec<u8> {
    let mut data = vec![0u8; wanted];
    let mut filled = 0;
    while filled < wanted {
        let n = source.read(&mut data[filled..]);
        if n == 0 {
            break;
        }
        filled += n.min(wanted - filled);
    }
    data.truncate(filled);
    data
}

fn read_to_end(source: &mut dyn SourceStream) -> Vec<u8> {
    let format = source.format();
    let mut data = Vec::with_capacity(
        source
            .sample_count()
            .map(|n| format.samples_to_bytes(n) as usize)
            .unwrap_or(WHOLE_READ_CHUNK),
    );
    let mut chunk = vec![0u8; WHOLE_READ_CHUNK];
    loop {
        let n = source.read(&mut chunk);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n.min(chunk.len())]);
    }
    data
}

/// Ordered, read-ahead packet source over a [`SourceStream`]
pub struct PacketStream {
    shared: Arc<StreamShared>,
    pool: ReaderPoolHandle,
}

impl PacketStream {
    /// Start reading `source` on `pool`
    ///
    /// The first reads are queued immediately.
    pub fn start(
        source: Box<dyn SourceStream>,
        config: PacketStreamConfig,
        pool: ReaderPoolHandle,
        notices: Option<UnboundedSender<StreamNotice>>,
    ) -> Self {
        let (prod, cons) = HeapRb::<Packet>::new(config.fifo_capacity()).split();
        let id = StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed));
        let format = source.format();

        debug!(
            "{}: starting ({}, packet_samples={}, read_ahead={}, incremental={}, looping={})",
            id, format, config.packet_samples, config.read_ahead, config.incremental, config.looping
        );

        let stream = Self {
            shared: Arc::new(StreamShared {
                id,
                format,
                config,
                source: Mutex::new(source),
                prod: Mutex::new(prod),
                cons: Mutex::new(cons),
                schedule: Mutex::new(ReadSchedule::default()),
                packet_ready: Condvar::new(),
                notices,
            }),
            pool,
        };
        stream.request_reads();
        stream
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn format(&self) -> SampleFormat {
        self.shared.format
    }

    pub fn config(&self) -> &PacketStreamConfig {
        &self.shared.config
    }

    /// Take the next packet, if one has arrived
    pub fn read(&self) -> Option<Packet> {
        let packet = self.shared.cons.lock().unwrap().try_pop()?;
        {
            let mut schedule = self.shared.schedule.lock().unwrap();
            schedule.buffered = schedule.buffered.saturating_sub(1);
        }
        self.request_reads();
        Some(packet)
    }

    /// Packets waiting to be taken
    pub fn buffered(&self) -> usize {
        self.shared.schedule.lock().unwrap().buffered
    }

    /// No packet will ever be returned again
    pub fn is_finished(&self) -> bool {
        let schedule = self.shared.schedule.lock().unwrap();
        (schedule.finished || schedule.stopped) && schedule.buffered == 0
    }

    /// The source has been read to its end (packets may still be buffered)
    pub fn is_fully_read(&self) -> bool {
        self.shared.schedule.lock().unwrap().finished
    }

    /// A read is queued or running
    pub fn is_reading(&self) -> bool {
        self.shared.schedule.lock().unwrap().in_flight
    }

    pub fn loops(&self) -> u64 {
        self.shared.schedule.lock().unwrap().loops
    }

    /// Stop reading and discard buffered packets
    ///
    /// Returns `true` when no read is in flight, i.e. the stream can be
    /// released right away. Otherwise a [`StreamNotice::Quiesced`] follows
    /// once the in-flight read completes.
    pub fn stop(&self) -> bool {
        let quiescent = {
            let mut schedule = self.shared.schedule.lock().unwrap();
            if !schedule.stopped {
                debug!("{}: stopped", self.shared.id);
            }
            schedule.stopped = true;
            schedule.buffered = 0;
            !schedule.in_flight
        };

        let mut cons = self.shared.cons.lock().unwrap();
        while cons.try_pop().is_some() {}
        drop(cons);

        self.shared.packet_ready.notify_all();
        quiescent
    }

    /// Block until a packet is available, the stream ends, or `timeout`
    ///
    /// Returns whether a packet is available.
    pub fn wait_for_packet(&self, timeout: Duration) -> bool {
        let schedule = self.shared.schedule.lock().unwrap();
        let (schedule, _) = self
            .shared
            .packet_ready
            .wait_timeout_while(schedule, timeout, |s| {
                s.buffered == 0 && !s.finished && !s.stopped
            })
            .unwrap();
        schedule.buffered > 0
    }

    /// Queue the next read if the chain is idle and there is room
    fn request_reads(&self) {
        {
            let mut schedule = self.shared.schedule.lock().unwrap();
            if schedule.stopped
                || schedule.finished
                || schedule.in_flight
                || schedule.buffered >= self.shared.config.read_ahead
            {
                return;
            }
            schedule.in_flight = true;
        }

        if let Err(e) = self.pool.submit(self.shared.read_job(&self.pool)) {
            self.shared.abandon_read(&e.to_string());
        }
    }
}

impl fmt::Debug for PacketStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketStream")
            .field("id", &self.shared.id)
            .field("format", &self.shared.format)
            .field("config", &self.shared.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::reader_pool::ReaderPool;
    use crate::stream::source_stream::MemoryStream;

    fn mono16() -> SampleFormat {
        SampleFormat::new(1, 16, 1000).unwrap()
    }

    fn drain(stream: &PacketStream) -> Vec<Packet> {
        std::iter::from_fn(|| stream.read()).collect()
    }

    #[test]
    fn test_incremental_packets_in_order() {
        let pool = ReaderPool::inline();
        let source = MemoryStream::counting(mono16(), 250);
        let stream = PacketStream::start(
            Box::new(source),
            PacketStreamConfig::incremental(100, 2),
            pool.handle(),
            None,
        );

        let packets = drain(&stream);
        let samples: Vec<u64> = packets.iter().map(|p| p.samples()).collect();
        assert_eq!(samples, vec![100, 100, 50]);
        assert!(packets.iter().map(|p| p.sequence).eq(0..3));
        assert!(!packets[1].is_last);
        assert!(packets[2].is_last);
        assert_eq!(packets[1].bytes()[0], 100);
        assert!(stream.is_finished());
    }

    #[test]
    fn test_read_ahead_is_bounded() {
        let pool = ReaderPool::inline();
        let source = MemoryStream::counting(mono16(), 1000);
        let stream = PacketStream::start(
            Box::new(source),
            PacketStreamConfig::incremental(100, 3),
            pool.handle(),
            None,
        );

        assert_eq!(stream.buffered(), 3);
        assert!(!stream.is_reading());

        stream.read().unwrap();
        assert_eq!(stream.buffered(), 3);
    }

    #[test]
    fn test_silence_padding_follows_last_packet() {
        let pool = ReaderPool::inline();
        let mut config = PacketStreamConfig::incremental(100, 3);
        config.read_silence_at_end = true;
        let stream = PacketStream::start(
            Box::new(MemoryStream::counting(mono16(), 150)),
            config,
            pool.handle(),
            None,
        );

        let packets = drain(&stream);
        assert_eq!(packets.len(), 3);
        assert!(packets[1].is_last);
        assert!(packets[2].is_padding);
        assert_eq!(packets[2].samples(), 100);
    }

    #[test]
    fn test_whole_read() {
        let pool = ReaderPool::inline();
        let stream = PacketStream::start(
            Box::new(MemoryStream::counting(mono16(), 70_000)),
            PacketStreamConfig::whole(),
            pool.handle(),
            None,
        );

        let packets = drain(&stream);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].samples(), 70_000);
        assert!(packets[0].is_last);
    }

    #[test]
    fn test_looping_rewinds() {
        let pool = ReaderPool::inline();
        let mut config = PacketStreamConfig::incremental(100, 2);
        config.looping = true;
        let stream = PacketStream::start(
            Box::new(MemoryStream::counting(mono16(), 150)),
            config,
            pool.handle(),
            None,
        );

        let packets: Vec<Packet> = (0..5).filter_map(|_| stream.read()).collect();
        let shape: Vec<(u64, bool)> = packets.iter().map(|p| (p.samples(), p.is_last)).collect();
        assert_eq!(
            shape,
            vec![(100, false), (50, true), (100, false), (50, true), (100, false)]
        );
        assert_eq!(packets[2].bytes()[0], 0);
        assert!(stream.loops() >= 2);
        assert!(!stream.is_finished());
    }

    #[test]
    fn test_looping_empty_source_ends() {
        let pool = ReaderPool::inline();
        let mut config = PacketStreamConfig::incremental(100, 2);
        config.looping = true;
        let stream = PacketStream::start(
            Box::new(MemoryStream::new(mono16(), Vec::new())),
            config,
            pool.handle(),
            None,
        );

        let packets = drain(&stream);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_empty());
        assert!(stream.is_finished());
    }

    #[test]
    fn test_stop_when_idle_is_quiescent() {
        let pool = ReaderPool::inline();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = PacketStream::start(
            Box::new(MemoryStream::counting(mono16(), 1000)),
            PacketStreamConfig::incremental(100, 3),
            pool.handle(),
            Some(tx),
        );

        assert!(stream.stop());
        assert!(stream.read().is_none());
        assert!(stream.is_finished());
        assert!(rx.try_recv().is_err());
    }

    struct PanickingStream;

    impl SourceStream for PanickingStream {
        fn format(&self) -> SampleFormat {
            SampleFormat::new(1, 16, 1000).unwrap()
        }
        fn sample_count(&self) -> Option<u64> {
            None
        }
        fn read(&mut self, _buf: &mut [u8]) -> usize {
            panic!("device yanked");
        }
        fn try_clone(&self) -> Option<Box<dyn SourceStream>> {
            None
        }
    }

    #[test]
    fn test_panicking_source_ends_stream() {
        let pool = ReaderPool::inline();
        let stream = PacketStream::start(
            Box::new(PanickingStream),
            PacketStreamConfig::incremental(100, 3),
            pool.handle(),
            None,
        );

        let packets = drain(&stream);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_last);
        assert!(packets[0].is_empty());
        assert!(stream.is_finished());
    }

    #[test]
    fn test_config_for_description() {
        let format = SampleFormat::new(2, 16, 44100).unwrap();
        let mut desc = SoundDescription::streaming(0.5, 4);
        desc.is_looping = true;

        let config = PacketStreamConfig::for_description(&desc, format);
        assert!(config.incremental);
        assert_eq!(config.packet_samples, 22050);
        assert_eq!(config.fifo_capacity(), 5);
        assert!(!config.read_silence_at_end);

        let config = PacketStreamConfig::for_description(&SoundDescription::default(), format);
        assert_eq!(config, PacketStreamConfig::whole());
    }
}
