//! Packet streams and retired state on real reader threads
//!
//! These tests wait on worker threads with generous deadlines and run
//! serially so they never compete for cores.

mod helpers;

use helpers::mono_1khz;
use serial_test::serial;
use sfx_common::SoundDescription;
use sfx_stream::device::{DeviceVoice, DeviceVoiceStatus, NullDevice};
use sfx_stream::playback::{BufferStatus, VoiceStatus};
use sfx_stream::stream::{
    MemoryStream, PacketStream, PacketStreamConfig, ReaderPool, SourceStream, StreamNotice,
};
use sfx_stream::{ManualClock, SoundProfile, SoundSystem, SourceStatus};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Memory stream that takes `delay` for every read
#[derive(Clone)]
struct SlowStream {
    inner: MemoryStream,
    delay: Duration,
}

impl SlowStream {
    fn new(samples: u64, delay: Duration) -> Self {
        Self {
            inner: MemoryStream::counting(mono_1khz(), samples),
            delay,
        }
    }
}

impl SourceStream for SlowStream {
    fn format(&self) -> sfx_common::SampleFormat {
        self.inner.format()
    }

    fn sample_count(&self) -> Option<u64> {
        self.inner.sample_count()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        thread::sleep(self.delay);
        self.inner.read(buf)
    }

    fn try_clone(&self) -> Option<Box<dyn SourceStream>> {
        Some(Box::new(self.clone()))
    }

    fn position(&self) -> Option<u64> {
        self.inner.position()
    }

    fn set_position(&mut self, sample: u64) -> bool {
        self.inner.set_position(sample)
    }
}

/// Open/closed switch shared between a test and its reader threads
#[derive(Clone)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn new() -> Self {
        Self(Arc::new((Mutex::new(true), Condvar::new())))
    }

    fn set(&self, open: bool) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = open;
        cvar.notify_all();
    }

    fn wait_open(&self) {
        let (lock, cvar) = &*self.0;
        let _open = cvar.wait_while(lock.lock().unwrap(), |open| !*open).unwrap();
    }
}

/// Memory stream whose reads block while its gate is closed
#[derive(Clone)]
struct GatedStream {
    inner: MemoryStream,
    gate: Gate,
}

impl SourceStream for GatedStream {
    fn format(&self) -> sfx_common::SampleFormat {
        self.inner.format()
    }

    fn sample_count(&self) -> Option<u64> {
        self.inner.sample_count()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.gate.wait_open();
        self.inner.read(buf)
    }

    fn try_clone(&self) -> Option<Box<dyn SourceStream>> {
        Some(Box::new(self.clone()))
    }

    fn position(&self) -> Option<u64> {
        self.inner.position()
    }

    fn set_position(&mut self, sample: u64) -> bool {
        self.inner.set_position(sample)
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
#[serial]
fn test_threaded_stream_delivers_in_order() {
    let pool = ReaderPool::new(2);
    let stream = PacketStream::start(
        Box::new(SlowStream::new(1000, Duration::from_millis(2))),
        PacketStreamConfig::incremental(100, 4),
        pool.handle(),
        None,
    );

    let mut sequences = Vec::new();
    let mut samples = 0;
    let mut saw_last = false;
    let started = Instant::now();
    while !stream.is_finished() {
        assert!(started.elapsed() < Duration::from_secs(5), "stream stalled");
        stream.wait_for_packet(Duration::from_millis(500));
        while let Some(packet) = stream.read() {
            sequences.push(packet.sequence);
            samples += packet.samples();
            saw_last |= packet.is_last;
        }
    }

    assert!(saw_last);
    assert_eq!(samples, 1000);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
#[serial]
async fn test_stop_during_read_reports_quiescence() {
    let pool = ReaderPool::new(1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = PacketStream::start(
        Box::new(SlowStream::new(1000, Duration::from_millis(200))),
        PacketStreamConfig::incremental(100, 2),
        pool.handle(),
        Some(tx),
    );

    assert!(!stream.stop());
    let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no quiescence notice");

    assert_eq!(notice, Some(StreamNotice::Quiesced(stream.id())));
    assert!(stream.is_finished());
    assert!(!stream.is_reading());
}

#[test]
#[serial]
fn test_deleted_source_waits_for_in_flight_read() {
    let clock = Arc::new(ManualClock::new());
    let mut system = SoundSystem::new(clock.clone(), ReaderPool::new(2));
    system.init(Box::new(NullDevice::new(clock, 4)));

    let provider = Arc::new(|| {
        Some(Box::new(SlowStream::new(5000, Duration::from_millis(100))) as Box<dyn SourceStream>)
    });
    let profile = SoundProfile::new("slow", provider, SoundDescription::streaming(0.5, 2));
    let id = system.create_source(profile).unwrap();

    system.delete_source(id).unwrap();
    system.update();
    assert_eq!(system.stats().parked_states, 1);

    let released = wait_until(Duration::from_secs(5), || {
        system.update();
        system.stats().parked_states == 0
    });
    assert!(released, "parked stream state never released");
    assert_eq!(system.stats().buffers, 0);
    assert_eq!(system.stats().reclaimed_buffers, 1);
}

#[test]
#[serial]
fn test_threaded_pool_feeds_streaming_voice() {
    let clock = Arc::new(ManualClock::new());
    let mut system = SoundSystem::new(clock.clone(), ReaderPool::new(2));
    system.init(Box::new(NullDevice::new(clock.clone(), 4)));

    let profile = SoundProfile::new(
        "music",
        MemoryStream::counting(mono_1khz(), 5000).provider(),
        SoundDescription::streaming(0.5, 2),
    );
    let id = system.create_source(profile).unwrap();
    system.play(id, None).unwrap();
    let bid = system.source(id).unwrap().buffer().unwrap();

    let ready = wait_until(Duration::from_secs(5), || {
        system.update();
        system.buffer_status(bid) == Some(BufferStatus::Ready)
    });
    assert!(ready, "buffer never became ready");

    clock.advance(300);
    system.update();
    assert_eq!(system.status(id).unwrap(), SourceStatus::Playing);
    assert_eq!(system.voice_position(id), Some(300));
}

#[test]
#[serial]
fn test_starved_stream_blocks_voice_until_data_returns() {
    let clock = Arc::new(ManualClock::new());
    let mut system = SoundSystem::new(clock.clone(), ReaderPool::new(1));
    system.init(Box::new(NullDevice::new(clock.clone(), 4)));

    let gate = Gate::new();
    let stream = GatedStream {
        inner: MemoryStream::counting(mono_1khz(), 5000),
        gate: gate.clone(),
    };
    let provider = Arc::new(move || Some(Box::new(stream.clone()) as Box<dyn SourceStream>));
    let profile = SoundProfile::new("radio", provider, SoundDescription::streaming(0.1, 2));
    let id = system.create_source(profile).unwrap();
    system.play(id, None).unwrap();
    let bid = system.source(id).unwrap().buffer().unwrap();

    let ready = wait_until(Duration::from_secs(5), || {
        system.update();
        system.buffer_status(bid) == Some(BufferStatus::Ready)
    });
    assert!(ready, "buffer never became ready");
    assert_eq!(system.voice(id).unwrap().last_status(), VoiceStatus::Playing);

    // Close the reader off and play through everything already read
    gate.set(false);
    thread::sleep(Duration::from_millis(50));
    for _ in 0..20 {
        clock.advance(50);
        system.update();
    }

    assert_eq!(system.buffer_status(bid), Some(BufferStatus::Blocked));
    let voice = system.voice(id).unwrap();
    assert_eq!(voice.last_status(), VoiceStatus::Blocked);
    assert_eq!(voice.device_voice().status(), DeviceVoiceStatus::Paused);
    assert_eq!(system.status(id).unwrap(), SourceStatus::Playing);

    gate.set(true);
    let recovered = wait_until(Duration::from_secs(5), || {
        system.update();
        system.buffer_status(bid) == Some(BufferStatus::Ready)
    });
    assert!(recovered, "buffer never recovered from the underrun");
    let voice = system.voice(id).unwrap();
    assert_eq!(voice.last_status(), VoiceStatus::Playing);
    assert_eq!(voice.device_voice().status(), DeviceVoiceStatus::Playing);
}
