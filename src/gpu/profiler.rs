//! GPU Timestamp Profiler
//!
//! Measures GPU frame time with a pair of timestamps written at the start
//! and end of each frame's command stream. Query sets are double-buffered
//! by frame parity so resolving one frame never races the next frame's
//! writes, and the resolved values drain through a rotating set of three
//! read-back buffers — when all three are still in flight, the frame simply
//! skips measurement instead of stalling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

const READBACK_COUNT: usize = 3;
/// Two u64 timestamps.
const RESOLVE_SIZE: u64 = 16;

/// Double-buffered timestamp capture.
pub struct TimestampProfiler {
    query_sets: [wgpu::QuerySet; 2],
    resolve_buffer: wgpu::Buffer,
    readback: [wgpu::Buffer; READBACK_COUNT],
    in_flight: [Arc<AtomicBool>; READBACK_COUNT],
    /// ns per timestamp tick.
    period: f32,
    parity: usize,
    /// Read-back chosen by `resolve`, consumed by `after_submit`.
    pending_readback: Option<usize>,
    latest_ms: Arc<Mutex<Option<f64>>>,
    skipped_frames: u64,
}

impl TimestampProfiler {
    #[must_use]
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let query_sets = std::array::from_fn(|i| {
            device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some(if i == 0 { "Frame Timestamps A" } else { "Frame Timestamps B" }),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            })
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Resolve"),
            size: RESOLVE_SIZE,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = std::array::from_fn(|i| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(match i {
                    0 => "Timestamp Readback 0",
                    1 => "Timestamp Readback 1",
                    _ => "Timestamp Readback 2",
                }),
                size: RESOLVE_SIZE,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        Self {
            query_sets,
            resolve_buffer,
            readback,
            in_flight: std::array::from_fn(|_| Arc::new(AtomicBool::new(false))),
            period: queue.get_timestamp_period(),
            parity: 0,
            pending_readback: None,
            latest_ms: Arc::new(Mutex::new(None)),
            skipped_frames: 0,
        }
    }

    /// Writes the frame-start timestamp.
    pub fn begin(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.write_timestamp(&self.query_sets[self.parity], 0);
    }

    /// Writes the frame-end timestamp.
    pub fn end(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.write_timestamp(&self.query_sets[self.parity], 1);
    }

    /// Resolves the current pair into staging and stages a copy into an
    /// available read-back buffer. Skips measurement when all three are
    /// still mapped in flight.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_sets[self.parity], 0..2, &self.resolve_buffer, 0);

        let available = self
            .in_flight
            .iter()
            .position(|flag| !flag.load(Ordering::Acquire));
        match available {
            Some(index) => {
                encoder.copy_buffer_to_buffer(
                    &self.resolve_buffer,
                    0,
                    &self.readback[index],
                    0,
                    RESOLVE_SIZE,
                );
                self.pending_readback = Some(index);
            }
            None => {
                self.skipped_frames += 1;
                self.pending_readback = None;
            }
        }

        self.parity ^= 1;
    }

    /// Maps the staged read-back asynchronously; the result lands in
    /// [`gpu_time_ms`](Self::gpu_time_ms) once the map callback runs.
    pub fn after_submit(&mut self, device: &wgpu::Device) {
        let Some(index) = self.pending_readback.take() else {
            return;
        };
        let flag = Arc::clone(&self.in_flight[index]);
        flag.store(true, Ordering::Release);

        let buffer = self.readback[index].clone();
        let latest = Arc::clone(&self.latest_ms);
        let period = f64::from(self.period);

        self.readback[index]
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if result.is_ok() {
                    {
                        let mapped = buffer.slice(..).get_mapped_range();
                        let words: &[u8] = &mapped;
                        let t0 = u64::from_le_bytes(words[0..8].try_into().expect("8 bytes"));
                        let t1 = u64::from_le_bytes(words[8..16].try_into().expect("8 bytes"));
                        if t1 > t0 {
                            let nanos = (t1 - t0) as f64 * period;
                            *latest.lock() = Some(nanos / 1.0e6);
                        }
                    }
                    buffer.unmap();
                }
                flag.store(false, Ordering::Release);
            });

        // Kick the callback machinery without blocking the frame.
        let _ = device.poll(wgpu::PollType::Poll);
    }

    /// Last completed GPU frame time in milliseconds.
    #[must_use]
    pub fn gpu_time_ms(&self) -> Option<f64> {
        *self.latest_ms.lock()
    }

    /// Frames dropped because every read-back buffer was in flight.
    #[must_use]
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }
}
