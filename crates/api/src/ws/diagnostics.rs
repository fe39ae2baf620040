//! Lightweight inbound-audio observability for one connection.
//!
//! Ported from the original's `AudioDiagnostics`/`analyze_audio_format`
//! helpers: aggregate chunk/byte counters logged every few seconds, plus a
//! one-shot sanity check on the very first packet to catch an obviously
//! silent or misconfigured microphone early. Pure observability — nothing
//! here changes protocol behavior.

use std::time::{Duration, Instant};

use tracing::{info, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
/// Below this average chunk size (bytes), traffic looks abnormally sparse.
const SMALL_CHUNK_WARNING_THRESHOLD: f64 = 64.0;

pub struct AudioDiagnostics {
    chunk_count: u64,
    total_bytes: u64,
    window_start: Instant,
    analyzed_first_packet: bool,
}

impl AudioDiagnostics {
    pub fn new() -> Self {
        Self {
            chunk_count: 0,
            total_bytes: 0,
            window_start: Instant::now(),
            analyzed_first_packet: false,
        }
    }

    /// Records one inbound PCM packet and periodically logs aggregate
    /// throughput stats. Call once per packet, after the header is stripped.
    pub fn record(&mut self, pcm: &[u8]) {
        if !self.analyzed_first_packet {
            self.analyzed_first_packet = true;
            analyze_audio_format(pcm);
        }

        self.chunk_count += 1;
        self.total_bytes += pcm.len() as u64;

        if self.window_start.elapsed() >= REPORT_INTERVAL {
            let avg_chunk_size = self.total_bytes as f64 / self.chunk_count.max(1) as f64;
            if avg_chunk_size < SMALL_CHUNK_WARNING_THRESHOLD {
                warn!(
                    chunk_count = self.chunk_count,
                    total_bytes = self.total_bytes,
                    avg_chunk_size,
                    "inbound audio chunks are unusually small"
                );
            } else {
                info!(
                    chunk_count = self.chunk_count,
                    total_bytes = self.total_bytes,
                    avg_chunk_size,
                    "inbound audio traffic report"
                );
            }
            self.chunk_count = 0;
            self.total_bytes = 0;
            self.window_start = Instant::now();
        }
    }
}

impl Default for AudioDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot sanity check on the first packet of a session: flags a
/// suspiciously narrow amplitude range (near-silence) or an all-zero buffer,
/// which usually means a muted or misconfigured microphone upstream.
fn analyze_audio_format(pcm: &[u8]) {
    let sample_count = (pcm.len() / 2).min(10);
    if sample_count == 0 {
        return;
    }

    let mut min = i16::MAX;
    let mut max = i16::MIN;
    let mut all_zero = true;
    for i in 0..sample_count {
        let sample = i16::from_le_bytes([pcm[i * 2], pcm[i * 2 + 1]]);
        if sample != 0 {
            all_zero = false;
        }
        min = min.min(sample);
        max = max.max(sample);
    }

    if all_zero {
        warn!("first audio packet is entirely silent (all-zero samples)");
    } else {
        // Widen to i32 before subtracting — a loud packet spanning
        // i16::MIN..i16::MAX overflows i16 arithmetic.
        let range = max as i32 - min as i32;
        if range < 64 {
            warn!(range, "first audio packet has a suspiciously narrow amplitude range");
        }
    }
}
