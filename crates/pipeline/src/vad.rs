//! Energy-threshold voice-activity detector used to trigger barge-in.
//!
//! Mirrors the detector this system was distilled from: mean absolute
//! amplitude over at most the first 50 samples of a packet, normalized by
//! 2^15, checked against a threshold; "continuous voice" requires voiced
//! packets in more than 30% of a rolling 20-packet window.

const WINDOW_SIZE: u32 = 20;
const MAX_SAMPLES: usize = 50;
const CONTINUOUS_VOICE_RATIO: f32 = 0.3;

pub struct VoiceActivityDetector {
    energy_threshold: f32,
    frame_count: u32,
    voice_frames: u32,
}

impl VoiceActivityDetector {
    pub fn new(energy_threshold: f32) -> Self {
        Self {
            energy_threshold,
            frame_count: 0,
            voice_frames: 0,
        }
    }

    /// Resets the rolling window.
    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.voice_frames = 0;
    }

    /// Classifies one inbound PCM16LE packet as voiced or not, updating the
    /// rolling window. Packets under 10 bytes are never voiced.
    pub fn detect(&mut self, pcm: &[u8]) -> bool {
        if pcm.len() < 10 {
            return false;
        }

        self.frame_count += 1;
        if self.frame_count > WINDOW_SIZE {
            self.reset();
        }

        let sample_count = MAX_SAMPLES.min(pcm.len() / 2);
        if sample_count == 0 {
            return false;
        }

        let mut energy_sum: i64 = 0;
        for i in 0..sample_count {
            let lo = pcm[i * 2];
            let hi = pcm[i * 2 + 1];
            let sample = i16::from_le_bytes([lo, hi]);
            energy_sum += (sample as i64).abs();
        }

        let mean_energy = energy_sum as f32 / sample_count as f32;
        let normalized = mean_energy / 32768.0;
        let has_voice = normalized > self.energy_threshold;
        if has_voice {
            self.voice_frames += 1;
        }
        has_voice
    }

    /// True once voiced packets exceed 30% of the current window.
    pub fn has_continuous_voice(&self) -> bool {
        self.voice_frames as f32 > (WINDOW_SIZE as f32 * CONTINUOUS_VOICE_RATIO)
    }
}
