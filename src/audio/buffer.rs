//! # PCM Frame Assembly
//!
//! Decoded Opus arrives in chunks of whatever size the decoder produced. The
//! codec needs exact 1920-sample frames. `PcmAssembler` sits in between: it
//! accumulates samples and hands out complete frames, keeping the remainder
//! for the next call.
//!
//! ## Guarantees:
//! - Every emitted frame has exactly `FRAME_SAMPLES` samples
//! - Samples are emitted in arrival order
//! - Nothing is padded, nothing is dropped; a partial tail waits in the buffer

use crate::frame::{AudioFrame, FRAME_SAMPLES};
use std::collections::VecDeque;

/// Accumulates PCM and cuts it into fixed-size frames.
///
/// ## Thread Safety:
/// Owned by a single session actor, so no locking is needed. The actor's
/// context guarantees only one tick touches it at a time.
#[derive(Debug, Default)]
pub struct PcmAssembler {
    /// Pending samples not yet part of a full frame
    pending: VecDeque<f32>,
}

impl PcmAssembler {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(2 * FRAME_SAMPLES),
        }
    }

    /// Append decoded samples and return every frame that is now complete.
    ///
    /// ## Example:
    /// Pushing 2000 samples into an empty assembler returns one frame and
    /// keeps 80 samples pending.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend(samples.iter().copied());

        let mut frames = Vec::with_capacity(self.pending.len() / FRAME_SAMPLES);
        while self.pending.len() >= FRAME_SAMPLES {
            let chunk: Vec<f32> = self.pending.drain(..FRAME_SAMPLES).collect();
            // Length is exact by construction of the drain range
            if let Ok(frame) = AudioFrame::try_from(chunk) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Number of buffered samples waiting for a full frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forget the remainder, e.g. when the stream it came from was abandoned.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2000 samples give one frame and an 80-sample remainder.
    #[test]
    fn test_single_frame_with_remainder() {
        let mut assembler = PcmAssembler::new();
        let frames = assembler.push(&vec![0.5; 2000]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples().len(), FRAME_SAMPLES);
        assert_eq!(assembler.pending(), 80);
    }

    #[test]
    fn test_small_pushes_accumulate() {
        let mut assembler = PcmAssembler::new();
        for _ in 0..3 {
            assert!(assembler.push(&vec![0.0; 600]).is_empty());
        }
        // 1800 pending, 120 more completes a frame exactly
        let frames = assembler.push(&vec![0.0; 120]);
        assert_eq!(frames.len(), 1);
        assert_eq!(assembler.pending(), 0);
    }

    /// Samples come out in the same order they went in, across frame edges.
    #[test]
    fn test_order_preserved_across_frames() {
        let mut assembler = PcmAssembler::new();
        let input: Vec<f32> = (0..(FRAME_SAMPLES * 3 + 7)).map(|i| i as f32).collect();
        let mut out = Vec::new();
        for chunk in input.chunks(500) {
            for frame in assembler.push(chunk) {
                out.extend_from_slice(frame.samples());
            }
        }
        assert_eq!(out.len(), FRAME_SAMPLES * 3);
        assert_eq!(&out[..], &input[..FRAME_SAMPLES * 3]);
        assert_eq!(assembler.pending(), 7);
    }

    #[test]
    fn test_clear_discards_remainder() {
        let mut assembler = PcmAssembler::new();
        assembler.push(&[1.0; 10]);
        assembler.clear();
        assert_eq!(assembler.pending(), 0);
    }
}
