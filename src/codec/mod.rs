//! # Codec Adapter
//!
//! The pipeline talks to the neural audio codec through one small trait with
//! four non-blocking operations: two to submit work and two to poll for results.
//!
//! ## Why polling:
//! The codec runs its own worker threads. Submitting never waits for the
//! result; the bridge tasks poll on a short interval instead.
//!
//! ## Implementations:
//! - **MimiCodec**: the streaming Mimi tokenizer running on candle

pub mod mimi;

pub use mimi::MimiCodec;

use crate::frame::{AudioFrame, TokenFrame};
use anyhow::Result;

/// Streaming PCM <-> token codec.
///
/// ## Contract:
/// - Every call returns promptly; none of them wait for the model
/// - Results come back in submission order
/// - An error means the codec is unusable; callers treat it as fatal
pub trait StreamCodec: Send + Sync {
    /// Submit one 80 ms frame for encoding.
    fn encode(&self, frame: AudioFrame) -> Result<()>;

    /// Next encoded frame, if one is ready.
    fn get_encoded(&self) -> Result<Option<TokenFrame>>;

    /// Submit tokens for decoding.
    fn decode(&self, frame: TokenFrame) -> Result<()>;

    /// Next decoded PCM chunk, if one is ready.
    fn get_decoded(&self) -> Result<Option<Vec<f32>>>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory codec for pipeline tests.

    use super::StreamCodec;
    use crate::frame::{AudioFrame, TokenFrame, FRAME_SAMPLES};
    use anyhow::Result;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Encodes every frame into a single-step, 8-codebook token frame and
    /// decodes every token frame into one frame of PCM.
    ///
    /// Token values carry a running encode counter so tests can follow frames
    /// through the engine. Decoded samples carry the first token divided by 1000.
    #[derive(Default)]
    pub struct ScriptedCodec {
        encoded: Mutex<VecDeque<TokenFrame>>,
        decoded: Mutex<VecDeque<Vec<f32>>>,
        pub encode_calls: AtomicUsize,
        pub decode_calls: AtomicUsize,
        /// Length of each decoded chunk; defaults to one full frame
        pub decoded_len: Option<usize>,
    }

    impl ScriptedCodec {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_decoded_len(len: usize) -> Self {
            Self {
                decoded_len: Some(len),
                ..Self::default()
            }
        }

        pub fn encodes(&self) -> usize {
            self.encode_calls.load(Ordering::SeqCst)
        }

        pub fn decodes(&self) -> usize {
            self.decode_calls.load(Ordering::SeqCst)
        }

        pub fn pending_encoded(&self) -> usize {
            self.encoded.lock().unwrap().len()
        }

        pub fn pending_decoded(&self) -> usize {
            self.decoded.lock().unwrap().len()
        }
    }

    impl StreamCodec for ScriptedCodec {
        fn encode(&self, _frame: AudioFrame) -> Result<()> {
            let n = self.encode_calls.fetch_add(1, Ordering::SeqCst) as u32;
            let tokens = TokenFrame::from_step(vec![n + 1; 8])?;
            self.encoded.lock().unwrap().push_back(tokens);
            Ok(())
        }

        fn get_encoded(&self) -> Result<Option<TokenFrame>> {
            Ok(self.encoded.lock().unwrap().pop_front())
        }

        fn decode(&self, frame: TokenFrame) -> Result<()> {
            self.decode_calls.fetch_add(1, Ordering::SeqCst);
            let len = self.decoded_len.unwrap_or(FRAME_SAMPLES);
            let value = frame.row(0)[0] as f32 / 1000.0;
            self.decoded.lock().unwrap().push_back(vec![value; len]);
            Ok(())
        }

        fn get_decoded(&self) -> Result<Option<Vec<f32>>> {
            Ok(self.decoded.lock().unwrap().pop_front())
        }
    }
}
