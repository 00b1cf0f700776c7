//! # Audio and Token Frames
//!
//! The two payload types that travel through the pipeline:
//!
//! - **AudioFrame**: exactly 80 ms of mono PCM at 24 kHz (1920 `f32` samples)
//! - **TokenFrame**: a grid of discrete codec tokens, one row per codebook
//!
//! ## Key Rust Concepts:
//! - **Newtype pattern**: `AudioFrame` wraps a `Vec<f32>` so a frame of the wrong
//!   length cannot exist past construction
//! - **TryFrom**: fallible conversion is the only way in from raw samples
//! - **Ownership**: frames are moved between stages, never shared

use anyhow::{anyhow, Result};

/// Sample rate used everywhere in the pipeline (Hz).
pub const SAMPLE_RATE: u32 = 24_000;

/// Mono audio only.
pub const CHANNELS: u16 = 1;

/// 80 ms at 24 kHz, the codec's hop size.
pub const FRAME_SAMPLES: usize = 1920;

/// Number of codebooks the language model consumes per step.
pub const MODEL_INPUT_CODEBOOKS: usize = 8;

/// Exactly one codec hop of mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame(Vec<f32>);

impl AudioFrame {
    /// A frame of zeros, used to prime the pipeline.
    pub fn silence() -> Self {
        Self(vec![0.0; FRAME_SAMPLES])
    }

    pub fn samples(&self) -> &[f32] {
        &self.0
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.0
    }
}

impl TryFrom<Vec<f32>> for AudioFrame {
    type Error = anyhow::Error;

    fn try_from(samples: Vec<f32>) -> Result<Self> {
        if samples.len() != FRAME_SAMPLES {
            return Err(anyhow!(
                "audio frame must hold {} samples, got {}",
                FRAME_SAMPLES,
                samples.len()
            ));
        }
        Ok(Self(samples))
    }
}

/// Codec tokens for one or more time steps.
///
/// ## Layout:
/// Stored codebook-major: `codes[c * steps + t]` is codebook `c` at step `t`.
/// This matches the `(1, codebooks, steps)` tensor the codec produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFrame {
    codebooks: usize,
    steps: usize,
    codes: Vec<u32>,
}

impl TokenFrame {
    /// Build a frame from one row per codebook. All rows must share a length.
    pub fn from_rows(rows: Vec<Vec<u32>>) -> Result<Self> {
        let codebooks = rows.len();
        if codebooks == 0 {
            return Err(anyhow!("token frame needs at least one codebook"));
        }
        let steps = rows[0].len();
        if steps == 0 {
            return Err(anyhow!("token frame needs at least one step"));
        }
        if rows.iter().any(|row| row.len() != steps) {
            return Err(anyhow!("token frame rows have inconsistent lengths"));
        }
        Ok(Self {
            codebooks,
            steps,
            codes: rows.into_iter().flatten().collect(),
        })
    }

    /// Build a single-step frame from one token per codebook.
    #[cfg(test)]
    pub fn from_step(tokens: Vec<u32>) -> Result<Self> {
        Self::from_rows(tokens.into_iter().map(|t| vec![t]).collect())
    }

    /// Build a frame from step-major rows (the inverse of `transpose`).
    pub fn from_steps(steps: &[Vec<u32>]) -> Result<Self> {
        let codebooks = steps.first().map(Vec::len).unwrap_or(0);
        if steps.iter().any(|step| step.len() != codebooks) {
            return Err(anyhow!("token frame steps have inconsistent widths"));
        }
        let rows = (0..codebooks)
            .map(|c| steps.iter().map(|step| step[c]).collect())
            .collect();
        Self::from_rows(rows)
    }

    pub fn codebooks(&self) -> usize {
        self.codebooks
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Tokens of codebook `c` across all steps.
    pub fn row(&self, c: usize) -> &[u32] {
        &self.codes[c * self.steps..(c + 1) * self.steps]
    }

    /// Flat codebook-major storage, ready for a `(1, codebooks, steps)` tensor.
    pub fn as_slice(&self) -> &[u32] {
        &self.codes
    }

    /// Step-major view: one inner vector per time step, one entry per codebook.
    pub fn transpose(&self) -> Vec<Vec<u32>> {
        (0..self.steps)
            .map(|t| (0..self.codebooks).map(|c| self.codes[c * self.steps + t]).collect())
            .collect()
    }
}

/// Input of one generation step: time steps by the first 8 codebooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInput {
    rows: Vec<Vec<u32>>,
}

impl StepInput {
    /// Transpose the frame to `steps x codebooks` and keep the first 8 columns.
    ///
    /// Fails when the frame carries fewer codebooks than the model consumes.
    pub fn from_frame(frame: &TokenFrame) -> Result<Self> {
        if frame.codebooks() < MODEL_INPUT_CODEBOOKS {
            return Err(anyhow!(
                "token frame has {} codebooks, model needs {}",
                frame.codebooks(),
                MODEL_INPUT_CODEBOOKS
            ));
        }
        let rows = frame
            .transpose()
            .into_iter()
            .map(|mut step| {
                step.truncate(MODEL_INPUT_CODEBOOKS);
                step
            })
            .collect();
        Ok(Self { rows })
    }

    pub fn steps(&self) -> &[Vec<u32>] {
        &self.rows
    }
}

/// One text token produced by a generation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextToken(pub u32);

impl TextToken {
    /// Padding / end-of-padding ids that are never shown to anyone.
    pub const RESERVED: [u32; 2] = [0, 3];

    pub fn is_reserved(self) -> bool {
        Self::RESERVED.contains(&self.0)
    }
}
