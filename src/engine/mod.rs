//! # Inference Engine
//!
//! The engine owns the step model and runs it in a single sequential loop on
//! its own OS thread, fed by the client-to-engine channel.
//!
//! ## Loop:
//! 1. Announce `Ready` once the model is in place
//! 2. Block until the next input arrives
//! 3. For a token frame: transpose, keep 8 codebooks, run one step, forward the
//!    generated frame (if any), surface the text token unless it is reserved
//! 4. For a fence: echo it back, so the caller knows everything before it is done
//!
//! ## Failure:
//! Any step error ends the loop with that error. The engine's output sender
//! is dropped on exit, which the gateway observes as a disconnected channel.

pub mod model;
pub mod text;

pub use model::{StepModel, StepOutput};
pub use text::TextTokenizer;

use crate::frame::StepInput;
use crate::transport::{EngineInput, EngineOutput, EnginePorts};
use anyhow::{Context, Result};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Counters reported when the engine loop ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub steps: u64,
    pub frames_out: u64,
    pub text_tokens: u64,
}

pub struct InferenceEngine {
    model: Box<dyn StepModel>,
    tokenizer: TextTokenizer,
    ports: EnginePorts,
    stats: EngineStats,
}

impl InferenceEngine {
    pub fn new(model: Box<dyn StepModel>, tokenizer: TextTokenizer, ports: EnginePorts) -> Self {
        Self {
            model,
            tokenizer,
            ports,
            stats: EngineStats::default(),
        }
    }

    /// Start the loop on a dedicated, named thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<EngineStats>>> {
        std::thread::Builder::new()
            .name("inference-engine".to_string())
            .spawn(move || {
                let result = self.run();
                match &result {
                    Ok(stats) => info!(?stats, "inference engine stopped"),
                    Err(err) => error!("inference engine failed: {:#}", err),
                }
                result
            })
            .context("failed to spawn inference engine thread")
    }

    /// Run until the input channel disconnects or a step fails.
    pub fn run(mut self) -> Result<EngineStats> {
        info!("Inference engine ready (model: {})", self.model.name());
        if self.ports.output.send(EngineOutput::Ready).is_err() {
            return Ok(self.stats);
        }

        // recv() fails once every gateway-side sender is gone
        while let Ok(input) = self.ports.input.recv() {
            let output_open = match input {
                EngineInput::Fence(id) => {
                    debug!(fence = id, "engine fence");
                    self.ports.output.send(EngineOutput::Fence(id)).is_ok()
                }
                EngineInput::Frame(frame) => {
                    let input = StepInput::from_frame(&frame).context("malformed token frame")?;
                    let output = self
                        .model
                        .step(&input)
                        .with_context(|| format!("generation step {} failed", self.stats.steps))?;
                    self.stats.steps += 1;
                    self.emit(output)
                }
            };
            if !output_open {
                debug!("engine output channel closed");
                break;
            }
        }

        Ok(self.stats)
    }

    /// Forward one step's results. Returns false when the gateway is gone.
    fn emit(&mut self, output: StepOutput) -> bool {
        if !output.text.is_reserved() {
            self.stats.text_tokens += 1;
            let piece = self.tokenizer.piece(output.text);
            info!(token = output.text.0, text = %piece, "assistant text");
        }
        match output.audio {
            Some(frame) => {
                self.stats.frames_out += 1;
                self.ports.output.send(EngineOutput::Frame(frame)).is_ok()
            }
            None => true,
        }
    }
}
