//! # Step Models
//!
//! A step model consumes one `StepInput` and produces one text token plus at
//! most one frame of assistant audio tokens. The engine loop is written
//! against the `StepModel` trait; the language model itself is opaque.

use crate::frame::{StepInput, TextToken, TokenFrame, MODEL_INPUT_CODEBOOKS};
use anyhow::{anyhow, Result};
use std::collections::VecDeque;

/// Pad token emitted when a model has nothing to say.
pub const TEXT_PAD: TextToken = TextToken(3);

/// Result of one generation step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub text: TextToken,
    pub audio: Option<TokenFrame>,
}

/// One generation step at a time, strictly sequential.
pub trait StepModel: Send {
    fn step(&mut self, input: &StepInput) -> Result<StepOutput>;

    /// Short name for logs and the health endpoint.
    fn name(&self) -> &'static str;
}

/// Build a step model from its configured name.
pub fn build(kind: &str, echo_delay_steps: usize) -> Result<Box<dyn StepModel>> {
    match kind {
        "echo" => Ok(Box::new(EchoModel::new(echo_delay_steps))),
        other => Err(anyhow!("unknown engine kind: {}", other)),
    }
}

/// Loopback model: replays the user's audio tokens `delay` steps later.
///
/// ## Behavior:
/// - Always answers with exactly one audio frame per step
/// - Until `delay` inputs have been buffered, answers with an all-zero frame
/// - Text output is always the pad token
///
/// Useful to run the whole duplex path end to end without a language model.
#[derive(Debug)]
pub struct EchoModel {
    delay: usize,
    queue: VecDeque<Vec<Vec<u32>>>,
}

impl EchoModel {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            queue: VecDeque::with_capacity(delay + 1),
        }
    }
}

impl StepModel for EchoModel {
    fn step(&mut self, input: &StepInput) -> Result<StepOutput> {
        self.queue.push_back(input.steps().to_vec());

        let rows = if self.queue.len() > self.delay {
            self.queue
                .pop_front()
                .ok_or_else(|| anyhow!("echo queue unexpectedly empty"))?
        } else {
            vec![vec![0; MODEL_INPUT_CODEBOOKS]; input.steps().len()]
        };

        Ok(StepOutput {
            text: TEXT_PAD,
            audio: Some(TokenFrame::from_steps(&rows)?),
        })
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(tag: u32) -> StepInput {
        StepInput::from_frame(&TokenFrame::from_step(vec![tag; 8]).unwrap()).unwrap()
    }

    #[test]
    fn test_echo_without_delay_replays_immediately() {
        let mut model = EchoModel::new(0);
        let out = model.step(&input(7)).unwrap();
        assert_eq!(out.audio.unwrap().row(0), &[7]);
        assert!(out.text.is_reserved());
    }

    /// The first `delay` steps answer with silence tokens, then inputs replay in order.
    #[test]
    fn test_echo_delay_preserves_order() {
        let mut model = EchoModel::new(2);
        let outputs: Vec<u32> = (1..=5)
            .map(|tag| model.step(&input(tag)).unwrap().audio.unwrap().row(0)[0])
            .collect();
        assert_eq!(outputs, vec![0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_build_rejects_unknown_kind() {
        assert!(build("echo", 1).is_ok());
        assert!(build("moshi-7b", 1).is_err());
    }
}
