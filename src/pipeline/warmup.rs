//! # Warmup Synchronizer
//!
//! Before any client is admitted, the codec and the engine are primed with a
//! few frames of silence so their streaming state and any lazy initialization
//! are settled.
//!
//! ## Sequence:
//! 1. Wait for the engine's `Ready`
//! 2. Four iterations: encode silence, poll for tokens, push them to the engine;
//!    from the second iteration on, also take one generated frame back, decode
//!    it and poll for the PCM
//! 3. Send a fence and discard every engine output up to it, then drop any
//!    codec results still pending, so nothing produced here can reach a client
//!
//! Runs synchronously; callers put it on a blocking thread.

use crate::codec::StreamCodec;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::frame::{AudioFrame, TokenFrame};
use crate::transport::{EngineInput, EngineLink, EngineOutput};
use anyhow::Result;
use crossbeam_channel::RecvTimeoutError;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Number of priming iterations.
pub const WARMUP_ITERATIONS: usize = 4;

/// Fence id used to mark the end of warmup traffic.
const WARMUP_FENCE: u64 = 0;

#[derive(Debug, Clone)]
pub struct WarmupSettings {
    /// Interval between codec polls
    pub poll: Duration,
    /// Upper bound on any single wait
    pub timeout: Duration,
}

impl From<&PipelineConfig> for WarmupSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            poll: config.warmup_poll(),
            timeout: config.warmup_timeout(),
        }
    }
}

/// Progress of a warmup run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WarmupState {
    pub completed: usize,
}

/// Outcome of a finished warmup.
#[derive(Debug, Clone)]
pub struct WarmupReport {
    pub iterations: usize,
    pub discarded_frames: usize,
    pub elapsed: Duration,
}

/// Run the full warmup against a live engine.
pub fn run_warmup(
    codec: &dyn StreamCodec,
    link: &EngineLink,
    settings: &WarmupSettings,
) -> Result<WarmupReport> {
    let started = Instant::now();
    wait_for_ready(link, settings.timeout)?;
    info!("Engine ready, warming up ({} iterations)", WARMUP_ITERATIONS);

    let mut state = WarmupState::default();
    while state.completed < WARMUP_ITERATIONS {
        codec.encode(AudioFrame::silence())?;
        let tokens = poll_until("encoded warmup frame", settings, || codec.get_encoded())?;
        link.to_engine
            .send(EngineInput::Frame(tokens))
            .map_err(|_| PipelineError::EngineFailure("engine input closed during warmup".into()))?;

        if state.completed > 0 {
            let generated = recv_frame(link, settings.timeout)?;
            codec.decode(generated)?;
            poll_until("decoded warmup pcm", settings, || codec.get_decoded())?;
        }

        state.completed += 1;
        debug!(iteration = state.completed, "warmup iteration done");
    }

    let discarded_frames = drain_to_fence(codec, link, settings.timeout)?;
    let report = WarmupReport {
        iterations: state.completed,
        discarded_frames,
        elapsed: started.elapsed(),
    };
    info!(
        "Warmup finished in {:.2}s ({} leftover frames discarded)",
        report.elapsed.as_secs_f64(),
        report.discarded_frames
    );
    Ok(report)
}

fn engine_failure(msg: impl Into<String>) -> anyhow::Error {
    PipelineError::EngineFailure(msg.into()).into()
}

fn wait_for_ready(link: &EngineLink, timeout: Duration) -> Result<()> {
    match link.from_engine.recv_timeout(timeout) {
        Ok(EngineOutput::Ready) => Ok(()),
        Ok(other) => Err(engine_failure(format!("expected ready signal, got {:?}", other))),
        Err(RecvTimeoutError::Timeout) => Err(engine_failure("engine did not become ready in time")),
        Err(RecvTimeoutError::Disconnected) => Err(engine_failure("engine stopped before ready")),
    }
}

/// Block until the engine returns one generated frame.
fn recv_frame(link: &EngineLink, timeout: Duration) -> Result<TokenFrame> {
    match link.from_engine.recv_timeout(timeout) {
        Ok(EngineOutput::Frame(frame)) => Ok(frame),
        Ok(other) => Err(engine_failure(format!("expected token frame, got {:?}", other))),
        Err(RecvTimeoutError::Timeout) => Err(engine_failure("timed out waiting for a generated frame")),
        Err(RecvTimeoutError::Disconnected) => Err(engine_failure("engine stopped during warmup")),
    }
}

/// Poll a non-blocking source every `settings.poll` until it yields.
fn poll_until<T>(
    what: &str,
    settings: &WarmupSettings,
    mut poll: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let deadline = Instant::now() + settings.timeout;
    loop {
        if let Some(value) = poll()? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(engine_failure(format!("timed out waiting for {}", what)));
        }
        std::thread::sleep(settings.poll);
    }
}

/// Fence the engine and throw away everything it produced before the fence.
fn drain_to_fence(codec: &dyn StreamCodec, link: &EngineLink, timeout: Duration) -> Result<usize> {
    link.to_engine
        .send(EngineInput::Fence(WARMUP_FENCE))
        .map_err(|_| engine_failure("engine input closed during warmup"))?;

    let mut discarded = 0;
    loop {
        match link.from_engine.recv_timeout(timeout) {
            Ok(EngineOutput::Fence(WARMUP_FENCE)) => break,
            Ok(EngineOutput::Frame(_)) => discarded += 1,
            Ok(other) => debug!("ignoring {:?} while draining warmup output", other),
            Err(RecvTimeoutError::Timeout) => {
                return Err(engine_failure("timed out waiting for warmup fence"))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(engine_failure("engine stopped during warmup"))
            }
        }
    }

    while codec.get_encoded()?.is_some() {}
    while codec.get_decoded()?.is_some() {}
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::ScriptedCodec;
    use crate::engine::model::{EchoModel, TEXT_PAD};
    use crate::engine::{InferenceEngine, StepModel, StepOutput, TextTokenizer};
    use crate::frame::StepInput;
    use crate::transport::Transport;

    fn settings() -> WarmupSettings {
        WarmupSettings {
            poll: Duration::from_millis(1),
            timeout: Duration::from_millis(2000),
        }
    }

    fn warm_up(model: Box<dyn StepModel>) -> (ScriptedCodec, EngineLink, WarmupReport) {
        let Transport { link, ports, .. } = Transport::new();
        InferenceEngine::new(model, TextTokenizer::raw(), ports)
            .spawn()
            .unwrap();
        let codec = ScriptedCodec::new();
        let report = run_warmup(&codec, &link, &settings()).unwrap();
        (codec, link, report)
    }

    /// Answers every step except the first.
    struct LaggingModel {
        steps: u64,
    }

    impl StepModel for LaggingModel {
        fn step(&mut self, input: &StepInput) -> Result<StepOutput> {
            self.steps += 1;
            Ok(StepOutput {
                text: TEXT_PAD,
                audio: if self.steps == 1 {
                    None
                } else {
                    Some(TokenFrame::from_steps(input.steps())?)
                },
            })
        }

        fn name(&self) -> &'static str {
            "lagging"
        }
    }

    /// Four encodes, three decodes, and nothing left behind.
    #[test]
    fn test_warmup_counts_and_leaves_nothing() {
        let (codec, link, report) = warm_up(Box::new(LaggingModel { steps: 0 }));
        assert_eq!(report.iterations, WARMUP_ITERATIONS);
        assert_eq!(codec.encodes(), 4);
        assert_eq!(codec.decodes(), 3);
        assert_eq!(report.discarded_frames, 0);
        assert_eq!(codec.pending_encoded(), 0);
        assert_eq!(codec.pending_decoded(), 0);
        assert!(link.from_engine.try_recv().is_err());
    }

    /// An engine that answers every input leaves the fourth answer behind; it is discarded.
    #[test]
    fn test_warmup_discards_trailing_frame() {
        let (codec, link, report) = warm_up(Box::new(EchoModel::new(1)));
        assert_eq!(codec.encodes(), 4);
        assert_eq!(codec.decodes(), 3);
        assert_eq!(report.discarded_frames, 1);
        assert!(link.from_engine.try_recv().is_err());
    }

    #[test]
    fn test_warmup_times_out_without_ready() {
        let Transport { link, ports, .. } = Transport::new();
        let quick = WarmupSettings {
            poll: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        };
        let err = run_warmup(&ScriptedCodec::new(), &link, &quick).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EngineFailure(_))
        ));
        drop(ports);
    }

    #[test]
    fn test_warmup_fails_when_engine_is_gone() {
        let Transport { link, ports, .. } = Transport::new();
        drop(ports);
        assert!(run_warmup(&ScriptedCodec::new(), &link, &settings()).is_err());
    }
}
