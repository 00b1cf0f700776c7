//! # Bridge Tasks
//!
//! Two process-level cooperative tasks move data between the gateway's PCM
//! queues, the codec and the engine channels. Neither ever blocks: each
//! iteration does whatever work is ready, then yields, or sleeps one poll
//! interval when there was nothing to do.
//!
//! - **Encode bridge**: PCM-in to `codec.encode`, `codec.get_encoded` to the engine
//! - **Decode bridge**: engine output to `codec.decode`, `codec.get_decoded` to PCM-out
//!
//! Fences ride along in order: a fence is passed on only once every item
//! submitted to the codec before it has come back out. The codec returns one
//! result per submitted item.
//!
//! Either bridge marks the pipeline failed when the codec errors or the engine
//! side of a channel disconnects.

use super::PipelineHealth;
use crate::codec::StreamCodec;
use crate::frame::AudioFrame;
use crate::transport::{EngineInput, EngineOutput, PcmMessage};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Holds fences back until the codec has caught up with them.
#[derive(Debug, Default)]
struct FenceQueue {
    submitted: u64,
    completed: u64,
    pending: VecDeque<(u64, u64)>,
}

impl FenceQueue {
    fn submit(&mut self) {
        self.submitted += 1;
    }

    fn complete(&mut self) {
        self.completed += 1;
    }

    fn fence(&mut self, id: u64) {
        self.pending.push_back((id, self.submitted));
    }

    /// Next fence whose preceding items are all out of the codec.
    fn release(&mut self) -> Option<u64> {
        match self.pending.front() {
            Some(&(id, after)) if after <= self.completed => {
                self.pending.pop_front();
                Some(id)
            }
            _ => None,
        }
    }
}

pub async fn run_encode_bridge(
    codec: Arc<dyn StreamCodec>,
    pcm_in: Receiver<PcmMessage>,
    to_engine: Sender<EngineInput>,
    health: PipelineHealth,
    poll: Duration,
) {
    debug!("encode bridge started");
    let mut fences = FenceQueue::default();
    'run: while !health.is_failed() {
        let mut busy = false;

        match pcm_in.try_recv() {
            Ok(PcmMessage::Frame(frame)) => {
                if let Err(err) = codec.encode(frame) {
                    health.fail(format!("codec encode failed: {:#}", err));
                    break;
                }
                fences.submit();
                busy = true;
            }
            Ok(PcmMessage::Fence(id)) => {
                fences.fence(id);
                busy = true;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        match codec.get_encoded() {
            Ok(Some(tokens)) => {
                fences.complete();
                if to_engine.send(EngineInput::Frame(tokens)).is_err() {
                    health.fail("inference engine stopped accepting input");
                    break;
                }
                busy = true;
            }
            Ok(None) => {}
            Err(err) => {
                health.fail(format!("codec encoder failed: {:#}", err));
                break;
            }
        }

        while let Some(id) = fences.release() {
            if to_engine.send(EngineInput::Fence(id)).is_err() {
                health.fail("inference engine stopped accepting input");
                break 'run;
            }
        }

        if busy {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(poll).await;
        }
    }
    debug!("encode bridge stopped");
}

pub async fn run_decode_bridge(
    codec: Arc<dyn StreamCodec>,
    from_engine: Receiver<EngineOutput>,
    pcm_out: Sender<PcmMessage>,
    health: PipelineHealth,
    poll: Duration,
) {
    debug!("decode bridge started");
    let mut fences = FenceQueue::default();
    'run: while !health.is_failed() {
        let mut busy = false;

        match from_engine.try_recv() {
            Ok(EngineOutput::Frame(tokens)) => {
                if let Err(err) = codec.decode(tokens) {
                    health.fail(format!("codec decode failed: {:#}", err));
                    break;
                }
                fences.submit();
                busy = true;
            }
            Ok(EngineOutput::Fence(id)) => {
                fences.fence(id);
                busy = true;
            }
            Ok(EngineOutput::Ready) => debug!("ignoring repeated engine ready signal"),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                health.fail("inference engine stopped");
                break;
            }
        }

        match codec.get_decoded() {
            Ok(Some(pcm)) => {
                busy = true;
                fences.complete();
                match AudioFrame::try_from(pcm) {
                    Ok(frame) => {
                        if pcm_out.send(PcmMessage::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    Err(err) => error!("dropping decoded audio: {}", err),
                }
            }
            Ok(None) => {}
            Err(err) => {
                health.fail(format!("codec decoder failed: {:#}", err));
                break;
            }
        }

        while let Some(id) = fences.release() {
            if pcm_out.send(PcmMessage::Fence(id)).is_err() {
                break 'run;
            }
        }

        if busy {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(poll).await;
        }
    }
    debug!("decode bridge stopped");
}
