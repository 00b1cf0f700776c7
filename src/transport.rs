//! # Channel Transport
//!
//! Unbounded FIFO queues that connect the gateway side of the process to the
//! inference engine worker, plus the two PCM queues the gateway uses
//! internally.
//!
//! ## Ownership:
//! `Transport::new()` creates every channel once. The ends are then moved into
//! the component that owns them, so each queue has a single producer side and a
//! single consumer side for its whole lifetime. Messages are moved, never
//! aliased.
//!
//! ## Disconnects:
//! When every sender of a channel is dropped, the receiver reports
//! `Disconnected`. The pipeline treats that as the peer having died.

use crate::frame::{AudioFrame, TokenFrame};
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Gateway to engine.
#[derive(Debug)]
pub enum EngineInput {
    /// User audio tokens for one generation step.
    Frame(TokenFrame),
    /// Echoed back unchanged once every earlier input has been processed.
    Fence(u64),
}

/// Engine to gateway.
#[derive(Debug)]
pub enum EngineOutput {
    /// Sent once, when the engine has loaded and is ready for input.
    Ready,
    /// Generated assistant audio tokens.
    Frame(TokenFrame),
    /// Answer to an `EngineInput::Fence` with the same id.
    Fence(u64),
}

/// Gateway-side ends of the engine channels.
#[derive(Debug, Clone)]
pub struct EngineLink {
    pub to_engine: Sender<EngineInput>,
    pub from_engine: Receiver<EngineOutput>,
}

/// Engine-side ends of the engine channels.
#[derive(Debug)]
pub struct EnginePorts {
    pub input: Receiver<EngineInput>,
    pub output: Sender<EngineOutput>,
}

/// What travels on the PCM queues.
///
/// A `Fence` entered on PCM-in comes out on PCM-out after every frame that
/// was queued before it, which lets a new session tell leftover audio of
/// the previous one from its own.
#[derive(Debug)]
pub enum PcmMessage {
    Frame(AudioFrame),
    Fence(u64),
}

/// PCM-in (assembled user frames) and PCM-out (decoded assistant frames).
#[derive(Debug, Clone)]
pub struct PcmQueues {
    pub pcm_in_tx: Sender<PcmMessage>,
    pub pcm_in_rx: Receiver<PcmMessage>,
    pub pcm_out_tx: Sender<PcmMessage>,
    pub pcm_out_rx: Receiver<PcmMessage>,
}

/// All channels of one pipeline, before they are handed out.
pub struct Transport {
    pub link: EngineLink,
    pub ports: EnginePorts,
    pub pcm: PcmQueues,
}

impl Transport {
    pub fn new() -> Self {
        let (to_engine, input) = unbounded();
        let (output, from_engine) = unbounded();
        let (pcm_in_tx, pcm_in_rx) = unbounded();
        let (pcm_out_tx, pcm_out_rx) = unbounded();

        Self {
            link: EngineLink {
                to_engine,
                from_engine,
            },
            ports: EnginePorts { input, output },
            pcm: PcmQueues {
                pcm_in_tx,
                pcm_in_rx,
                pcm_out_tx,
                pcm_out_rx,
            },
        }
    }
}
