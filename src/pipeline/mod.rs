//! # Audio Pipeline
//!
//! Wires the codec, the inference engine and the gateway's PCM queues together.
//!
//! ## Startup order:
//! 1. Create every channel (`Transport::new`)
//! 2. Start the engine on its own thread
//! 3. Run warmup on a blocking thread and wait for it
//! 4. Start the encode and decode bridges
//! 5. Hand the PCM-in / PCM-out ends to the gateway
//!
//! ## Health:
//! `PipelineHealth` is shared by everything that can observe a failure. Once
//! it reports `Failed`, new sessions are refused, live sessions close and the
//! server shuts down.

pub mod bridge;
pub mod warmup;

use crate::codec::StreamCodec;
use crate::config::PipelineConfig;
use crate::engine::{InferenceEngine, StepModel, TextTokenizer};
use crate::transport::{PcmMessage, Transport};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use warmup::{run_warmup, WarmupSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PipelineStatus {
    Starting,
    Ready,
    Failed(String),
}

/// Shared, observable pipeline status. Cloning shares the same status.
#[derive(Debug, Clone)]
pub struct PipelineHealth {
    tx: Arc<watch::Sender<PipelineStatus>>,
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineHealth {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PipelineStatus::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub fn status(&self) -> PipelineStatus {
        self.tx.borrow().clone()
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.tx.borrow(), PipelineStatus::Failed(_))
    }

    pub fn set_ready(&self) {
        self.tx.send_if_modified(|status| {
            if *status == PipelineStatus::Starting {
                *status = PipelineStatus::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Record a failure. The first reason wins; later calls are ignored.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|status| {
            if matches!(status, PipelineStatus::Failed(_)) {
                return false;
            }
            error!("Pipeline failed: {}", reason);
            *status = PipelineStatus::Failed(reason.clone());
            true
        });
    }

    /// Resolve with the failure reason once the pipeline has failed.
    pub async fn wait_failed(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            let failed = match &*rx.borrow_and_update() {
                PipelineStatus::Failed(reason) => Some(reason.clone()),
                _ => None,
            };
            if let Some(reason) = failed {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender gone: the status can never change again
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Gateway-side ends of the PCM queues.
#[derive(Debug, Clone)]
pub struct GatewayHandles {
    pub pcm_in: Sender<PcmMessage>,
    pub pcm_out: Receiver<PcmMessage>,
    next_fence: Arc<AtomicU64>,
}

impl GatewayHandles {
    pub fn new(pcm_in: Sender<PcmMessage>, pcm_out: Receiver<PcmMessage>) -> Self {
        Self {
            pcm_in,
            pcm_out,
            next_fence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Put a fresh fence on PCM-in and return its id.
    ///
    /// Everything on PCM-out before the matching fence belongs to audio that
    /// was queued earlier. Ids grow monotonically; `0` is left to warmup.
    pub fn issue_fence(&self) -> Result<u64> {
        let id = self.next_fence.fetch_add(1, Ordering::Relaxed);
        self.pcm_in
            .send(PcmMessage::Fence(id))
            .context("encode bridge stopped")?;
        Ok(id)
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Start the engine, warm everything up and launch the bridges.
    ///
    /// Returns only after warmup has finished, so no client can connect to a
    /// cold pipeline. Warmup failure is returned and recorded in `health`.
    pub async fn launch(
        codec: Arc<dyn StreamCodec>,
        model: Box<dyn StepModel>,
        tokenizer: TextTokenizer,
        settings: &PipelineConfig,
        health: PipelineHealth,
    ) -> Result<GatewayHandles> {
        let Transport { link, ports, pcm } = Transport::new();

        // Detached; its exit is observed through the disconnected output channel
        InferenceEngine::new(model, tokenizer, ports).spawn()?;

        let warmup_codec = codec.clone();
        let warmup_link = link.clone();
        let warmup_settings = WarmupSettings::from(settings);
        let warmup = tokio::task::spawn_blocking(move || {
            run_warmup(warmup_codec.as_ref(), &warmup_link, &warmup_settings)
        })
        .await
        .context("warmup task panicked")
        .and_then(|result| result);

        if let Err(err) = &warmup {
            health.fail(format!("warmup failed: {:#}", err));
        }
        let report = warmup?;
        info!(iterations = report.iterations, "Pipeline warmed up");

        health.set_ready();

        tokio::spawn(bridge::run_encode_bridge(
            codec.clone(),
            pcm.pcm_in_rx.clone(),
            link.to_engine.clone(),
            health.clone(),
            settings.poll_interval(),
        ));
        tokio::spawn(bridge::run_decode_bridge(
            codec,
            link.from_engine.clone(),
            pcm.pcm_out_tx.clone(),
            health,
            settings.poll_interval(),
        ));

        Ok(GatewayHandles::new(pcm.pcm_in_tx, pcm.pcm_out_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::ScriptedCodec;
    use crate::engine::model::EchoModel;
    use crate::frame::AudioFrame;
    use std::time::Duration;

    fn settings() -> PipelineConfig {
        PipelineConfig {
            poll_interval_ms: 1,
            warmup_poll_ms: 1,
            warmup_timeout_ms: 2000,
        }
    }

    #[test]
    fn test_health_transitions() {
        let health = PipelineHealth::new();
        assert_eq!(health.status(), PipelineStatus::Starting);
        health.set_ready();
        assert_eq!(health.status(), PipelineStatus::Ready);
        health.fail("first");
        health.fail("second");
        assert_eq!(health.status(), PipelineStatus::Failed("first".into()));
        // A failed pipeline never becomes ready again
        health.set_ready();
        assert!(health.is_failed());
    }

    #[tokio::test]
    async fn test_wait_failed_resolves() {
        let health = PipelineHealth::new();
        let waiter = {
            let health = health.clone();
            tokio::spawn(async move { health.wait_failed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        health.fail("engine gone");
        assert_eq!(waiter.await.unwrap(), "engine gone");
    }

    async fn launch_echo(codec: Arc<ScriptedCodec>) -> GatewayHandles {
        Pipeline::launch(
            codec,
            Box::new(EchoModel::new(0)),
            TextTokenizer::raw(),
            &settings(),
            PipelineHealth::new(),
        )
        .await
        .unwrap()
    }

    async fn next_message(handles: &GatewayHandles) -> PcmMessage {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(msg) = handles.pcm_out.try_recv() {
                    return msg;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap()
    }

    fn first_sample(msg: PcmMessage) -> f32 {
        match msg {
            PcmMessage::Frame(frame) => frame.samples()[0],
            PcmMessage::Fence(id) => panic!("unexpected fence {}", id),
        }
    }

    /// User frames travel codec -> engine -> codec and come back as PCM.
    #[tokio::test]
    async fn test_launch_round_trip() {
        let codec = Arc::new(ScriptedCodec::new());
        let health = PipelineHealth::new();
        let handles = Pipeline::launch(
            codec.clone(),
            Box::new(EchoModel::new(0)),
            TextTokenizer::raw(),
            &settings(),
            health.clone(),
        )
        .await
        .unwrap();
        assert_eq!(health.status(), PipelineStatus::Ready);
        assert!(handles.pcm_out.is_empty());

        handles
            .pcm_in
            .send(PcmMessage::Frame(AudioFrame::silence()))
            .unwrap();
        // Echo without delay replays the fifth encoded frame (four went to warmup)
        assert_eq!(first_sample(next_message(&handles).await), 0.005);
    }

    /// Output of audio queued before a fence never shows up after it.
    #[tokio::test]
    async fn test_fence_separates_earlier_audio() {
        let handles = launch_echo(Arc::new(ScriptedCodec::new())).await;

        handles
            .pcm_in
            .send(PcmMessage::Frame(AudioFrame::silence()))
            .unwrap();
        let fence = handles.issue_fence().unwrap();
        handles
            .pcm_in
            .send(PcmMessage::Frame(AudioFrame::silence()))
            .unwrap();

        assert_eq!(first_sample(next_message(&handles).await), 0.005);
        assert!(matches!(next_message(&handles).await, PcmMessage::Fence(id) if id == fence));
        assert_eq!(first_sample(next_message(&handles).await), 0.006);
    }

    #[tokio::test]
    async fn test_fence_ids_increase() {
        let handles = launch_echo(Arc::new(ScriptedCodec::new())).await;
        let other = handles.clone();
        let first = handles.issue_fence().unwrap();
        let second = other.issue_fence().unwrap();
        assert!(first >= 1);
        assert!(second > first);
    }
}
