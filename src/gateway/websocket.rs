//! # Chat WebSocket Handler
//!
//! Clients connect to `/api/chat` and talk the binary protocol from
//! [`crate::protocol`]: the server sends `0x00` once the session is live, then
//! both sides exchange `0x01` messages carrying Ogg/Opus audio.
//!
//! ## Session lifecycle:
//! 1. **Upgrade**: refused with 503 if the pipeline has failed
//! 2. **Lock**: the actor waits for the process-wide [`SessionLock`]; while
//!    waiting it processes nothing
//! 3. **Handshake**: a fence goes into the pipeline, `0x00` is sent, streaming
//!    starts. Output that arrives before the fence comes back belongs to an
//!    earlier session and is discarded
//! 4. **Streaming**: the stream handler feeds client audio to the Opus reader
//!    while three interval ticks move audio through the pipeline:
//!    - **PCM assembler**: decoded PCM to 1920-sample frames on PCM-in. A
//!      client stream with broken Ogg framing is dropped and the reader
//!      starts over; the connection stays open
//!    - **Output writer**: PCM-out frames into the Opus writer
//!    - **Opus sender**: finished Ogg pages to the client as `0x01` messages
//! 5. **Close**: the actor stops, its ticks stop with it, and only then is the
//!    lock guard dropped
//!
//! ## Actor Model:
//! All of the above runs on the actor's single-threaded context, so the
//! session's reader, writer and assembler need no locking.

use super::lock::{SessionGuard, SessionLock};
use super::session::ChatSession;
use crate::audio::{OggOpusReader, OggOpusWriter, PcmAssembler};
use crate::error::{AppError, PipelineError};
use crate::protocol::{self, ClientMessage};
use crate::state::{AppMetrics, AppState};
use crate::transport::PcmMessage;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// WebSocket actor for one chat connection.
pub struct ChatSocket {
    session: ChatSession,
    reader: OggOpusReader,
    writer: OggOpusWriter,
    assembler: PcmAssembler,
    guard: Option<SessionGuard>,
    /// Fence that separates earlier sessions' output from ours
    awaiting_fence: Option<u64>,
    lock: SessionLock,
    state: AppState,
    poll: Duration,
}

impl ChatSocket {
    pub fn new(state: AppState, reader: OggOpusReader, writer: OggOpusWriter, poll: Duration) -> Self {
        Self {
            session: ChatSession::new(),
            reader,
            writer,
            assembler: PcmAssembler::new(),
            guard: None,
            awaiting_fence: None,
            lock: state.session_lock.clone(),
            state,
            poll,
        }
    }

    /// Runs once the session lock is held.
    fn begin_streaming(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.check_alive(ctx) {
            return;
        }

        match self.state.audio.issue_fence() {
            Ok(id) => self.awaiting_fence = Some(id),
            Err(err) => {
                self.state.health.fail(format!("{:#}", err));
                self.check_alive(ctx);
                return;
            }
        }

        ctx.binary(protocol::handshake());
        let started = self
            .session
            .handshake_sent()
            .and_then(|_| self.session.start_streaming());
        if let Err(err) = started {
            error!(session_id = %self.session.session_id, "{}", err);
            self.shut(ctx, ws::CloseCode::Error.into());
            return;
        }
        AppMetrics::incr(&self.state.metrics.sessions_started);
        info!(session_id = %self.session.session_id, "Chat session streaming");

        ctx.run_interval(self.poll, |act, ctx| act.assemble_tick(ctx));
        ctx.run_interval(self.poll, |act, ctx| act.output_tick(ctx));
        ctx.run_interval(self.poll, |act, ctx| act.send_tick(ctx));
    }

    /// Stop the actor when the session is closed or the pipeline has failed.
    fn check_alive(&mut self, ctx: &mut ws::WebsocketContext<Self>) -> bool {
        if self.session.is_closed() {
            ctx.stop();
            return false;
        }
        if let crate::pipeline::PipelineStatus::Failed(reason) = self.state.health.status() {
            warn!(session_id = %self.session.session_id, "Closing session, pipeline failed: {}", reason);
            self.shut(
                ctx,
                ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(reason),
                },
            );
            return false;
        }
        true
    }

    fn shut(&mut self, ctx: &mut ws::WebsocketContext<Self>, reason: ws::CloseReason) {
        self.session.close();
        ctx.close(Some(reason));
        ctx.stop();
    }

    fn assemble_tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.check_alive(ctx) {
            return;
        }
        let pcm = match self.reader.read_pcm() {
            Ok(pcm) => pcm,
            Err(err) => {
                self.drop_message(&PipelineError::ProtocolViolation(format!(
                    "unreadable audio stream: {:#}",
                    err
                )));
                self.reset_reader(ctx);
                return;
            }
        };
        if pcm.is_empty() {
            return;
        }
        for frame in self.assembler.push(&pcm) {
            if self.state.audio.pcm_in.send(PcmMessage::Frame(frame)).is_err() {
                self.state.health.fail("encode bridge stopped accepting audio");
                self.check_alive(ctx);
                return;
            }
            self.session.stats.frames_assembled += 1;
            AppMetrics::incr(&self.state.metrics.frames_assembled);
        }
    }

    fn output_tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.check_alive(ctx) {
            return;
        }
        while let Ok(msg) = self.state.audio.pcm_out.try_recv() {
            let frame = match msg {
                PcmMessage::Fence(id) => {
                    if self.awaiting_fence.is_some_and(|awaited| id >= awaited) {
                        debug!(session_id = %self.session.session_id, fence = id, "Pipeline output caught up");
                        self.awaiting_fence = None;
                    }
                    continue;
                }
                PcmMessage::Frame(frame) => frame,
            };
            if self.awaiting_fence.is_some() {
                self.session.stats.stale_frames_discarded += 1;
                continue;
            }
            if let Err(err) = self.writer.append_pcm(frame.samples()) {
                error!(session_id = %self.session.session_id, "Opus encoding failed: {:#}", err);
                self.shut(ctx, ws::CloseCode::Error.into());
                return;
            }
            AppMetrics::incr(&self.state.metrics.frames_sent);
        }
    }

    /// Start over with a fresh reader after the client's Ogg stream broke.
    fn reset_reader(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        match OggOpusReader::new() {
            Ok(reader) => {
                self.reader = reader;
                self.assembler.clear();
            }
            Err(err) => {
                error!(session_id = %self.session.session_id, "Cannot recreate Opus decoder: {:#}", err);
                self.shut(ctx, ws::CloseCode::Error.into());
            }
        }
    }

    fn send_tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.check_alive(ctx) {
            return;
        }
        let bytes = self.writer.read_bytes();
        if !bytes.is_empty() {
            ctx.binary(protocol::audio_message(&bytes));
            self.session.stats.audio_messages_out += 1;
        }
    }

    fn handle_binary(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match protocol::parse(data) {
            Ok(ClientMessage::Audio(payload)) => {
                self.session.stats.audio_messages_in += 1;
                self.session.stats.audio_bytes_in += payload.len() as u64;
                AppMetrics::incr(&self.state.metrics.audio_messages_received);
                if let Err(err) = self.reader.append_bytes(payload) {
                    self.drop_message(&PipelineError::ProtocolViolation(format!("{:#}", err)));
                    self.reset_reader(ctx);
                }
            }
            Ok(ClientMessage::Handshake) => {
                self.drop_message(&PipelineError::ProtocolViolation(
                    "handshake is server-to-client only".to_string(),
                ));
            }
            Ok(ClientMessage::Unknown { kind, len }) => {
                self.drop_message(&PipelineError::ProtocolViolation(format!(
                    "unknown message kind {} ({} bytes)",
                    kind, len
                )));
            }
            Err(err) => self.drop_message(&err),
        }
    }

    fn drop_message(&mut self, err: &PipelineError) {
        warn!(session_id = %self.session.session_id, "Dropping client message: {}", err);
        self.session.stats.messages_dropped += 1;
        AppMetrics::incr(&self.state.metrics.messages_dropped);
    }
}

impl Actor for ChatSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.session_id, "Chat connection opened, waiting for session lock");
        let lock = self.lock.clone();
        ctx.wait(
            async move { lock.acquire().await }
                .into_actor(self)
                .map(|guard, act, ctx| {
                    act.guard = Some(guard);
                    act.begin_streaming(ctx);
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.close();
        if let Some(guard) = self.guard.take() {
            AppMetrics::incr(&self.state.metrics.sessions_closed);
            info!(
                session_id = %self.session.session_id,
                held_secs = guard.held_for().as_secs_f64(),
                streaming_secs = self.session.streaming_seconds(),
                stats = ?self.session.stats,
                "Chat session closed"
            );
        } else {
            info!(session_id = %self.session.session_id, "Chat connection closed before the session started");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => self.handle_binary(&data, ctx),
            Ok(ws::Message::Text(_)) => {
                self.drop_message(&PipelineError::ProtocolViolation("text frame".to_string()));
            }
            Ok(ws::Message::Continuation(_)) => {
                self.drop_message(&PipelineError::ProtocolViolation(
                    "continuation frame".to_string(),
                ));
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.session_id, "Client closed connection: {:?}", reason);
                self.session.close();
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                let err = PipelineError::ConnectionTermination(err.to_string());
                warn!(session_id = %self.session.session_id, "{}", err);
                self.session.close();
                ctx.stop();
            }
        }
    }
}

/// `GET /api/chat`
pub async fn chat_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    if let crate::pipeline::PipelineStatus::Failed(reason) = state.health.status() {
        return Err(AppError::ServiceUnavailable(reason).into());
    }

    let reader = OggOpusReader::new().map_err(AppError::from)?;
    let writer = OggOpusWriter::new().map_err(AppError::from)?;
    let poll = state.get_config().pipeline.poll_interval();

    ws::start(
        ChatSocket::new(state.get_ref().clone(), reader, writer, poll),
        &req,
        stream,
    )
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/chat", web::get().to(chat_handler));
}
