//! # Mimi Streaming Codec
//!
//! Runs the Mimi neural audio tokenizer from `candle-transformers` behind the
//! `StreamCodec` trait.
//!
//! ## Threading:
//! Encoding and decoding keep separate streaming state, so each direction gets
//! its own model instance on its own OS thread. The trait methods only push to
//! or poll from crossbeam channels, which keeps them non-blocking.
//!
//! ## Shapes:
//! - encoder input: `(1, 1, 1920)` f32 PCM
//! - encoder output: `(1, codebooks, steps)` u32 codes (usually one step)
//! - decoder output: `(1, 1, samples)` f32 PCM

use super::StreamCodec;
use crate::frame::{AudioFrame, TokenFrame, FRAME_SAMPLES};
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, StreamTensor, Tensor};
use candle_transformers::models::mimi::encodec::{self, Encodec};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::path::Path;
use tracing::{error, info};

pub struct MimiCodec {
    encode_tx: Sender<AudioFrame>,
    encoded_rx: Receiver<TokenFrame>,
    decode_tx: Sender<TokenFrame>,
    decoded_rx: Receiver<Vec<f32>>,
}

impl MimiCodec {
    /// Load the weights twice (encoder and decoder) and start both workers.
    ///
    /// ## Parameters:
    /// - **model_file**: local safetensors checkpoint
    /// - **num_codebooks**: how many codebooks the encoder emits
    /// - **device**: compute device for both model instances
    pub fn load(model_file: &Path, num_codebooks: usize, device: &Device) -> Result<Self> {
        let path = model_file
            .to_str()
            .ok_or_else(|| anyhow!("mimi model path is not valid UTF-8"))?;

        let encoder = encodec::load(path, Some(num_codebooks), device)
            .with_context(|| format!("failed to load mimi encoder from {}", path))?;
        let decoder = encodec::load(path, Some(num_codebooks), device)
            .with_context(|| format!("failed to load mimi decoder from {}", path))?;
        info!("Loaded mimi codec ({} codebooks) from {}", num_codebooks, path);

        let (encode_tx, encode_rx) = unbounded();
        let (encoded_tx, encoded_rx) = unbounded();
        let (decode_tx, decode_rx) = unbounded();
        let (decoded_tx, decoded_rx) = unbounded();

        let dev = device.clone();
        std::thread::Builder::new()
            .name("mimi-encoder".to_string())
            .spawn(move || {
                if let Err(err) = run_encoder(encoder, &dev, encode_rx, encoded_tx) {
                    error!("mimi encoder worker failed: {:#}", err);
                }
            })?;

        let dev = device.clone();
        std::thread::Builder::new()
            .name("mimi-decoder".to_string())
            .spawn(move || {
                if let Err(err) = run_decoder(decoder, &dev, decode_rx, decoded_tx) {
                    error!("mimi decoder worker failed: {:#}", err);
                }
            })?;

        Ok(Self {
            encode_tx,
            encoded_rx,
            decode_tx,
            decoded_rx,
        })
    }
}

fn run_encoder(
    mut model: Encodec,
    device: &Device,
    frames: Receiver<AudioFrame>,
    out: Sender<TokenFrame>,
) -> Result<()> {
    for frame in frames.iter() {
        let pcm = Tensor::from_vec(frame.into_samples(), (1, 1, FRAME_SAMPLES), device)?;
        let codes = model.encode_step(&StreamTensor::from_tensor(pcm))?;
        if let Some(codes) = codes.as_option() {
            let rows: Vec<Vec<u32>> = codes.to_dtype(DType::U32)?.squeeze(0)?.to_vec2()?;
            if out.send(TokenFrame::from_rows(rows)?).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn run_decoder(
    mut model: Encodec,
    device: &Device,
    frames: Receiver<TokenFrame>,
    out: Sender<Vec<f32>>,
) -> Result<()> {
    for frame in frames.iter() {
        let codes = Tensor::from_slice(
            frame.as_slice(),
            (1, frame.codebooks(), frame.steps()),
            device,
        )?;
        let pcm = model.decode_step(&StreamTensor::from_tensor(codes))?;
        if let Some(pcm) = pcm.as_option() {
            let samples = pcm.flatten_all()?.to_vec1::<f32>()?;
            if out.send(samples).is_err() {
                break;
            }
        }
    }
    Ok(())
}

/// Non-blocking receive that turns a dead worker into an error.
fn poll<T>(rx: &Receiver<T>, worker: &str) -> Result<Option<T>> {
    match rx.try_recv() {
        Ok(v) => Ok(Some(v)),
        Err(TryRecvError::Empty) => Ok(None),
        Err(TryRecvError::Disconnected) => Err(anyhow!("mimi {} worker stopped", worker)),
    }
}

impl StreamCodec for MimiCodec {
    fn encode(&self, frame: AudioFrame) -> Result<()> {
        self.encode_tx
            .send(frame)
            .map_err(|_| anyhow!("mimi encoder worker stopped"))
    }

    fn get_encoded(&self) -> Result<Option<TokenFrame>> {
        poll(&self.encoded_rx, "encoder")
    }

    fn decode(&self, frame: TokenFrame) -> Result<()> {
        self.decode_tx
            .send(frame)
            .map_err(|_| anyhow!("mimi decoder worker stopped"))
    }

    fn get_decoded(&self) -> Result<Option<Vec<f32>>> {
        poll(&self.decoded_rx, "decoder")
    }
}
