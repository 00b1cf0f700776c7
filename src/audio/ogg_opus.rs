//! # Ogg/Opus Stream Codec
//!
//! Browsers record and play Ogg-encapsulated Opus. This module converts between
//! that byte stream and raw 24 kHz mono PCM.
//!
//! - **OggOpusReader**: bytes in, PCM out. Decoding runs on background tasks so
//!   `append_bytes` and `read_pcm` never block the session actor.
//! - **OggOpusWriter**: PCM in, Ogg pages out. Encoding is synchronous and cheap
//!   (one 40 ms Opus packet per 960 samples).

use crate::frame::SAMPLE_RATE;
use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::io::Write;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Samples per Opus packet written by the server (40 ms at 24 kHz).
const OPUS_ENCODER_FRAME_SIZE: usize = 960;

/// Ogg logical stream serial used for server output.
const OGG_STREAM_SERIAL: u32 = 42;

/// Largest Opus frame is 120 ms.
const MAX_DECODED_SAMPLES: usize = SAMPLE_RATE as usize * 120 / 1000;

/// Capacity of the in-memory pipe between the byte feeder and the Ogg parser.
const PIPE_CAPACITY: usize = 100_000;

/// Write the Ogg Opus identification header (RFC 7845 section 5.1).
pub fn write_opus_header<W: Write>(w: &mut W) -> std::io::Result<()> {
    w.write_all(b"OpusHead")?;
    w.write_u8(1)?; // version
    w.write_u8(1)?; // channel count
    w.write_u16::<LittleEndian>(3840)?; // pre-skip
    w.write_u32::<LittleEndian>(48000)?; // input sample rate
    w.write_i16::<LittleEndian>(0)?; // output gain
    w.write_u8(0)?; // channel mapping family
    Ok(())
}

/// Write the Ogg Opus comment header with no user comments.
pub fn write_opus_tags<W: Write>(w: &mut W) -> std::io::Result<()> {
    let vendor = concat!("duplex-voice-server ", env!("CARGO_PKG_VERSION"));
    w.write_all(b"OpusTags")?;
    w.write_u32::<LittleEndian>(vendor.len() as u32)?;
    w.write_all(vendor.as_bytes())?;
    w.write_u32::<LittleEndian>(0)?; // user comment count
    Ok(())
}

/// Incremental Ogg/Opus decoder.
///
/// ## Background tasks:
/// 1. **feeder**: copies appended byte chunks into an in-memory pipe
/// 2. **decoder**: parses Ogg packets from the pipe, skips the two header
///    packets and decodes each audio packet to PCM
///
/// Must be created inside a tokio runtime. Dropping the reader aborts both tasks.
pub struct OggOpusReader {
    bytes_tx: mpsc::UnboundedSender<Vec<u8>>,
    pcm_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    tasks: [JoinHandle<()>; 2],
}

impl OggOpusReader {
    pub fn new() -> Result<Self> {
        let mut decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)?;
        let (bytes_tx, mut bytes_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (pcm_tx, pcm_rx) = mpsc::unbounded_channel();
        let (mut pipe_tx, pipe_rx) = tokio::io::duplex(PIPE_CAPACITY);

        let feeder = tokio::spawn(async move {
            while let Some(bytes) = bytes_rx.recv().await {
                if let Err(err) = pipe_tx.write_all(&bytes).await {
                    warn!("ogg pipe closed: {}", err);
                    break;
                }
            }
        });

        let decode = tokio::spawn(async move {
            let mut packets = ogg::reading::async_api::PacketReader::new(pipe_rx);
            let mut pcm_buf = vec![0f32; MAX_DECODED_SAMPLES];
            while let Some(packet) = packets.next().await {
                let packet = match packet {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!("invalid ogg stream from client: {}", err);
                        break;
                    }
                };
                if packet.data.starts_with(b"OpusHead") || packet.data.starts_with(b"OpusTags") {
                    continue;
                }
                match decoder.decode_float(&packet.data, &mut pcm_buf, false) {
                    Ok(n) => {
                        if pcm_tx.send(pcm_buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("skipping undecodable opus packet: {}", err),
                }
            }
            debug!("ogg/opus decoder task finished");
        });

        Ok(Self {
            bytes_tx,
            pcm_rx,
            tasks: [feeder, decode],
        })
    }

    /// Queue received Ogg bytes for decoding. Never blocks.
    pub fn append_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.bytes_tx
            .send(bytes.to_vec())
            .map_err(|_| anyhow!("ogg/opus reader is closed"))
    }

    /// Drain whatever PCM has been decoded so far. Never blocks; may be empty.
    ///
    /// Fails once the decoder task has stopped. While the reader is alive that
    /// only happens when the Ogg framing itself is broken; the reader cannot
    /// resync after that and has to be replaced. Bad Opus packets inside valid
    /// pages are skipped.
    pub fn read_pcm(&mut self) -> Result<Vec<f32>> {
        let mut pcm = Vec::new();
        loop {
            match self.pcm_rx.try_recv() {
                Ok(chunk) => pcm.extend_from_slice(&chunk),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(pcm),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if pcm.is_empty() {
                        return Err(anyhow!("ogg/opus decoder stopped"));
                    }
                    return Ok(pcm);
                }
            }
        }
    }
}

impl Drop for OggOpusReader {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Incremental Ogg/Opus encoder.
pub struct OggOpusWriter {
    pw: ogg::PacketWriter<'static, Vec<u8>>,
    encoder: opus::Encoder,
    pending: VecDeque<f32>,
    packet_buf: Vec<u8>,
    total_samples: u64,
}

impl OggOpusWriter {
    /// Create a writer whose first pages carry the Opus headers.
    pub fn new() -> Result<Self> {
        let encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)?;
        let mut pw = ogg::PacketWriter::new(Vec::new());

        let mut head = Vec::new();
        write_opus_header(&mut head)?;
        pw.write_packet(head, OGG_STREAM_SERIAL, ogg::PacketWriteEndInfo::EndPage, 0)?;
        let mut tags = Vec::new();
        write_opus_tags(&mut tags)?;
        pw.write_packet(tags, OGG_STREAM_SERIAL, ogg::PacketWriteEndInfo::EndPage, 0)?;

        Ok(Self {
            pw,
            encoder,
            pending: VecDeque::with_capacity(2 * OPUS_ENCODER_FRAME_SIZE),
            packet_buf: vec![0u8; 4000],
            total_samples: 0,
        })
    }

    /// Encode PCM. Each complete 960-sample chunk becomes one Ogg page;
    /// a partial tail waits for more samples.
    pub fn append_pcm(&mut self, pcm: &[f32]) -> Result<()> {
        self.pending.extend(pcm.iter().copied());
        while self.pending.len() >= OPUS_ENCODER_FRAME_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..OPUS_ENCODER_FRAME_SIZE).collect();
            let size = self.encoder.encode_float(&chunk, &mut self.packet_buf)?;
            self.total_samples += OPUS_ENCODER_FRAME_SIZE as u64;
            if size == 0 {
                warn!("opus encoder produced an empty packet");
                continue;
            }
            // Granule positions are always counted at 48 kHz
            let granule = self.total_samples * 48_000 / SAMPLE_RATE as u64;
            self.pw.write_packet(
                self.packet_buf[..size].to_vec(),
                OGG_STREAM_SERIAL,
                ogg::PacketWriteEndInfo::EndPage,
                granule,
            )?;
        }
        Ok(())
    }

    /// Take all Ogg bytes produced so far. Empty when nothing is pending.
    pub fn read_bytes(&mut self) -> Vec<u8> {
        std::mem::take(self.pw.inner_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_headers_have_expected_layout() {
        let mut head = Vec::new();
        write_opus_header(&mut head).unwrap();
        assert_eq!(&head[..8], b"OpusHead");
        assert_eq!(head.len(), 19);
        assert_eq!(head[9], 1); // mono

        let mut tags = Vec::new();
        write_opus_tags(&mut tags).unwrap();
        assert_eq!(&tags[..8], b"OpusTags");
    }

    /// Headers are flushed before any audio has been written.
    #[test]
    fn test_writer_emits_headers_first() {
        let mut writer = OggOpusWriter::new().unwrap();
        let bytes = writer.read_bytes();
        assert_eq!(&bytes[..4], b"OggS");
        assert!(writer.read_bytes().is_empty());
    }

    #[test]
    fn test_writer_buffers_partial_packets() {
        let mut writer = OggOpusWriter::new().unwrap();
        writer.read_bytes();
        writer.append_pcm(&[0.0; 500]).unwrap();
        assert!(writer.read_bytes().is_empty());
        writer.append_pcm(&[0.0; 460]).unwrap();
        assert!(!writer.read_bytes().is_empty());
    }

    /// What the writer produces, the reader turns back into PCM.
    #[tokio::test]
    async fn test_writer_output_decodes_in_reader() {
        let mut writer = OggOpusWriter::new().unwrap();
        writer.append_pcm(&vec![0.0; 1920 * 2]).unwrap();
        let bytes = writer.read_bytes();

        let mut reader = OggOpusReader::new().unwrap();
        reader.append_bytes(&bytes).unwrap();

        let mut decoded = 0;
        for _ in 0..200 {
            decoded += reader.read_pcm().unwrap().len();
            if decoded >= 1920 * 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(decoded >= 1920 * 2, "decoded only {} samples", decoded);
    }

    /// A packet libopus rejects is skipped; the packets after it still decode.
    #[tokio::test]
    async fn test_reader_skips_undecodable_packet() {
        let mut encoder =
            opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip).unwrap();
        let mut packet = vec![0u8; 4000];
        let len = encoder
            .encode_float(&[0.0; OPUS_ENCODER_FRAME_SIZE], &mut packet)
            .unwrap();

        let mut head = Vec::new();
        write_opus_header(&mut head).unwrap();
        let mut tags = Vec::new();
        write_opus_tags(&mut tags).unwrap();
        let mut pw = ogg::PacketWriter::new(Vec::new());
        pw.write_packet(head, 7, ogg::PacketWriteEndInfo::EndPage, 0).unwrap();
        pw.write_packet(tags, 7, ogg::PacketWriteEndInfo::EndPage, 0).unwrap();
        // Code 3 TOC byte without its frame count
        pw.write_packet(vec![0xFF], 7, ogg::PacketWriteEndInfo::EndPage, 0).unwrap();
        pw.write_packet(packet[..len].to_vec(), 7, ogg::PacketWriteEndInfo::EndPage, 960)
            .unwrap();

        let mut reader = OggOpusReader::new().unwrap();
        reader.append_bytes(pw.inner_mut()).unwrap();

        let mut decoded = 0;
        for _ in 0..200 {
            decoded += reader.read_pcm().unwrap().len();
            if decoded >= OPUS_ENCODER_FRAME_SIZE {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(decoded >= OPUS_ENCODER_FRAME_SIZE, "decoded only {} samples", decoded);
    }

    /// Bytes that are not Ogg at all stop the reader for good.
    #[tokio::test]
    async fn test_reader_stops_on_broken_framing() {
        let mut reader = OggOpusReader::new().unwrap();
        reader.append_bytes(&[b'x'; 64]).unwrap();

        let mut stopped = false;
        for _ in 0..200 {
            if reader.read_pcm().is_err() {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(stopped);
    }
}
