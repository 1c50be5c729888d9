//! Audio assets
//!
//! WAV PCM16 is decoded on load. Compressed formats keep their bytes and are
//! handed to an [`AudioDecoder`] during post-processing when one has been
//! registered by the mixer.

use std::sync::Arc;

use crate::error::{AssetError, AssetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Ogg,
    Unknown,
}

impl AudioFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            AudioFormat::Wav
        } else if bytes.starts_with(b"OggS") {
            AudioFormat::Ogg
        } else {
            AudioFormat::Unknown
        }
    }
}

/// Interleaved signed 16-bit samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmData {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl PcmData {
    pub fn total_time(&self) -> f64 {
        if self.channels == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.channels as f64 / self.sample_rate as f64
    }
}

/// Decoder for compressed audio supplied by the mixer
pub trait AudioDecoder: Send + Sync {
    /// Duration in seconds without decoding, if the format allows it
    fn total_time(&self, bytes: &[u8]) -> Option<f64>;

    fn decode(&self, bytes: &[u8]) -> AssetResult<PcmData>;
}

#[derive(Debug, Clone)]
pub struct Audio {
    format: AudioFormat,
    data: Arc<Vec<u8>>,
    pcm: Option<Arc<PcmData>>,
}

impl Audio {
    pub fn from_bytes(path: &str, data: Vec<u8>) -> AssetResult<Self> {
        let format = AudioFormat::detect(&data);
        let pcm = match format {
            AudioFormat::Wav => Some(Arc::new(decode_wav(&data).map_err(|reason| AssetError::Malformed {
                path: path.to_string(),
                reason,
            })?)),
            _ => None,
        };
        Ok(Self {
            format,
            data: Arc::new(data),
            pcm,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// The file bytes as loaded
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decoded samples, if available
    pub fn pcm(&self) -> Option<&Arc<PcmData>> {
        self.pcm.as_ref()
    }

    /// Still compressed
    pub fn needs_post_processing(&self) -> bool {
        self.pcm.is_none()
    }

    pub fn total_time(&self, decoder: Option<&dyn AudioDecoder>) -> Option<f64> {
        match &self.pcm {
            Some(pcm) => Some(pcm.total_time()),
            None => decoder.and_then(|d| d.total_time(&self.data)),
        }
    }

    /// A copy with samples decoded in memory
    pub fn decompressed(&self, decoder: &dyn AudioDecoder) -> AssetResult<Audio> {
        if self.pcm.is_some() {
            return Ok(self.clone());
        }
        Ok(Audio {
            format: self.format,
            data: self.data.clone(),
            pcm: Some(Arc::new(decoder.decode(&self.data)?)),
        })
    }
}

fn le_u16(b: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*b.get(at)?, *b.get(at + 1)?]))
}

fn le_u32(b: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes([*b.get(at)?, *b.get(at + 1)?, *b.get(at + 2)?, *b.get(at + 3)?]))
}

fn decode_wav(bytes: &[u8]) -> Result<PcmData, String> {
    let mut pos = 12;
    let mut format: Option<(u16, u16, u32, u16)> = None;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = le_u32(bytes, pos + 4).ok_or("truncated chunk header")? as usize;
        let body = pos + 8;
        let end = body.checked_add(size).filter(|&e| e <= bytes.len()).ok_or("truncated chunk")?;
        match id {
            b"fmt " => {
                let tag = le_u16(bytes, body).ok_or("short fmt chunk")?;
                let channels = le_u16(bytes, body + 2).ok_or("short fmt chunk")?;
                let rate = le_u32(bytes, body + 4).ok_or("short fmt chunk")?;
                let bits = le_u16(bytes, body + 14).ok_or("short fmt chunk")?;
                format = Some((tag, channels, rate, bits));
            }
            b"data" => {
                let (tag, channels, sample_rate, bits) = format.ok_or("data chunk before fmt chunk")?;
                if tag != 1 || bits != 16 {
                    return Err(format!("unsupported wav encoding (format {}, {} bits)", tag, bits));
                }
                let samples = bytes[body..end]
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect();
                return Ok(PcmData {
                    channels,
                    sample_rate,
                    samples,
                });
            }
            _ => {}
        }
        // Chunks are word aligned
        pos = end + (size & 1);
    }
    Err("no data chunk".to_string())
}

#[cfg(test)]
pub(crate) fn test_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDecoder;

    impl AudioDecoder for FixedDecoder {
        fn total_time(&self, _bytes: &[u8]) -> Option<f64> {
            Some(0.5)
        }

        fn decode(&self, _bytes: &[u8]) -> AssetResult<PcmData> {
            Ok(PcmData {
                channels: 1,
                sample_rate: 4,
                samples: vec![1, 2],
            })
        }
    }

    #[test]
    fn test_wav_decodes_on_load() {
        let audio = Audio::from_bytes("/a.wav", test_wav(&[0, 100, -100, 5], 4)).unwrap();
        assert_eq!(audio.format(), AudioFormat::Wav);
        assert!(!audio.needs_post_processing());
        assert_eq!(audio.pcm().unwrap().samples, vec![0, 100, -100, 5]);
        assert_eq!(audio.total_time(None), Some(1.0));
    }

    #[test]
    fn test_compressed_needs_decoder() {
        let audio = Audio::from_bytes("/a.ogg", b"OggS\0\0\0\0".to_vec()).unwrap();
        assert!(audio.needs_post_processing());
        assert_eq!(audio.total_time(None), None);
        let decoded = audio.decompressed(&FixedDecoder).unwrap();
        assert!(!decoded.needs_post_processing());
        assert_eq!(decoded.total_time(None), Some(0.5));
    }

    #[test]
    fn test_truncated_wav_is_malformed() {
        let mut bytes = test_wav(&[1, 2, 3], 8);
        bytes.truncate(30);
        assert!(matches!(Audio::from_bytes("/a.wav", bytes), Err(AssetError::Malformed { .. })));
    }
}
