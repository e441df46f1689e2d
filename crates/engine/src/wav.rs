//! Minimal PCM16 mono WAV container writer. The TTS playback path needs an
//! actual sound file extension ARI can reference; a 44-byte fixed header is
//! not worth pulling in a WAV-encoding crate for.

/// Wraps raw little-endian PCM16 mono samples in a canonical WAV header.
pub fn encode_pcm16_mono(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_len = pcm.len() as u32;
    let riff_len = 36 + data_len;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Stable per-process name for a synthesized `(text, voice)` pair, used as
/// both the cache filename and the `sound:` media reference. Not a
/// cryptographic hash — collisions would only ever replay the wrong cached
/// line for the same call, never leak data across calls.
pub fn cache_name(text: &str, voice: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    voice.hash(&mut hasher);
    format!("tts-{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_reports_correct_lengths() {
        let pcm = vec![0u8; 100];
        let wav = encode_pcm16_mono(&pcm, 24_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 100);
        let data_len = u32::from_le_bytes(wav[40..44].try_into().unwrap());
        assert_eq!(data_len, 100);
    }

    #[test]
    fn cache_name_is_stable_and_distinguishes_inputs() {
        assert_eq!(cache_name("hola", "alloy"), cache_name("hola", "alloy"));
        assert_ne!(cache_name("hola", "alloy"), cache_name("adios", "alloy"));
        assert_ne!(cache_name("hola", "alloy"), cache_name("hola", "echo"));
    }
}
