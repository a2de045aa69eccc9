//! PCM16 utilities: byte/sample conversion, channel layout, energy.

pub mod assembler;
pub mod playout;
pub mod resample;

pub use assembler::{FrameAssembler, SampleAssembler};
pub use playout::PlayoutBuffer;
pub use resample::LinearResampler;

/// Decode little-endian PCM16 bytes into samples. A trailing odd byte is
/// ignored.
pub fn bytes_to_samples(src: &[u8]) -> Vec<i16> {
    src.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialise samples to little-endian PCM16 bytes.
pub fn samples_to_bytes(src: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() * 2);
    for s in src {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Convert interleaved PCM between channel layouts.
///
/// Stereo to mono averages the pair; mono to stereo duplicates. Anything
/// else falls back to copying the first source channel into every output
/// channel, which matches what the bridge negotiates (1 or 2 channels).
pub fn convert_channels(src: &[i16], in_channels: u8, out_channels: u8) -> Vec<i16> {
    let in_ch = in_channels.max(1) as usize;
    let out_ch = out_channels.max(1) as usize;
    if in_ch == out_ch {
        return src.to_vec();
    }
    if in_ch == 2 && out_ch == 1 {
        return src
            .chunks_exact(2)
            .map(|p| ((p[0] as i32 + p[1] as i32) / 2) as i16)
            .collect();
    }
    if in_ch == 1 && out_ch == 2 {
        let mut out = Vec::with_capacity(src.len() * 2);
        for &s in src {
            out.push(s);
            out.push(s);
        }
        return out;
    }
    let frames = src.len() / in_ch;
    let mut out = Vec::with_capacity(frames * out_ch);
    for f in 0..frames {
        let v = src[f * in_ch];
        out.extend(std::iter::repeat(v).take(out_ch));
    }
    out
}

/// RMS energy of a PCM16LE byte buffer, normalised to [0, 1].
///
/// Observational only; used by the injector's periodic statistics to tell
/// "we are sending silence" apart from "upstream audio is zero-energy".
pub fn rms_energy(pcm: &[u8]) -> f64 {
    if pcm.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for pair in pcm.chunks_exact(2) {
        let v = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
        sum += v * v;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sample_round_trip() {
        let samples = vec![0i16, -1, 32767, -32768, 12345];
        assert_eq!(bytes_to_samples(&samples_to_bytes(&samples)), samples);
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        assert_eq!(bytes_to_samples(&[0x34, 0x12, 0xff]), vec![0x1234]);
    }

    #[test]
    fn mono_stereo_round_trip_is_exact() {
        // Upmix duplicates, so the downmix average reproduces each sample.
        let mono = vec![100i16, -200, 300, -32768, 32767];
        let stereo = convert_channels(&mono, 1, 2);
        assert_eq!(stereo.len(), mono.len() * 2);
        assert_eq!(convert_channels(&stereo, 2, 1), mono);
    }

    #[test]
    fn downmix_averages() {
        assert_eq!(convert_channels(&[100, 200, -300, -100], 2, 1), vec![150, -200]);
    }

    #[test]
    fn energy_of_silence_is_zero() {
        assert_eq!(rms_energy(&[0u8; 320]), 0.0);
        let loud = samples_to_bytes(&vec![16384i16; 160]);
        let e = rms_energy(&loud);
        assert!((e - 0.5).abs() < 0.01, "unexpected energy {e}");
    }
}
