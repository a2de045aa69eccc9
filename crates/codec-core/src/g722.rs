//! G.722 codec (64 kbit/s wideband ADPCM).
//!
//! Two-band sub-band ADPCM: a 24-tap quadrature mirror filter splits the
//! 16 kHz input into two 8 kHz bands, the low band is coded with 6 bits
//! per sample and the high band with 2, giving one output byte per two
//! input samples. Only the 64 kbit/s operating mode is implemented; the
//! RTP clock for G.722 famously runs at 8000 Hz even though the audio is
//! 16000 Hz, which callers must account for when timestamping.

use tracing::trace;

use crate::error::{CodecError, Result};
use crate::types::{AudioCodec, CodecInfo};

const QMF_COEFFS: [i32; 12] = [3, -11, 12, 32, -210, 951, 3876, -805, 362, -156, 53, -11];

// Low-band 6-bit quantiser decision levels and code maps.
const Q6: [i32; 32] = [
    0, 35, 72, 110, 150, 190, 233, 276, 323, 370, 422, 473, 530, 587, 650, 714, 786, 858, 940,
    1023, 1121, 1219, 1339, 1458, 1612, 1765, 1980, 2195, 2557, 2919, 0, 0,
];
const ILN: [i32; 32] = [
    0, 63, 62, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19, 18, 17, 16, 15, 14, 13, 12, 11,
    10, 9, 8, 7, 6, 5, 4, 0,
];
const ILP: [i32; 32] = [
    0, 61, 60, 59, 58, 57, 56, 55, 54, 53, 52, 51, 50, 49, 48, 47, 46, 45, 44, 43, 42, 41, 40, 39,
    38, 37, 36, 35, 34, 33, 32, 0,
];
const RL42: [usize; 16] = [0, 7, 6, 5, 4, 3, 2, 1, 7, 6, 5, 4, 3, 2, 1, 0];
const WL: [i32; 8] = [-60, -30, 58, 172, 334, 538, 1198, 3042];
const ILB: [i32; 32] = [
    2048, 2093, 2139, 2186, 2233, 2282, 2332, 2383, 2435, 2489, 2543, 2599, 2656, 2714, 2774,
    2834, 2896, 2960, 3025, 3091, 3158, 3228, 3298, 3371, 3444, 3520, 3597, 3676, 3756, 3838,
    3922, 4008,
];
// Inverse quantiser tables: 4-bit (predictor path), 6-bit (decoder output
// path) for the low band, 2-bit for the high band.
const QM4: [i32; 16] = [
    0, -20456, -12896, -8968, -6288, -4240, -2584, -1200, 20456, 12896, 8968, 6288, 4240, 2584,
    1200, 0,
];
const QM6: [i32; 64] = [
    -136, -136, -136, -136, -24808, -21904, -19008, -16704, -14984, -13512, -12280, -11192,
    -10232, -9360, -8576, -7856, -7192, -6576, -6000, -5456, -4944, -4464, -4008, -3576, -3168,
    -2776, -2400, -2032, -1688, -1360, -1040, -728, 24808, 21904, 19008, 16704, 14984, 13512,
    12280, 11192, 10232, 9360, 8576, 7856, 7192, 6576, 6000, 5456, 4944, 4464, 4008, 3576, 3168,
    2776, 2400, 2032, 1688, 1360, 1040, 728, 432, 136, -432, -136,
];
const QM2: [i32; 4] = [-7408, -1616, 7408, 1616];
const IHN: [i32; 3] = [0, 1, 0];
const IHP: [i32; 3] = [0, 3, 2];
const WH: [i32; 3] = [0, -214, 798];
const RH2: [usize; 4] = [2, 1, 2, 1];

fn saturate(x: i32) -> i32 {
    x.clamp(-32768, 32767)
}

/// Per-band ADPCM predictor state.
#[derive(Debug, Clone)]
struct Band {
    s: i32,
    sp: i32,
    sz: i32,
    r: [i32; 3],
    a: [i32; 3],
    ap: [i32; 3],
    p: [i32; 3],
    d: [i32; 7],
    b: [i32; 7],
    bp: [i32; 7],
    sg: [i32; 7],
    nb: i32,
    det: i32,
}

impl Band {
    fn new(det: i32) -> Self {
        Self {
            s: 0,
            sp: 0,
            sz: 0,
            r: [0; 3],
            a: [0; 3],
            ap: [0; 3],
            p: [0; 3],
            d: [0; 7],
            b: [0; 7],
            bp: [0; 7],
            sg: [0; 7],
            nb: 0,
            det,
        }
    }

    /// Adapt the predictor after reconstructing difference signal `d0`
    /// (blocks RECONS/PARREC/UPPOL/UPZERO/FILT of the recommendation).
    fn adapt(&mut self, d0: i32) {
        self.d[0] = d0;
        self.r[0] = saturate(self.s + d0);
        self.p[0] = saturate(self.sz + d0);

        // Second-order pole update.
        for i in 0..3 {
            self.sg[i] = self.p[i] >> 15;
        }
        let wd1 = saturate(self.a[1] << 2);
        let mut wd2 = if self.sg[0] == self.sg[1] { -wd1 } else { wd1 };
        if wd2 > 32767 {
            wd2 = 32767;
        }
        let mut wd3 = (wd2 >> 7) + if self.sg[0] == self.sg[2] { 128 } else { -128 };
        wd3 += (self.a[2] * 32512) >> 15;
        self.ap[2] = wd3.clamp(-12288, 12288);

        // First-order pole update.
        self.sg[0] = self.p[0] >> 15;
        self.sg[1] = self.p[1] >> 15;
        let wd1 = if self.sg[0] == self.sg[1] { 192 } else { -192 };
        let wd2 = (self.a[1] * 32640) >> 15;
        self.ap[1] = saturate(wd1 + wd2);
        let limit = saturate(15360 - self.ap[2]);
        self.ap[1] = self.ap[1].clamp(-limit, limit);

        // Zero predictor update.
        let wd1 = if d0 == 0 { 0 } else { 128 };
        self.sg[0] = d0 >> 15;
        for i in 1..7 {
            self.sg[i] = self.d[i] >> 15;
            let wd2 = if self.sg[i] == self.sg[0] { wd1 } else { -wd1 };
            let wd3 = (self.b[i] * 32640) >> 15;
            self.bp[i] = saturate(wd2 + wd3);
        }

        // Shift delay lines and commit updated coefficients.
        for i in (1..7).rev() {
            self.d[i] = self.d[i - 1];
            self.b[i] = self.bp[i];
        }
        for i in (1..3).rev() {
            self.r[i] = self.r[i - 1];
            self.p[i] = self.p[i - 1];
            self.a[i] = self.ap[i];
        }

        // Pole and zero predictor outputs.
        let wd1 = (self.a[1] * saturate(self.r[1] + self.r[1])) >> 15;
        let wd2 = (self.a[2] * saturate(self.r[2] + self.r[2])) >> 15;
        self.sp = saturate(wd1 + wd2);

        let mut sz = 0;
        for i in (1..7).rev() {
            sz += (self.b[i] * saturate(self.d[i] + self.d[i])) >> 15;
        }
        self.sz = saturate(sz);

        self.s = saturate(self.sp + self.sz);
    }

    /// Rescale the quantiser step from the log-domain scale factor.
    fn update_scale(&mut self, step: i32, nb_max: i32, shift_base: i32) {
        let mut nb = ((self.nb * 127) >> 7) + step;
        nb = nb.clamp(0, nb_max);
        self.nb = nb;
        let idx = ((nb >> 6) & 31) as usize;
        let shift = shift_base - (nb >> 11);
        let wd3 = if shift < 0 {
            ILB[idx] << -shift
        } else {
            ILB[idx] >> shift
        };
        self.det = wd3 << 2;
    }
}

#[derive(Debug, Clone)]
struct QmfHistory {
    x: [i32; 24],
}

impl QmfHistory {
    fn new() -> Self {
        Self { x: [0; 24] }
    }

    fn push(&mut self, a: i32, b: i32) {
        self.x.copy_within(2.., 0);
        self.x[22] = a;
        self.x[23] = b;
    }

    fn filter(&self) -> (i32, i32) {
        let mut sum_odd = 0;
        let mut sum_even = 0;
        for i in 0..12 {
            sum_odd += self.x[2 * i] * QMF_COEFFS[i];
            sum_even += self.x[2 * i + 1] * QMF_COEFFS[11 - i];
        }
        (sum_odd, sum_even)
    }
}

/// G.722 codec instance (encoder and decoder state).
pub struct G722Codec {
    enc_band: [Band; 2],
    enc_qmf: QmfHistory,
    dec_band: [Band; 2],
    dec_qmf: QmfHistory,
}

impl G722Codec {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        if sample_rate != 16000 {
            return Err(CodecError::InvalidSampleRate {
                rate: sample_rate,
                supported: vec![16000],
            });
        }
        if channels != 1 {
            return Err(CodecError::InvalidChannelCount {
                channels,
                supported: vec![1],
            });
        }
        Ok(Self {
            enc_band: [Band::new(32), Band::new(8)],
            enc_qmf: QmfHistory::new(),
            dec_band: [Band::new(32), Band::new(8)],
            dec_qmf: QmfHistory::new(),
        })
    }

    fn encode_pair(&mut self, s0: i16, s1: i16) -> u8 {
        self.enc_qmf.push(s0 as i32, s1 as i32);
        let (sum_odd, sum_even) = self.enc_qmf.filter();
        let xlow = (sum_even + sum_odd) >> 14;
        let xhigh = (sum_even - sum_odd) >> 14;

        // Low band: 6-bit quantisation of the prediction error.
        let el = saturate(xlow - self.enc_band[0].s);
        let wd = if el >= 0 { el } else { !el };
        let mut i = 1;
        while i < 30 {
            let decision = (Q6[i] * self.enc_band[0].det) >> 12;
            if wd < decision {
                break;
            }
            i += 1;
        }
        let ilow = if el < 0 { ILN[i] } else { ILP[i] };

        let ril = (ilow >> 2) as usize;
        let dlow = (self.enc_band[0].det * QM4[ril]) >> 15;
        self.enc_band[0].update_scale(WL[RL42[ril]], 18432, 8);
        self.enc_band[0].adapt(dlow);

        // High band: 2-bit quantisation.
        let eh = saturate(xhigh - self.enc_band[1].s);
        let wd = if eh >= 0 { eh } else { !eh };
        let decision = (564 * self.enc_band[1].det) >> 12;
        let mih = if wd >= decision { 2 } else { 1 };
        let ihigh = if eh < 0 { IHN[mih] } else { IHP[mih] };

        let dhigh = (self.enc_band[1].det * QM2[ihigh as usize]) >> 15;
        self.enc_band[1].update_scale(WH[RH2[ihigh as usize]], 22528, 10);
        self.enc_band[1].adapt(dhigh);

        ((ihigh << 6) | ilow) as u8
    }

    fn decode_byte(&mut self, code: u8) -> (i16, i16) {
        let ilow = (code & 0x3f) as usize;
        let ihigh = ((code >> 6) & 0x03) as usize;

        // Low band reconstruction via the 6-bit inverse quantiser.
        let dlowt = (self.dec_band[0].det * QM6[ilow]) >> 15;
        let rlow = (self.dec_band[0].s + dlowt).clamp(-16384, 16383);

        // Predictor adaptation tracks the encoder through the 4-bit path.
        let ril = ilow >> 2;
        let dlow = (self.dec_band[0].det * QM4[ril]) >> 15;
        self.dec_band[0].update_scale(WL[RL42[ril]], 18432, 8);
        self.dec_band[0].adapt(dlow);

        let dhigh = (self.dec_band[1].det * QM2[ihigh]) >> 15;
        let rhigh = (self.dec_band[1].s + dhigh).clamp(-16384, 16383);
        self.dec_band[1].update_scale(WH[RH2[ihigh]], 22528, 10);
        self.dec_band[1].adapt(dhigh);

        // Receive QMF recombines the bands into two output samples.
        self.dec_qmf.push(rlow + rhigh, rlow - rhigh);
        let (sum_odd, sum_even) = self.dec_qmf.filter();
        (saturate(sum_odd >> 11) as i16, saturate(sum_even >> 11) as i16)
    }
}

impl AudioCodec for G722Codec {
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        if samples.len() % 2 != 0 {
            return Err(CodecError::InvalidFrameSize {
                expected: samples.len() + 1,
                actual: samples.len(),
            });
        }
        let mut out = Vec::with_capacity(samples.len() / 2);
        for pair in samples.chunks_exact(2) {
            out.push(self.encode_pair(pair[0], pair[1]));
        }
        trace!(samples = samples.len(), bytes = out.len(), "g722 encode");
        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        if data.is_empty() {
            return Err(CodecError::InvalidPayload {
                details: "empty G.722 payload".into(),
            });
        }
        let mut out = Vec::with_capacity(data.len() * 2);
        for &code in data {
            let (s0, s1) = self.decode_byte(code);
            out.push(s0);
            out.push(s1);
        }
        Ok(out)
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "G722",
            sample_rate: 16000,
            channels: 1,
        }
    }

    fn reset(&mut self) {
        self.enc_band = [Band::new(32), Band::new(8)];
        self.enc_qmf = QmfHistory::new();
        self.dec_band = [Band::new(32), Band::new(8)];
        self.dec_qmf = QmfHistory::new();
    }
}
