//! SIP endpoint adapter.
//!
//! Wraps a dialog handle whose signalling has already completed codec
//! negotiation at the SDP level; this adapter picks the codec the media
//! plane will actually run, exposes the distinct PCM and RTP clock
//! rates, and takes ownership of the dialog's RTP reader/writer pair.

use tokio::sync::mpsc;
use tracing::info;

use sipbridge_rtp_core::{RtpReader, RtpWriter};

use crate::codec::{self, CodecDescriptor};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::types::AudioFormat;

/// The collaborator's dialog handle, post-negotiation.
pub trait SipDialog {
    /// Peer-offered codecs in offer order, already mapped from SDP.
    fn remote_codecs(&self) -> &[CodecDescriptor];

    /// Yield the RTP reader/writer pair. Single use.
    fn take_media(&mut self) -> Option<(Box<dyn RtpReader>, Box<dyn RtpWriter>)>;

    /// DTMF digit stream, when telephone-event was negotiated.
    fn take_dtmf(&mut self) -> Option<mpsc::Receiver<char>> {
        None
    }
}

/// SIP side of one call: the negotiated codec and its RTP handles.
pub struct SipEndpoint {
    codec: CodecDescriptor,
    reader: Option<Box<dyn RtpReader>>,
    writer: Option<Box<dyn RtpWriter>>,
    dtmf: Option<mpsc::Receiver<char>>,
    jitter_min_packets: u16,
}

impl std::fmt::Debug for SipEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipEndpoint")
            .field("codec", &self.codec)
            .field("jitter_min_packets", &self.jitter_min_packets)
            .finish_non_exhaustive()
    }
}

impl SipEndpoint {
    /// Select the call codec from the dialog and claim its media handles.
    pub fn negotiate(dialog: &mut dyn SipDialog, cfg: &BridgeConfig) -> Result<Self> {
        let codec = codec::select_codec(dialog.remote_codecs())?;
        let (reader, writer) = dialog
            .take_media()
            .ok_or_else(|| Error::Config("sip media session not ready".into()))?;
        let dtmf = if cfg.enable_dtmf {
            dialog.take_dtmf()
        } else {
            None
        };

        info!(
            kind = ?codec.kind,
            payload_type = codec.payload_type,
            pcm_rate = codec.sample_rate,
            rtp_clock_rate = codec.rtp_clock,
            channels = codec.channels,
            "sip codec negotiated"
        );

        Ok(Self {
            codec,
            reader: Some(reader),
            writer: Some(writer),
            dtmf,
            jitter_min_packets: cfg.jitter_min_packets,
        })
    }

    pub fn codec(&self) -> &CodecDescriptor {
        &self.codec
    }

    pub fn jitter_min_packets(&self) -> u16 {
        self.jitter_min_packets
    }

    /// Decoded PCM format on the SIP side.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(
            self.codec.sample_rate,
            self.codec.channels,
            self.codec.frame_dur,
        )
    }

    pub(crate) fn take_reader(&mut self) -> Option<Box<dyn RtpReader>> {
        self.reader.take()
    }

    pub(crate) fn take_writer(&mut self) -> Option<Box<dyn RtpWriter>> {
        self.writer.take()
    }

    pub(crate) fn take_dtmf(&mut self) -> Option<mpsc::Receiver<char>> {
        self.dtmf.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sipbridge_rtp_core::{RtpHeader, RtpPacket};
    use std::time::Duration;

    struct NullReader;

    #[async_trait]
    impl RtpReader for NullReader {
        async fn read_rtp(&mut self, _buf: &mut [u8]) -> sipbridge_rtp_core::Result<(RtpHeader, usize)> {
            Err(sipbridge_rtp_core::Error::Eof)
        }
    }

    struct NullWriter;

    #[async_trait]
    impl RtpWriter for NullWriter {
        async fn write_rtp(&mut self, _packet: &RtpPacket) -> sipbridge_rtp_core::Result<()> {
            Ok(())
        }
    }

    struct FakeDialog {
        codecs: Vec<CodecDescriptor>,
        media_taken: bool,
    }

    impl FakeDialog {
        fn new(codecs: Vec<CodecDescriptor>) -> Self {
            Self {
                codecs,
                media_taken: false,
            }
        }
    }

    impl SipDialog for FakeDialog {
        fn remote_codecs(&self) -> &[CodecDescriptor] {
            &self.codecs
        }

        fn take_media(&mut self) -> Option<(Box<dyn RtpReader>, Box<dyn RtpWriter>)> {
            if self.media_taken {
                return None;
            }
            self.media_taken = true;
            Some((Box::new(NullReader), Box::new(NullWriter)))
        }
    }

    #[test]
    fn negotiates_best_codec_and_exposes_rates() {
        let dur = Duration::from_millis(20);
        let mut dialog = FakeDialog::new(vec![
            CodecDescriptor::pcma(dur),
            CodecDescriptor::g722(dur),
        ]);
        let endpoint = SipEndpoint::negotiate(&mut dialog, &BridgeConfig::default()).unwrap();

        assert_eq!(endpoint.codec().payload_type, 9);
        assert_eq!(endpoint.codec().sample_rate, 16000);
        assert_eq!(endpoint.codec().rtp_clock, 8000);
        assert_eq!(endpoint.format().frame_samples(), 320);
    }

    #[test]
    fn dtmf_only_offer_is_rejected() {
        let mut dialog = FakeDialog::new(vec![CodecDescriptor::telephone_event(101)]);
        let err = SipEndpoint::negotiate(&mut dialog, &BridgeConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Negotiation(codec::NegotiationError::DtmfOnly)
        ));
    }

    #[test]
    fn missing_media_session_is_a_config_error() {
        let mut dialog = FakeDialog::new(vec![CodecDescriptor::pcmu(Duration::from_millis(20))]);
        dialog.media_taken = true;
        let err = SipEndpoint::negotiate(&mut dialog, &BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
