//! Full-bridge tests with mock collaborators under paused tokio time:
//! reverse-path underflow, capture-clock monotonicity, and teardown on
//! each side's terminal conditions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sipbridge_media_core::codec::CodecDescriptor;
use sipbridge_media_core::endpoint::{FrameSink, MessengerEndpoint, SipDialog, SipEndpoint};
use sipbridge_media_core::{BridgeConfig, MediaBridge, StreamDevice};
use sipbridge_rtp_core::{RtpHeader, RtpPacket, RtpReader, RtpWriter};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sipbridge_media_core=debug")
        .try_init();
}

/// RTP reader that never yields a packet (remote stays silent).
struct PendingReader;

#[async_trait]
impl RtpReader for PendingReader {
    async fn read_rtp(&mut self, _buf: &mut [u8]) -> sipbridge_rtp_core::Result<(RtpHeader, usize)> {
        std::future::pending().await
    }
}

/// RTP reader whose socket is already closed.
struct EofReader;

#[async_trait]
impl RtpReader for EofReader {
    async fn read_rtp(&mut self, _buf: &mut [u8]) -> sipbridge_rtp_core::Result<(RtpHeader, usize)> {
        Err(sipbridge_rtp_core::Error::Eof)
    }
}

#[derive(Clone, Default)]
struct RecordingWriter {
    sent: Arc<Mutex<Vec<RtpPacket>>>,
}

#[async_trait]
impl RtpWriter for RecordingWriter {
    async fn write_rtp(&mut self, packet: &RtpPacket) -> sipbridge_rtp_core::Result<()> {
        self.sent.lock().unwrap().push(packet.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    frames: Arc<Mutex<Vec<(i64, Vec<u8>)>>>,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_external_frame(
        &self,
        _chat_id: i64,
        device: StreamDevice,
        pcm: &[u8],
        capture_ts_ms: i64,
    ) -> sipbridge_media_core::Result<()> {
        assert_eq!(device, StreamDevice::Microphone);
        self.frames.lock().unwrap().push((capture_ts_ms, pcm.to_vec()));
        Ok(())
    }
}

struct FakeDialog {
    codecs: Vec<CodecDescriptor>,
    media: Option<(Box<dyn RtpReader>, Box<dyn RtpWriter>)>,
    dtmf: Option<mpsc::Receiver<char>>,
}

impl FakeDialog {
    fn new(reader: Box<dyn RtpReader>, writer: Box<dyn RtpWriter>) -> Self {
        Self {
            codecs: vec![CodecDescriptor::pcmu(Duration::from_millis(20))],
            media: Some((reader, writer)),
            dtmf: None,
        }
    }
}

impl SipDialog for FakeDialog {
    fn remote_codecs(&self) -> &[CodecDescriptor] {
        &self.codecs
    }

    fn take_media(&mut self) -> Option<(Box<dyn RtpReader>, Box<dyn RtpWriter>)> {
        self.media.take()
    }

    fn take_dtmf(&mut self) -> Option<mpsc::Receiver<char>> {
        self.dtmf.take()
    }
}

fn build_bridge(
    reader: Box<dyn RtpReader>,
    writer: RecordingWriter,
    sink: RecordingSink,
) -> (MediaBridge, MessengerEndpoint) {
    let cfg = BridgeConfig::default();
    let mut dialog = FakeDialog::new(reader, Box::new(writer));
    let sip = SipEndpoint::negotiate(&mut dialog, &cfg).unwrap();
    let messenger = MessengerEndpoint::new(42, cfg.messenger_format(), Arc::new(sink));
    let bridge = MediaBridge::new(sip, &messenger, &cfg).unwrap();
    (bridge, messenger)
}

/// Reverse underflow: with no messenger audio at all, the encode worker
/// keeps the RTP stream alive with silence at the full frame rate, and
/// the injector keeps the messenger fed with silence frames whose
/// capture timestamps stay strictly monotonic on the 10 ms grid.
#[tokio::test(start_paused = true)]
async fn underflow_emits_silence_on_both_legs() {
    init_tracing();
    let writer = RecordingWriter::default();
    let sink = RecordingSink::default();
    let (bridge, _messenger) = build_bridge(Box::new(PendingReader), writer.clone(), sink.clone());
    let cancel = bridge.cancel_token();
    let call = tokio::spawn(bridge.run());

    // Run a bit over 200 ms of virtual call time.
    loop {
        if sink.frames.lock().unwrap().len() >= 25 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    call.await.unwrap().unwrap();

    // Injected frames: 960-byte silence, timestamps strictly increasing
    // in whole 10 ms steps.
    let frames = sink.frames.lock().unwrap();
    let mut last_ts = i64::MIN;
    for (ts, pcm) in frames.iter() {
        assert_eq!(pcm.len(), 960);
        assert!(pcm.iter().all(|&b| b == 0), "underflow frame not silent");
        assert!(*ts > last_ts, "capture timestamps must increase");
        if last_ts != i64::MIN {
            assert_eq!((ts - last_ts) % 10, 0);
        }
        last_ts = *ts;
    }

    // Encoded leg: 20 ms PCMU silence packets with contiguous sequence
    // numbers and 160-tick timestamp strides.
    let sent = writer.sent.lock().unwrap();
    assert!(sent.len() >= 10, "expected 200 ms of silence packets, got {}", sent.len());
    for packet in sent.iter() {
        assert_eq!(packet.header.payload_type, 0);
        assert_eq!(packet.payload.len(), 160);
        assert!(packet.payload.iter().all(|&b| b == 0xff), "PCMU silence is 0xff");
    }
    for pair in sent.windows(2) {
        assert_eq!(
            pair[1].header.sequence_number,
            pair[0].header.sequence_number.wrapping_add(1)
        );
        assert_eq!(
            pair[1].header.timestamp.wrapping_sub(pair[0].header.timestamp),
            160
        );
    }
    assert!(sent[0].header.marker);
}

/// An RTP EOF is a normal end of call: every worker stops, nothing
/// leaks, and the supervisor reports no error.
#[tokio::test(start_paused = true)]
async fn rtp_eof_ends_the_call_cleanly() {
    init_tracing();
    let writer = RecordingWriter::default();
    let sink = RecordingSink::default();
    let (bridge, _messenger) = build_bridge(Box::new(EofReader), writer, sink);
    assert!(bridge.run().await.is_ok());
}

/// Closing the messenger endpoint tears the whole call down once the
/// encode worker drains the queue.
#[tokio::test(start_paused = true)]
async fn messenger_close_ends_the_call() {
    init_tracing();
    let writer = RecordingWriter::default();
    let sink = RecordingSink::default();
    let (bridge, messenger) = build_bridge(Box::new(PendingReader), writer, sink);
    let call = tokio::spawn(bridge.run());

    tokio::time::sleep(Duration::from_millis(30)).await;
    messenger.close();
    assert!(call.await.unwrap().is_ok());
}

/// Far-side audio pushed into the endpoint comes out encoded on the SIP
/// leg instead of silence.
#[tokio::test(start_paused = true)]
async fn far_side_audio_reaches_the_rtp_leg() {
    init_tracing();
    let writer = RecordingWriter::default();
    let sink = RecordingSink::default();
    let (bridge, messenger) = build_bridge(Box::new(PendingReader), writer.clone(), sink);
    let cancel = bridge.cancel_token();
    let call = tokio::spawn(bridge.run());

    // 100 ms of a loud constant signal from the messenger side.
    let samples = vec![4000i16; 480];
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    for _ in 0..10 {
        messenger.push_playback_bytes(&bytes).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    call.await.unwrap().unwrap();

    let sent = writer.sent.lock().unwrap();
    assert!(
        sent.iter().any(|p| p.payload.iter().any(|&b| b != 0xff)),
        "no non-silence payload reached the SIP leg"
    );
}
