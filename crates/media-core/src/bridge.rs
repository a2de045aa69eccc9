//! The per-call media bridge supervisor.
//!
//! Owns the cancellation token and the three workers: the decode-read
//! loop (SIP RTP → playout buffer), the paced injector (playout buffer →
//! messenger, 10 ms cadence, drift control), and the encode-write loop
//! (messenger queue → SIP RTP, same cadence). Workers communicate
//! through the token only; the supervisor surfaces the first terminal
//! error and never restarts a worker.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sipbridge_rtp_core::{RtpPacket, RtpReader, RTP_BUF_SIZE};

use crate::config::BridgeConfig;
use crate::drift::DriftController;
use crate::endpoint::messenger::{FrameInjector, MessengerEndpoint};
use crate::endpoint::sip::SipEndpoint;
use crate::error::{Error, Result};
use crate::pcm::{self, PlayoutBuffer};
use crate::pipeline::{DecodeChain, EncodeChain};

/// Cadence of the injector's periodic statistics line.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// How long the injector sends fallback silence before warning, and the
/// minimum spacing of those warnings.
const UNDERFLOW_WARN_AFTER: Duration = Duration::from_secs(2);

/// One call's media plane, ready to run.
///
/// Lifecycle is one-way by construction: `new` builds the chains from the
/// negotiated endpoints, `run` consumes the bridge, and a finished bridge
/// cannot be restarted.
pub struct MediaBridge {
    cancel: CancellationToken,
    playout: Arc<PlayoutBuffer>,
    reader: Box<dyn RtpReader>,
    decode: DecodeChain,
    injector: FrameInjector,
    frames_rx: mpsc::Receiver<Vec<u8>>,
    encode: EncodeChain,
    dtmf: Option<mpsc::Receiver<char>>,
    drift: DriftController,
    drift_target: usize,
    drift_max_burst: usize,
    payload_type: u8,
    frame_dur: Duration,
    step: Duration,
}

impl MediaBridge {
    /// Build the decode and encode chains for a negotiated call.
    ///
    /// Fails on configuration problems only; no worker starts until
    /// [`run`](Self::run).
    pub fn new(
        mut sip: SipEndpoint,
        messenger: &MessengerEndpoint,
        cfg: &BridgeConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let messenger_format = messenger.format();
        if messenger_format.frame_bytes() == 0 {
            return Err(Error::Config("messenger frame size is zero".into()));
        }

        let playout = Arc::new(PlayoutBuffer::new(messenger_format.frame_bytes()));
        let decode = DecodeChain::new(
            sip.codec(),
            messenger_format,
            Arc::clone(&playout),
            sip.jitter_min_packets(),
        )?;

        let writer = sip
            .take_writer()
            .ok_or_else(|| Error::Config("sip rtp writer not available".into()))?;
        let encode = EncodeChain::new(sip.codec(), messenger_format, writer)?;

        let reader = sip
            .take_reader()
            .ok_or_else(|| Error::Config("sip rtp reader not available".into()))?;
        let frames_rx = messenger
            .take_frames()
            .ok_or_else(|| Error::Config("messenger frame queue already claimed".into()))?;

        Ok(Self {
            cancel: CancellationToken::new(),
            playout,
            reader,
            decode,
            injector: messenger.injector(),
            frames_rx,
            encode,
            dtmf: sip.take_dtmf(),
            drift: DriftController::new(cfg.drift_target_frames),
            drift_target: cfg.drift_target_frames,
            drift_max_burst: cfg.drift_max_burst.max(1),
            payload_type: sip.codec().payload_type,
            frame_dur: sip.codec().frame_dur,
            step: messenger_format.frame_dur,
        })
    }

    /// Token for external teardown (BYE, messenger disconnect).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the call to completion.
    ///
    /// Starts the three workers, waits for all of them, and returns the
    /// first terminal error any of them reported. A cancelled call that
    /// saw no error returns `Ok`.
    pub async fn run(self) -> Result<()> {
        let MediaBridge {
            cancel,
            playout,
            reader,
            decode,
            injector,
            frames_rx,
            encode,
            dtmf,
            drift,
            drift_target,
            drift_max_burst,
            payload_type,
            frame_dur,
            step,
        } = self;

        info!(
            payload_type,
            frame_size = playout.frame_size(),
            step_ms = step.as_millis() as u64,
            "media bridge starting"
        );

        let (err_tx, mut err_rx) = mpsc::channel::<Error>(4);

        let mut workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(decode_worker(
                reader,
                decode,
                payload_type,
                frame_dur,
                cancel.clone(),
                err_tx.clone(),
            )),
            tokio::spawn(injector_worker(
                Arc::clone(&playout),
                injector,
                drift,
                step,
                cancel.clone(),
                err_tx.clone(),
            )),
            tokio::spawn(encode_worker(
                frames_rx,
                encode,
                drift_target,
                drift_max_burst,
                playout.frame_size(),
                step,
                cancel.clone(),
                err_tx,
            )),
        ];
        if let Some(digits) = dtmf {
            workers.push(tokio::spawn(dtmf_worker(digits, cancel.clone())));
        }

        for worker in workers {
            let _ = worker.await;
        }
        info!("media bridge stopped");

        match err_rx.try_recv() {
            Ok(first) => Err(first),
            Err(_) => Ok(()),
        }
    }
}

/// Blocks on RTP reads, filters the negotiated payload type, and feeds
/// the decode chain. Read timeouts are recovered by looping; EOF and
/// chain failures terminate the call.
async fn decode_worker(
    mut reader: Box<dyn RtpReader>,
    mut chain: DecodeChain,
    payload_type: u8,
    frame_dur: Duration,
    cancel: CancellationToken,
    errs: mpsc::Sender<Error>,
) {
    let mut buf = vec![0u8; RTP_BUF_SIZE];
    let read_timeout = frame_dur * 4;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = tokio::time::timeout(read_timeout, reader.read_rtp(&mut buf)) => {
                let (header, len) = match read {
                    // Timeout with cancellation pending is handled by the
                    // next select; otherwise just keep listening.
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        if e.is_eof() {
                            info!("sip rtp stream ended");
                        } else {
                            warn!(error = %e, "sip rtp read failed");
                            let _ = errs.try_send(Error::Rtp(e));
                        }
                        cancel.cancel();
                        break;
                    }
                    Ok(Ok(r)) => r,
                };
                if header.payload_type != payload_type || len == 0 {
                    continue;
                }
                // The read buffer is reused; the jitter buffer keeps
                // payload references, so copy before handing it over.
                let payload = Bytes::copy_from_slice(&buf[..len]);
                if let Err(e) = chain.handle_packet(RtpPacket::new(header, payload)) {
                    warn!(error = %e, "sip decode chain failed");
                    let _ = errs.try_send(e);
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    debug!("decode worker stopped");
}

struct InjectorStats {
    frames_sent: u64,
    real_frames: u64,
    adj_pos: u64,
    adj_neg: u64,
    last_energy: f64,
    last_real_at: tokio::time::Instant,
    last_stats_at: tokio::time::Instant,
    last_underflow_warn: Option<tokio::time::Instant>,
}

impl InjectorStats {
    fn new() -> Self {
        let now = tokio::time::Instant::now();
        Self {
            frames_sent: 0,
            real_frames: 0,
            adj_pos: 0,
            adj_neg: 0,
            last_energy: 0.0,
            last_real_at: now,
            last_stats_at: now,
            last_underflow_warn: None,
        }
    }

    fn record(&mut self, real: bool, adjust: i32, frame: &[u8], acc: i64, backlog: usize) {
        self.frames_sent += 1;
        match adjust {
            1 => self.adj_pos += 1,
            -1 => self.adj_neg += 1,
            _ => {}
        }
        let now = tokio::time::Instant::now();
        if real {
            self.real_frames += 1;
            self.last_real_at = now;
            self.last_energy = pcm::rms_energy(frame);
        }

        if now - self.last_stats_at >= STATS_INTERVAL {
            self.last_stats_at = now;
            info!(
                frames_sent = self.frames_sent,
                real_frames = self.real_frames,
                backlog,
                drift_acc = acc,
                adj_pos = self.adj_pos,
                adj_neg = self.adj_neg,
                ms_since_real = (now - self.last_real_at).as_millis() as u64,
                energy = self.last_energy,
                "sip->messenger stats"
            );
        }

        // Tell "underflowing" apart from "receiving zero-energy audio",
        // without flooding the log during long underflows.
        if now - self.last_real_at >= UNDERFLOW_WARN_AFTER
            && self
                .last_underflow_warn
                .map_or(true, |at| now - at >= UNDERFLOW_WARN_AFTER)
        {
            self.last_underflow_warn = Some(now);
            warn!(
                ms_since_real = (now - self.last_real_at).as_millis() as u64,
                backlog, "sip->messenger underflow, sending silence"
            );
        }
    }
}

/// Wakes every `step`, applies drift control, and injects exactly one
/// frame (real or silence) into the messenger call.
async fn injector_worker(
    playout: Arc<PlayoutBuffer>,
    mut injector: FrameInjector,
    mut drift: DriftController,
    step: Duration,
    cancel: CancellationToken,
    errs: mpsc::Sender<Error>,
) {
    let mut ticker = tokio::time::interval(step);
    let mut frame = vec![0u8; playout.frame_size()];
    let mut stats = InjectorStats::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let backlog = playout.len_frames();
                let decision = drift.tick(backlog);
                if decision.hard_drop > 0 {
                    let dropped = playout.drop_frames(decision.hard_drop);
                    if dropped > 0 {
                        warn!(
                            dropped,
                            backlog_before = backlog,
                            target = drift.target(),
                            "playout hard cap exceeded, dropping oldest frames"
                        );
                    }
                }
                let real = playout.read_into_adjust(&mut frame, decision.adjust);
                stats.record(real, decision.adjust, &frame, drift.acc(), playout.len_frames());
                if let Err(e) = injector.send(&frame).await {
                    warn!(error = %e, "messenger frame injection failed");
                    let _ = errs.try_send(e);
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    info!(
        frames_sent = stats.frames_sent,
        real_frames = stats.real_frames,
        "paced injector stopped"
    );
}

/// Wakes every `step`, drains reverse-path backlog gently, and feeds the
/// encode chain one frame per tick — fallback silence on underflow so the
/// RTP stream never starves.
async fn encode_worker(
    mut frames: mpsc::Receiver<Vec<u8>>,
    mut chain: EncodeChain,
    drift_target: usize,
    drift_max_burst: usize,
    frame_size: usize,
    step: Duration,
    cancel: CancellationToken,
    errs: mpsc::Sender<Error>,
) {
    let mut ticker = tokio::time::interval(step);
    let silence = vec![0u8; frame_size];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Keep real-time pace: drop oldest frames when the far
                // side outruns us, but never more than the burst limit
                // per tick to avoid audible time jumps.
                let backlog = frames.len();
                if backlog > drift_target {
                    let to_drop = (backlog - drift_target).min(drift_max_burst);
                    let mut dropped = 0;
                    for _ in 0..to_drop {
                        if frames.try_recv().is_ok() {
                            dropped += 1;
                        } else {
                            break;
                        }
                    }
                    if dropped > 0 {
                        debug!(dropped, backlog_before = backlog, "messenger->sip backlog drop");
                    }
                }
                let popped = match frames.try_recv() {
                    Ok(frame) => Some(frame),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => {
                        info!("messenger stream ended");
                        cancel.cancel();
                        break;
                    }
                };
                let pcm: &[u8] = popped.as_deref().unwrap_or(&silence);
                if let Err(e) = chain.push_frame(pcm).await {
                    warn!(error = %e, "sip rtp encode/write failed");
                    let _ = errs.try_send(e);
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    debug!(frames = chain.frames_sent(), "encode worker stopped");
}

/// Logs DTMF digits surfaced by the SIP collaborator; the media plane
/// takes no other action on them.
async fn dtmf_worker(mut digits: mpsc::Receiver<char>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            digit = digits.recv() => match digit {
                Some(d) => info!(digit = %d, "DTMF received"),
                None => break,
            },
        }
    }
}
