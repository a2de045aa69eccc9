//! RTP jitter buffer: reordering and bounded-delay buffering.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use sipbridge_rtp_core::RtpPacket;

/// Jitter buffer tuning.
#[derive(Debug, Clone)]
pub struct JitterConfig {
    /// Packets buffered before the first pop; absorbs arrival variance at
    /// the cost of `min_depth × ptime` extra latency.
    pub min_depth: u16,
    /// Hard size bound; the oldest packet is evicted past this.
    pub max_size: u16,
    /// Largest missing-sequence run to wait for before skipping ahead.
    pub max_gap: u16,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_depth: 10,
            max_size: 100,
            max_gap: 25,
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct JitterStats {
    pub received: u64,
    pub output: u64,
    pub dropped: u64,
    pub lost: u64,
}

/// Reorders packets by sequence number with wraparound handling.
///
/// Packets are keyed by an extended (unwrapped) sequence so the BTreeMap
/// ordering stays correct across the 65535 → 0 boundary.
#[derive(Debug)]
pub struct JitterBuffer {
    config: JitterConfig,
    packets: BTreeMap<u64, RtpPacket>,
    next_ext: Option<u64>,
    highest_ext: Option<u64>,
    started: bool,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(config: JitterConfig) -> Self {
        Self {
            config,
            packets: BTreeMap::new(),
            next_ext: None,
            highest_ext: None,
            started: false,
            stats: JitterStats::default(),
        }
    }

    pub fn stats(&self) -> JitterStats {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Unwrap a 16-bit sequence into the extended domain closest to the
    /// highest sequence seen so far.
    fn extend_seq(&mut self, seq: u16) -> u64 {
        let Some(highest) = self.highest_ext else {
            // Bias the base well away from zero so reordered packets just
            // before the first one still map into the extended domain.
            let ext = 1u64 << 16 | seq as u64;
            self.highest_ext = Some(ext);
            return ext;
        };
        let base = highest & !0xffffu64;
        let mut candidate = base | seq as u64;
        // Pick the representative nearest the highest sequence.
        if candidate + 0x8000 < highest {
            candidate += 1 << 16;
        } else if candidate > highest + 0x8000 && candidate >= 1 << 16 {
            candidate -= 1 << 16;
        }
        if candidate > highest {
            self.highest_ext = Some(candidate);
        }
        candidate
    }

    /// Insert a packet. Returns false when it was dropped as late,
    /// duplicate, or overflow victim.
    pub fn push(&mut self, packet: RtpPacket) -> bool {
        self.stats.received += 1;
        let ext = self.extend_seq(packet.header.sequence_number);

        if let Some(next) = self.next_ext {
            if ext < next {
                trace!(seq = packet.header.sequence_number, "dropping late packet");
                self.stats.dropped += 1;
                return false;
            }
        }
        if self.packets.contains_key(&ext) {
            trace!(seq = packet.header.sequence_number, "dropping duplicate packet");
            self.stats.dropped += 1;
            return false;
        }

        self.packets.insert(ext, packet);

        while self.packets.len() > self.config.max_size as usize {
            if let Some((&oldest, _)) = self.packets.iter().next() {
                self.packets.remove(&oldest);
                self.stats.dropped += 1;
                warn!(ext_seq = oldest, "jitter buffer overflow, dropped oldest");
            }
        }
        true
    }

    /// Pop the next in-order packet, if one is ready.
    ///
    /// Holds back output until `min_depth` packets have accumulated once,
    /// waits on short gaps, and skips ahead when a gap exceeds `max_gap`.
    pub fn pop(&mut self) -> Option<RtpPacket> {
        if !self.started {
            if self.packets.len() < self.config.min_depth.max(1) as usize {
                return None;
            }
            self.started = true;
            self.next_ext = self.packets.keys().next().copied();
        }

        let next = self.next_ext?;
        if let Some(packet) = self.packets.remove(&next) {
            self.next_ext = Some(next + 1);
            self.stats.output += 1;
            return Some(packet);
        }

        let (&first, _) = self.packets.iter().next()?;
        let gap = first - next;
        if gap > self.config.max_gap as u64 {
            debug!(gap, "skipping over lost packets");
            self.stats.lost += gap;
            self.next_ext = Some(first + 1);
            self.stats.output += 1;
            return self.packets.remove(&first);
        }

        // Wait for the missing packet to arrive.
        None
    }

    /// Pop every packet that is ready right now.
    pub fn pop_ready(&mut self) -> Vec<RtpPacket> {
        let mut out = Vec::new();
        while let Some(p) = self.pop() {
            out.push(p);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipbridge_rtp_core::RtpHeader;

    fn packet(seq: u16) -> RtpPacket {
        RtpPacket::new(
            RtpHeader::new(0, seq, seq as u32 * 160, 1),
            Bytes::from_static(&[0; 4]),
        )
    }

    fn config(min_depth: u16) -> JitterConfig {
        JitterConfig {
            min_depth,
            max_size: 10,
            max_gap: 5,
        }
    }

    #[test]
    fn reorders_out_of_order_packets() {
        let mut jb = JitterBuffer::new(config(1));
        jb.push(packet(2));
        jb.push(packet(1));
        jb.push(packet(3));

        // First pop anchors on the lowest buffered sequence.
        let seqs: Vec<u16> = jb.pop_ready().iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn waits_for_min_depth_once() {
        let mut jb = JitterBuffer::new(config(3));
        jb.push(packet(1));
        jb.push(packet(2));
        assert!(jb.pop().is_none());
        jb.push(packet(3));
        assert_eq!(jb.pop().unwrap().header.sequence_number, 1);
        // After starting, packets flow without re-buffering.
        assert_eq!(jb.pop().unwrap().header.sequence_number, 2);
    }

    #[test]
    fn waits_on_small_gap_then_delivers() {
        let mut jb = JitterBuffer::new(config(1));
        jb.push(packet(1));
        assert_eq!(jb.pop().unwrap().header.sequence_number, 1);
        jb.push(packet(3));
        // Gap of one: wait for packet 2.
        assert!(jb.pop().is_none());
        jb.push(packet(2));
        assert_eq!(jb.pop().unwrap().header.sequence_number, 2);
        assert_eq!(jb.pop().unwrap().header.sequence_number, 3);
    }

    #[test]
    fn skips_over_large_gaps() {
        let mut jb = JitterBuffer::new(config(1));
        jb.push(packet(1));
        assert!(jb.pop().is_some());
        jb.push(packet(10));
        let p = jb.pop().unwrap();
        assert_eq!(p.header.sequence_number, 10);
        assert_eq!(jb.stats().lost, 8);
    }

    #[test]
    fn drops_duplicates_and_late_packets() {
        let mut jb = JitterBuffer::new(config(1));
        jb.push(packet(5));
        assert!(!jb.push(packet(5)));
        assert!(jb.pop().is_some());
        assert!(!jb.push(packet(4)));
        assert_eq!(jb.stats().dropped, 2);
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut jb = JitterBuffer::new(config(1));
        for seq in 0..11 {
            jb.push(packet(seq));
        }
        assert_eq!(jb.len(), 10);
        assert_eq!(jb.pop().unwrap().header.sequence_number, 1);
    }

    #[test]
    fn handles_sequence_wraparound() {
        let mut jb = JitterBuffer::new(config(1));
        for seq in [65534u16, 65535, 0, 1] {
            jb.push(packet(seq));
        }
        let seqs: Vec<u16> = jb.pop_ready().iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![65534, 65535, 0, 1]);
    }

    #[test]
    fn wraparound_reorder_before_first_packet() {
        let mut jb = JitterBuffer::new(config(1));
        jb.push(packet(0));
        jb.push(packet(65535));
        let seqs: Vec<u16> = jb.pop_ready().iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs, vec![65535, 0]);
    }
}
