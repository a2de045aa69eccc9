//! RTP header and packet types (RFC 3550 §5.1).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{RTP_HEADER_SIZE, RTP_VERSION};

/// Parsed RTP fixed header plus CSRC list.
///
/// Header extensions are skipped during parsing (their content is not
/// interesting to an audio bridge) and never emitted when marshalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    /// Create a header with the fields an outbound audio stream needs.
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    /// Parse a header from the start of `data`.
    ///
    /// Returns the header and the offset at which the payload begins
    /// (after CSRC entries and any header extension).
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(Error::Truncated {
                needed: RTP_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(Error::BadVersion(version));
        }
        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0f) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7f;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_SIZE + csrc_count * 4;
        if data.len() < offset {
            return Err(Error::Truncated {
                needed: offset,
                actual: data.len(),
            });
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for i in 0..csrc_count {
            let at = RTP_HEADER_SIZE + i * 4;
            csrc.push(u32::from_be_bytes([
                data[at],
                data[at + 1],
                data[at + 2],
                data[at + 3],
            ]));
        }

        if extension {
            // Profile id (2 bytes) + length in 32-bit words (2 bytes).
            if data.len() < offset + 4 {
                return Err(Error::Truncated {
                    needed: offset + 4,
                    actual: data.len(),
                });
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if data.len() < offset {
                return Err(Error::Truncated {
                    needed: offset,
                    actual: data.len(),
                });
            }
        }

        Ok((
            Self {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
            },
            offset,
        ))
    }

    /// Serialized header length in bytes.
    pub fn len(&self) -> usize {
        RTP_HEADER_SIZE + self.csrc.len() * 4
    }

    /// Append the header in wire format to `buf`.
    pub fn marshal_to(&self, buf: &mut BytesMut) {
        let mut b0 = (RTP_VERSION << 6) | (self.csrc.len() as u8 & 0x0f);
        if self.padding {
            b0 |= 0x20;
        }
        buf.put_u8(b0);
        let mut b1 = self.payload_type & 0x7f;
        if self.marker {
            b1 |= 0x80;
        }
        buf.put_u8(b1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for c in &self.csrc {
            buf.put_u32(*c);
        }
    }
}

/// One RTP packet: parsed header plus owned payload bytes.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse a whole datagram, stripping RFC 3550 padding from the payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, offset) = RtpHeader::parse(data)?;
        let mut end = data.len();
        if header.padding {
            if end == offset {
                return Err(Error::BadPadding(0));
            }
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Error::BadPadding(pad));
            }
            end -= pad;
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }

    /// Serialize the packet into a fresh buffer.
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.len() + self.payload.len());
        self.header.marshal_to(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut header = RtpHeader::new(0, 4242, 16_000, 0xdead_beef);
        header.marker = true;
        let packet = RtpPacket::new(header.clone(), Bytes::from_static(&[1, 2, 3, 4]));
        let wire = packet.marshal();

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.payload.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_short_packet() {
        let err = RtpPacket::parse(&[0x80, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn rejects_bad_version() {
        let mut wire = vec![0u8; RTP_HEADER_SIZE];
        wire[0] = 1 << 6;
        let err = RtpPacket::parse(&wire).unwrap_err();
        assert!(matches!(err, Error::BadVersion(1)));
    }

    #[test]
    fn strips_padding() {
        let header = RtpHeader::new(8, 1, 160, 7);
        let mut buf = BytesMut::new();
        header.marshal_to(&mut buf);
        // Payload [9, 9] followed by two padding bytes, the last holding the count.
        buf.put_slice(&[9, 9, 0, 2]);
        let mut wire = buf.to_vec();
        wire[0] |= 0x20;

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert!(parsed.header.padding);
        assert_eq!(parsed.payload.as_ref(), &[9, 9]);
    }

    #[test]
    fn skips_extension_and_csrc() {
        // One CSRC entry plus a one-word extension before the payload.
        let mut wire = vec![
            (RTP_VERSION << 6) | 0x10 | 0x01, // extension + 1 CSRC
            96,
            0x00,
            0x07, // seq 7
            0,
            0,
            0,
            160, // ts
            0,
            0,
            0,
            1, // ssrc
            0,
            0,
            0,
            2, // csrc[0]
            0xbe,
            0xde,
            0x00,
            0x01, // extension profile + length (1 word)
            0,
            0,
            0,
            0, // extension body
        ];
        wire.extend_from_slice(&[0x55, 0x66]);

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.header.sequence_number, 7);
        assert_eq!(parsed.header.csrc, vec![2]);
        assert_eq!(parsed.payload.as_ref(), &[0x55, 0x66]);
    }

    #[test]
    fn sequence_wraparound_survives_round_trip() {
        let header = RtpHeader::new(96, u16::MAX, u32::MAX, 1);
        let packet = RtpPacket::new(header, Bytes::new());
        let parsed = RtpPacket::parse(&packet.marshal()).unwrap();
        assert_eq!(parsed.header.sequence_number, u16::MAX);
        assert_eq!(parsed.header.timestamp, u32::MAX);
    }
}
