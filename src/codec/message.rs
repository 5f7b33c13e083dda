use crate::codec::tlv::{decode_tlvs, dedup_non_repeatable, encode_tlv, RawTlv, TlvType};
use crate::error::{CoreError, CoreResult};
use crate::identity::NodeIdentity;

/// Fixed 15-byte frame header: `msg_type(u16) | ttl(u8) | seq_num(u32) |
/// sender_id(48-bit) | payload_len(u16)`, all big-endian. `sender_id` is
/// always the message's *originator* and is never rewritten by a
/// forwarder — only the PREVIOUS_HOP TLV in the body changes hop to hop.
pub const HEADER_LEN: usize = 15;

/// Message-kind discriminant carried in the header's `msg_type` field. The
/// high bit is reserved 0 for this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    Hello = 1,
    ProviderAnnounce = 2,
    JoinOffer = 3,
    JoinAccept = 4,
    Ack = 5,
    AckAck = 6,
    PlatoonBeacon = 7,
    PlatoonAnnounce = 8,
    PlatoonStatus = 9,
    GridStatus = 10,
}

impl MsgType {
    fn from_u16(v: u16) -> CoreResult<Self> {
        use MsgType::*;
        Ok(match v {
            1 => Hello,
            2 => ProviderAnnounce,
            3 => JoinOffer,
            4 => JoinAccept,
            5 => Ack,
            6 => AckAck,
            7 => PlatoonBeacon,
            8 => PlatoonAnnounce,
            9 => PlatoonStatus,
            10 => GridStatus,
            other => return Err(CoreError::Codec(format!("unknown msg_type {other}"))),
        })
    }

    /// Message kinds that may legally be re-forwarded by an MPR/platoon
    /// member and therefore must carry (and have overwritten on each hop)
    /// a PREVIOUS_HOP TLV.
    pub fn is_forwardable(self) -> bool {
        matches!(
            self,
            MsgType::ProviderAnnounce | MsgType::PlatoonAnnounce | MsgType::GridStatus
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MsgType,
    pub ttl: u8,
    pub seq_num: u32,
    pub sender_id: NodeIdentity,
    pub payload_len: u16,
}

fn encode_header(h: &Header, payload_len: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&(h.msg_type as u16).to_be_bytes());
    out.push(h.ttl);
    out.extend_from_slice(&h.seq_num.to_be_bytes());
    out.extend_from_slice(h.sender_id.as_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
}

fn decode_header(bytes: &[u8]) -> CoreResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(CoreError::Codec("frame shorter than header".into()));
    }
    let msg_type = MsgType::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]))?;
    let ttl = bytes[2];
    let seq_num = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    let sender_id = NodeIdentity::new([
        bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12],
    ]);
    let payload_len = u16::from_be_bytes([bytes[13], bytes[13 + 1]]);
    Ok(Header {
        msg_type,
        ttl,
        seq_num,
        sender_id,
        payload_len,
    })
}

/// A fully decoded frame: header plus its ordered, duplicate-filtered TLV
/// body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub tlvs: Vec<RawTlv>,
}

impl Frame {
    pub fn new(
        msg_type: MsgType,
        ttl: u8,
        seq_num: u32,
        sender_id: NodeIdentity,
        tlvs: Vec<RawTlv>,
    ) -> Self {
        Self {
            header: Header {
                msg_type,
                ttl,
                seq_num,
                sender_id,
                payload_len: 0,
            },
            tlvs,
        }
    }

    pub fn find(&self, t: TlvType) -> Option<&RawTlv> {
        self.tlvs.iter().find(|tlv| tlv.type_code == t as u8)
    }

    pub fn find_all(&self, t: TlvType) -> Vec<&RawTlv> {
        self.tlvs
            .iter()
            .filter(|tlv| tlv.type_code == t as u8)
            .collect()
    }

    /// Overwrites (or inserts) the PREVIOUS_HOP TLV with `hop`, as every
    /// forwarder of a forwardable message must do before re-sending.
    /// `sender_id` (the originator) is untouched.
    pub fn set_previous_hop(&mut self, hop: NodeIdentity) {
        self.tlvs.retain(|t| t.type_code != TlvType::PreviousHop as u8);
        self.tlvs.push(RawTlv {
            type_code: TlvType::PreviousHop as u8,
            value: hop.as_bytes().to_vec(),
        });
    }

    pub fn previous_hop(&self) -> Option<NodeIdentity> {
        let tlv = self.find(TlvType::PreviousHop)?;
        if tlv.value.len() != 6 {
            return None;
        }
        let mut b = [0u8; 6];
        b.copy_from_slice(&tlv.value);
        Some(NodeIdentity::new(b))
    }

    /// Decrements TTL by one, returning `None` if the frame has hit zero
    /// and must be dropped rather than forwarded further.
    pub fn decremented_ttl(&self) -> Option<u8> {
        self.header.ttl.checked_sub(1).filter(|&t| t > 0)
    }
}

pub struct Codec;

impl Codec {
    pub fn encode(frame: &Frame) -> CoreResult<Vec<u8>> {
        if frame.header.msg_type.is_forwardable() && frame.find(TlvType::PreviousHop).is_none() {
            return Err(CoreError::Codec(
                "forwardable message missing PREVIOUS_HOP TLV".into(),
            ));
        }
        let mut body = Vec::new();
        for tlv in &frame.tlvs {
            encode_tlv(tlv.type_code, &tlv.value, &mut body)?;
        }
        if body.len() > u16::MAX as usize {
            return Err(CoreError::Codec("encoded body exceeds u16 length".into()));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        encode_header(&frame.header, body.len() as u16, &mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a header first, then its body — a truncated or bogus
    /// `payload_len` is rejected before any body-parsing work happens.
    pub fn decode(bytes: &[u8]) -> CoreResult<Frame> {
        let header = decode_header(bytes)?;
        let body_start = HEADER_LEN;
        let body_end = body_start + header.payload_len as usize;
        if body_end > bytes.len() {
            return Err(CoreError::Codec("payload_len exceeds frame length".into()));
        }
        let tlvs = dedup_non_repeatable(decode_tlvs(&bytes[body_start..body_end])?);
        Ok(Frame { header, tlvs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> NodeIdentity {
        NodeIdentity::from_u64(0xAABBCCDDEEFF)
    }

    #[test]
    fn hello_round_trips() {
        let mut frame = Frame::new(MsgType::Hello, 1, 7, sender(), vec![]);
        let mut tlvs = Vec::new();
        encode_tlv(TlvType::BatteryPct as u8, &[80], &mut tlvs).unwrap();
        frame.tlvs = decode_tlvs(&tlvs).unwrap();
        let bytes = Codec::encode(&frame).unwrap();
        let decoded = Codec::decode(&bytes).unwrap();
        assert_eq!(decoded.header.seq_num, 7);
        assert_eq!(decoded.header.sender_id, sender());
        assert_eq!(decoded.tlvs, frame.tlvs);
    }

    #[test]
    fn forwardable_without_previous_hop_rejected_on_encode() {
        let frame = Frame::new(MsgType::ProviderAnnounce, 4, 1, sender(), vec![]);
        assert!(Codec::encode(&frame).is_err());
    }

    #[test]
    fn originator_is_not_rewritten_when_forwarding() {
        let mut frame = Frame::new(MsgType::ProviderAnnounce, 4, 1, sender(), vec![]);
        frame.set_previous_hop(NodeIdentity::from_u64(1));
        let forwarder = NodeIdentity::from_u64(2);
        frame.set_previous_hop(forwarder);
        assert_eq!(frame.header.sender_id, sender());
        assert_eq!(frame.previous_hop(), Some(forwarder));
    }

    #[test]
    fn ttl_decrements_and_hits_floor() {
        let frame = Frame::new(MsgType::ProviderAnnounce, 1, 1, sender(), vec![]);
        assert_eq!(frame.decremented_ttl(), None);
        let frame2 = Frame::new(MsgType::ProviderAnnounce, 2, 1, sender(), vec![]);
        assert_eq!(frame2.decremented_ttl(), Some(1));
    }

    #[test]
    fn truncated_payload_len_is_rejected() {
        let frame = Frame::new(MsgType::Hello, 1, 1, sender(), vec![]);
        let mut bytes = Codec::encode(&frame).unwrap();
        let len = bytes.len();
        bytes[len - 1] = 0xFF;
        bytes[len - 2] = 0xFF;
        assert!(Codec::decode(&bytes).is_err());
    }
}
