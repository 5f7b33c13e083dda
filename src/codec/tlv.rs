use crate::error::{CoreError, CoreResult};

/// Maximum number of occurrences of a repeated-list TLV (NEIGHBOR_LIST,
/// PROVIDER_ENTRY, OFFER_ACCEPT, FORMATION_POSITIONS) accepted from a single
/// decoded message. A malformed or adversarial frame cannot force this
/// crate past a bounded amount of work regardless of what `payload_len`
/// claims.
pub const MAX_REPEATED_TLVS: usize = 256;

/// Stable TLV type-number assignment, fixed in the order each TLV is first
/// introduced by the protocol's message layer. Unknown numbers decode as
/// `Tlv::Unknown` and are skipped by callers that don't recognise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TlvType {
    Identity = 1,
    Position = 2,
    Velocity = 3,
    BatteryPct = 4,
    Willingness = 5,
    ProviderFlag = 6,
    ShareableEnergy = 7,
    Direction = 8,
    NeighborList = 9,
    PreviousHop = 10,
    ProviderEntry = 11,
    SessionId = 12,
    RequiredEnergy = 13,
    MeetingPoint = 14,
    PlatoonId = 15,
    HeadId = 16,
    Destination = 17,
    AvailableSlots = 18,
    SurplusEnergy = 19,
    FormationPositions = 20,
    TopologyVector = 21,
    RelIndex = 22,
    ReceiveRate = 23,
    GridState = 24,
    OfferAccept = 25,
    FormationEfficiency = 26,
    Etx = 27,
    JitterMs = 28,
    LaneWeight = 29,
    StabilityScore = 30,
}

impl TlvType {
    fn from_u8(v: u8) -> Option<Self> {
        use TlvType::*;
        Some(match v {
            1 => Identity,
            2 => Position,
            3 => Velocity,
            4 => BatteryPct,
            5 => Willingness,
            6 => ProviderFlag,
            7 => ShareableEnergy,
            8 => Direction,
            9 => NeighborList,
            10 => PreviousHop,
            11 => ProviderEntry,
            12 => SessionId,
            13 => RequiredEnergy,
            14 => MeetingPoint,
            15 => PlatoonId,
            16 => HeadId,
            17 => Destination,
            18 => AvailableSlots,
            19 => SurplusEnergy,
            20 => FormationPositions,
            21 => TopologyVector,
            22 => RelIndex,
            23 => ReceiveRate,
            24 => GridState,
            25 => OfferAccept,
            26 => FormationEfficiency,
            27 => Etx,
            28 => JitterMs,
            29 => LaneWeight,
            30 => StabilityScore,
            _ => return None,
        })
    }

    /// Whether a message body may legally carry more than one TLV of this
    /// type (list-valued TLVs in PA/JOIN_ACCEPT/platoon messages). All
    /// other TLV types keep only their first occurrence on decode.
    pub fn allows_repetition(self) -> bool {
        matches!(
            self,
            TlvType::NeighborList
                | TlvType::ProviderEntry
                | TlvType::OfferAccept
                | TlvType::FormationPositions
        )
    }
}

/// One decoded type-length-value entry. The raw value bytes are kept
/// uninterpreted here; per-message code in `codec::message` is responsible
/// for parsing each TLV's value according to its type.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTlv {
    pub type_code: u8,
    pub value: Vec<u8>,
}

pub fn encode_tlv(type_code: u8, value: &[u8], out: &mut Vec<u8>) -> CoreResult<()> {
    if value.len() > u8::MAX as usize {
        return Err(CoreError::Codec(format!(
            "tlv value too long: {} bytes",
            value.len()
        )));
    }
    out.push(type_code);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    Ok(())
}

/// Decodes an ordered run of TLVs from `body`. Unknown type codes are kept
/// as `RawTlv` (the caller decides whether to skip them); this function
/// only enforces structural well-formedness (no truncated length/value) and
/// the repeated-TLV cap.
pub fn decode_tlvs(body: &[u8]) -> CoreResult<Vec<RawTlv>> {
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut counts = [0usize; 256];
    while i < body.len() {
        if i + 2 > body.len() {
            return Err(CoreError::Codec("truncated tlv header".into()));
        }
        let type_code = body[i];
        let len = body[i + 1] as usize;
        let start = i + 2;
        let end = start + len;
        if end > body.len() {
            return Err(CoreError::Codec("truncated tlv value".into()));
        }
        counts[type_code as usize] += 1;
        let repeat_ok = TlvType::from_u8(type_code)
            .map(TlvType::allows_repetition)
            .unwrap_or(false);
        if repeat_ok && counts[type_code as usize] > MAX_REPEATED_TLVS {
            return Err(CoreError::Codec(format!(
                "too many repeated tlvs of type {type_code}"
            )));
        }
        out.push(RawTlv {
            type_code,
            value: body[start..end].to_vec(),
        });
        i = end;
    }
    Ok(out)
}

/// Filters a decoded TLV run down to one entry per non-repeatable type
/// (first occurrence wins) while preserving every occurrence of
/// repeatable (list) types, per the protocol's duplicate-TLV rule.
pub fn dedup_non_repeatable(tlvs: Vec<RawTlv>) -> Vec<RawTlv> {
    let mut seen = [false; 256];
    let mut out = Vec::with_capacity(tlvs.len());
    for tlv in tlvs {
        let repeat_ok = TlvType::from_u8(tlv.type_code)
            .map(TlvType::allows_repetition)
            .unwrap_or(false);
        if repeat_ok {
            out.push(tlv);
            continue;
        }
        if !seen[tlv.type_code as usize] {
            seen[tlv.type_code as usize] = true;
            out.push(tlv);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let mut buf = Vec::new();
        encode_tlv(TlvType::BatteryPct as u8, &[99], &mut buf).unwrap();
        encode_tlv(TlvType::Willingness as u8, &[1, 2], &mut buf).unwrap();
        let tlvs = decode_tlvs(&buf).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].type_code, TlvType::BatteryPct as u8);
        assert_eq!(tlvs[0].value, vec![99]);
        assert_eq!(tlvs[1].value, vec![1, 2]);
    }

    #[test]
    fn truncated_value_is_rejected() {
        let buf = vec![TlvType::BatteryPct as u8, 5, 1, 2];
        assert!(decode_tlvs(&buf).is_err());
    }

    #[test]
    fn duplicate_non_repeatable_keeps_first() {
        let mut buf = Vec::new();
        encode_tlv(TlvType::BatteryPct as u8, &[1], &mut buf).unwrap();
        encode_tlv(TlvType::BatteryPct as u8, &[2], &mut buf).unwrap();
        let tlvs = dedup_non_repeatable(decode_tlvs(&buf).unwrap());
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].value, vec![1]);
    }

    #[test]
    fn duplicate_repeatable_keeps_all() {
        let mut buf = Vec::new();
        encode_tlv(TlvType::ProviderEntry as u8, &[1], &mut buf).unwrap();
        encode_tlv(TlvType::ProviderEntry as u8, &[2], &mut buf).unwrap();
        let tlvs = dedup_non_repeatable(decode_tlvs(&buf).unwrap());
        assert_eq!(tlvs.len(), 2);
    }
}
