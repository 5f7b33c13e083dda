pub mod message;
pub mod tlv;

pub use message::{Codec, Frame, Header, MsgType, HEADER_LEN};
pub use tlv::{RawTlv, TlvType, MAX_REPEATED_TLVS};
