pub mod errors;
pub mod frame;

pub use errors::CodecError;
pub use frame::{HEADER_LEN, MAX_DATAGRAM, MAX_PAYLOAD, Packet, PacketType};
