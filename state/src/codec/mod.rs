pub mod messages;
pub mod wire;

use common::err::UltResult;

pub use wire::{WireReader, WireWriter};

/// 持久化消息的编解码口径。
/// 线上格式是 protobuf wire format (field number + wire type, varint, length-delimited)。
pub trait WireMessage: Sized {
    fn encode(&self, writer: &mut WireWriter);
    fn decode(reader: &mut WireReader) -> UltResult<Self>;

    fn to_encoded(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }

    fn from_encoded(buffer: &[u8]) -> UltResult<Self> {
        let mut reader = WireReader::new(buffer);
        Self::decode(&mut reader)
    }
}
