use std::io::Read;

use tracing::warn;

use common::err::{UltError, UltResult};

use crate::events::event_header::{EVENT_LEN_OFFSET, HEADER_LEN};
use crate::utils::{read_lenenc_int, take_bytes};

/// Transaction_payload_event 的 on-the-wire 字段
const OTW_PAYLOAD_HEADER_END_MARK: u64 = 0;
const OTW_PAYLOAD_SIZE_FIELD: u64 = 1;
const OTW_PAYLOAD_COMPRESSION_TYPE_FIELD: u64 = 2;
const OTW_PAYLOAD_UNCOMPRESSED_SIZE_FIELD: u64 = 3;

pub const COMPRESSION_ZSTD: u64 = 0;
pub const COMPRESSION_NONE: u64 = 255;

/// TRANSACTION_PAYLOAD_EVENT 信封:
/// TLV 字段表 (end mark 终止) + 压缩过的嵌套 event 流
#[derive(Debug, Clone)]
pub struct TransactionPayload {
    pub compression_type: u64,
    pub payload_size: u64,
    pub uncompressed_size: u64,
    pub payload: Vec<u8>,
}

impl TransactionPayload {
    /// body: common header 之后的事件体 (checksum 已剥除)
    pub fn parse(body: &[u8]) -> UltResult<TransactionPayload> {
        let mut pos = 0;

        let mut compression_type = COMPRESSION_NONE;
        let mut payload_size = 0u64;
        let mut uncompressed_size = 0u64;

        loop {
            let field_type = read_lenenc_int(body, &mut pos)?;
            if field_type == OTW_PAYLOAD_HEADER_END_MARK {
                break;
            }

            let length = read_lenenc_int(body, &mut pos)? as usize;
            let value = take_bytes(body, &mut pos, length)?;

            let mut value_pos = 0;
            match field_type {
                OTW_PAYLOAD_SIZE_FIELD => {
                    payload_size = read_lenenc_int(value, &mut value_pos)?;
                }
                OTW_PAYLOAD_COMPRESSION_TYPE_FIELD => {
                    compression_type = read_lenenc_int(value, &mut value_pos)?;
                }
                OTW_PAYLOAD_UNCOMPRESSED_SIZE_FIELD => {
                    uncompressed_size = read_lenenc_int(value, &mut value_pos)?;
                }
                other => {
                    warn!("unknown transaction payload field: {}", other);
                }
            }
        }

        if payload_size as usize > body.len() - pos {
            return Err(UltError::Decode(String::from(
                "transaction payload size exceeds event body",
            )));
        }

        let payload = if payload_size > 0 {
            take_bytes(body, &mut pos, payload_size as usize)?.to_vec()
        } else {
            body[pos..].to_vec()
        };

        Ok(TransactionPayload {
            compression_type,
            payload_size,
            uncompressed_size,
            payload,
        })
    }

    /// 解压嵌套 event 流。
    /// 解压中途出错时保留已解出的前缀并告警 (与后续按事件边界切分配合,
    /// 不完整的尾部事件会被丢弃)。
    pub fn decompress(&self) -> UltResult<Vec<u8>> {
        match self.compression_type {
            COMPRESSION_NONE => Ok(self.payload.clone()),
            COMPRESSION_ZSTD => {
                let mut decoder = zstd::stream::read::Decoder::new(self.payload.as_slice())
                    .map_err(|e| UltError::Decode(format!("zstd init failed: {}", e)))?;

                let mut output = Vec::with_capacity(self.uncompressed_size as usize);
                if let Err(e) = decoder.read_to_end(&mut output) {
                    warn!("payload decompression error: {} (keeping {} bytes)", e, output.len());
                }

                Ok(output)
            }
            other => Err(UltError::Decode(format!("unknown compression type: {}", other))),
        }
    }
}

/// 把解压后的流按事件边界切分。末尾不完整的事件丢弃。
pub fn split_events(buffer: &[u8]) -> Vec<Vec<u8>> {
    let mut events = vec![];
    let mut pos = 0;

    while pos + HEADER_LEN <= buffer.len() {
        let length_offset = pos + EVENT_LEN_OFFSET;
        let event_length = u32::from_le_bytes([
            buffer[length_offset],
            buffer[length_offset + 1],
            buffer[length_offset + 2],
            buffer[length_offset + 3],
        ]) as usize;

        if event_length < HEADER_LEN || pos + event_length > buffer.len() {
            warn!("truncated nested event in transaction payload, dropping tail");
            break;
        }

        events.push(buffer[pos..pos + event_length].to_vec());
        pos += event_length;
    }

    events
}

#[cfg(test)]
mod test {
    use super::*;

    fn fake_event(event_type: u8, body: &[u8]) -> Vec<u8> {
        let mut buffer = vec![];
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.push(event_type);
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.extend_from_slice(&((HEADER_LEN + body.len()) as u32).to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.extend_from_slice(&0u16.to_le_bytes());
        buffer.extend_from_slice(body);
        buffer
    }

    fn build_payload_body(inner: &[u8], compression_type: u64, uncompressed: u64) -> Vec<u8> {
        let mut body = vec![];
        body.push(OTW_PAYLOAD_COMPRESSION_TYPE_FIELD as u8);
        body.push(1);
        body.push(compression_type as u8);

        body.push(OTW_PAYLOAD_UNCOMPRESSED_SIZE_FIELD as u8);
        // uncompressed size 需要 lenenc, 这里限定在单字节范围内
        assert!(uncompressed < 0xfb);
        body.push(1);
        body.push(uncompressed as u8);

        body.push(OTW_PAYLOAD_SIZE_FIELD as u8);
        let mut size_bytes = vec![];
        if inner.len() < 0xfb {
            size_bytes.push(inner.len() as u8);
        } else {
            size_bytes.push(0xfc);
            size_bytes.extend_from_slice(&(inner.len() as u16).to_le_bytes());
        }
        body.push(size_bytes.len() as u8);
        body.extend_from_slice(&size_bytes);

        body.push(OTW_PAYLOAD_HEADER_END_MARK as u8);
        body.extend_from_slice(inner);
        body
    }

    #[test]
    fn test_roundtrip_zstd() {
        let mut inner = vec![];
        inner.extend_from_slice(&fake_event(16, &7u64.to_le_bytes()));
        inner.extend_from_slice(&fake_event(16, &8u64.to_le_bytes()));

        let compressed = zstd::stream::encode_all(inner.as_slice(), 3).unwrap();
        let body = build_payload_body(&compressed, COMPRESSION_ZSTD, inner.len() as u64);

        let payload = TransactionPayload::parse(&body).unwrap();
        assert_eq!(payload.compression_type, COMPRESSION_ZSTD);
        assert_eq!(payload.uncompressed_size, inner.len() as u64);

        let decompressed = payload.decompress().unwrap();
        assert_eq!(decompressed, inner);

        let events = split_events(&decompressed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0][4], 16);
    }

    #[test]
    fn test_uncompressed_payload() {
        let inner = fake_event(16, &7u64.to_le_bytes());
        let body = build_payload_body(&inner, COMPRESSION_NONE, inner.len() as u64);

        let payload = TransactionPayload::parse(&body).unwrap();
        let raw = payload.decompress().unwrap();
        assert_eq!(raw, inner);
    }

    #[test]
    fn test_split_drops_truncated_tail() {
        let mut buffer = fake_event(16, &7u64.to_le_bytes());
        let full = fake_event(16, &8u64.to_le_bytes());
        buffer.extend_from_slice(&full[..full.len() - 3]);

        let events = split_events(&buffer);
        assert_eq!(events.len(), 1);
    }
}
