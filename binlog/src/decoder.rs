use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::{info, trace, warn};

use common::err::{UltError, UltResult};

use crate::events::event_header::{
    BINLOG_CHECKSUM_LEN, EVENT_LEN_OFFSET, EVENT_TYPE_OFFSET, HEADER_LEN, LOG_POS_OFFSET,
};
use crate::events::format_description_event::ChecksumAlg;
use crate::events::{
    BinlogEvent, EventType, FormatDescriptionEvent, IntVarEvent, QueryEvent, RandEvent, RowEvent,
    RowQueryEvent, TableMapEvent, TransactionIdEvent, UserVarEvent,
};
use crate::payload::{split_events, TransactionPayload};

fn read_u32_at(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

/// 顺序读取单个 binlog 文件的解码器。
///
/// 持有两个跨事件状态:
/// - `fde`: 最近一次 FORMAT_DESCRIPTION_EVENT, 决定各类型的 post-header 长度
/// - `checksum_alg`: FDE footer 声明的校验算法
///
/// TRANSACTION_PAYLOAD_EVENT 解出的嵌套事件进入内部 FIFO,
/// 之后的 `next()` 先清空 FIFO 再继续读文件。
pub struct BinlogFileDecoder {
    filename: String,

    stream: Option<File>,
    pos: u64,

    fde: FormatDescriptionEvent,
    checksum_alg: ChecksumAlg,

    payload_queue: VecDeque<Vec<u8>>,
    current_event: Option<BinlogEvent>,
}

impl BinlogFileDecoder {
    pub fn new(filename: &str) -> Self {
        let fde = FormatDescriptionEvent::default();
        let checksum_alg = fde.checksum_alg;

        BinlogFileDecoder {
            filename: filename.to_string(),
            stream: None,
            pos: 0,
            fde,
            checksum_alg,
            payload_queue: VecDeque::new(),
            current_event: None,
        }
    }

    pub fn open(&mut self) -> UltResult<()> {
        info!("opening binary log: {}", self.filename);

        let file = File::open(&self.filename)
            .map_err(|e| UltError::IoError(std::io::Error::new(e.kind(), format!("{}: {}", self.filename, e))))?;

        self.stream = Some(file);
        self.pos = 0;

        Ok(())
    }

    pub fn close(&mut self) {
        info!("closing binary log: {}", self.filename);
        self.stream = None;
    }

    pub fn seek(&mut self, position: u64) -> UltResult<()> {
        trace!("seeking offset: {}", position);

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UltError::String(String::from("binlog is not open")))?;

        stream.seek(SeekFrom::Start(position))?;
        self.pos = position;

        Ok(())
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn current_event(&self) -> Option<&BinlogEvent> {
        self.current_event.as_ref()
    }

    pub fn take_current_event(&mut self) -> Option<BinlogEvent> {
        self.current_event.take()
    }

    /// 读取下一条事件。返回 false 表示文件读尽。
    /// 事件解码失败只是 `current_event = None`, 流保持可用。
    pub fn next(&mut self) -> UltResult<bool> {
        self.current_event = None;

        if let Some(buffer) = self.payload_queue.pop_front() {
            self.current_event = self.decode_event_buffer(&buffer, true);
            return Ok(true);
        }

        let buffer = match self.read_next_event_buffer()? {
            Some(buffer) => buffer,
            None => return Ok(false),
        };

        if buffer.len() < HEADER_LEN {
            warn!("skipping truncated event");
            return Ok(true);
        }

        if buffer[EVENT_TYPE_OFFSET] == EventType::TransactionPayload as u8 {
            if !self.handle_transaction_payload(&buffer) {
                warn!("failed to decode transaction payload event, skipping");
            }
            return Ok(true);
        }

        self.current_event = self.decode_event_buffer(&buffer, false);
        Ok(true)
    }

    fn read_next_event_buffer(&mut self) -> UltResult<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UltError::String(String::from("binlog is not open")))?;

        let mut header = [0u8; HEADER_LEN];
        match stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let event_size = read_u32_at(&header, EVENT_LEN_OFFSET) as usize;
        if event_size < HEADER_LEN {
            warn!("invalid event size: {}", event_size);
            return Ok(None);
        }

        let mut buffer = vec![0u8; event_size];
        buffer[..HEADER_LEN].copy_from_slice(&header);

        if let Err(e) = stream.read_exact(&mut buffer[HEADER_LEN..]) {
            warn!("failed to read event body (size={}): {}", event_size, e);
            return Ok(None);
        }

        let log_pos = read_u32_at(&buffer, LOG_POS_OFFSET) as u64;
        self.pos = if log_pos != 0 {
            log_pos
        } else {
            stream.stream_position()?
        };

        Ok(Some(buffer))
    }

    fn verify_checksum(&self, buffer: &[u8]) -> bool {
        let payload_len = buffer.len() - BINLOG_CHECKSUM_LEN;
        let expected = read_u32_at(buffer, payload_len);
        crc32fast::hash(&buffer[..payload_len]) == expected
    }

    fn decode_event_buffer(&mut self, buffer: &[u8], from_payload: bool) -> Option<BinlogEvent> {
        if buffer.len() < HEADER_LEN {
            return None;
        }

        let raw_type = buffer[EVENT_TYPE_OFFSET];
        let event_type = match EventType::try_from(raw_type) {
            Ok(event_type) => event_type,
            Err(_) => {
                trace!("unsupported event type: {}", raw_type);
                return None;
            }
        };

        // payload 内部的嵌套事件不带 checksum
        let checksum_applies =
            !from_payload && self.checksum_alg == ChecksumAlg::Crc32 && buffer.len() > HEADER_LEN + BINLOG_CHECKSUM_LEN;

        if event_type == EventType::FormatDescription {
            return self.handle_format_description(buffer);
        }

        if checksum_applies && !self.verify_checksum(buffer) {
            warn!("checksum mismatch, skipping event type {:?}", event_type);
            return None;
        }

        let checksum_len = if checksum_applies { BINLOG_CHECKSUM_LEN } else { 0 };
        let body = &buffer[HEADER_LEN..buffer.len() - checksum_len];
        let timestamp = read_u32_at(buffer, 0) as u64;

        let decoded = match event_type {
            EventType::Query => QueryEvent::parse(body, &self.fde, timestamp).map(BinlogEvent::Query),
            EventType::Xid => TransactionIdEvent::parse(body, timestamp).map(BinlogEvent::TransactionId),
            EventType::IntVar => IntVarEvent::parse(body, timestamp).map(BinlogEvent::IntVar),
            EventType::Rand => RandEvent::parse(body, timestamp).map(BinlogEvent::Rand),
            EventType::UserVar => UserVarEvent::parse(body, timestamp).map(BinlogEvent::UserVar),
            EventType::TableMap => TableMapEvent::parse(body, &self.fde, timestamp).map(BinlogEvent::TableMap),
            EventType::RowsQuery => RowQueryEvent::parse(body, timestamp).map(BinlogEvent::RowQuery),
            EventType::WriteRowsV1
            | EventType::UpdateRowsV1
            | EventType::DeleteRowsV1
            | EventType::WriteRows
            | EventType::UpdateRows
            | EventType::DeleteRows => {
                RowEvent::parse(body, event_type, &self.fde, timestamp).map(BinlogEvent::Row)
            }
            EventType::PartialUpdateRows => {
                warn!("partial update rows event is not supported, skipping");
                return None;
            }
            other => {
                trace!("unsupported event type: {:?}", other);
                return None;
            }
        };

        match decoded {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("invalid {:?} event, skipping: {}", event_type, e);
                None
            }
        }
    }

    fn handle_format_description(&mut self, buffer: &[u8]) -> Option<BinlogEvent> {
        let fde = match FormatDescriptionEvent::parse(buffer) {
            Ok(fde) => fde,
            Err(e) => {
                warn!("invalid format description event, skipping: {}", e);
                return None;
            }
        };

        // FDE 自身按它声明的算法校验
        if fde.checksum_alg == ChecksumAlg::Crc32 && !self.verify_checksum(buffer) {
            warn!("checksum mismatch for format description event");
            return None;
        }

        self.checksum_alg = fde.checksum_alg;
        self.fde = fde;

        None
    }

    fn handle_transaction_payload(&mut self, buffer: &[u8]) -> bool {
        let checksum_applies =
            self.checksum_alg == ChecksumAlg::Crc32 && buffer.len() > HEADER_LEN + BINLOG_CHECKSUM_LEN;

        if checksum_applies && !self.verify_checksum(buffer) {
            warn!("transaction payload event checksum mismatch");
            return false;
        }

        let checksum_len = if checksum_applies { BINLOG_CHECKSUM_LEN } else { 0 };
        let body = &buffer[HEADER_LEN..buffer.len() - checksum_len];

        let payload = match TransactionPayload::parse(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("invalid transaction payload event: {}", e);
                return false;
            }
        };

        let decompressed = match payload.decompress() {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("payload decompression error: {}", e);
                return false;
            }
        };

        for event_buffer in split_events(&decompressed) {
            self.payload_queue.push_back(event_buffer);
        }

        true
    }
}
