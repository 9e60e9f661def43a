use std::fs::OpenOptions;
use std::io::{BufWriter, Seek, SeekFrom, Write};

use tracing::debug;

use common::err::{UltError, UltResult};

use crate::codec::WireMessage;
use crate::statelog::gid_index::GidIndexWriter;
use crate::statelog::STATE_LOG_SUFFIX;
use crate::transaction::{Transaction, TRANSACTION_HEADER_SIZE};

/// `.ultstatelog` 追加写入端。
/// 每条事务写 (定长 header, 序列化 body), 同时维护 GID 索引。
pub struct StateLogWriter {
    log_path: String,
    log_name: String,

    stream: Option<BufWriter<std::fs::File>>,
    gid_index: Option<GidIndexWriter>,
    pos: u64,
}

impl StateLogWriter {
    pub fn new(log_path: &str, log_name: &str) -> Self {
        StateLogWriter {
            log_path: log_path.to_string(),
            log_name: log_name.to_string(),
            stream: None,
            gid_index: None,
            pos: 0,
        }
    }

    /// `append = false` 时丢弃旧内容重新开始
    pub fn open(&mut self, append: bool) -> UltResult<()> {
        let path = format!("{}/{}{}", self.log_path, self.log_name, STATE_LOG_SUFFIX);

        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }

        let mut file = options
            .open(&path)
            .map_err(|e| UltError::String(format!("failed to open {}: {}", path, e)))?;

        self.pos = file.seek(SeekFrom::End(0))?;
        self.stream = Some(BufWriter::new(file));
        self.gid_index = Some(GidIndexWriter::new(&self.log_path, &self.log_name)?);

        Ok(())
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn write_transaction(&mut self, transaction: &Transaction) -> UltResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UltError::String(String::from("state log is not open")))?;

        let body = transaction.to_encoded();

        let header_pos = self.pos;
        let next_pos = header_pos + TRANSACTION_HEADER_SIZE as u64 + body.len() as u64;
        let header = transaction.make_header(true, next_pos);

        stream.write_all(&header.to_bytes())?;
        stream.write_all(&body)?;
        stream.flush()?;

        if let Some(gid_index) = self.gid_index.as_mut() {
            gid_index.write(transaction.gid, header_pos)?;
        }

        self.pos = next_pos;

        debug!(
            "wrote transaction gid {} at {} (next_pos {})",
            transaction.gid, header_pos, next_pos
        );

        Ok(())
    }

    pub fn close(&mut self) -> UltResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
        }
        if let Some(mut gid_index) = self.gid_index.take() {
            gid_index.flush()?;
        }

        Ok(())
    }
}

impl Drop for StateLogWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
