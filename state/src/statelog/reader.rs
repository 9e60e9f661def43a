use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::warn;

use common::err::{UltError, UltResult};

use crate::codec::WireMessage;
use crate::statelog::gid_index::GidIndexReader;
use crate::statelog::STATE_LOG_SUFFIX;
use crate::transaction::{Transaction, TransactionHeader, TRANSACTION_HEADER_SIZE};
use crate::Gid;

/// `.ultstatelog` 读取端。
///
/// body 长度由 `header.next_pos - 当前位置` 决定;
/// body 解析失败时告警并让 `txn_body()` 返回 None,
/// 流位置停在 `next_pos`, 下一条事务不受影响。
pub struct StateLogReader {
    log_path: String,
    log_name: String,

    stream: Option<File>,
    gid_index: Option<GidIndexReader>,

    current_header: Option<TransactionHeader>,
    current_body: Option<Transaction>,
}

impl StateLogReader {
    pub fn new(log_path: &str, log_name: &str) -> Self {
        StateLogReader {
            log_path: log_path.to_string(),
            log_name: log_name.to_string(),
            stream: None,
            gid_index: None,
            current_header: None,
            current_body: None,
        }
    }

    pub fn open(&mut self) -> UltResult<()> {
        let path = format!("{}/{}{}", self.log_path, self.log_name, STATE_LOG_SUFFIX);
        let file = File::open(&path)
            .map_err(|e| UltError::String(format!("failed to open {}: {}", path, e)))?;

        self.stream = Some(file);
        self.current_header = None;
        self.current_body = None;

        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn reset(&mut self) -> UltResult<()> {
        self.open()
    }

    pub fn pos(&mut self) -> UltResult<u64> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream.stream_position()?),
            None => Err(UltError::String(String::from("state log is not open"))),
        }
    }

    pub fn seek(&mut self, pos: u64) -> UltResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UltError::String(String::from("state log is not open")))?;

        stream.seek(SeekFrom::Start(pos))?;
        self.current_header = None;
        self.current_body = None;

        Ok(())
    }

    pub fn next_header(&mut self) -> bool {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return false,
        };

        let mut buffer = [0u8; TRANSACTION_HEADER_SIZE];
        if stream.read_exact(&mut buffer).is_err() {
            self.current_header = None;
            return false;
        }

        match TransactionHeader::from_bytes(&buffer) {
            Ok(header) => {
                self.current_header = Some(header);
                true
            }
            Err(_) => {
                self.current_header = None;
                false
            }
        }
    }

    pub fn next_transaction(&mut self) -> bool {
        let header = match self.current_header {
            Some(header) => header,
            None => {
                self.current_body = None;
                return false;
            }
        };

        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return false,
        };

        let start_pos = match stream.stream_position() {
            Ok(pos) => pos,
            Err(_) => {
                self.current_body = None;
                return false;
            }
        };

        if header.next_pos <= start_pos {
            self.current_body = None;
            return false;
        }

        let size = (header.next_pos - start_pos) as usize;
        let mut buffer = vec![0u8; size];
        if stream.read_exact(&mut buffer).is_err() {
            self.current_body = None;
            return false;
        }

        match Transaction::from_encoded(&buffer) {
            Ok(transaction) => {
                self.current_body = Some(transaction);
                true
            }
            Err(e) => {
                // 流已经停在 next_pos, 继续读下一条
                warn!("corrupted transaction body at gid {}: {}", header.gid, e);
                self.current_body = None;
                false
            }
        }
    }

    pub fn skip_transaction(&mut self) -> UltResult<()> {
        if let Some(header) = self.current_header {
            self.seek(header.next_pos)?;
        }

        Ok(())
    }

    pub fn next(&mut self) -> bool {
        self.next_header() && self.next_transaction()
    }

    pub fn txn_header(&self) -> Option<&TransactionHeader> {
        self.current_header.as_ref()
    }

    pub fn txn_body(&self) -> Option<&Transaction> {
        self.current_body.as_ref()
    }

    pub fn take_txn_body(&mut self) -> Option<Transaction> {
        self.current_body.take()
    }

    /// GID 索引定位: `seek(mmap(ultindex)[gid])`
    pub fn seek_gid(&mut self, gid: Gid) -> UltResult<()> {
        if self.gid_index.is_none() {
            self.gid_index = Some(GidIndexReader::new(&self.log_path, &self.log_name)?);
        }

        let offset = self.gid_index.as_ref().unwrap().offset_of(gid)?;
        self.seek(offset)
    }
}

#[cfg(test)]
mod test {
    use crate::query::Query;
    use crate::statelog::writer::StateLogWriter;
    use crate::transaction::Transaction;

    use super::StateLogReader;

    fn temp_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("ult_statelog_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_str().unwrap().to_string()
    }

    fn sample_transaction(gid: u64, statement: &str) -> Transaction {
        let mut transaction = Transaction::new();
        transaction.gid = gid;
        transaction.xid = gid + 1000;
        transaction.timestamp = 1666000000 + gid;

        let mut query = Query::new();
        query.database = String::from("shop");
        query.statement = statement.to_string();
        transaction.push(query);

        transaction
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = temp_dir("roundtrip");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            for gid in 0..4 {
                writer
                    .write_transaction(&sample_transaction(gid, &format!("INSERT INTO t VALUES ({})", gid)))
                    .unwrap();
            }
            writer.close().unwrap();
        }

        let mut reader = StateLogReader::new(&dir, "shop");
        reader.open().unwrap();

        let mut gids = vec![];
        while reader.next() {
            let header = reader.txn_header().unwrap();
            let body = reader.txn_body().unwrap();
            assert_eq!(header.gid, body.gid);
            assert_eq!(header.xid, body.gid + 1000);
            assert_eq!(body.queries().len(), 1);
            gids.push(header.gid);
        }

        assert_eq!(gids, vec![0, 1, 2, 3]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_next_pos_is_exact_body_end() {
        let dir = temp_dir("nextpos");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            writer.write_transaction(&sample_transaction(0, "BEGIN")).unwrap();
            writer.write_transaction(&sample_transaction(1, "COMMIT")).unwrap();
            writer.close().unwrap();
        }

        let mut reader = StateLogReader::new(&dir, "shop");
        reader.open().unwrap();

        assert!(reader.next_header());
        let first_next_pos = reader.txn_header().unwrap().next_pos;
        assert!(reader.next_transaction());
        assert_eq!(reader.pos().unwrap(), first_next_pos);

        // skip 的语义等价
        reader.seek(0).unwrap();
        assert!(reader.next_header());
        reader.skip_transaction().unwrap();
        assert_eq!(reader.pos().unwrap(), first_next_pos);

        assert!(reader.next());
        assert_eq!(reader.txn_header().unwrap().gid, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_seek_gid_agrees_with_headers() {
        let dir = temp_dir("seekgid");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            for gid in 0..8 {
                writer
                    .write_transaction(&sample_transaction(gid, &format!("UPDATE t SET v = {}", gid)))
                    .unwrap();
            }
            writer.close().unwrap();
        }

        let mut reader = StateLogReader::new(&dir, "shop");
        reader.open().unwrap();

        for gid in [5u64, 0, 7, 3] {
            reader.seek_gid(gid).unwrap();
            assert!(reader.next_header());
            assert_eq!(reader.txn_header().unwrap().gid, gid);
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupted_body_keeps_stream_usable() {
        let dir = temp_dir("corrupt");

        {
            let mut writer = StateLogWriter::new(&dir, "shop");
            writer.open(false).unwrap();
            writer.write_transaction(&sample_transaction(0, "INSERT INTO t VALUES (0)")).unwrap();
            writer.write_transaction(&sample_transaction(1, "INSERT INTO t VALUES (1)")).unwrap();
            writer.close().unwrap();
        }

        // 第一条 body 的首字节写坏 (field number 0 非法)
        let path = format!("{}/shop.ultstatelog", dir);
        let mut content = std::fs::read(&path).unwrap();
        content[crate::transaction::TRANSACTION_HEADER_SIZE] = 0x00;
        std::fs::write(&path, &content).unwrap();

        let mut reader = StateLogReader::new(&dir, "shop");
        reader.open().unwrap();

        assert!(reader.next_header());
        assert!(!reader.next_transaction());
        assert!(reader.txn_body().is_none());

        // 流仍然停在 next_pos, 第二条完好
        assert!(reader.next());
        assert_eq!(reader.txn_header().unwrap().gid, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
