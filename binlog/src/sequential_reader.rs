use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use common::err::{UltError, UltResult};

use crate::decoder::BinlogFileDecoder;
use crate::events::BinlogEvent;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// binlog.index 驱动的跨 segment 顺序读取。
///
/// 当前 segment 读尽后重新读 index 文件:
/// 有后续 segment 就切换到它的 offset 4, 否则 sleep 后重试 (tail-follow)。
/// one-shot 模式下读尽即返回 end-of-stream。
pub struct SequentialBinlogReader {
    base_path: String,
    index_file: String,

    log_file_list: Vec<String>,
    current_index: usize,

    terminate_signal: Arc<AtomicBool>,
    is_poll_disabled: bool,

    decoder: Option<BinlogFileDecoder>,
}

impl SequentialBinlogReader {
    pub fn new(base_path: &str, index_file: &str) -> UltResult<Self> {
        let mut reader = SequentialBinlogReader {
            base_path: base_path.to_string(),
            index_file: index_file.to_string(),
            log_file_list: vec![],
            current_index: 0,
            terminate_signal: Arc::new(AtomicBool::new(false)),
            is_poll_disabled: false,
            decoder: None,
        };

        reader.update_index()?;
        if !reader.log_file_list.is_empty() {
            reader.seek(0, 4)?;
        }

        Ok(reader)
    }

    pub fn seek(&mut self, index: usize, position: u64) -> UltResult<()> {
        if index >= self.log_file_list.len() {
            return Err(UltError::String(format!(
                "segment index {} out of range ({} segments)",
                index,
                self.log_file_list.len()
            )));
        }

        self.open_log(self.log_file_list[index].clone())?;
        self.current_index = index;

        self.decoder.as_mut().unwrap().seek(position)
    }

    /// tail-follow 的事件读取。返回 false 表示流结束。
    pub fn next(&mut self) -> UltResult<bool> {
        while !self.terminate_signal.load(Ordering::Acquire) {
            let decoder = match self.decoder.as_mut() {
                Some(decoder) => decoder,
                None => return Ok(false),
            };

            if decoder.next()? {
                return Ok(true);
            }

            if self.poll_next()? {
                continue;
            }

            if self.is_poll_disabled {
                return Ok(false);
            }

            thread::sleep(POLL_INTERVAL);
        }

        Ok(false)
    }

    /// index 里出现了新 segment 吗?
    fn poll_next(&mut self) -> UltResult<bool> {
        self.update_index()?;

        if self.current_index + 1 != self.log_file_list.len() {
            self.seek(self.current_index + 1, 4)?;
            Ok(true)
        } else {
            // 留在原 segment, 重新打开并回到读到的位置
            let pos = self.decoder.as_ref().map(|d| d.pos()).unwrap_or(4);
            self.seek(self.current_index, pos)?;
            Ok(false)
        }
    }

    fn update_index(&mut self) -> UltResult<()> {
        let path = format!("{}/{}", self.base_path, self.index_file);
        let content = fs::read_to_string(&path)
            .map_err(|e| UltError::String(format!("could not open index file: {}: {}", path, e)))?;

        self.log_file_list = content
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        debug!("binlog index has {} segments", self.log_file_list.len());

        Ok(())
    }

    fn open_log(&mut self, log_file: String) -> UltResult<()> {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }

        let mut decoder = BinlogFileDecoder::new(&format!("{}/{}", self.base_path, log_file));
        decoder.open()?;

        self.decoder = Some(decoder);
        Ok(())
    }

    pub fn current_event(&self) -> Option<&BinlogEvent> {
        self.decoder.as_ref().and_then(|decoder| decoder.current_event())
    }

    pub fn take_current_event(&mut self) -> Option<BinlogEvent> {
        self.decoder.as_mut().and_then(|decoder| decoder.take_current_event())
    }

    pub fn pos(&self) -> u64 {
        self.decoder.as_ref().map(|decoder| decoder.pos()).unwrap_or(0)
    }

    pub fn log_file_list_size(&self) -> usize {
        self.log_file_list.len()
    }

    pub fn current_segment_index(&self) -> usize {
        self.current_index
    }

    pub fn is_poll_disabled(&self) -> bool {
        self.is_poll_disabled
    }

    pub fn set_poll_disabled(&mut self, is_poll_disabled: bool) {
        self.is_poll_disabled = is_poll_disabled;
    }

    /// SIGINT handler 持有的终止句柄
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate_signal)
    }

    pub fn terminate(&self) {
        self.terminate_signal.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::Write;

    use crate::events::{BinlogEvent, EventType};

    use super::SequentialBinlogReader;

    fn build_xid_event(xid: u64) -> Vec<u8> {
        // checksum 留空 → FDE 缺省 alg 是 Undef, 不校验
        let body = xid.to_le_bytes();
        let mut buffer = vec![];
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.push(EventType::Xid as u8);
        buffer.extend_from_slice(&1u32.to_le_bytes());
        buffer.extend_from_slice(&((19 + body.len()) as u32).to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.extend_from_slice(&0u16.to_le_bytes());
        buffer.extend_from_slice(&body);
        buffer
    }

    fn write_segment(path: &std::path::Path, xids: &[u64]) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&[254, 98, 105, 110]).unwrap();
        for xid in xids {
            file.write_all(&build_xid_event(*xid)).unwrap();
        }
    }

    #[test]
    fn test_follows_segments_oneshot() {
        let dir = std::env::temp_dir().join(format!("ult_seqreader_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        write_segment(&dir.join("mysql-bin.000001"), &[1, 2]);
        write_segment(&dir.join("mysql-bin.000002"), &[3]);
        fs::write(dir.join("mysql-bin.index"), "mysql-bin.000001\nmysql-bin.000002\n").unwrap();

        let mut reader = SequentialBinlogReader::new(dir.to_str().unwrap(), "mysql-bin.index").unwrap();
        reader.set_poll_disabled(true);

        let mut xids = vec![];
        while reader.next().unwrap() {
            if let Some(BinlogEvent::TransactionId(event)) = reader.current_event() {
                xids.push(event.xid);
            }
        }

        assert_eq!(xids, vec![1, 2, 3]);
        assert_eq!(reader.current_segment_index(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_terminate_short_circuits() {
        let dir = std::env::temp_dir().join(format!("ult_seqreader_term_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        write_segment(&dir.join("mysql-bin.000001"), &[1]);
        fs::write(dir.join("mysql-bin.index"), "mysql-bin.000001\n").unwrap();

        let mut reader = SequentialBinlogReader::new(dir.to_str().unwrap(), "mysql-bin.index").unwrap();
        reader.terminate();

        assert!(!reader.next().unwrap());

        let _ = fs::remove_dir_all(&dir);
    }
}
