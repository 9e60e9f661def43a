use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use common::err::{UltError, UltResult};

use crate::statelog::GID_INDEX_SUFFIX;
use crate::Gid;

const ENTRY_SIZE: u64 = std::mem::size_of::<u64>() as u64;

/// `.ultindex` 写入端: GID 为下标的小端 u64 偏移数组。
/// 文件不截断, resume 时在已有内容上续写。
pub struct GidIndexWriter {
    file: File,
    file_size: u64,
}

impl GidIndexWriter {
    pub fn new(log_path: &str, log_name: &str) -> UltResult<Self> {
        let path = format!("{}/{}{}", log_path, log_name, GID_INDEX_SUFFIX);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| UltError::String(format!("failed to open {}: {}", path, e)))?;

        let file_size = file.metadata()?.len();

        Ok(GidIndexWriter { file, file_size })
    }

    pub fn write(&mut self, gid: Gid, offset: u64) -> UltResult<()> {
        let position = gid * ENTRY_SIZE;

        if self.file_size < position {
            self.file.set_len(position)?;
            self.file_size = position;
        }

        self.file.seek(SeekFrom::Start(position))?;

        let mut buffer = [0u8; 8];
        LittleEndian::write_u64(&mut buffer, offset);
        self.file.write_all(&buffer)?;

        if position + ENTRY_SIZE > self.file_size {
            self.file_size = position + ENTRY_SIZE;
        }

        Ok(())
    }

    pub fn append(&mut self, offset: u64) -> UltResult<()> {
        self.file.seek(SeekFrom::End(0))?;

        let mut buffer = [0u8; 8];
        LittleEndian::write_u64(&mut buffer, offset);
        self.file.write_all(&buffer)?;
        self.file_size += ENTRY_SIZE;

        Ok(())
    }

    pub fn flush(&mut self) -> UltResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for GidIndexWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// `.ultindex` 读取端 (mmap)。
/// 空文件拒绝打开: 零长度映射在多数平台上是未定义行为。
pub struct GidIndexReader {
    map: Mmap,
}

impl GidIndexReader {
    pub fn new(log_path: &str, log_name: &str) -> UltResult<Self> {
        let path = format!("{}/{}{}", log_path, log_name, GID_INDEX_SUFFIX);
        let file = File::open(&path)
            .map_err(|e| UltError::String(format!("failed to open {}: {}", path, e)))?;

        let file_size = file.metadata()?.len();
        if file_size == 0 {
            return Err(UltError::String(format!("index file is empty (size 0): {}", path)));
        }

        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| UltError::String(format!("mmap() failed for {}: {}", path, e)))?;

        Ok(GidIndexReader { map })
    }

    pub fn entry_count(&self) -> u64 {
        self.map.len() as u64 / ENTRY_SIZE
    }

    pub fn offset_of(&self, gid: Gid) -> UltResult<u64> {
        let position = (gid * ENTRY_SIZE) as usize;
        if position + ENTRY_SIZE as usize > self.map.len() {
            return Err(UltError::String(format!("gid {} is out of index range", gid)));
        }

        Ok(LittleEndian::read_u64(&self.map[position..position + 8]))
    }
}

#[cfg(test)]
mod test {
    use super::{GidIndexReader, GidIndexWriter};

    fn temp_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("ult_gidindex_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_str().unwrap().to_string()
    }

    #[test]
    fn test_write_then_read() {
        let dir = temp_dir("rw");

        {
            let mut writer = GidIndexWriter::new(&dir, "shop").unwrap();
            writer.append(0).unwrap();
            writer.append(120).unwrap();
            writer.write(2, 450).unwrap();
            writer.flush().unwrap();
        }

        let reader = GidIndexReader::new(&dir, "shop").unwrap();
        assert_eq!(reader.entry_count(), 3);
        assert_eq!(reader.offset_of(0).unwrap(), 0);
        assert_eq!(reader.offset_of(1).unwrap(), 120);
        assert_eq!(reader.offset_of(2).unwrap(), 450);
        assert!(reader.offset_of(3).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_index_rejected() {
        let dir = temp_dir("empty");
        std::fs::write(format!("{}/empty.ultindex", dir), b"").unwrap();

        assert!(GidIndexReader::new(&dir, "empty").is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sparse_write_grows_file() {
        let dir = temp_dir("sparse");

        {
            let mut writer = GidIndexWriter::new(&dir, "shop").unwrap();
            writer.write(4, 999).unwrap();
            writer.flush().unwrap();
        }

        let reader = GidIndexReader::new(&dir, "shop").unwrap();
        assert_eq!(reader.entry_count(), 5);
        assert_eq!(reader.offset_of(4).unwrap(), 999);
        assert_eq!(reader.offset_of(0).unwrap(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
