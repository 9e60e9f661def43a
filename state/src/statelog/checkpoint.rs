use std::fs;

use byteorder::{ByteOrder, LittleEndian};

use common::err::{UltError, UltResult};

use crate::statelog::CHECKPOINT_SUFFIX;
use crate::Gid;

const CHECKPOINT_SIZE: usize = 8 + 8 + 8;

/// statelogd 的 writer checkpoint (`.ultchkpoint`)。
/// 对 reader 不透明, 只有 statelogd 自己 resume 时使用。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// 下一个要分配的 GID
    pub next_gid: Gid,
    /// binlog segment 下标
    pub segment_index: u64,
    /// segment 内偏移
    pub position: u64,
}

impl Checkpoint {
    fn path(log_path: &str, log_name: &str) -> String {
        format!("{}/{}{}", log_path, log_name, CHECKPOINT_SUFFIX)
    }

    pub fn save(&self, log_path: &str, log_name: &str) -> UltResult<()> {
        let mut buffer = [0u8; CHECKPOINT_SIZE];
        LittleEndian::write_u64(&mut buffer[0..8], self.next_gid);
        LittleEndian::write_u64(&mut buffer[8..16], self.segment_index);
        LittleEndian::write_u64(&mut buffer[16..24], self.position);

        fs::write(Self::path(log_path, log_name), buffer)?;
        Ok(())
    }

    pub fn load(log_path: &str, log_name: &str) -> UltResult<Checkpoint> {
        let path = Self::path(log_path, log_name);
        let buffer = fs::read(&path)
            .map_err(|e| UltError::String(format!("cannot find file {}: {}", path, e)))?;

        if buffer.len() < CHECKPOINT_SIZE {
            return Err(UltError::Decode(format!("checkpoint file truncated: {}", path)));
        }

        Ok(Checkpoint {
            next_gid: LittleEndian::read_u64(&buffer[0..8]),
            segment_index: LittleEndian::read_u64(&buffer[8..16]),
            position: LittleEndian::read_u64(&buffer[16..24]),
        })
    }

    pub fn load_from(path: &str) -> UltResult<Checkpoint> {
        let buffer = fs::read(path)
            .map_err(|e| UltError::String(format!("cannot find file {}: {}", path, e)))?;

        if buffer.len() < CHECKPOINT_SIZE {
            return Err(UltError::Decode(format!("checkpoint file truncated: {}", path)));
        }

        Ok(Checkpoint {
            next_gid: LittleEndian::read_u64(&buffer[0..8]),
            segment_index: LittleEndian::read_u64(&buffer[8..16]),
            position: LittleEndian::read_u64(&buffer[16..24]),
        })
    }
}

#[cfg(test)]
mod test {
    use super::Checkpoint;

    #[test]
    fn test_save_load() {
        let dir = std::env::temp_dir().join(format!("ult_chkpoint_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dir = dir.to_str().unwrap().to_string();

        let checkpoint = Checkpoint {
            next_gid: 42,
            segment_index: 2,
            position: 4096,
        };
        checkpoint.save(&dir, "shop").unwrap();

        assert_eq!(Checkpoint::load(&dir, "shop").unwrap(), checkpoint);
        assert!(Checkpoint::load(&dir, "missing").is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
