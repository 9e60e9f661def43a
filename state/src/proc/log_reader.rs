use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use common::err::{UltError, UltResult};

use crate::codec::WireMessage;
use crate::proc::proc_call::{ProcCall, ProcCallHeader, PROC_CALL_HEADER_SIZE};

/// procedure log 读取端: (定长 header, 序列化 ProcCall) 序列。
pub struct ProcLogReader {
    stream: Option<File>,

    current_header: Option<ProcCallHeader>,
    current: Option<ProcCall>,
}

impl ProcLogReader {
    pub fn new() -> Self {
        ProcLogReader {
            stream: None,
            current_header: None,
            current: None,
        }
    }

    pub fn open(&mut self, path: &str, log_name: &str) -> UltResult<()> {
        let full_path = format!("{}/{}", path, log_name);
        let file = File::open(&full_path)
            .map_err(|e| UltError::String(format!("failed to open {}: {}", full_path, e)))?;

        self.stream = Some(file);
        self.current_header = None;
        self.current = None;

        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.current_header = None;
        self.current = None;
    }

    pub fn seek(&mut self, pos: u64) -> UltResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UltError::String(String::from("procedure log is not open")))?;

        stream.seek(SeekFrom::Start(pos))?;
        self.current_header = None;
        self.current = None;

        Ok(())
    }

    pub fn next_header(&mut self) -> bool {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return false,
        };

        let mut buffer = [0u8; PROC_CALL_HEADER_SIZE];
        if stream.read_exact(&mut buffer).is_err() {
            self.current_header = None;
            return false;
        }

        match ProcCallHeader::from_bytes(&buffer) {
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

    pub fn next_proc_call(&mut self) -> bool {
        let header = match self.current_header {
            Some(header) => header,
            None => {
                self.current = None;
                return false;
            }
        };

        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return false,
        };

        let start_pos = match stream.stream_position() {
            Ok(pos) => pos,
            Err(_) => return false,
        };

        if header.next_pos <= start_pos {
            self.current = None;
            return false;
        }

        let size = (header.next_pos - start_pos) as usize;
        let mut buffer = vec![0u8; size];
        if stream.read_exact(&mut buffer).is_err() {
            self.current = None;
            return false;
        }

        match ProcCall::from_encoded(&buffer) {
            Ok(proc_call) => {
                self.current = Some(proc_call);
                true
            }
            Err(_) => {
                self.current = None;
                false
            }
        }
    }

    /// 顺序向前扫到给定 call id
    pub fn match_forward(&mut self, call_id: u64) -> bool {
        loop {
            if !self.next_header() {
                break;
            }

            let header = self.current_header.unwrap();
            if header.call_id == call_id {
                return self.next_proc_call();
            }

            if self.seek(header.next_pos).is_err() {
                break;
            }
        }

        false
    }

    pub fn current_header(&self) -> Option<&ProcCallHeader> {
        self.current_header.as_ref()
    }

    pub fn current(&self) -> Option<&ProcCall> {
        self.current.as_ref()
    }
}

impl Default for ProcLogReader {
    fn default() -> Self {
        ProcLogReader::new()
    }
}
