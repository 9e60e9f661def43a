use serde::Serialize;

use common::err::{UltError, UltResult};

use crate::utils::read_u64_le;

/// RAND_EVENT — RAND() 的种子对, 作用于紧随其后的语句。
#[derive(Debug, Serialize, Clone)]
pub struct RandEvent {
    pub seed1: u64,
    pub seed2: u64,
    pub timestamp: u64,
}

impl RandEvent {
    pub fn parse(body: &[u8], timestamp: u64) -> UltResult<RandEvent> {
        if body.len() < 16 {
            return Err(UltError::Decode(String::from("rand event shorter than 16 bytes")));
        }

        let mut pos = 0;
        let seed1 = read_u64_le(body, &mut pos)?;
        let seed2 = read_u64_le(body, &mut pos)?;

        Ok(RandEvent {
            seed1,
            seed2,
            timestamp,
        })
    }
}
