use openssl::bn::{BigNum, BigNumContext};
use openssl::error::ErrorStack;
use openssl::hash::{hash, MessageDigest};

use common::err::{UltError, UltResult};

pub const DEFAULT_MODULO_COUNT: usize = 2;

/** Decreasing this value speeds up the algorithm */
pub const STATE_HASH_LENGTH: usize = 16;

pub const STATE_HASH_PRIME_BITS: i32 = (STATE_HASH_LENGTH * 8) as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashEventType {
    Insert,
    Delete,
}

fn bn_err(error: ErrorStack) -> UltError {
    UltError::String(format!("bignum operation failed: {}", error))
}

/// 表内容的增量可交换 multiset 哈希。
///
/// k 个随机素数模数 p_i, 各自维护累积量 a_i ∈ ℤ/p_i。
/// 插入记录 r: a_i ← a_i · prime(md5(r), p_i) mod p_i;
/// 删除记录乘以模逆元。交换律使得行集相同则哈希相同, 与操作顺序无关。
pub struct StateHash {
    modulo_list: Vec<BigNum>,
    hash_list: Vec<BigNum>,
}

fn copy_bignum(source: &BigNum) -> UltResult<BigNum> {
    BigNum::from_slice(&source.to_vec()).map_err(bn_err)
}

fn copy_list(source: &[BigNum]) -> UltResult<Vec<BigNum>> {
    source.iter().map(copy_bignum).collect()
}

impl Clone for StateHash {
    fn clone(&self) -> Self {
        StateHash {
            modulo_list: copy_list(&self.modulo_list).expect("bignum copy cannot fail"),
            hash_list: copy_list(&self.hash_list).expect("bignum copy cannot fail"),
        }
    }
}

impl PartialEq for StateHash {
    fn eq(&self, other: &Self) -> bool {
        compare_list(&self.hash_list, &other.hash_list) && compare_list(&self.modulo_list, &other.modulo_list)
    }
}

fn compare_list(a: &[BigNum], b: &[BigNum]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b.iter()).all(|(lhs, rhs)| lhs == rhs)
}

impl std::fmt::Debug for StateHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateHash({})", self.stringify())
    }
}

impl Default for StateHash {
    fn default() -> Self {
        StateHash::new()
    }
}

impl StateHash {
    pub fn new() -> Self {
        StateHash {
            modulo_list: vec![],
            hash_list: vec![],
        }
    }

    pub fn with_parts(modulo_list: Vec<BigNum>, hash_list: Vec<BigNum>) -> Self {
        assert_eq!(modulo_list.len(), hash_list.len());
        StateHash {
            modulo_list,
            hash_list,
        }
    }

    pub fn generate_modulo(count: usize) -> UltResult<Vec<BigNum>> {
        let mut modulo_list: Vec<BigNum> = Vec::with_capacity(count);

        for _ in 0..count {
            loop {
                let mut modulo = BigNum::new().map_err(bn_err)?;
                modulo
                    .generate_prime(STATE_HASH_PRIME_BITS, false, None, None)
                    .map_err(bn_err)?;

                if !modulo_list.iter().any(|existing| *existing == modulo) {
                    modulo_list.push(modulo);
                    break;
                }
            }
        }

        Ok(modulo_list)
    }

    fn allocate_hash_list(count: usize) -> UltResult<Vec<BigNum>> {
        (0..count)
            .map(|_| BigNum::from_u32(1).map_err(bn_err))
            .collect()
    }

    pub fn init(&mut self) -> UltResult<()> {
        self.modulo_list = Self::generate_modulo(DEFAULT_MODULO_COUNT)?;
        self.hash_list = Self::allocate_hash_list(DEFAULT_MODULO_COUNT)?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        !self.modulo_list.is_empty()
    }

    pub fn modulo_list(&self) -> &[BigNum] {
        &self.modulo_list
    }

    pub fn hash_list(&self) -> &[BigNum] {
        &self.hash_list
    }

    fn calculate_hash(record: &[u8]) -> UltResult<Vec<u8>> {
        Ok(hash(MessageDigest::md5(), record).map_err(bn_err)?.to_vec())
    }

    /// digest 对 modulo 取模为 0 时重新 md5, 直到非零
    fn prime(mut digest: Vec<u8>, modulo: &BigNum) -> UltResult<BigNum> {
        let mut ctx = BigNumContext::new().map_err(bn_err)?;

        loop {
            let bn = BigNum::from_slice(&digest).map_err(bn_err)?;

            let mut remainder = BigNum::new().map_err(bn_err)?;
            remainder.nnmod(&bn, modulo, &mut ctx).map_err(bn_err)?;

            if remainder.num_bits() != 0 {
                return Ok(remainder);
            }

            digest = Self::calculate_hash(&digest)?;
        }
    }

    pub fn compute(&mut self, record: &[u8], event_type: HashEventType) -> UltResult<()> {
        assert_eq!(self.modulo_list.len(), self.hash_list.len());

        let mut ctx = BigNumContext::new().map_err(bn_err)?;
        let digest = Self::calculate_hash(record)?;

        for (modulo, accumulator) in self.modulo_list.iter().zip(self.hash_list.iter_mut()) {
            let mut factor = Self::prime(digest.clone(), modulo)?;

            if event_type == HashEventType::Delete {
                let mut inverse = BigNum::new().map_err(bn_err)?;
                inverse.mod_inverse(&factor, modulo, &mut ctx).map_err(bn_err)?;
                factor = inverse;
            }

            let mut result = BigNum::new().map_err(bn_err)?;
            result
                .mod_mul(accumulator, &factor, modulo, &mut ctx)
                .map_err(bn_err)?;

            *accumulator = result;
        }

        Ok(())
    }

    pub fn insert_record(&mut self, record: &[u8]) -> UltResult<()> {
        self.compute(record, HashEventType::Insert)
    }

    pub fn delete_record(&mut self, record: &[u8]) -> UltResult<()> {
        self.compute(record, HashEventType::Delete)
    }

    pub fn stringify(&self) -> String {
        self.hash_list
            .iter()
            .map(|bn| format!("{} ", bn.to_hex_str().map(|s| s.to_string()).unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::{StateHash, DEFAULT_MODULO_COUNT, STATE_HASH_PRIME_BITS};

    fn initialized_hash() -> StateHash {
        let mut hash = StateHash::new();
        hash.init().unwrap();
        hash
    }

    #[test]
    fn test_init() {
        let hash = StateHash::new();
        assert!(!hash.is_initialized());
        assert!(hash.stringify().is_empty());

        let hash = initialized_hash();
        assert!(hash.is_initialized());
        assert!(!hash.stringify().is_empty());
    }

    #[test]
    fn test_generate_modulo_unique_primes() {
        let modulos = StateHash::generate_modulo(DEFAULT_MODULO_COUNT).unwrap();
        assert_eq!(modulos.len(), 2);
        assert!(modulos[0] != modulos[1]);

        for modulo in &modulos {
            assert_eq!(modulo.num_bits(), STATE_HASH_PRIME_BITS);
        }
    }

    #[test]
    fn test_insert_commutes() {
        let base = initialized_hash();
        let mut a = base.clone();
        let mut b = base.clone();

        a.insert_record(b"user:1|name:alice").unwrap();
        a.insert_record(b"user:2|name:bob").unwrap();

        b.insert_record(b"user:2|name:bob").unwrap();
        b.insert_record(b"user:1|name:alice").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_insert_then_delete_restores() {
        let base = initialized_hash();
        let mut hash = base.clone();

        hash.insert_record(b"user:1|name:alice").unwrap();
        assert!(hash != base);

        hash.delete_record(b"user:1|name:alice").unwrap();
        assert_eq!(hash, base);
    }

    #[test]
    fn test_idempotent_pairing() {
        let base = initialized_hash();
        let mut a = base.clone();
        let mut b = base.clone();

        a.insert_record(b"user:1").unwrap();
        a.insert_record(b"user:1").unwrap();
        a.delete_record(b"user:1").unwrap();

        b.insert_record(b"user:1").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_delete_commutes_with_insert() {
        let base = initialized_hash();
        let mut a = base.clone();
        let mut b = base.clone();

        a.insert_record(b"user:1").unwrap();
        a.delete_record(b"user:2").unwrap();

        b.delete_record(b"user:2").unwrap();
        b.insert_record(b"user:1").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_covers_modulo_and_hash() {
        let a = initialized_hash();
        let mut b = a.clone();
        assert_eq!(a, b);

        b.insert_record(b"user:1").unwrap();
        assert!(a != b);

        // 不同模数的哈希不相等
        let c = initialized_hash();
        assert!(a != c);
    }

    #[test]
    fn test_clone_is_deep_copy() {
        let mut original = initialized_hash();
        original.insert_record(b"user:1").unwrap();

        let cloned = original.clone();
        assert_eq!(cloned, original);

        original.insert_record(b"user:2").unwrap();
        assert!(cloned != original);
    }

    #[test]
    fn test_empty_and_long_records() {
        let base = initialized_hash();

        let mut a = base.clone();
        let mut b = base.clone();
        a.insert_record(b"").unwrap();
        b.insert_record(b"").unwrap();
        assert_eq!(a, b);

        let record = vec![b'x'; 1 << 16];
        let mut a = base.clone();
        let mut b = base.clone();
        a.insert_record(&record).unwrap();
        b.insert_record(&record).unwrap();
        assert_eq!(a, b);
    }
}
