//! On-disk key layout.
//!
//! Four logical tables share one ordered keyspace, separated by two-byte
//! prefixes. Integers are big-endian so lexicographic key order matches
//! numeric order, which makes range truncation a plain prefix scan.
//!
//! ```text
//! L|<u64-BE>        log blob
//! M|<u64-BE>        message blob
//! B|<u64-BE>        block record
//! R|<32-byte hash>  request fingerprint -> u64-BE log index
//! CL / CM / CB      count slots
//! ```

use ramp_interface::Hash;

pub(crate) const LOG_PREFIX: &[u8; 2] = b"L|";
pub(crate) const MESSAGE_PREFIX: &[u8; 2] = b"M|";
pub(crate) const BLOCK_PREFIX: &[u8; 2] = b"B|";
pub(crate) const REQUEST_PREFIX: &[u8; 2] = b"R|";

pub(crate) const LOG_COUNT_KEY: &[u8; 2] = b"CL";
pub(crate) const MESSAGE_COUNT_KEY: &[u8; 2] = b"CM";
pub(crate) const BLOCK_COUNT_KEY: &[u8; 2] = b"CB";

fn indexed_key(prefix: &[u8; 2], index: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[..2].copy_from_slice(prefix);
    key[2..].copy_from_slice(&index.to_be_bytes());
    key
}

pub(crate) fn log_key(index: u64) -> [u8; 10] {
    indexed_key(LOG_PREFIX, index)
}

pub(crate) fn message_key(index: u64) -> [u8; 10] {
    indexed_key(MESSAGE_PREFIX, index)
}

pub(crate) fn block_key(height: u64) -> [u8; 10] {
    indexed_key(BLOCK_PREFIX, height)
}

pub(crate) fn request_key(request_id: &Hash) -> [u8; 34] {
    let mut key = [0u8; 34];
    key[..2].copy_from_slice(REQUEST_PREFIX);
    key[2..].copy_from_slice(request_id.as_bytes());
    key
}

pub(crate) fn encode_count(count: u64) -> [u8; 8] {
    count.to_be_bytes()
}

pub(crate) fn decode_count(data: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = data.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_matches_numeric_order() {
        let mut keys: Vec<_> = [300u64, 2, 256, 1, 0, u64::MAX].iter().map(|i| log_key(*i)).collect();
        keys.sort();
        let decoded: Vec<u64> = keys
            .iter()
            .map(|k| u64::from_be_bytes(k[2..].try_into().unwrap()))
            .collect();
        assert_eq!(decoded, vec![0, 1, 2, 256, 300, u64::MAX]);
    }

    #[test]
    fn tables_do_not_collide() {
        assert_ne!(log_key(5).to_vec(), message_key(5).to_vec());
        assert_ne!(message_key(5).to_vec(), block_key(5).to_vec());
        assert_ne!(&log_key(0)[..2], LOG_COUNT_KEY);
    }
}
