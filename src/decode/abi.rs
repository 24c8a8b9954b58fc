//! Minimal ABI slicing for event payloads and call-data.
//!
//! Head slots are 32-byte words addressed by index. Dynamic values (`bytes`, `string`, arrays)
//! store a byte offset in their head slot that points at a length-prefixed tail.

use super::error::{DecodeError, DecodeResult};
use alloy_primitives::{Address, Bytes, B256, U256};

pub const WORD: usize = 32;

/// Reader over an ABI encoded payload.
#[derive(Debug, Clone, Copy)]
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, offset: usize, len: usize) -> DecodeResult<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .ok_or(DecodeError::LengthOverflow { offset })?;
        self.data.get(offset..end).ok_or(DecodeError::OutOfBounds {
            offset,
            len,
            available: self.data.len(),
        })
    }

    fn word_at(&self, offset: usize) -> DecodeResult<&'a [u8]> {
        self.slice(offset, WORD)
    }

    fn head_offset(index: usize) -> DecodeResult<usize> {
        index
            .checked_mul(WORD)
            .ok_or(DecodeError::LengthOverflow { offset: usize::MAX })
    }

    /// Raw head word `index`.
    pub fn word(&self, index: usize) -> DecodeResult<B256> {
        Ok(B256::from_slice(self.word_at(Self::head_offset(index)?)?))
    }

    pub fn uint(&self, index: usize) -> DecodeResult<U256> {
        Ok(U256::from_be_slice(
            self.word_at(Self::head_offset(index)?)?,
        ))
    }

    pub fn address(&self, index: usize) -> DecodeResult<Address> {
        Ok(Address::from_word(self.word(index)?))
    }

    pub fn bool(&self, index: usize) -> DecodeResult<bool> {
        Ok(!self.uint(index)?.is_zero())
    }

    /// Low byte of head word `index` (`uint8` fields).
    pub fn uint8(&self, index: usize) -> DecodeResult<u8> {
        let word = self.word_at(Self::head_offset(index)?)?;
        Ok(word[WORD - 1])
    }

    /// Reads the word at a byte offset as a length or offset value.
    fn usize_at(&self, offset: usize) -> DecodeResult<usize> {
        let word = self.word_at(offset)?;
        if word[..WORD - 8].iter().any(|byte| *byte != 0) {
            return Err(DecodeError::LengthOverflow { offset });
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&word[WORD - 8..]);
        usize::try_from(u64::from_be_bytes(low)).map_err(|_| DecodeError::LengthOverflow { offset })
    }

    /// Tail position of the dynamic value referenced by head slot `index`.
    fn tail(&self, index: usize) -> DecodeResult<(usize, usize)> {
        let offset = self.usize_at(Self::head_offset(index)?)?;
        let len = self.usize_at(offset)?;
        Ok((offset + WORD, len))
    }

    pub fn bytes(&self, index: usize) -> DecodeResult<Bytes> {
        let (start, len) = self.tail(index)?;
        Ok(Bytes::copy_from_slice(self.slice(start, len)?))
    }

    pub fn string(&self, index: usize) -> DecodeResult<String> {
        let (start, len) = self.tail(index)?;
        let raw = self.slice(start, len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn words(&self, index: usize) -> DecodeResult<Vec<&'a [u8]>> {
        let (start, len) = self.tail(index)?;
        let total = len
            .checked_mul(WORD)
            .ok_or(DecodeError::LengthOverflow { offset: start })?;
        let body = self.slice(start, total)?;
        Ok(body.chunks_exact(WORD).collect())
    }

    pub fn uint_array(&self, index: usize) -> DecodeResult<Vec<U256>> {
        Ok(self
            .words(index)?
            .into_iter()
            .map(U256::from_be_slice)
            .collect())
    }

    pub fn address_array(&self, index: usize) -> DecodeResult<Vec<Address>> {
        Ok(self
            .words(index)?
            .into_iter()
            .map(|word| Address::from_slice(&word[WORD - 20..]))
            .collect())
    }
}

pub fn topic(topics: &[B256], index: usize) -> DecodeResult<B256> {
    topics
        .get(index)
        .copied()
        .ok_or(DecodeError::MissingTopic { index })
}

pub fn topic_address(topics: &[B256], index: usize) -> DecodeResult<Address> {
    topic(topics, index).map(Address::from_word)
}

pub fn topic_uint(topics: &[B256], index: usize) -> DecodeResult<U256> {
    topic(topics, index).map(|word| U256::from_be_bytes(word.0))
}

/// Pairs up two parallel arrays of a batch event.
pub fn zip_batch(ids: Vec<U256>, values: Vec<U256>) -> DecodeResult<Vec<(U256, U256)>> {
    if ids.len() != values.len() {
        return Err(DecodeError::ArrayLengthMismatch {
            left: ids.len(),
            right: values.len(),
        });
    }
    Ok(ids.into_iter().zip(values).collect())
}

/// Scans `input` for `selector` followed by a left-padded address argument.
///
/// The scan is not anchored to a call boundary, so a selector nested inside a relayed or
/// multi-call payload also matches. A zero address counts as no match and scanning continues.
pub fn find_selector_argument(input: &[u8], selector: [u8; 4]) -> Option<Address> {
    const PAD: usize = 12;
    let needed = selector.len() + WORD;
    if input.len() < needed {
        return None;
    }
    for start in 0..=input.len() - needed {
        if input[start..start + 4] != selector {
            continue;
        }
        let arg = &input[start + 4..start + needed];
        if arg[..PAD].iter().any(|byte| *byte != 0) {
            continue;
        }
        let address = Address::from_slice(&arg[PAD..]);
        if address != Address::ZERO {
            return Some(address);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_u64(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    fn encode_uint_arrays(first: &[u64], second: &[u64]) -> Vec<u8> {
        let mut out = Vec::new();
        let first_offset = 64u64;
        let second_offset = first_offset + 32 + 32 * first.len() as u64;
        out.extend_from_slice(&word_u64(first_offset));
        out.extend_from_slice(&word_u64(second_offset));
        out.extend_from_slice(&word_u64(first.len() as u64));
        for value in first {
            out.extend_from_slice(&word_u64(*value));
        }
        out.extend_from_slice(&word_u64(second.len() as u64));
        for value in second {
            out.extend_from_slice(&word_u64(*value));
        }
        out
    }

    #[test]
    fn reads_static_head_words() {
        let mut data = Vec::new();
        let mut address_word = [0u8; 32];
        address_word[12..].copy_from_slice(&[0x11; 20]);
        data.extend_from_slice(&address_word);
        data.extend_from_slice(&word_u64(1000));
        data.extend_from_slice(&word_u64(1));

        let reader = AbiReader::new(&data);
        assert_eq!(reader.address(0).expect("address"), Address::from([0x11; 20]));
        assert_eq!(reader.uint(1).expect("uint"), U256::from(1000));
        assert!(reader.bool(2).expect("bool"));
        assert_eq!(reader.uint8(1).expect("uint8"), (1000u64 & 0xff) as u8);
    }

    #[test]
    fn short_payload_is_out_of_bounds() {
        let data = [0u8; 40];
        let reader = AbiReader::new(&data);
        assert!(reader.uint(0).is_ok());
        assert_eq!(
            reader.uint(1),
            Err(DecodeError::OutOfBounds {
                offset: 32,
                len: 32,
                available: 40
            })
        );
    }

    #[test]
    fn decodes_parallel_arrays() {
        let data = encode_uint_arrays(&[1, 2, 3], &[10, 20, 30]);
        let reader = AbiReader::new(&data);
        let ids = reader.uint_array(0).expect("ids");
        let values = reader.uint_array(1).expect("values");
        let pairs = zip_batch(ids, values).expect("zip");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], (U256::from(3), U256::from(30)));
    }

    #[test]
    fn mismatched_arrays_fault() {
        let data = encode_uint_arrays(&[1, 2], &[10]);
        let reader = AbiReader::new(&data);
        let ids = reader.uint_array(0).expect("ids");
        let values = reader.uint_array(1).expect("values");
        assert_eq!(
            zip_batch(ids, values),
            Err(DecodeError::ArrayLengthMismatch { left: 2, right: 1 })
        );
    }

    #[test]
    fn oversized_length_prefix_faults() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_u64(32));
        data.extend_from_slice(&word_u64(1_000_000));
        let reader = AbiReader::new(&data);
        assert!(matches!(
            reader.uint_array(0),
            Err(DecodeError::OutOfBounds { .. })
        ));

        let mut huge = Vec::new();
        huge.extend_from_slice(&word_u64(32));
        huge.extend_from_slice(&[0xff; 32]);
        let reader = AbiReader::new(&huge);
        assert_eq!(
            reader.bytes(0),
            Err(DecodeError::LengthOverflow { offset: 32 })
        );
    }

    #[test]
    fn decodes_string_tail() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_u64(32));
        data.extend_from_slice(&word_u64(5));
        let mut body = [0u8; 32];
        body[..5].copy_from_slice(b"hello");
        data.extend_from_slice(&body);
        let reader = AbiReader::new(&data);
        assert_eq!(reader.string(0).expect("string"), "hello");
    }

    #[test]
    fn selector_scan_skips_zero_address_and_stops_at_first_match() {
        let selector = [0x61, 0x0b, 0x59, 0x25];
        let mut input = vec![0xaa, 0xbb];
        input.extend_from_slice(&selector);
        input.extend_from_slice(&[0u8; 32]);
        input.extend_from_slice(&selector);
        input.extend_from_slice(&[0u8; 12]);
        input.extend_from_slice(&[0x22; 20]);
        input.extend_from_slice(&selector);
        input.extend_from_slice(&[0u8; 12]);
        input.extend_from_slice(&[0x33; 20]);

        assert_eq!(
            find_selector_argument(&input, selector),
            Some(Address::from([0x22; 20]))
        );
        assert_eq!(find_selector_argument(&input[..10], selector), None);
    }

    #[test]
    fn topic_helpers_report_missing_topics() {
        let topics = vec![B256::ZERO];
        assert_eq!(
            topic_address(&topics, 1),
            Err(DecodeError::MissingTopic { index: 1 })
        );
    }
}
