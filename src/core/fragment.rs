// Fragment header layout and the owned, growable fragment buffer.
use crate::core::container::CONTAINER_METADATA_WORDS;
use crate::core::error::{Error, ErrorKind};

pub const WORD_LEN: usize = 8;
pub const FRAGMENT_HEADER_WORDS: usize = 3;
pub const FRAGMENT_HEADER_LEN: usize = FRAGMENT_HEADER_WORDS * WORD_LEN;
pub const FRAGMENT_VERSION: u8 = 1;

/// Tag identifying the logical kind of a fragment's payload.
pub type FragmentType = u8;

/// Sentinel for a fragment whose payload kind has not been set.
pub const EMPTY_FRAGMENT_TYPE: FragmentType = 0;
/// First tag value reserved for system fragments; user payloads use 1..=224.
pub const FIRST_SYSTEM_TYPE: FragmentType = 225;
pub const CONTAINER_FRAGMENT_TYPE: FragmentType = 225;

pub fn words_for_bytes(bytes: usize) -> usize {
    bytes.div_ceil(WORD_LEN)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragmentHeader {
    pub sequence_id: u64,
    pub fragment_id: u32,
    pub fragment_type: FragmentType,
    pub version: u8,
    pub word_count: u64,
}

impl FragmentHeader {
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_LEN] {
        let mut buf = [0u8; FRAGMENT_HEADER_LEN];
        write_u64(&mut buf, 0, self.sequence_id);
        write_u32(&mut buf, 8, self.fragment_id);
        buf[12] = self.fragment_type;
        buf[13] = self.version;
        write_u64(&mut buf, 16, self.word_count);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < FRAGMENT_HEADER_LEN {
            return Err(Error::new(ErrorKind::InvalidFormat).with_message("fragment header too small"));
        }
        Ok(Self {
            sequence_id: read_u64(buf, 0),
            fragment_id: read_u32(buf, 8),
            fragment_type: buf[12],
            version: buf[13],
            word_count: read_u64(buf, 16),
        })
    }
}

/// A single self-describing binary buffer: header, optional container
/// metadata, and payload, held as one contiguous word-aligned byte image.
///
/// The header's `word_count` always equals the buffer length in words; every
/// resize updates both together. Capacity never shrinks, so repeated appends
/// into a container amortize across few reallocations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fragment {
    buf: Vec<u8>,
}

impl Fragment {
    /// Creates an unstamped fragment shell with the given payload size in words.
    pub fn new(payload_words: usize) -> Self {
        Self::with_header(0, 0, EMPTY_FRAGMENT_TYPE, payload_words)
    }

    pub fn with_header(
        sequence_id: u64,
        fragment_id: u32,
        fragment_type: FragmentType,
        payload_words: usize,
    ) -> Self {
        let metadata_words = metadata_words_for(fragment_type);
        let total_words = FRAGMENT_HEADER_WORDS + metadata_words + payload_words;
        let mut buf = vec![0u8; total_words * WORD_LEN];
        let header = FragmentHeader {
            sequence_id,
            fragment_id,
            fragment_type,
            version: FRAGMENT_VERSION,
            word_count: total_words as u64,
        };
        buf[0..FRAGMENT_HEADER_LEN].copy_from_slice(&header.encode());
        Self { buf }
    }

    /// Adopts an existing byte image, validating header/length consistency.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, Error> {
        if buf.len() % WORD_LEN != 0 {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("fragment image is not a whole number of words"));
        }
        let header = FragmentHeader::decode(&buf)?;
        if header.word_count as usize * WORD_LEN != buf.len() {
            return Err(Error::new(ErrorKind::InvalidFormat).with_message(format!(
                "declared word count {} does not match image length {} bytes",
                header.word_count,
                buf.len()
            )));
        }
        let least_words = FRAGMENT_HEADER_WORDS + metadata_words_for(header.fragment_type);
        if (header.word_count as usize) < least_words {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("fragment image too small for its header and metadata"));
        }
        Ok(Self { buf })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn header(&self) -> FragmentHeader {
        FragmentHeader {
            sequence_id: self.sequence_id(),
            fragment_id: self.fragment_id(),
            fragment_type: self.fragment_type(),
            version: self.version(),
            word_count: self.word_count(),
        }
    }

    pub fn sequence_id(&self) -> u64 {
        read_u64(&self.buf, 0)
    }

    pub fn set_sequence_id(&mut self, sequence_id: u64) {
        write_u64(&mut self.buf, 0, sequence_id);
    }

    pub fn fragment_id(&self) -> u32 {
        read_u32(&self.buf, 8)
    }

    pub fn set_fragment_id(&mut self, fragment_id: u32) {
        write_u32(&mut self.buf, 8, fragment_id);
    }

    pub fn fragment_type(&self) -> FragmentType {
        self.buf[12]
    }

    pub fn set_fragment_type(&mut self, fragment_type: FragmentType) {
        self.buf[12] = fragment_type;
    }

    pub fn version(&self) -> u8 {
        self.buf[13]
    }

    pub fn word_count(&self) -> u64 {
        read_u64(&self.buf, 16)
    }

    fn set_word_count(&mut self, word_count: u64) {
        write_u64(&mut self.buf, 16, word_count);
    }

    pub fn size_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.buf.capacity()
    }

    pub fn payload_offset_words(&self) -> usize {
        FRAGMENT_HEADER_WORDS + metadata_words_for(self.fragment_type())
    }

    pub fn payload_offset_bytes(&self) -> usize {
        // Clamped so a mistyped short buffer reads as an empty payload.
        (self.payload_offset_words() * WORD_LEN).min(self.buf.len())
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[self.payload_offset_bytes()..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = self.payload_offset_bytes();
        &mut self.buf[offset..]
    }

    pub fn payload_size_bytes(&self) -> usize {
        self.buf.len() - self.payload_offset_bytes()
    }

    pub fn payload_size_words(&self) -> usize {
        self.payload_size_bytes() / WORD_LEN
    }

    /// Resizes the payload to exactly `payload_words`, keeping header and
    /// metadata intact and updating `word_count` with the reallocation.
    pub fn resize_payload_words(&mut self, payload_words: usize) -> Result<(), Error> {
        self.resize_payload_bytes_with_cushion(payload_words * WORD_LEN, 1.0)
    }

    /// Resizes the payload to hold `payload_bytes` (rounded up to whole
    /// words), reserving `total * cushion` capacity when the buffer must
    /// grow. Capacity is monotonic: shrinking the payload releases nothing.
    pub fn resize_payload_bytes_with_cushion(
        &mut self,
        payload_bytes: usize,
        cushion: f64,
    ) -> Result<(), Error> {
        let total_words = self.payload_offset_words() + words_for_bytes(payload_bytes);
        let total_bytes = total_words * WORD_LEN;
        if total_bytes > self.buf.capacity() {
            let target = ((total_bytes as f64) * cushion) as usize;
            let additional = target.max(total_bytes) - self.buf.len();
            self.buf.try_reserve_exact(additional).map_err(|err| {
                Error::new(ErrorKind::Allocation)
                    .with_message(format!("could not reserve {additional} bytes"))
                    .with_source(err)
            })?;
        }
        self.buf.resize(total_bytes, 0);
        self.set_word_count(total_words as u64);
        Ok(())
    }
}

fn metadata_words_for(fragment_type: FragmentType) -> usize {
    if fragment_type == CONTAINER_FRAGMENT_TYPE {
        CONTAINER_METADATA_WORDS
    } else {
        0
    }
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_4(buf, offset))
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_8(buf, offset))
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{
        words_for_bytes, Fragment, FragmentHeader, EMPTY_FRAGMENT_TYPE, FRAGMENT_HEADER_LEN,
        FRAGMENT_HEADER_WORDS, FRAGMENT_VERSION, WORD_LEN,
    };
    use crate::core::error::ErrorKind;

    #[test]
    fn word_rounding() {
        assert_eq!(words_for_bytes(0), 0);
        assert_eq!(words_for_bytes(1), 1);
        assert_eq!(words_for_bytes(8), 1);
        assert_eq!(words_for_bytes(9), 2);
    }

    #[test]
    fn header_round_trip() {
        let header = FragmentHeader {
            sequence_id: 77,
            fragment_id: 3,
            fragment_type: 12,
            version: FRAGMENT_VERSION,
            word_count: 10,
        };
        let buf = header.encode();
        let decoded = FragmentHeader::decode(&buf).expect("decode");
        assert_eq!(header, decoded);
    }

    #[test]
    fn new_fragment_is_header_plus_payload() {
        let fragment = Fragment::with_header(9, 2, 5, 4);
        assert_eq!(fragment.word_count() as usize, FRAGMENT_HEADER_WORDS + 4);
        assert_eq!(fragment.size_bytes(), fragment.word_count() as usize * WORD_LEN);
        assert_eq!(fragment.sequence_id(), 9);
        assert_eq!(fragment.fragment_id(), 2);
        assert_eq!(fragment.fragment_type(), 5);
        assert_eq!(fragment.payload_size_words(), 4);
    }

    #[test]
    fn from_bytes_round_trips() {
        let mut fragment = Fragment::with_header(1, 1, 7, 2);
        fragment.payload_mut()[0] = 0xAB;
        let bytes = fragment.as_bytes().to_vec();
        let adopted = Fragment::from_bytes(bytes).expect("adopt");
        assert_eq!(adopted, fragment);
    }

    #[test]
    fn from_bytes_rejects_word_count_mismatch() {
        let fragment = Fragment::new(2);
        let mut bytes = fragment.into_bytes();
        bytes.extend_from_slice(&[0u8; WORD_LEN]);
        let err = Fragment::from_bytes(bytes).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    }

    #[test]
    fn from_bytes_rejects_unaligned_image() {
        let fragment = Fragment::new(1);
        let mut bytes = fragment.into_bytes();
        bytes.push(0);
        let err = Fragment::from_bytes(bytes).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    }

    #[test]
    fn from_bytes_rejects_truncated_header() {
        let err = Fragment::from_bytes(vec![0u8; FRAGMENT_HEADER_LEN - WORD_LEN]).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    }

    #[test]
    fn resize_updates_word_count_and_preserves_payload() {
        let mut fragment = Fragment::new(1);
        fragment.payload_mut()[0] = 0x5A;
        fragment.resize_payload_words(3).expect("resize");
        assert_eq!(fragment.word_count() as usize, FRAGMENT_HEADER_WORDS + 3);
        assert_eq!(fragment.payload()[0], 0x5A);
        assert_eq!(fragment.payload()[WORD_LEN], 0);
    }

    #[test]
    fn cushion_overallocates_capacity() {
        let mut fragment = Fragment::new(0);
        fragment
            .resize_payload_bytes_with_cushion(1000, 1.3)
            .expect("resize");
        assert!(fragment.capacity_bytes() >= fragment.size_bytes());
        let grown_capacity = fragment.capacity_bytes();
        // Small follow-up growth should fit inside the cushion.
        fragment
            .resize_payload_bytes_with_cushion(1100, 1.3)
            .expect("resize");
        assert_eq!(fragment.capacity_bytes(), grown_capacity);
    }

    #[test]
    fn capacity_never_shrinks() {
        let mut fragment = Fragment::new(64);
        let capacity = fragment.capacity_bytes();
        fragment.resize_payload_words(1).expect("shrink");
        assert!(fragment.capacity_bytes() >= capacity);
        assert_eq!(fragment.fragment_type(), EMPTY_FRAGMENT_TYPE);
    }
}
