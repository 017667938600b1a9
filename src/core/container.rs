// Read-only view over a container fragment's packed children and trailing index.
use crate::core::error::{Error, ErrorKind};
use crate::core::fragment::{
    read_u32, read_u64, write_u32, write_u64, Fragment, FragmentHeader, FragmentType,
    CONTAINER_FRAGMENT_TYPE, FRAGMENT_HEADER_LEN, WORD_LEN,
};

pub const CONTAINER_METADATA_WORDS: usize = 2;
pub const CONTAINER_METADATA_LEN: usize = CONTAINER_METADATA_WORDS * WORD_LEN;
pub const CONTAINER_VERSION: u8 = 1;

/// First payload word of every container fragment.
pub const CONTAINER_MAGIC: u64 = u64::from_le_bytes(*b"FBCNTNR1");

const FLAG_MISSING_DATA: u8 = 1 << 0;
const FLAG_HAS_INDEX: u8 = 1 << 1;

/// Container bookkeeping stored immediately after the fragment header.
///
/// `index_offset` and all index entries are byte offsets relative to the data
/// region, which starts at payload word 1 (word 0 holds the magic marker).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContainerMetadata {
    pub block_count: u32,
    pub fragment_type: FragmentType,
    pub missing_data: bool,
    pub has_index: bool,
    pub version: u8,
    pub index_offset: u64,
}

impl ContainerMetadata {
    pub fn encode(&self) -> [u8; CONTAINER_METADATA_LEN] {
        let mut buf = [0u8; CONTAINER_METADATA_LEN];
        write_u32(&mut buf, 0, self.block_count);
        buf[4] = self.fragment_type;
        let mut flags = 0u8;
        if self.missing_data {
            flags |= FLAG_MISSING_DATA;
        }
        if self.has_index {
            flags |= FLAG_HAS_INDEX;
        }
        buf[5] = flags;
        buf[6] = self.version;
        write_u64(&mut buf, 8, self.index_offset);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < CONTAINER_METADATA_LEN {
            return Err(
                Error::new(ErrorKind::InvalidFormat).with_message("container metadata too small")
            );
        }
        Ok(Self {
            block_count: read_u32(buf, 0),
            fragment_type: buf[4],
            missing_data: buf[5] & FLAG_MISSING_DATA != 0,
            has_index: buf[5] & FLAG_HAS_INDEX != 0,
            version: buf[6],
            index_offset: read_u64(buf, 8),
        })
    }
}

// Metadata lives at a fixed offset; callers must have checked that the
// fragment is container-typed and large enough to hold it.
pub(crate) fn read_metadata(fragment: &Fragment) -> Result<ContainerMetadata, Error> {
    ContainerMetadata::decode(&fragment.as_bytes()[FRAGMENT_HEADER_LEN..])
}

pub(crate) fn write_metadata(fragment: &mut Fragment, metadata: &ContainerMetadata) {
    fragment.as_bytes_mut()[FRAGMENT_HEADER_LEN..FRAGMENT_HEADER_LEN + CONTAINER_METADATA_LEN]
        .copy_from_slice(&metadata.encode());
}

/// Read-only navigation over a packed container fragment.
///
/// Construction validates the whole layout eagerly: magic word, metadata,
/// index placement, and index self-consistency. A view is only handed out
/// over a buffer whose offset arithmetic can be trusted.
#[derive(Debug)]
pub struct ContainerFragment<'a> {
    fragment: &'a Fragment,
    metadata: ContainerMetadata,
}

impl<'a> ContainerFragment<'a> {
    pub fn new(fragment: &'a Fragment) -> Result<Self, Error> {
        if fragment.fragment_type() != CONTAINER_FRAGMENT_TYPE {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("fragment is not container-typed")
                .with_sequence_id(fragment.sequence_id()));
        }
        let payload = fragment.payload();
        if payload.len() < WORD_LEN {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("container payload too small for magic word")
                .with_sequence_id(fragment.sequence_id()));
        }
        if read_u64(payload, 0) != CONTAINER_MAGIC {
            tracing::warn!(
                sequence_id = fragment.sequence_id(),
                "rejecting buffer without container magic word"
            );
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("bad container magic word")
                .with_sequence_id(fragment.sequence_id()));
        }
        let metadata = read_metadata(fragment)?;
        if !metadata.has_index {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("container index is marked invalid")
                .with_sequence_id(fragment.sequence_id()));
        }

        let data = &payload[WORD_LEN..];
        let block_count = metadata.block_count as usize;
        let index_offset = metadata.index_offset as usize;
        if block_count == 0 {
            if index_offset != 0 {
                return Err(Error::new(ErrorKind::InvalidFormat)
                    .with_message("empty container declares a nonzero index offset")
                    .with_sequence_id(fragment.sequence_id()));
            }
            return Ok(Self { fragment, metadata });
        }

        let index_len = (block_count + 1) * WORD_LEN;
        if index_offset
            .checked_add(index_len)
            .is_none_or(|end| end > data.len())
        {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("container index exceeds payload bounds")
                .with_sequence_id(fragment.sequence_id())
                .with_offset(index_offset as u64));
        }
        let first = read_u64(data, index_offset) as usize;
        if first != 0 {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("container children do not start at data offset zero")
                .with_sequence_id(fragment.sequence_id())
                .with_offset(first as u64));
        }
        let mut previous = 0usize;
        for i in 0..=block_count {
            let entry = read_u64(data, index_offset + i * WORD_LEN) as usize;
            if entry < previous || entry > index_offset {
                return Err(Error::new(ErrorKind::InvalidFormat)
                    .with_message(format!("container index entry {i} out of order"))
                    .with_sequence_id(fragment.sequence_id())
                    .with_offset(entry as u64));
            }
            previous = entry;
        }
        let end = read_u64(data, index_offset + block_count * WORD_LEN) as usize;
        if end != index_offset {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("container index end does not match index offset")
                .with_sequence_id(fragment.sequence_id())
                .with_offset(end as u64));
        }

        Ok(Self { fragment, metadata })
    }

    pub fn block_count(&self) -> usize {
        self.metadata.block_count as usize
    }

    pub fn fragment_type(&self) -> FragmentType {
        self.metadata.fragment_type
    }

    pub fn missing_data(&self) -> bool {
        self.metadata.missing_data
    }

    pub fn version(&self) -> u8 {
        self.metadata.version
    }

    pub fn index_offset(&self) -> usize {
        self.metadata.index_offset as usize
    }

    fn data(&self) -> &'a [u8] {
        &self.fragment.payload()[WORD_LEN..]
    }

    /// Byte offset of child `i` within the data region, for `i` in
    /// `[0, block_count()]`; entry `block_count()` is one past the last child.
    pub fn fragment_index(&self, i: usize) -> Result<usize, Error> {
        let block_count = self.block_count();
        if i > block_count {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("index entry {i} out of range ({block_count} children)")));
        }
        if block_count == 0 {
            return Ok(0);
        }
        Ok(read_u64(self.data(), self.index_offset() + i * WORD_LEN) as usize)
    }

    pub fn fragment_size_bytes(&self, i: usize) -> Result<usize, Error> {
        self.check_child(i)?;
        Ok(self.fragment_index(i + 1)? - self.fragment_index(i)?)
    }

    /// Complete byte image (header + payload) of child `i`.
    pub fn fragment(&self, i: usize) -> Result<&'a [u8], Error> {
        self.check_child(i)?;
        let start = self.fragment_index(i)?;
        let end = self.fragment_index(i + 1)?;
        Ok(&self.data()[start..end])
    }

    pub fn fragment_header(&self, i: usize) -> Result<FragmentHeader, Error> {
        FragmentHeader::decode(self.fragment(i)?)
    }

    /// Copies child `i` out as an owned fragment.
    pub fn fragment_at(&self, i: usize) -> Result<Fragment, Error> {
        Fragment::from_bytes(self.fragment(i)?.to_vec())
    }

    fn check_child(&self, i: usize) -> Result<(), Error> {
        if i >= self.block_count() {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "child {i} out of range ({} children)",
                self.block_count()
            )));
        }
        Ok(())
    }
}
