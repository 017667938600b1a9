// Write view that packs child fragments into a container and maintains its index.
use crate::core::container::{
    write_metadata, ContainerMetadata, CONTAINER_MAGIC, CONTAINER_METADATA_WORDS,
    CONTAINER_VERSION,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::fragment::{
    write_u64, Fragment, FragmentHeader, FragmentType, CONTAINER_FRAGMENT_TYPE,
    EMPTY_FRAGMENT_TYPE, FRAGMENT_HEADER_LEN, FRAGMENT_HEADER_WORDS, FRAGMENT_VERSION, WORD_LEN,
};

/// Multiplicative over-allocation applied when a container buffer must grow.
/// Amortizes repeated small appends across few reallocations.
pub const GROWTH_CUSHION: f64 = 1.3;

/// Mutable view over a container fragment.
///
/// The loader is the only writer of a container's payload: it appends child
/// byte-images back-to-back, keeps the trailing offset index consistent, and
/// enforces that all children share one type tag. Single-writer by
/// construction: it holds the fragment exclusively for its whole lifetime.
#[derive(Debug)]
pub struct ContainerFragmentLoader<'a> {
    fragment: &'a mut Fragment,
    metadata: ContainerMetadata,
    cushion: f64,
}

impl<'a> ContainerFragmentLoader<'a> {
    /// Initializes an empty container over a fresh fragment shell.
    ///
    /// The shell must be sized to exactly header + metadata words (see
    /// [`Self::container_shell`]); anything else is rejected with
    /// `InvalidFragment` to guard against reusing a populated buffer.
    pub fn new(fragment: &'a mut Fragment, expected_type: FragmentType) -> Result<Self, Error> {
        let shell_words = FRAGMENT_HEADER_WORDS + CONTAINER_METADATA_WORDS;
        if fragment.word_count() as usize != shell_words {
            tracing::error!(
                word_count = fragment.word_count(),
                expected = shell_words,
                "fragment is not a fresh header + metadata shell"
            );
            return Err(Error::new(ErrorKind::InvalidFragment)
                .with_message(format!(
                    "fragment holds {} words, expected a {shell_words}-word shell",
                    fragment.word_count()
                ))
                .with_hint("Build the input with ContainerFragmentLoader::container_shell.")
                .with_sequence_id(fragment.sequence_id()));
        }
        fragment.set_fragment_type(CONTAINER_FRAGMENT_TYPE);
        let metadata = ContainerMetadata {
            block_count: 0,
            fragment_type: expected_type,
            missing_data: false,
            has_index: true,
            version: CONTAINER_VERSION,
            index_offset: 0,
        };
        write_metadata(fragment, &metadata);

        let mut loader = Self {
            fragment,
            metadata,
            cushion: GROWTH_CUSHION,
        };
        loader.fragment.resize_payload_words(1)?;
        write_u64(loader.fragment.payload_mut(), 0, CONTAINER_MAGIC);
        Ok(loader)
    }

    /// Builds a fragment shell sized exactly for [`Self::new`].
    pub fn container_shell(sequence_id: u64, fragment_id: u32) -> Fragment {
        Fragment::with_header(
            sequence_id,
            fragment_id,
            EMPTY_FRAGMENT_TYPE,
            CONTAINER_METADATA_WORDS,
        )
    }

    /// Overrides the growth cushion for this loader.
    pub fn with_cushion(mut self, cushion: f64) -> Self {
        self.cushion = cushion;
        self
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

    pub fn set_fragment_type(&mut self, fragment_type: FragmentType) {
        self.metadata.fragment_type = fragment_type;
        write_metadata(self.fragment, &self.metadata);
    }

    /// Flags the container as knowingly incomplete while still emittable.
    pub fn set_missing_data(&mut self, missing_data: bool) {
        self.metadata.missing_data = missing_data;
        write_metadata(self.fragment, &self.metadata);
    }

    /// Appends a full copy of `child`'s byte image as the next child.
    ///
    /// The copy's sequence id is re-stamped with the container's own, so all
    /// children are grouped consistently regardless of origin. The first
    /// append may adopt the child's type if the container's shared type is
    /// still the empty sentinel; afterwards a mismatch fails with
    /// `WrongFragmentType` before any byte is written.
    pub fn add_fragment(&mut self, child: &Fragment) -> Result<(), Error> {
        self.check_type(child.fragment_type())?;

        let start = self.children_end();
        let image_len = child.size_bytes();
        let index_room = (self.metadata.block_count as usize + 2) * WORD_LEN;
        self.resize_data(start + image_len + index_room)?;

        let sequence_id = self.fragment.sequence_id();
        let data = self.data_mut();
        data[start..start + image_len].copy_from_slice(child.as_bytes());
        write_u64(data, start, sequence_id);

        self.metadata.block_count += 1;
        write_metadata(self.fragment, &self.metadata);
        self.update_index()
    }

    /// [`Self::add_fragment`], consuming the source handle after copying.
    ///
    /// Packing copies bytes into the container layout; the standalone
    /// allocation is never shared, only dropped.
    pub fn add_owned_fragment(&mut self, child: Fragment) -> Result<(), Error> {
        self.add_fragment(&child)
    }

    /// Adds each fragment in iteration order. Not atomic: a failure partway
    /// through leaves previously added children committed, so callers needing
    /// all-or-nothing must pre-validate types themselves.
    pub fn add_fragments(
        &mut self,
        children: impl IntoIterator<Item = Fragment>,
    ) -> Result<(), Error> {
        for child in children {
            self.add_owned_fragment(child)?;
        }
        Ok(())
    }

    /// Reserves the next child slot with a `payload_words`-word payload and a
    /// header stamped from the container (sequence id, shared type, fragment
    /// id). Returns the child's zeroed payload for the caller to fill
    /// directly; the slice is valid until the next mutating call.
    pub fn append_fragment(&mut self, payload_words: usize) -> Result<&mut [u8], Error> {
        let child_words = FRAGMENT_HEADER_WORDS + payload_words;
        let child_len = child_words * WORD_LEN;
        let start = self.children_end();
        let index_room = (self.metadata.block_count as usize + 2) * WORD_LEN;
        self.resize_data(start + child_len + index_room)?;

        let header = FragmentHeader {
            sequence_id: self.fragment.sequence_id(),
            fragment_id: self.fragment.fragment_id(),
            fragment_type: self.metadata.fragment_type,
            version: FRAGMENT_VERSION,
            word_count: child_words as u64,
        };
        let data = self.data_mut();
        data[start..start + FRAGMENT_HEADER_LEN].copy_from_slice(&header.encode());
        // The slot may cover bytes left over from a previous index.
        data[start + FRAGMENT_HEADER_LEN..start + child_len].fill(0);

        self.metadata.block_count += 1;
        write_metadata(self.fragment, &self.metadata);
        self.update_index()?;

        let payload_start = self.data_offset() + start + FRAGMENT_HEADER_LEN;
        let payload_end = self.data_offset() + start + child_len;
        Ok(&mut self.fragment.as_bytes_mut()[payload_start..payload_end])
    }

    /// Header of the most recently appended child.
    pub fn last_fragment_header(&self) -> Result<FragmentHeader, Error> {
        let start = self.last_child_start()?;
        FragmentHeader::decode(&self.data()[start..])
    }

    /// Changes the declared payload size of the most recently appended child.
    /// Growth goes through the cushion policy; shrinking reclaims nothing.
    pub fn resize_last_fragment(&mut self, payload_words: usize) -> Result<(), Error> {
        let start = self.last_child_start()?;
        let mut header = FragmentHeader::decode(&self.data()[start..])?;
        let new_words = FRAGMENT_HEADER_WORDS + payload_words;
        let new_len = new_words * WORD_LEN;

        let index_room = (self.metadata.block_count as usize + 1) * WORD_LEN;
        self.resize_data(start + new_len + index_room)?;

        header.word_count = new_words as u64;
        let data = self.data_mut();
        data[start..start + FRAGMENT_HEADER_LEN].copy_from_slice(&header.encode());
        self.update_index()
    }

    fn check_type(&mut self, child_type: FragmentType) -> Result<(), Error> {
        if self.metadata.fragment_type == EMPTY_FRAGMENT_TYPE {
            self.metadata.fragment_type = child_type;
            write_metadata(self.fragment, &self.metadata);
            return Ok(());
        }
        if child_type != self.metadata.fragment_type {
            tracing::error!(
                child_type,
                container_type = self.metadata.fragment_type,
                "rejecting child of different type than what's already been added"
            );
            return Err(Error::new(ErrorKind::WrongFragmentType)
                .with_message(format!(
                    "cannot add a type-{child_type} child to a type-{} container",
                    self.metadata.fragment_type
                ))
                .with_sequence_id(self.fragment.sequence_id()));
        }
        Ok(())
    }

    /// Rebuilds the trailing offset index from the current children.
    ///
    /// Two-phase: `has_index` is cleared, the offsets are computed into a
    /// local array by walking the child headers, the payload is sized so the
    /// index lands at the final data end, and only then is the index written
    /// and `has_index` restored. The index is never exposed half-written.
    fn update_index(&mut self) -> Result<(), Error> {
        self.metadata.has_index = false;
        write_metadata(self.fragment, &self.metadata);

        let offsets = self.child_offsets()?;
        let children_end = offsets[offsets.len() - 1] as usize;
        self.resize_data(children_end + offsets.len() * WORD_LEN)?;

        let data = self.data_mut();
        for (i, offset) in offsets.iter().enumerate() {
            write_u64(data, children_end + i * WORD_LEN, *offset);
        }

        self.metadata.index_offset = children_end as u64;
        self.metadata.has_index = true;
        write_metadata(self.fragment, &self.metadata);
        Ok(())
    }

    /// Start offsets of all children plus the end-of-children offset,
    /// recomputed by walking the child headers.
    fn child_offsets(&self) -> Result<Vec<u64>, Error> {
        let data = self.data();
        let block_count = self.metadata.block_count as usize;
        let mut offsets = Vec::with_capacity(block_count + 1);
        let mut offset = 0usize;
        offsets.push(0);
        for _ in 0..block_count {
            let header = FragmentHeader::decode(&data[offset..])?;
            offset += header.word_count as usize * WORD_LEN;
            offsets.push(offset as u64);
        }
        Ok(offsets)
    }

    fn last_child_start(&self) -> Result<usize, Error> {
        if self.metadata.block_count == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("container holds no fragments")
                .with_sequence_id(self.fragment.sequence_id()));
        }
        let offsets = self.child_offsets()?;
        Ok(offsets[offsets.len() - 2] as usize)
    }

    fn children_end(&self) -> usize {
        self.metadata.index_offset as usize
    }

    fn data_offset(&self) -> usize {
        self.fragment.payload_offset_bytes() + WORD_LEN
    }

    fn data(&self) -> &[u8] {
        &self.fragment.payload()[WORD_LEN..]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.fragment.payload_mut()[WORD_LEN..]
    }

    /// Sizes the payload to the magic word plus `data_bytes`, growing the
    /// underlying allocation through the cushion policy when needed.
    fn resize_data(&mut self, data_bytes: usize) -> Result<(), Error> {
        let old_capacity = self.fragment.capacity_bytes();
        self.fragment
            .resize_payload_bytes_with_cushion(WORD_LEN + data_bytes, self.cushion)?;
        let new_capacity = self.fragment.capacity_bytes();
        if new_capacity > old_capacity {
            tracing::trace!(old_capacity, new_capacity, "grew container buffer");
        }
        Ok(())
    }
}
