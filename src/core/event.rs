// Per-sequence aggregate owning fragments across insertion, query, and release.
use std::fmt;

use crate::core::error::{Error, ErrorKind};
use crate::core::fragment::{Fragment, FragmentType};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawEventHeader {
    pub run_id: u32,
    pub subrun_id: u32,
    pub sequence_id: u64,
    pub is_complete: bool,
}

impl RawEventHeader {
    pub fn new(run_id: u32, subrun_id: u32, sequence_id: u64) -> Self {
        Self {
            run_id,
            subrun_id,
            sequence_id,
            is_complete: false,
        }
    }
}

/// One acquisition event: a header plus the fragments collected for its
/// sequence id, owned exclusively and in insertion order.
///
/// Completeness is advisory metadata for an outer scheduler, not an access
/// lock: a complete event still accepts insertions and releases.
#[derive(Debug)]
pub struct RawEvent {
    header: RawEventHeader,
    fragments: Vec<Fragment>,
}

impl RawEvent {
    pub fn new(run_id: u32, subrun_id: u32, sequence_id: u64) -> Self {
        Self {
            header: RawEventHeader::new(run_id, subrun_id, sequence_id),
            fragments: Vec::new(),
        }
    }

    /// Takes ownership of one fragment. An empty handle fails with
    /// `NullInsertion` and leaves the event untouched.
    ///
    /// No sequence-id check is performed: producers are trusted to route
    /// fragments to the right event.
    pub fn insert_fragment(&mut self, fragment: Option<Fragment>) -> Result<(), Error> {
        let Some(fragment) = fragment else {
            return Err(Error::new(ErrorKind::NullInsertion)
                .with_message("attempt to insert an empty fragment handle")
                .with_sequence_id(self.header.sequence_id));
        };
        self.fragments.push(fragment);
        Ok(())
    }

    /// Marks the event as having received all expected fragments. One-way.
    pub fn mark_complete(&mut self) {
        self.header.is_complete = true;
    }

    pub fn num_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// Sum of the word counts of all owned fragments.
    pub fn word_count(&self) -> u64 {
        self.fragments.iter().map(Fragment::word_count).sum()
    }

    pub fn run_id(&self) -> u32 {
        self.header.run_id
    }

    pub fn subrun_id(&self) -> u32 {
        self.header.subrun_id
    }

    pub fn sequence_id(&self) -> u64 {
        self.header.sequence_id
    }

    pub fn is_complete(&self) -> bool {
        self.header.is_complete
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Appends each distinct type tag among owned fragments to `types`,
    /// first-seen order, skipping tags already present. Repeated calls
    /// accumulate; pass a fresh list for this event's types alone.
    pub fn fragment_types(&self, types: &mut Vec<FragmentType>) {
        for fragment in &self.fragments {
            let fragment_type = fragment.fragment_type();
            if !types.contains(&fragment_type) {
                types.push(fragment_type);
            }
        }
    }

    /// Transfers ownership of all fragments out, in insertion order, leaving
    /// the event empty.
    pub fn release_product(&mut self) -> Vec<Fragment> {
        std::mem::take(&mut self.fragments)
    }

    /// Transfers out only the fragments of `fragment_type`, preserving
    /// relative order on both sides of the split.
    ///
    /// Whole and filtered release give up ownership the same way; after a
    /// whole release a filtered one finds nothing left.
    pub fn release_product_of_type(&mut self, fragment_type: FragmentType) -> Vec<Fragment> {
        let mut released = Vec::new();
        let mut kept = Vec::new();
        for fragment in self.fragments.drain(..) {
            if fragment.fragment_type() == fragment_type {
                released.push(fragment);
            } else {
                kept.push(fragment);
            }
        }
        self.fragments = kept;
        released
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} subrun {} sequence {}: {} fragments, {} words{}",
            self.header.run_id,
            self.header.subrun_id,
            self.header.sequence_id,
            self.fragments.len(),
            self.word_count(),
            if self.header.is_complete {
                " (complete)"
            } else {
                ""
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::RawEvent;
    use crate::core::error::ErrorKind;
    use crate::core::fragment::Fragment;

    fn typed(fragment_type: u8, payload_words: usize) -> Fragment {
        Fragment::with_header(9, 0, fragment_type, payload_words)
    }

    #[test]
    fn header_accessors() {
        let mut event = RawEvent::new(3, 1, 900);
        assert_eq!(event.run_id(), 3);
        assert_eq!(event.subrun_id(), 1);
        assert_eq!(event.sequence_id(), 900);
        assert!(!event.is_complete());
        event.mark_complete();
        assert!(event.is_complete());
    }

    #[test]
    fn null_insertion_is_rejected() {
        let mut event = RawEvent::new(1, 0, 5);
        let err = event.insert_fragment(None).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::NullInsertion);
        assert_eq!(event.num_fragments(), 0);
    }

    #[test]
    fn word_count_sums_fragments() {
        let mut event = RawEvent::new(1, 0, 5);
        // Header is 3 words, so payloads of 7, 17, and 4 give 10 + 20 + 7.
        for payload_words in [7, 17, 4] {
            event.insert_fragment(Some(typed(2, payload_words))).expect("insert");
        }
        assert_eq!(event.word_count(), 37);
    }

    #[test]
    fn fragment_types_accumulates_without_duplicates() {
        let mut event = RawEvent::new(1, 0, 5);
        for fragment_type in [4u8, 4, 6] {
            event.insert_fragment(Some(typed(fragment_type, 1))).expect("insert");
        }
        let mut types = Vec::new();
        event.fragment_types(&mut types);
        assert_eq!(types, vec![4, 6]);
        event.fragment_types(&mut types);
        assert_eq!(types, vec![4, 6]);
    }

    #[test]
    fn release_product_drains_in_insertion_order() {
        let mut event = RawEvent::new(1, 0, 5);
        for payload_words in [1, 2, 3] {
            event.insert_fragment(Some(typed(2, payload_words))).expect("insert");
        }
        let released = event.release_product();
        assert_eq!(released.len(), 3);
        assert_eq!(released[0].payload_size_words(), 1);
        assert_eq!(released[2].payload_size_words(), 3);
        assert_eq!(event.num_fragments(), 0);
        assert!(event.release_product().is_empty());
    }

    #[test]
    fn filtered_release_splits_by_type() {
        let mut event = RawEvent::new(1, 0, 5);
        event.insert_fragment(Some(typed(7, 1))).expect("insert");
        event.insert_fragment(Some(typed(7, 2))).expect("insert");
        event.insert_fragment(Some(typed(8, 3))).expect("insert");

        let released = event.release_product_of_type(7);
        assert_eq!(released.len(), 2);
        assert_eq!(released[0].payload_size_words(), 1);
        assert_eq!(released[1].payload_size_words(), 2);
        assert_eq!(event.num_fragments(), 1);

        let rest = event.release_product();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].fragment_type(), 8);
        assert_eq!(event.num_fragments(), 0);
    }

    #[test]
    fn display_summarizes_the_event() {
        let mut event = RawEvent::new(2, 4, 77);
        event.insert_fragment(Some(typed(3, 7))).expect("insert");
        event.mark_complete();
        let text = event.to_string();
        assert_eq!(text, "run 2 subrun 4 sequence 77: 1 fragments, 10 words (complete)");
    }
}
