//! Purpose: In-memory binary container format for multi-fragment acquisition data.
//! Exports: `core` (fragment buffers, container read/write views, raw events, errors).
//! Role: Library backing the `fragbuf` CLI and downstream packers/consumers.
//! Invariants: All header/index fields are little-endian and word-addressed (8-byte words).
//! Invariants: Core structures are single-owner and synchronous; no internal locking.
pub mod core;
