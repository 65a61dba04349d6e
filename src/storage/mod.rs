//! Storage Module
//!
//! The storage adapter every mutation of durable state flows through, and
//! the append-only segment log that backs it.
//!
//! ## Responsibilities
//! - Point get/put/delete
//! - Live key count
//! - Ordered prefix scan and full key-space fold
//! - Crash recovery by replaying segments on open
//!
//! ## File Format
//! ```text
//! {path}/
//!   ├── 000000001.data
//!   ├── 000000002.data      (rolled over at max_datafile_size)
//!   └── ...
//!
//! ┌─────────────────────────────────────────────────────────┐
//! │ Record                                                  │
//! │ ┌─────────┬──────────┬──────────┬───────┬─────────────┐ │
//! │ │ CRC (4) │KeyLen (4)│ValLen (4)│  Key  │    Value    │ │
//! │ └─────────┴──────────┴──────────┴───────┴─────────────┘ │
//! │ (ValLen = u32::MAX means tombstone, no value bytes)     │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod segment;
mod store;

pub use segment::{
    ReadOutcome, SegmentFile, SegmentReader, SegmentWriter, MAX_RECORD_BODY, RECORD_HEADER_SIZE,
};
pub use store::Store;
