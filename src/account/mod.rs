//! Hybrid backfill+live account replay: a live subscription is
//! opened first and feeds a [`crate::page_assembler::PageAssembler`]
//! immediately; a FIFO backfill of account metadata then drains address by
//! address, with the live stream always winning any race on a given
//! address.

pub mod replay;
pub mod seq_tracker;

pub use replay::{AccountReplay, AccountListRequest, AccountListPage, AccountMetaEntry};
pub use seq_tracker::AccountSeqTracker;
