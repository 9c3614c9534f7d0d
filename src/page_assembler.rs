//! Buffers 4 KiB-chunked account update pages keyed by `(address, seq)`;
//! emits when all pages are received; evicts timed-out or over-quota
//! entries.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

pub const PAGE_SIZE: usize = 4096;
const DEFAULT_ASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_PENDING_PER_ADDRESS: usize = 10;

pub fn expected_page_count(data_size: u64) -> usize {
    ((data_size as usize) + PAGE_SIZE - 1) / PAGE_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Backfill,
    Stream,
}

#[derive(Debug, Clone)]
pub struct AccountMeta {
    pub data_size: u64,
}

#[derive(Debug, Clone)]
pub struct AccountPage {
    pub page_idx: u32,
    pub data: Vec<u8>,
}

/// A single incoming account update envelope.
#[derive(Debug, Clone)]
pub struct AccountUpdate<Addr> {
    pub address: Addr,
    pub address_hex: String,
    pub slot: u64,
    pub seq: u64,
    pub is_delete: bool,
    pub meta: Option<AccountMeta>,
    pub page: Option<AccountPage>,
}

/// Fully assembled (or delete-marked) account state.
#[derive(Debug, Clone)]
pub struct AccountState<Addr> {
    pub address: Addr,
    pub address_hex: String,
    pub slot: u64,
    pub seq: u64,
    pub meta: Option<AccountMeta>,
    pub data: Vec<u8>,
    pub is_delete: bool,
    pub source: UpdateSource,
}

struct Entry<Addr> {
    address: Addr,
    address_hex: String,
    slot: u64,
    seq: u64,
    meta: AccountMeta,
    expected: usize,
    pages: BTreeMap<u32, Vec<u8>>,
    received_at: Instant,
}

impl<Addr> Entry<Addr> {
    fn is_complete(&self) -> bool {
        self.pages.len() >= self.expected
    }

    fn assemble(self, source: UpdateSource) -> AccountState<Addr> {
        let mut data = Vec::with_capacity(self.expected * PAGE_SIZE);
        for idx in 0..self.expected as u32 {
            if let Some(bytes) = self.pages.get(&idx) {
                data.extend_from_slice(bytes);
            }
        }
        AccountState {
            address: self.address,
            address_hex: self.address_hex,
            slot: self.slot,
            seq: self.seq,
            meta: Some(self.meta),
            data,
            is_delete: false,
            source,
        }
    }
}

pub struct PageAssembler<Addr> {
    // address_hex -> seq -> entry
    entries: HashMap<String, BTreeMap<u64, Entry<Addr>>>,
    assembly_timeout: Duration,
    max_pending_per_address: usize,
    evicted_timeout: u64,
    evicted_quota: u64,
}

impl<Addr> Default for PageAssembler<Addr> {
    fn default() -> Self {
        Self::new(DEFAULT_ASSEMBLY_TIMEOUT, DEFAULT_MAX_PENDING_PER_ADDRESS)
    }
}

impl<Addr> PageAssembler<Addr> {
    pub fn new(assembly_timeout: Duration, max_pending_per_address: usize) -> Self {
        Self {
            entries: HashMap::new(),
            assembly_timeout,
            max_pending_per_address,
            evicted_timeout: 0,
            evicted_quota: 0,
        }
    }

    pub fn evicted_timeout_count(&self) -> u64 {
        self.evicted_timeout
    }

    pub fn evicted_quota_count(&self) -> u64 {
        self.evicted_quota
    }

    pub fn pending_len(&self) -> usize {
        self.entries.values().map(|m| m.len()).sum()
    }

    /// Feeds one update into the assembler. Returns `Some` when the update
    /// completes (or is) an emittable [`AccountState`].
    pub fn ingest(
        &mut self,
        update: AccountUpdate<Addr>,
        source: UpdateSource,
    ) -> Option<AccountState<Addr>>
    where
        Addr: Clone,
    {
        if update.is_delete {
            return Some(AccountState {
                address: update.address,
                address_hex: update.address_hex,
                slot: update.slot,
                seq: update.seq,
                meta: update.meta,
                data: Vec::new(),
                is_delete: true,
                source,
            });
        }

        let meta = update.meta?;
        let expected = expected_page_count(meta.data_size);
        let address_hex = update.address_hex.clone();

        let per_address = self.entries.entry(address_hex.clone()).or_default();
        let entry = per_address.entry(update.seq).or_insert_with(|| Entry {
            address: update.address.clone(),
            address_hex: address_hex.clone(),
            slot: update.slot,
            seq: update.seq,
            meta: AccountMeta {
                data_size: meta.data_size,
            },
            expected,
            pages: BTreeMap::new(),
            received_at: Instant::now(),
        });

        if let Some(page) = update.page {
            entry.pages.insert(page.page_idx, page.data);
        }

        if entry.is_complete() {
            let entry = per_address.remove(&update.seq).expect("just inserted");
            if per_address.is_empty() {
                self.entries.remove(&address_hex);
            }
            return Some(entry.assemble(source));
        }

        if per_address.len() > self.max_pending_per_address {
            if let Some(&oldest_seq) = per_address
                .iter()
                .min_by_key(|(_, e)| e.received_at)
                .map(|(seq, _)| seq)
            {
                per_address.remove(&oldest_seq);
                self.evicted_quota += 1;
            }
        }
        if per_address.is_empty() {
            self.entries.remove(&address_hex);
        }

        None
    }

    /// Periodic cleanup tick (default every 10s): evicts entries older
    /// than `assembly_timeout`. Returns the count evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, per_address| {
            per_address.retain(|_, entry| {
                let expired = now.duration_since(entry.received_at) > self.assembly_timeout;
                if expired {
                    evicted += 1;
                }
                !expired
            });
            !per_address.is_empty()
        });
        self.evicted_timeout += evicted as u64;
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(idx: u32, byte: u8) -> AccountPage {
        AccountPage {
            page_idx: idx,
            data: vec![byte; PAGE_SIZE],
        }
    }

    fn update(seq: u64, page_opt: Option<AccountPage>, data_size: u64) -> AccountUpdate<&'static str> {
        AccountUpdate {
            address: "addrA",
            address_hex: "aa".to_string(),
            slot: 100,
            seq,
            is_delete: false,
            meta: Some(AccountMeta { data_size }),
            page: page_opt,
        }
    }

    #[test]
    fn assembles_out_of_order_pages_into_ascending_index_order() {
        // S5: 5 pages of 4096B for seq=1, dataSize=20480, delivered 2,0,4,1,3
        let mut assembler: PageAssembler<&'static str> = PageAssembler::default();
        let order = [2u32, 0, 4, 1, 3];
        let mut result = None;
        for idx in order {
            result = assembler.ingest(
                update(1, Some(page(idx, idx as u8)), 20480),
                UpdateSource::Stream,
            );
        }
        let state = result.expect("fifth page completes assembly");
        assert_eq!(state.data.len(), 20480);
        for (i, chunk) in state.data.chunks(PAGE_SIZE).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn delete_emits_immediately_without_assembly() {
        let mut assembler: PageAssembler<&'static str> = PageAssembler::default();
        let upd = AccountUpdate {
            address: "addrA",
            address_hex: "aa".to_string(),
            slot: 5,
            seq: 9,
            is_delete: true,
            meta: None,
            page: None,
        };
        let state = assembler.ingest(upd, UpdateSource::Stream).unwrap();
        assert!(state.is_delete);
        assert!(state.data.is_empty());
    }

    #[test]
    fn update_without_meta_is_ignored() {
        let mut assembler: PageAssembler<&'static str> = PageAssembler::default();
        let upd = AccountUpdate {
            address: "addrA",
            address_hex: "aa".to_string(),
            slot: 5,
            seq: 9,
            is_delete: false,
            meta: None,
            page: Some(page(0, 1)),
        };
        assert!(assembler.ingest(upd, UpdateSource::Stream).is_none());
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn redelivered_pages_overwrite() {
        let mut assembler: PageAssembler<&'static str> = PageAssembler::default();
        assembler.ingest(update(1, Some(page(0, 0xAA)), 8192), UpdateSource::Stream);
        assembler.ingest(update(1, Some(page(0, 0xBB)), 8192), UpdateSource::Stream);
        let state = assembler
            .ingest(update(1, Some(page(1, 0x01)), 8192), UpdateSource::Stream)
            .unwrap();
        assert_eq!(state.data[0], 0xBB);
    }

    #[test]
    fn quota_evicts_oldest_pending_per_address() {
        let mut assembler: PageAssembler<&'static str> = PageAssembler::new(
            DEFAULT_ASSEMBLY_TIMEOUT,
            2,
        );
        // three distinct, never-completing seqs for the same address
        assembler.ingest(update(1, None, 100_000), UpdateSource::Stream);
        assembler.ingest(update(2, None, 100_000), UpdateSource::Stream);
        assembler.ingest(update(3, None, 100_000), UpdateSource::Stream);
        assert_eq!(assembler.pending_len(), 2);
        assert_eq!(assembler.evicted_quota_count(), 1);
    }

    #[test]
    fn timeout_eviction_counts_and_removes() {
        let mut assembler: PageAssembler<&'static str> =
            PageAssembler::new(Duration::from_millis(1), 10);
        assembler.ingest(update(1, None, 100_000), UpdateSource::Stream);
        std::thread::sleep(Duration::from_millis(5));
        let evicted = assembler.evict_expired(Instant::now());
        assert_eq!(evicted, 1);
        assert_eq!(assembler.pending_len(), 0);
        assert_eq!(assembler.evicted_timeout_count(), 1);
    }
}
