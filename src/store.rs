//! Per-session timestamp storage
//!
//! Everything a ranging session collects ends up here: when each poll was
//! sent, and what each anchor reported back. The containers have a fixed
//! capacity and are reused for every session.

use heapless::Vec;

use crate::{
    codec::AnchorFinal,
    configs::{MAX_ANCHOR_RESPONSES, MAX_BROADCASTS},
    mac,
    time::Instant,
};

/// What one anchor reported during a session
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnchorResponseRecord {
    /// The anchor's extended address
    pub anchor: mac::ExtendedAddress,
    /// Arrival times of the polls in anchor time, as reported by the anchor
    pub toas: Vec<u64, MAX_BROADCASTS>,
    /// When the anchor sent its final message, in anchor time
    pub final_tx_time: Instant,
    /// When the tag received the final message, in tag time
    pub final_rx_time: Instant,
}

impl AnchorResponseRecord {
    /// Creates a record from a decoded final message and its arrival time
    pub fn from_final(message: &AnchorFinal, rx_time: Instant) -> Self {
        AnchorResponseRecord {
            anchor: message.header.source,
            toas: message.toas.clone(),
            final_tx_time: Instant::from_truncated(message.time_sent),
            final_rx_time: rx_time,
        }
    }
}

/// The anchor responses of one session, in arrival order
#[derive(Clone, Debug)]
pub struct AnchorResponseStore {
    records: Vec<AnchorResponseRecord, MAX_ANCHOR_RESPONSES>,
    limit: usize,
}

impl AnchorResponseStore {
    /// Creates an empty store that accepts up to `limit` records
    ///
    /// `limit` is capped at [`MAX_ANCHOR_RESPONSES`].
    pub fn new(limit: usize) -> Self {
        AnchorResponseStore {
            records: Vec::new(),
            limit: limit.min(MAX_ANCHOR_RESPONSES),
        }
    }

    /// Appends a record
    ///
    /// Hands the record back if the store is full. Existing records are never
    /// touched.
    pub fn push(&mut self, record: AnchorResponseRecord) -> Result<(), AnchorResponseRecord> {
        if self.is_full() {
            return Err(record);
        }
        self.records.push(record)
    }

    /// Number of records in the store
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no anchor has responded yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the store reached its limit
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.limit
    }

    /// The maximum number of records this store accepts
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The record at `index`, in arrival order
    pub fn get(&self, index: usize) -> Option<&AnchorResponseRecord> {
        self.records.get(index)
    }

    /// Iterates over all records, in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &AnchorResponseRecord> {
        self.records.iter()
    }

    /// Forgets all records
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// When each poll of a session was sent, in tag time
#[derive(Clone, Debug)]
pub struct BroadcastSendTimeLog {
    times: [Instant; MAX_BROADCASTS],
    broadcasts: usize,
    // Bit `i` is set once slot `i` was written this session.
    written: u32,
    next: usize,
}

impl BroadcastSendTimeLog {
    /// Creates an empty log for sessions with `broadcasts` polls
    ///
    /// `broadcasts` is capped at [`MAX_BROADCASTS`].
    pub fn new(broadcasts: usize) -> Self {
        BroadcastSendTimeLog {
            times: [Instant::default(); MAX_BROADCASTS],
            broadcasts: broadcasts.min(MAX_BROADCASTS),
            written: 0,
            next: 0,
        }
    }

    /// Records the send time of the poll with the given subsequence index
    ///
    /// Each slot is written at most once per session, in increasing order. A
    /// poll that failed to start leaves its slot empty.
    /// Returns `false` and leaves the log alone if `subsequence` is out of
    /// range or not past the last slot written.
    pub fn record(&mut self, subsequence: usize, time: Instant) -> bool {
        if subsequence < self.next || subsequence >= self.broadcasts {
            return false;
        }

        self.times[subsequence] = time;
        self.written |= 1 << subsequence;
        self.next = subsequence + 1;
        true
    }

    /// The send time of the poll with the given subsequence index, if it was
    /// recorded this session
    pub fn get(&self, subsequence: usize) -> Option<Instant> {
        if subsequence < self.broadcasts && self.written & (1 << subsequence) != 0 {
            Some(self.times[subsequence])
        } else {
            None
        }
    }

    /// All `N` slots of the log
    ///
    /// Slots not written this session read as zero.
    pub fn as_slice(&self) -> &[Instant] {
        &self.times[..self.broadcasts]
    }

    /// Number of send times recorded this session
    pub fn recorded(&self) -> usize {
        self.written.count_ones() as usize
    }

    /// Whether every poll of the session has a send time
    pub fn is_complete(&self) -> bool {
        self.recorded() == self.broadcasts
    }

    /// Zeroes all slots
    pub fn clear(&mut self) {
        self.times = [Instant::default(); MAX_BROADCASTS];
        self.written = 0;
        self.next = 0;
    }
}

/// Everything collected during one ranging session
///
/// This is what range computation gets to see.
#[derive(Clone, Debug)]
pub struct SessionData {
    /// When each poll was sent
    pub send_times: BroadcastSendTimeLog,
    /// What the anchors reported
    pub responses: AnchorResponseStore,
}

impl SessionData {
    /// Creates empty session storage
    pub fn new(broadcasts: usize, max_anchor_responses: usize) -> Self {
        SessionData {
            send_times: BroadcastSendTimeLog::new(broadcasts),
            responses: AnchorResponseStore::new(max_anchor_responses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(anchor: u64) -> AnchorResponseRecord {
        AnchorResponseRecord {
            anchor: mac::ExtendedAddress(anchor),
            toas: Vec::from_slice(&[1, 2, 3]).unwrap(),
            final_tx_time: Instant::from_truncated(4),
            final_rx_time: Instant::new(5).unwrap(),
        }
    }

    #[test]
    fn store_drops_records_beyond_limit() {
        let mut store = AnchorResponseStore::new(2);

        assert!(store.push(record(1)).is_ok());
        assert!(store.push(record(2)).is_ok());
        assert_eq!(store.push(record(3)), Err(record(3)));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0), Some(&record(1)));
        assert_eq!(store.get(1), Some(&record(2)));
    }

    #[test]
    fn store_limit_is_capped_by_capacity() {
        let store = AnchorResponseStore::new(MAX_ANCHOR_RESPONSES + 5);
        assert_eq!(store.limit(), MAX_ANCHOR_RESPONSES);
    }

    #[test]
    fn cleared_store_accepts_records_again() {
        let mut store = AnchorResponseStore::new(1);
        store.push(record(1)).unwrap();
        assert!(store.is_full());

        store.clear();

        assert!(store.is_empty());
        assert!(store.push(record(2)).is_ok());
    }

    #[test]
    fn send_times_are_written_in_order() {
        let mut log = BroadcastSendTimeLog::new(3);

        assert!(log.record(0, Instant::new(10).unwrap()));
        assert!(!log.record(0, Instant::new(11).unwrap()));
        assert!(log.record(1, Instant::new(20).unwrap()));
        assert!(log.record(2, Instant::new(30).unwrap()));
        assert!(!log.record(3, Instant::new(40).unwrap()));

        assert!(log.is_complete());
        assert_eq!(log.get(0), Instant::new(10));
        assert_eq!(log.as_slice().len(), 3);
    }

    #[test]
    fn skipped_slot_stays_empty() {
        let mut log = BroadcastSendTimeLog::new(3);

        assert!(log.record(1, Instant::new(20).unwrap()));
        assert!(!log.record(0, Instant::new(10).unwrap()));

        assert_eq!(log.get(0), None);
        assert_eq!(log.get(1), Instant::new(20));
        assert_eq!(log.recorded(), 1);
        assert!(!log.is_complete());
    }

    #[test]
    fn cleared_log_reads_as_zero() {
        let mut log = BroadcastSendTimeLog::new(2);
        log.record(0, Instant::new(10).unwrap());

        log.clear();

        assert_eq!(log.recorded(), 0);
        assert_eq!(log.get(0), None);
        assert!(log.as_slice().iter().all(|time| time.value() == 0));
    }
}
