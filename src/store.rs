// src/store.rs - Append-only reading store with a latest-per-vital index
use crate::reading::{Reading, VitalType};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Change notification emitted for every appended reading
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// The reading that was appended
    pub reading: Arc<Reading>,

    /// Position of the reading in the append log (1-based)
    pub sequence: u64,

    /// Whether the reading displaced the previous latest reading of its
    /// vital type. Back-filled readings older than the current latest do not.
    pub became_latest: bool,
}

/// Shared, append-only store of vital-sign readings
///
/// The store is owned by the logging side of the application; the monitoring
/// engine only reads it and subscribes to its change events. Besides the
/// full log it keeps a small derived index of the most recent reading per
/// vital type, which is all the classifier ever needs.
///
/// # Examples
///
/// ```rust
/// use vitalguard::{Reading, ReadingStore, VitalType};
///
/// let store = ReadingStore::new();
/// store.append(Reading::spo2(97.0));
/// store.append(Reading::spo2(92.0));
///
/// assert_eq!(store.len(), 2);
/// assert_eq!(store.latest(VitalType::SpO2).unwrap().value(), Some(92.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReadingStore {
    log: Arc<RwLock<Vec<Arc<Reading>>>>,
    latest: Arc<DashMap<VitalType, Arc<Reading>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<StoreEvent>>>>,
}

impl ReadingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading and notify subscribers
    ///
    /// "Most recent" is decided by observation time; on equal timestamps
    /// the later append wins. Malformed readings are kept in the log but
    /// never enter the latest index.
    pub fn append(&self, reading: Reading) -> StoreEvent {
        let reading = Arc::new(reading);

        let event = {
            let mut log = self.log.write();
            log.push(Arc::clone(&reading));
            let sequence = log.len() as u64;

            let became_latest = reading.value().is_some()
                && match self.latest.get(&reading.vital_type()) {
                    Some(current) => reading.timestamp() >= current.timestamp(),
                    None => true,
                };
            if became_latest {
                self.latest.insert(reading.vital_type(), Arc::clone(&reading));
            }

            StoreEvent {
                reading,
                sequence,
                became_latest,
            }
        };

        trace!(
            "Appended reading #{} {} (latest: {})",
            event.sequence,
            event.reading,
            event.became_latest
        );

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        event
    }

    /// Subscribe to change events for all subsequent appends
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock();
        subscribers.push(tx);
        debug!("Reading store subscriber added ({} total)", subscribers.len());
        rx
    }

    /// Most recent reading of one vital type
    pub fn latest(&self, vital: VitalType) -> Option<Arc<Reading>> {
        self.latest.get(&vital).map(|entry| Arc::clone(entry.value()))
    }

    /// Most recent reading of every vital type seen so far, ordered by type
    pub fn latest_snapshot(&self) -> Vec<Arc<Reading>> {
        let mut latest: Vec<Arc<Reading>> = self
            .latest
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        latest.sort_by_key(|reading| reading.vital_type());
        latest
    }

    /// The `n` most recent readings across all vital types, newest first
    ///
    /// On equal timestamps the later append comes first. Only the `n`
    /// selected readings are cloned.
    pub fn recent(&self, n: usize) -> Vec<Arc<Reading>> {
        let mut top: Vec<Arc<Reading>> = Vec::with_capacity(n);
        if n == 0 {
            return top;
        }

        let log = self.log.read();
        for reading in log.iter().rev() {
            // walking newest append first, so ties stay behind what is already kept
            let pos = top.partition_point(|kept| kept.timestamp() >= reading.timestamp());
            if pos < n {
                top.insert(pos, Arc::clone(reading));
                top.truncate(n);
            }
        }
        top
    }

    /// Copy of the full append log, oldest first
    pub fn snapshot(&self) -> Vec<Arc<Reading>> {
        self.log.read().clone()
    }

    /// Number of readings ever appended
    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }
}
