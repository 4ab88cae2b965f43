use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use super::sounding::TransferRecord;

/// The producer side of a [`TileChannel`].
///
/// Each reader holds one per tile and drops them all when it is done. Records from a
/// single sender arrive in the order they were sent.
#[derive(Debug, Clone)]
pub struct TileSender {
    tile: usize,
    tx: Sender<TransferRecord>,
}

impl TileSender {
    /// Enqueue a record, blocking while the channel is full.
    ///
    /// Returns the record back if the consumer side is gone.
    pub fn send(&self, record: TransferRecord) -> Result<(), TransferRecord> {
        self.tx.send(record).map_err(|e| e.into_inner())
    }

    pub fn tile(&self) -> usize {
        self.tile
    }
}

/// A bounded, multi-producer single-consumer queue carrying records to one tile's writer.
///
/// The channel never holds more than `capacity` records; producers block rather than grow
/// memory. Shutdown is a single signal: once [`TileChannel::close`] has been called and
/// every [`TileSender`] has been dropped, [`TileChannel::recv`] drains what is left and
/// then returns None.
#[derive(Debug)]
pub struct TileChannel {
    tile: usize,
    capacity: usize,
    tx: Mutex<Option<Sender<TransferRecord>>>,
    rx: Receiver<TransferRecord>,
}

impl TileChannel {
    pub fn new(tile: usize, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tile,
            capacity,
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Hand out a producer handle. None once the channel has been closed
    pub fn sender(&self) -> Option<TileSender> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| TileSender {
                tile: self.tile,
                tx: tx.clone(),
            })
    }

    /// Block until a record is available, or return None once the channel is closed, every
    /// producer is gone, and nothing is left queued.
    pub fn recv(&self) -> Option<TransferRecord> {
        self.rx.recv().ok()
    }

    /// Stop handing out senders. Idempotent.
    ///
    /// Must only be called once no new producer will be created; records already queued
    /// are still delivered by [`TileChannel::recv`].
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Throw away whatever is queued without blocking. Used when the writer has died, so
    /// that producers stuck on a full channel can move on and see the abort flag.
    pub fn discard_pending(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Number of records waiting for the writer
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tile(&self) -> usize {
        self.tile
    }
}
