//! Dead list for retired async state
//!
//! A buffer's async state can only be released once no reader thread is
//! touching its stream. Retiring a state stops its stream; if a read was
//! still in flight the state is parked here until the stream reports
//! quiescence on the notice channel, and [`DeadList::reclaim`] (run at the
//! start of every system update) releases it on the owner thread.

use crate::playback::buffer::AsyncState;
use crate::stream::{StreamId, StreamNotice};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

pub struct DeadList {
    notices_tx: UnboundedSender<StreamNotice>,
    notices_rx: UnboundedReceiver<StreamNotice>,
    parked: HashMap<StreamId, AsyncState>,
    retired: u64,
    released: u64,
}

impl Default for DeadList {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadList {
    pub fn new() -> Self {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        Self {
            notices_tx,
            notices_rx,
            parked: HashMap::new(),
            retired: 0,
            released: 0,
        }
    }

    /// Channel that packet streams report quiescence on
    pub fn sender(&self) -> UnboundedSender<StreamNotice> {
        self.notices_tx.clone()
    }

    /// Stop `state` and release it now or once its in-flight read completes
    pub fn retire(&mut self, state: AsyncState) {
        self.retired += 1;
        let id = state.stream_id();
        if state.stop() {
            trace!("{}: retired while idle, released", id);
            self.released += 1;
        } else {
            debug!("{}: retired with read in flight, parked", id);
            self.parked.insert(id, state);
        }
    }

    /// Release parked states whose streams have gone quiet
    ///
    /// Returns how many were released.
    pub fn reclaim(&mut self) -> usize {
        let mut count = 0;
        while let Ok(notice) = self.notices_rx.try_recv() {
            let StreamNotice::Quiesced(id) = notice;
            if self.parked.remove(&id).is_some() {
                trace!("{}: quiesced, released", id);
                count += 1;
            }
        }
        self.released += count as u64;
        count
    }

    /// States still waiting for their stream to go quiet
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    pub fn retired(&self) -> u64 {
        self.retired
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}
