//! Shared driver internals: the byte stream, the state machine and the
//! exclusive wire exchange

use crate::config::ElinkConfig;
use crate::functions::FunctionLatchBank;
use crate::messages::{self, COMMAND_ACK, INFO_RESPONSE_LEN, STATUS_POLL};
use bytes::Bytes;
use dcc_core::{DccError, DccResult};
use dcc_station::{CommandStationState, StateMachine, StationStatistics};
use dcc_transport::{ByteStream, StreamAccessor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use tokio::sync::Notify;

/// Everything an open eLink station, its batches and its heartbeat share
pub(crate) struct Link {
    pub(crate) machine: StateMachine,
    pub(crate) stream: ByteStream,
    pub(crate) config: ElinkConfig,
    pub(crate) stats: StationStatistics,
    /// Held for the whole of every request/response exchange
    wire: tokio::sync::Mutex<()>,
    functions: Mutex<FunctionLatchBank>,
    /// Signalled on every Busy -> Idle completion
    pub(crate) rearm: Notify,
    pub(crate) shutdown: Notify,
    closing: AtomicBool,
    pub(crate) version: OnceLock<String>,
}

impl Link {
    pub(crate) fn new(device_id: &str, stream: ByteStream, config: ElinkConfig) -> Self {
        Self {
            machine: StateMachine::new(device_id),
            stream,
            config,
            stats: StationStatistics::new(),
            wire: tokio::sync::Mutex::new(()),
            functions: Mutex::new(FunctionLatchBank::new()),
            rearm: Notify::new(),
            shutdown: Notify::new(),
            closing: AtomicBool::new(false),
            version: OnceLock::new(),
        }
    }

    pub(crate) fn functions(&self) -> MutexGuard<'_, FunctionLatchBank> {
        self.functions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Mark the link as closing
    ///
    /// # Returns
    /// `true` for the first caller only
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    /// Take the link for one exchange, waiting for any exchange in flight
    ///
    /// # Errors
    /// The stored error if the station is in `Error`, or a state error if it
    /// is closed while waiting
    pub(crate) async fn begin_exchange(&self) -> DccResult<Exchange<'_>> {
        self.machine
            .request_state_transition(CommandStationState::Idle, CommandStationState::Busy)
            .await?;
        Ok(self.enter_exchange().await)
    }

    /// Take the wire once the state is already `Busy`
    pub(crate) async fn enter_exchange(&self) -> Exchange<'_> {
        Exchange {
            link: self,
            _wire: self.wire.lock().await,
            finished: false,
        }
    }

    /// Lock the wire outside the state machine, used during the handshake
    pub(crate) async fn lock_wire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.wire.lock().await
    }

    fn complete(&self) {
        if self
            .machine
            .try_transition(CommandStationState::Busy, CommandStationState::Idle)
        {
            self.rearm.notify_one();
        }
    }

    fn abandon(&self, error: DccError) {
        if self.is_closing() {
            log::debug!("{}: {} (closing)", self.machine.device_id(), error);
            return;
        }
        self.machine.set_error(error);
    }

    async fn fail(&self, error: DccError) {
        if !self.is_closing() {
            self.write_debug_trace().await;
        }
        self.abandon(error);
    }

    /// Persist the debug trace if a destination is configured
    pub(crate) async fn write_debug_trace(&self) {
        let Some(path) = &self.config.debug_trace_path else {
            return;
        };
        if let Err(e) = self.stream.debug_snapshot(path).await {
            log::warn!(
                "{}: failed to write debug trace to {}: {}",
                self.machine.device_id(),
                path.display(),
                e
            );
        }
    }

    pub(crate) async fn send(&self, frame: &[u8]) -> DccResult<()> {
        log::trace!("{}: TX {:02X?}", self.machine.device_id(), frame);
        self.stream.write(frame).await?;
        self.stats.increment_frames_sent();
        Ok(())
    }

    /// Read the type byte of the next message
    pub(crate) async fn receive_head(&self, what: &str) -> DccResult<Bytes> {
        match self.stream.read(1, Some(self.config.response_timeout())).await? {
            Some(head) => Ok(head),
            None => {
                self.stats.increment_timeouts();
                Err(DccError::Timeout(what.to_string()))
            }
        }
    }

    /// Read the rest of a frame whose first bytes are `prefix`, and verify it
    pub(crate) async fn receive_frame(
        &self,
        prefix: &[u8],
        size: usize,
        what: &str,
    ) -> DccResult<Bytes> {
        let timeout = self.config.response_timeout();
        let Some(frame) = self.stream.concat_read(prefix, size, Some(timeout)).await? else {
            self.stats.increment_timeouts();
            return Err(DccError::Timeout(what.to_string()));
        };
        self.check_frame(frame)
    }

    pub(crate) fn check_frame(&self, frame: Bytes) -> DccResult<Bytes> {
        log::trace!("{}: RX {:02X?}", self.machine.device_id(), &frame[..]);
        if let Err(e) = messages::verify(&frame) {
            self.stats.increment_checksum_errors();
            return Err(e);
        }
        self.stats.increment_frames_received();
        Ok(frame)
    }

    /// Send a status poll and validate the reply
    ///
    /// Command acknowledgements still queued from earlier frames are skipped.
    pub(crate) async fn poll_status(&self) -> DccResult<()> {
        self.send(&STATUS_POLL).await?;
        loop {
            let head = self.receive_head("status").await?;
            match head[0] {
                messages::TYPE_INFO => {
                    let info = self
                        .receive_frame(&head, INFO_RESPONSE_LEN - 1, "status")
                        .await?;
                    return messages::expect_ready(&info);
                }
                messages::TYPE_HANDSHAKE_STATUS => {
                    let status = self
                        .receive_frame(&head, messages::HANDSHAKE_STATUS_LEN - 1, "status")
                        .await?;
                    if status[..] != COMMAND_ACK {
                        return Err(DccError::protocol("eLink is no longer initialised"));
                    }
                    log::trace!("{}: command acknowledged", self.machine.device_id());
                }
                other => return Err(messages::unrecognised(other)),
            }
        }
    }
}

/// Exclusive use of the wire for one request/response exchange
///
/// Created with the station in `Busy`. [`finish`](Self::finish) returns the
/// station to `Idle` and rearms the heartbeat, or moves it to `Error`.
/// An exchange dropped before `finish` leaves the wire in an unknown state
/// and moves the station to `Error`.
pub(crate) struct Exchange<'a> {
    link: &'a Link,
    _wire: tokio::sync::MutexGuard<'a, ()>,
    finished: bool,
}

impl Exchange<'_> {
    pub(crate) async fn finish<T>(mut self, result: DccResult<T>) -> DccResult<T> {
        self.finished = true;
        match result {
            Ok(value) => {
                self.link.complete();
                Ok(value)
            }
            Err(e) => {
                self.link.fail(e.clone()).await;
                Err(e)
            }
        }
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.link
                .abandon(DccError::protocol("Exchange cancelled before completion"));
        }
    }
}
