//! Service mode CV programming
//!
//! A CV request is acknowledged in two phases. The first results request is
//! answered with "busy" while the decoder is being programmed, the second
//! with the value. Each acknowledgement may be repeated a variable number of
//! times (3 or 4 have been observed), so every phase is drained until the
//! device goes quiet before the next request is sent.

use crate::link::Link;
use crate::messages::{
    self, CV_READ, CV_VALUE_ID, CV_VALUE_LEN, CV_WRITE, NO_LOCO, PROGRAMMING_ACK,
    PROGRAMMING_BUSY, RESULTS_REQUEST, SERVICE_STATUS_LEN,
};
use dcc_core::{DccError, DccResult};
use dcc_transport::StreamAccessor;

impl Link {
    /// Read `cv`, which must already be validated
    pub(crate) async fn read_cv(&self, cv: u8) -> DccResult<u8> {
        let failure = || DccError::protocol(format!("Failed to read CV {cv}"));
        self.send(&messages::frame(&[CV_READ[0], CV_READ[1], cv]))
            .await?;
        self.fetch_cv(cv, &failure).await
    }

    /// Write `value` to `cv` and confirm it by reading it back
    pub(crate) async fn write_cv(&self, cv: u8, value: u8) -> DccResult<()> {
        let failure = || DccError::protocol(format!("Failed to write CV {cv}"));
        self.send(&messages::frame(&[CV_WRITE[0], CV_WRITE[1], cv, value]))
            .await?;
        let readback = self.fetch_cv(cv, &failure).await?;
        if readback != value {
            log::warn!(
                "{}: CV {} reads back {} after writing {}",
                self.machine.device_id(),
                cv,
                readback,
                value
            );
            return Err(failure());
        }
        Ok(())
    }

    async fn fetch_cv(&self, cv: u8, failure: impl Fn() -> DccError) -> DccResult<u8> {
        self.drain_acks(&PROGRAMMING_ACK, &failure).await?;
        self.send(&RESULTS_REQUEST).await?;
        self.drain_acks(&PROGRAMMING_BUSY, &failure).await?;
        self.send(&RESULTS_REQUEST).await?;

        let head = self.receive_head("CV value").await?;
        match head[0] {
            messages::TYPE_CV_VALUE => {
                let frame = self.receive_frame(&head, CV_VALUE_LEN - 1, "CV value").await?;
                if frame[1] != CV_VALUE_ID {
                    return Err(DccError::protocol(format!(
                        "Unexpected programming response {:02X?}",
                        &frame[..]
                    )));
                }
                if frame[2] != cv {
                    return Err(DccError::protocol(format!(
                        "Received value for CV {} but expected CV {}",
                        frame[2], cv
                    )));
                }
                Ok(frame[3])
            }
            messages::TYPE_SERVICE_STATUS => {
                let frame = self
                    .receive_frame(&head, SERVICE_STATUS_LEN - 1, "CV value")
                    .await?;
                Err(unexpected_ack(&frame, &failure))
            }
            other => Err(messages::unrecognised(other)),
        }
    }

    /// Consume one or more copies of `ack`
    ///
    /// The first copy must arrive within the response timeout; further
    /// copies are read until none arrives within the drain timeout.
    async fn drain_acks(&self, ack: &[u8], failure: &impl Fn() -> DccError) -> DccResult<()> {
        let first = self
            .receive_frame(&[], SERVICE_STATUS_LEN, "programming acknowledgement")
            .await?;
        if first[..] != *ack {
            return Err(unexpected_ack(&first, failure));
        }

        let mut copies = 1;
        while let Some(frame) = self
            .stream
            .read(SERVICE_STATUS_LEN, Some(self.config.ack_drain_timeout()))
            .await?
        {
            let frame = self.check_frame(frame)?;
            if frame[..] != *ack {
                return Err(unexpected_ack(&frame, failure));
            }
            copies += 1;
        }
        log::debug!(
            "{}: acknowledgement {:02X?} received {} times",
            self.machine.device_id(),
            ack,
            copies
        );
        Ok(())
    }
}

fn unexpected_ack(frame: &[u8], failure: &impl Fn() -> DccError) -> DccError {
    if frame == NO_LOCO {
        return failure();
    }
    DccError::protocol(format!("Unexpected programming response {frame:02X?}"))
}
