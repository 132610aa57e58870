//! eLink command batch

use crate::functions::PendingLatches;
use crate::link::Link;
use crate::messages::{self, DIRECTION_FORWARD, FUNCTION_GROUP, LOCO_COMMAND, SPEED_128};
use async_trait::async_trait;
use dcc_core::{nmra, DccError, DccResult};
use dcc_station::{CommandBatch, FunctionAction};
use std::sync::Arc;

/// Commands queued for one exchange with an eLink
pub struct ElinkCommandBatch {
    link: Arc<Link>,
    frames: Vec<Vec<u8>>,
    /// Function states recorded once the commit succeeds
    latches: PendingLatches,
    /// Triggered functions to switch off after the commit
    releases: Vec<(u16, u8)>,
    committed: bool,
}

/// Wire code of a function action
pub fn action_code(action: FunctionAction) -> u8 {
    match action {
        FunctionAction::LatchOff => 0x00,
        FunctionAction::LatchOn => 0x01,
        FunctionAction::Trigger => 0x02,
    }
}

/// Address bytes of a locomotive command
///
/// Addresses below 100 are sent as `[0x00, address]`, the others in NMRA
/// long form.
pub fn encode_address(address: u16) -> DccResult<[u8; 2]> {
    if address == 0 {
        return Err(DccError::validation(format!(
            "Invalid locomotive address, address={address}"
        )));
    }
    if address < nmra::MIN_LONG_ADDRESS {
        return Ok([0x00, address as u8]);
    }
    let mut bytes = [0u8; 2];
    nmra::encode_long_address(address, &mut bytes, 0)?;
    Ok(bytes)
}

impl ElinkCommandBatch {
    pub(crate) fn new(link: Arc<Link>) -> Self {
        Self {
            link,
            frames: Vec::new(),
            latches: PendingLatches::new(),
            releases: Vec::new(),
            committed: false,
        }
    }

    fn ensure_open(&self) -> DccResult<()> {
        if self.committed {
            return Err(DccError::protocol("Command batch has already been committed"));
        }
        Ok(())
    }

    /// Frames queued so far
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }
}

#[async_trait]
impl CommandBatch for ElinkCommandBatch {
    fn set_locomotive_speed(&mut self, address: u16, speed: u8, reverse: bool) -> DccResult<()> {
        self.ensure_open()?;
        let [hi, lo] = encode_address(address)?;
        nmra::ensure_speed(speed)?;
        let direction = if reverse { 0 } else { DIRECTION_FORWARD };
        self.frames.push(messages::frame(&[
            LOCO_COMMAND,
            SPEED_128,
            hi,
            lo,
            speed | direction,
        ]));
        Ok(())
    }

    fn set_locomotive_function(
        &mut self,
        address: u16,
        function: u8,
        action: FunctionAction,
    ) -> DccResult<()> {
        self.ensure_open()?;
        let [hi, lo] = encode_address(address)?;
        let current = self.link.functions().state(address);
        let (bank, mask) = self
            .latches
            .stage(current, address, function, action.is_on())?;
        self.frames.push(messages::frame(&[
            LOCO_COMMAND,
            FUNCTION_GROUP | bank.offset,
            hi,
            lo,
            mask,
            action_code(action),
        ]));
        if action == FunctionAction::Trigger {
            self.releases.push((address, function));
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> DccResult<()> {
        self.ensure_open()?;
        if data.is_empty() {
            return Err(DccError::validation("Raw command must not be empty"));
        }
        self.frames.push(data.to_vec());
        Ok(())
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    async fn commit(&mut self) -> DccResult<()> {
        self.ensure_open()?;
        self.committed = true;
        let frames = std::mem::take(&mut self.frames);

        let exchange = self.link.begin_exchange().await?;
        let result = send_all(&self.link, &frames).await;
        exchange.finish(result).await?;
        self.link.stats.increment_commits();

        let latches = std::mem::take(&mut self.latches);
        if !latches.is_empty() {
            self.link.functions().commit(latches);
        }

        for (address, function) in self.releases.drain(..) {
            schedule_release(self.link.clone(), address, function);
        }
        Ok(())
    }
}

async fn send_all(link: &Link, frames: &[Vec<u8>]) -> DccResult<()> {
    for frame in frames {
        link.send(frame).await?;
    }
    link.poll_status().await
}

/// Switch a triggered function off again after the release delay
fn schedule_release(link: Arc<Link>, address: u16, function: u8) {
    tokio::spawn(async move {
        tokio::time::sleep(link.config.trigger_release_delay()).await;
        if link.is_closing() {
            return;
        }
        let mut batch = ElinkCommandBatch::new(link.clone());
        let result = match batch.set_locomotive_function(address, function, FunctionAction::LatchOff) {
            Ok(()) => batch.commit().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::warn!(
                "{}: failed to release F{} of loco {}: {}",
                link.machine.device_id(),
                function,
                address,
                e
            );
        }
    });
}
