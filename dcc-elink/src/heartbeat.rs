//! Periodic status poll keeping the eLink session alive

use crate::link::Link;
use dcc_station::CommandStationState;
use std::sync::Arc;

/// Heartbeat task body
///
/// Polls after every `heartbeat_interval` spent in `Idle`. The timer is
/// restarted whenever an exchange returns the station to `Idle`, and is not
/// armed at all while `Busy`. The first failed poll moves the station to
/// `Error` and ends the task.
pub(crate) async fn run(link: Arc<Link>) {
    let interval = link.config.heartbeat_interval();
    let device_id = link.machine.device_id().to_string();
    log::debug!("{device_id}: heartbeat started, interval {interval:?}");

    loop {
        tokio::select! {
            _ = link.shutdown.notified() => break,
            _ = link.rearm.notified() => continue,
            _ = tokio::time::sleep(interval) => {}
        }

        if link
            .machine
            .try_transition(CommandStationState::Idle, CommandStationState::Busy)
        {
            let exchange = link.enter_exchange().await;
            let result = link.poll_status().await;
            if exchange.finish(result).await.is_err() {
                break;
            }
            link.stats.increment_heartbeats();
            log::debug!("{device_id}: heartbeat acknowledged");
            continue;
        }

        if link.machine.state() != CommandStationState::Busy {
            break;
        }
        tokio::select! {
            _ = link.shutdown.notified() => break,
            _ = link.rearm.notified() => {}
        }
    }
    log::debug!("{device_id}: heartbeat stopped");
}
