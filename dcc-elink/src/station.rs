//! eLink command station

use crate::batch::ElinkCommandBatch;
use crate::config::ElinkConfig;
use crate::heartbeat;
use crate::link::Link;
use crate::messages;
use async_trait::async_trait;
use dcc_core::{nmra, ConnectionConfig, DccError, DccResult};
use dcc_station::{
    CommandBatch, CommandStation, CommandStationState, StateChange, StatisticsSnapshot,
};
use dcc_transport::{ByteStream, SerialSettings, SerialTransport, StreamAccessor};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Driver for the eLink USB command station
pub struct ElinkCommandStation {
    link: Arc<Link>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ElinkCommandStation {
    pub const DEVICE_ID: &'static str = "eLink";

    /// Open the eLink described by `connection_string`
    ///
    /// # Arguments
    /// * `connection_string` - e.g. `port=/dev/ttyACM0;debug=1`. See
    ///   [`ElinkConfig::apply_connection_config`] for driver keys.
    ///
    /// # Errors
    /// Configuration, connection and handshake errors all reject the open.
    pub async fn open(connection_string: &str) -> DccResult<Self> {
        let connection = ConnectionConfig::parse(connection_string)?;
        let mut config = ElinkConfig::default();
        config.apply_connection_config(&connection)?;
        let settings = SerialSettings::from_connection_config(&connection, config.trace_capacity)?;
        let stream = SerialTransport::open(&settings)?;
        Self::open_with_stream(stream, config).await
    }

    /// Run the handshake over an already open stream
    ///
    /// On failure the stream is closed before the error is returned.
    pub async fn open_with_stream(stream: ByteStream, config: ElinkConfig) -> DccResult<Self> {
        let link = Arc::new(Link::new(Self::DEVICE_ID, stream, config));
        link.machine.set_state(CommandStationState::Initialising);

        let result = {
            let _wire = link.lock_wire().await;
            link.handshake().await
        };
        let version = match result {
            Ok(version) => version,
            Err(e) => {
                log::error!("{}: handshake failed: {}", Self::DEVICE_ID, e);
                link.write_debug_trace().await;
                link.begin_close();
                link.machine.set_state(CommandStationState::ShuttingDown);
                if let Err(close_err) = link.stream.close().await {
                    log::warn!("{}: close after failed open: {}", Self::DEVICE_ID, close_err);
                }
                link.machine.set_state(CommandStationState::Uninitialised);
                return Err(e);
            }
        };

        let version = messages::version_string(version);
        log::info!(
            "{}: version {} ready on {}",
            Self::DEVICE_ID,
            version,
            link.stream.label()
        );
        let _ = link.version.set(version);
        link.machine.set_state(CommandStationState::Idle);

        let heartbeat = if link.config.heartbeat_interval_ms > 0 {
            Some(tokio::spawn(heartbeat::run(link.clone())))
        } else {
            None
        };

        Ok(Self {
            link,
            heartbeat: Mutex::new(heartbeat),
        })
    }

    pub fn config(&self) -> &ElinkConfig {
        &self.link.config
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.link.stats.snapshot()
    }

    /// The error that moved the station into `Error`, if any
    pub fn last_error(&self) -> Option<DccError> {
        self.link.machine.last_error()
    }

    fn take_heartbeat(&self) -> Option<JoinHandle<()>> {
        self.heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl CommandStation for ElinkCommandStation {
    fn device_id(&self) -> &str {
        Self::DEVICE_ID
    }

    fn version(&self) -> String {
        self.link.version.get().cloned().unwrap_or_default()
    }

    fn state(&self) -> CommandStationState {
        self.link.machine.state()
    }

    async fn close(&self) -> DccResult<()> {
        if !self.link.begin_close() {
            return Ok(());
        }
        log::info!("{}: closing {}", Self::DEVICE_ID, self.link.stream.label());
        self.link.machine.set_state(CommandStationState::ShuttingDown);
        self.link.shutdown.notify_one();
        self.link.write_debug_trace().await;

        let result = self.link.stream.close().await;
        if let Some(handle) = self.take_heartbeat() {
            handle.abort();
            let _ = handle.await;
        }
        self.link.machine.set_state(CommandStationState::Uninitialised);
        result
    }

    fn begin_command_batch(&self) -> DccResult<Box<dyn CommandBatch>> {
        let state = self.state();
        if state == CommandStationState::Error {
            if let Some(err) = self.link.machine.last_error() {
                return Err(err);
            }
        }
        if !state.is_ready() {
            self.link.machine.ensure_state(CommandStationState::Idle)?;
        }
        Ok(Box::new(ElinkCommandBatch::new(self.link.clone())))
    }

    async fn read_loco_cv(&self, cv: u16) -> DccResult<u8> {
        nmra::ensure_cv_number(cv)?;
        let exchange = self.link.begin_exchange().await?;
        let result = self.link.read_cv(cv as u8).await;
        let value = exchange.finish(result).await?;
        self.link.stats.increment_cv_reads();
        log::info!("{}: CV {} = {}", Self::DEVICE_ID, cv, value);
        Ok(value)
    }

    async fn write_loco_cv(&self, cv: u16, value: u16) -> DccResult<()> {
        nmra::ensure_cv_number(cv)?;
        nmra::ensure_byte(value)?;
        let exchange = self.link.begin_exchange().await?;
        let result = self.link.write_cv(cv as u8, value as u8).await;
        exchange.finish(result).await?;
        self.link.stats.increment_cv_writes();
        log::info!("{}: CV {} set to {}", Self::DEVICE_ID, cv, value);
        Ok(())
    }

    fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.link.machine.subscribe_state()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<DccError> {
        self.link.machine.subscribe_errors()
    }
}

impl Drop for ElinkCommandStation {
    fn drop(&mut self) {
        if self.link.begin_close() {
            self.link.machine.set_state(CommandStationState::ShuttingDown);
        }
        if let Some(handle) = self.take_heartbeat() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeElink;
    use dcc_station::FunctionAction;
    use std::time::Duration;

    const POLL: [u8; 3] = messages::STATUS_POLL;

    fn quiet_config() -> ElinkConfig {
        ElinkConfig {
            heartbeat_interval_ms: 0,
            response_timeout_ms: 500,
            ack_drain_timeout_ms: 50,
            trigger_release_delay_ms: 50,
            ..ElinkConfig::default()
        }
    }

    fn heartbeat_config(interval_ms: u64) -> ElinkConfig {
        ElinkConfig {
            heartbeat_interval_ms: interval_ms,
            ..quiet_config()
        }
    }

    async fn open(device: FakeElink) -> (ElinkCommandStation, crate::fake::FakeHandle) {
        open_with(device, quiet_config()).await
    }

    async fn open_with(
        device: FakeElink,
        config: ElinkConfig,
    ) -> (ElinkCommandStation, crate::fake::FakeHandle) {
        let (stream, handle) = device.spawn();
        let station = ElinkCommandStation::open_with_stream(stream, config)
            .await
            .unwrap();
        handle.clear();
        (station, handle)
    }

    async fn commit_speed(station: &ElinkCommandStation, address: u16, speed: u8, reverse: bool) {
        let mut batch = station.begin_command_batch().unwrap();
        batch.set_locomotive_speed(address, speed, reverse).unwrap();
        batch.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_initialised_device() {
        let (stream, handle) = FakeElink::new().spawn();
        let station = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .unwrap();

        assert_eq!(station.state(), CommandStationState::Idle);
        assert_eq!(station.device_id(), "eLink");
        assert!(station.version().ends_with("1.07"));
        assert_eq!(
            handle.received(),
            vec![POLL.to_vec(), messages::VERSION_REQUEST.to_vec()]
        );
    }

    #[tokio::test]
    async fn test_open_runs_key_exchange() {
        let device = FakeElink {
            initialised: false,
            version: 105,
            ..FakeElink::new()
        };
        let (stream, handle) = device.spawn();
        let station = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .unwrap();

        assert_eq!(station.version(), "1.05");
        let received = handle.received();
        assert_eq!(received.len(), 4);
        assert_eq!(received[1], messages::HANDSHAKE_KEY.to_vec());
        assert_eq!(&received[2][..6], &[0x35, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E]);
        assert!(messages::verify(&received[2]).is_ok());
    }

    #[tokio::test]
    async fn test_open_rejects_failed_handshake() {
        let device = FakeElink {
            initialised: false,
            reject_handshake: true,
            ..FakeElink::new()
        };
        let (stream, _handle) = device.spawn();
        let err = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Handshake failed");
    }

    #[tokio::test]
    async fn test_open_rejects_unsupported_version() {
        let device = FakeElink {
            version: 0x6A,
            ..FakeElink::new()
        };
        let (stream, _handle) = device.spawn();
        let err = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Unsupported eLink version encountered, version=106"
        );
    }

    #[tokio::test]
    async fn test_open_rejects_bad_checksum() {
        let device = FakeElink {
            corrupt_polls_after: Some(0),
            ..FakeElink::new()
        };
        let (stream, _handle) = device.spawn();
        let err = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DccError::Checksum { .. }));
        assert_eq!(err.to_string(), "Invalid checksum for received message");
    }

    #[tokio::test]
    async fn test_open_rejects_device_not_ready() {
        let device = FakeElink {
            poll_reply: Some(messages::frame(&[0x62, 0x00, 0x00])),
            ..FakeElink::new()
        };
        let (stream, _handle) = device.spawn();
        let err = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DccError::Protocol(_)));
        assert_eq!(
            err.to_string(),
            "Unexpected status response [62, 00, 00, 62]"
        );
    }

    #[tokio::test]
    async fn test_failed_open_writes_debug_trace() {
        let path = std::env::temp_dir().join(format!("elink-trace-{}.log", std::process::id()));
        let config = ElinkConfig {
            debug_trace_path: Some(path.clone()),
            ..quiet_config()
        };
        let device = FakeElink {
            corrupt_polls_after: Some(0),
            ..FakeElink::new()
        };
        let (stream, _handle) = device.spawn();
        assert!(ElinkCommandStation::open_with_stream(stream, config).await.is_err());

        let trace = tokio::fs::read_to_string(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        assert!(trace.contains("TX    21 24 05"));
        assert!(trace.contains("RX"));
    }

    #[tokio::test]
    async fn test_open_rejects_unrecognised_message() {
        let device = FakeElink {
            poll_reply: Some(vec![0x42]),
            ..FakeElink::new()
        };
        let (stream, _handle) = device.spawn();
        let err = ElinkCommandStation::open_with_stream(stream, quiet_config())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unrecognised message type, got 66");
    }

    #[tokio::test]
    async fn test_speed_frames() {
        let (station, handle) = open(FakeElink::new()).await;

        commit_speed(&station, 1234, 56, false).await;
        commit_speed(&station, 1234, 56, true).await;
        commit_speed(&station, 3, 127, true).await;

        assert_eq!(
            handle.received(),
            vec![
                vec![0xE4, 0x13, 0xC4, 0xD2, 0xB8, 0x59],
                POLL.to_vec(),
                vec![0xE4, 0x13, 0xC4, 0xD2, 0x38, 0xD9],
                POLL.to_vec(),
                vec![0xE4, 0x13, 0x00, 0x03, 0x7F, 0x8B],
                POLL.to_vec(),
            ]
        );
        assert_eq!(station.state(), CommandStationState::Idle);
        assert_eq!(station.statistics().commits, 3);
    }

    #[tokio::test]
    async fn test_invalid_speed_commands_never_reach_the_wire() {
        let (station, handle) = open(FakeElink::new()).await;
        let mut batch = station.begin_command_batch().unwrap();

        let err = batch.set_locomotive_speed(0, 0, false).unwrap_err();
        assert_eq!(err.to_string(), "Invalid locomotive address, address=0");
        let err = batch.set_locomotive_speed(10000, 0, false).unwrap_err();
        assert_eq!(err.to_string(), "Invalid long address, address=10000");
        let err = batch.set_locomotive_speed(3, 128, false).unwrap_err();
        assert!(matches!(err, DccError::Validation(_)));

        assert!(batch.is_empty());
        assert!(handle.received().is_empty());
        assert_eq!(station.state(), CommandStationState::Idle);
    }

    #[tokio::test]
    async fn test_command_acks_are_skipped() {
        let device = FakeElink {
            ack_commands: true,
            ..FakeElink::new()
        };
        let (station, handle) = open(device).await;

        let mut batch = station.begin_command_batch().unwrap();
        batch.set_locomotive_speed(3, 10, false).unwrap();
        batch.set_locomotive_speed(4, 20, false).unwrap();
        batch.commit().await.unwrap();

        assert_eq!(handle.received().len(), 3);
        assert_eq!(station.state(), CommandStationState::Idle);
    }

    #[tokio::test]
    async fn test_empty_batch_still_polls() {
        let (station, handle) = open(FakeElink::new()).await;
        let mut batch = station.begin_command_batch().unwrap();
        batch.commit().await.unwrap();
        assert_eq!(handle.received(), vec![POLL.to_vec()]);
    }

    #[tokio::test]
    async fn test_batch_commits_once() {
        let (station, _handle) = open(FakeElink::new()).await;
        let mut batch = station.begin_command_batch().unwrap();
        batch.set_locomotive_speed(3, 10, false).unwrap();
        batch.commit().await.unwrap();

        assert!(batch.commit().await.is_err());
        assert!(batch.set_locomotive_speed(3, 10, false).is_err());
        assert!(batch.write_raw(&[0x21, 0x24, 0x05]).is_err());
    }

    #[tokio::test]
    async fn test_write_raw_is_sent_verbatim() {
        let (station, handle) = open(FakeElink::new()).await;
        let mut batch = station.begin_command_batch().unwrap();
        assert!(batch.write_raw(&[]).is_err());
        batch.write_raw(&[0xE4, 0x13, 0x00, 0x03, 0x00, 0xF4]).unwrap();
        batch.commit().await.unwrap();
        assert_eq!(
            handle.received()[0],
            vec![0xE4, 0x13, 0x00, 0x03, 0x00, 0xF4]
        );
    }

    #[tokio::test]
    async fn test_function_latches_emit_full_bank() {
        let (station, handle) = open(FakeElink::new()).await;

        let mut batch = station.begin_command_batch().unwrap();
        batch
            .set_locomotive_function(3, 0, FunctionAction::LatchOn)
            .unwrap();
        batch
            .set_locomotive_function(3, 2, FunctionAction::LatchOn)
            .unwrap();
        batch
            .set_locomotive_function(3, 0, FunctionAction::LatchOff)
            .unwrap();
        batch.commit().await.unwrap();

        let received = handle.received();
        assert_eq!(received[0], messages::frame(&[0xE4, 0x20, 0x00, 0x03, 0x10, 0x01]));
        assert_eq!(received[1], messages::frame(&[0xE4, 0x20, 0x00, 0x03, 0x12, 0x01]));
        assert_eq!(received[2], messages::frame(&[0xE4, 0x20, 0x00, 0x03, 0x02, 0x00]));
    }

    #[tokio::test]
    async fn test_dropped_batch_leaves_functions_unchanged() {
        let (station, handle) = open(FakeElink::new()).await;

        let mut batch = station.begin_command_batch().unwrap();
        batch
            .set_locomotive_function(3, 0, FunctionAction::LatchOn)
            .unwrap();
        drop(batch);
        assert!(handle.received().is_empty());

        let mut batch = station.begin_command_batch().unwrap();
        batch
            .set_locomotive_function(3, 1, FunctionAction::LatchOn)
            .unwrap();
        batch.commit().await.unwrap();
        assert_eq!(
            handle.received()[0],
            vec![0xE4, 0x20, 0x00, 0x03, 0x01, 0x01, 0xC7]
        );
        assert!(station.link.functions().is_on(3, 1));
        assert!(!station.link.functions().is_on(3, 0));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_functions_unchanged() {
        let device = FakeElink {
            corrupt_polls_after: Some(1),
            ..FakeElink::new()
        };
        let (station, handle) = open(device).await;

        let mut batch = station.begin_command_batch().unwrap();
        batch
            .set_locomotive_function(3, 0, FunctionAction::LatchOn)
            .unwrap();
        batch
            .set_locomotive_function(3, 5, FunctionAction::Trigger)
            .unwrap();
        assert!(batch.commit().await.is_err());
        assert_eq!(station.state(), CommandStationState::Error);
        assert!(station.link.functions().is_empty());

        // no release is scheduled for a trigger that never reached the decoder
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.received().len(), 3);
    }

    #[tokio::test]
    async fn test_trigger_is_released_after_delay() {
        let (station, handle) = open(FakeElink::new()).await;

        let mut batch = station.begin_command_batch().unwrap();
        batch
            .set_locomotive_function(1234, 21, FunctionAction::Trigger)
            .unwrap();
        batch.commit().await.unwrap();
        assert_eq!(
            handle.received()[0],
            messages::frame(&[0xE4, 0x28, 0xC4, 0xD2, 0x01, 0x02])
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        let received = handle.received();
        assert_eq!(received.len(), 4);
        assert_eq!(
            received[2],
            messages::frame(&[0xE4, 0x28, 0xC4, 0xD2, 0x00, 0x00])
        );
        assert_eq!(received[3], POLL.to_vec());
    }

    #[tokio::test]
    async fn test_bad_checksum_during_commit_moves_to_error() {
        let device = FakeElink {
            corrupt_polls_after: Some(1),
            ..FakeElink::new()
        };
        let (station, _handle) = open(device).await;
        let mut errors = station.subscribe_errors();

        let mut batch = station.begin_command_batch().unwrap();
        batch.set_locomotive_speed(3, 10, false).unwrap();
        let err = batch.commit().await.unwrap_err();
        assert!(matches!(err, DccError::Checksum { .. }));

        assert_eq!(station.state(), CommandStationState::Error);
        assert!(matches!(errors.recv().await.unwrap(), DccError::Checksum { .. }));
        assert!(matches!(station.last_error(), Some(DccError::Checksum { .. })));

        let err = station.begin_command_batch().err().unwrap();
        assert!(matches!(err, DccError::Checksum { .. }));
    }

    #[tokio::test]
    async fn test_commits_are_serialised() {
        let device = FakeElink {
            ack_commands: true,
            reply_delay_ms: 20,
            ..FakeElink::new()
        };
        let (station, handle) = open(device).await;

        let mut first = station.begin_command_batch().unwrap();
        let mut second = station.begin_command_batch().unwrap();
        first.set_locomotive_speed(1, 1, false).unwrap();
        first.set_locomotive_speed(1, 2, false).unwrap();
        second.set_locomotive_speed(2, 1, false).unwrap();
        second.set_locomotive_speed(2, 2, false).unwrap();

        let (a, b) = tokio::join!(first.commit(), second.commit());
        a.unwrap();
        b.unwrap();

        let received = handle.received();
        assert_eq!(received.len(), 6);
        for exchange in received.chunks(3) {
            assert_eq!(exchange[0][3], exchange[1][3], "commits interleaved");
            assert_eq!(exchange[2], POLL.to_vec());
        }
    }

    #[tokio::test]
    async fn test_read_cv_with_repeated_acks() {
        for repeats in [3, 4] {
            let mut device = FakeElink {
                ack_repeats: repeats,
                ..FakeElink::new()
            };
            device.cvs.insert(1, 3);
            let (station, handle) = open(device).await;

            assert_eq!(station.read_loco_cv(1).await.unwrap(), 3);
            assert_eq!(station.state(), CommandStationState::Idle);
            assert_eq!(
                handle.received(),
                vec![
                    vec![0x22, 0x15, 0x01, 0x36],
                    messages::RESULTS_REQUEST.to_vec(),
                    messages::RESULTS_REQUEST.to_vec(),
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_read_cv_without_loco() {
        let device = FakeElink {
            loco_present: false,
            ..FakeElink::new()
        };
        let (station, _handle) = open(device).await;
        let err = station.read_loco_cv(1).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to read CV 1");
        assert_eq!(station.state(), CommandStationState::Error);
    }

    #[tokio::test]
    async fn test_read_cv_echo_mismatch() {
        let device = FakeElink {
            cv_echo_offset: 1,
            ..FakeElink::new()
        };
        let (station, _handle) = open(device).await;
        let err = station.read_loco_cv(8).await.unwrap_err();
        assert_eq!(err.to_string(), "Received value for CV 9 but expected CV 8");
    }

    #[tokio::test]
    async fn test_write_cv() {
        let (station, handle) = open(FakeElink::new()).await;
        station.write_loco_cv(3, 12).await.unwrap();
        assert_eq!(handle.received()[0], messages::frame(&[0x23, 0x16, 0x03, 0x0C]));
        assert_eq!(station.read_loco_cv(3).await.unwrap(), 12);
        assert_eq!(station.statistics().cv_writes, 1);
        assert_eq!(station.statistics().cv_reads, 1);
    }

    #[tokio::test]
    async fn test_write_cv_readback_mismatch() {
        let device = FakeElink {
            read_only_cvs: true,
            ..FakeElink::new()
        };
        let (station, _handle) = open(device).await;
        let err = station.write_loco_cv(3, 12).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to write CV 3");
    }

    #[tokio::test]
    async fn test_cv_validation() {
        let (station, handle) = open(FakeElink::new()).await;
        assert!(matches!(
            station.read_loco_cv(0).await.unwrap_err(),
            DccError::Validation(_)
        ));
        assert!(matches!(
            station.write_loco_cv(256, 1).await.unwrap_err(),
            DccError::Validation(_)
        ));
        assert!(matches!(
            station.write_loco_cv(1, 256).await.unwrap_err(),
            DccError::Validation(_)
        ));
        assert!(handle.received().is_empty());
        assert_eq!(station.state(), CommandStationState::Idle);
    }

    #[tokio::test]
    async fn test_heartbeat_polls_while_idle() {
        let (station, handle) = open_with(FakeElink::new(), heartbeat_config(40)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let polls = handle.received().iter().filter(|f| f[..] == POLL).count();
        assert!(polls >= 2, "only {polls} heartbeats");
        assert!(station.statistics().heartbeats >= 2);
        assert_eq!(station.state(), CommandStationState::Idle);
    }

    #[tokio::test]
    async fn test_heartbeat_rearmed_after_busy_period() {
        let device = FakeElink {
            reply_delay_ms: 150,
            ..FakeElink::new()
        };
        let (station, handle) = open_with(device, heartbeat_config(60)).await;

        // the exchange outlasts the heartbeat interval
        commit_speed(&station, 3, 10, false).await;
        let after_commit = handle.received().len();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let received = handle.received();
        assert!(
            received[after_commit..].iter().any(|f| f[..] == POLL),
            "no heartbeat after the busy period"
        );
    }

    #[tokio::test]
    async fn test_heartbeat_failure_moves_to_error() {
        let device = FakeElink {
            corrupt_polls_after: Some(1),
            ..FakeElink::new()
        };
        let (station, _handle) = open_with(device, heartbeat_config(40)).await;
        let mut errors = station.subscribe_errors();

        let err = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err.to_string(), "Invalid checksum for received message");
        assert_eq!(station.state(), CommandStationState::Error);
    }

    #[tokio::test]
    async fn test_heartbeat_rejects_device_not_ready() {
        let device = FakeElink {
            poll_reply: Some(messages::frame(&[0x62, 0x00, 0x00])),
            poll_reply_after: Some(1),
            ..FakeElink::new()
        };
        let (station, _handle) = open_with(device, heartbeat_config(40)).await;
        let mut errors = station.subscribe_errors();

        let err = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, DccError::Protocol(_)));
        assert_eq!(station.state(), CommandStationState::Error);
    }

    #[tokio::test]
    async fn test_close() {
        let (station, _handle) = open_with(FakeElink::new(), heartbeat_config(40)).await;
        let mut states = station.subscribe_state();

        station.close().await.unwrap();
        station.close().await.unwrap();
        assert_eq!(station.state(), CommandStationState::Uninitialised);

        assert_eq!(
            states.recv().await.unwrap().current,
            CommandStationState::ShuttingDown
        );
        assert_eq!(
            states.recv().await.unwrap().current,
            CommandStationState::Uninitialised
        );

        assert!(station.begin_command_batch().is_err());
        assert!(station.read_loco_cv(1).await.is_err());
    }

    #[tokio::test]
    async fn test_close_fails_waiting_commit() {
        let device = FakeElink {
            reply_delay_ms: 200,
            ..FakeElink::new()
        };
        let (station, _handle) = open(device).await;

        let mut batch = station.begin_command_batch().unwrap();
        batch.set_locomotive_speed(3, 1, false).unwrap();
        let commit = tokio::spawn(async move { batch.commit().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(station.state(), CommandStationState::Busy);
        station.close().await.unwrap();

        assert!(commit.await.unwrap().is_err());
        assert_eq!(station.state(), CommandStationState::Uninitialised);
    }
}
