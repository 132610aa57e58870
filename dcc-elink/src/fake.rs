//! Scripted eLink device on the far end of an in-memory pipe

use crate::messages::{
    self, COMMAND_ACK, HANDSHAKE_KEY, INFO_RESPONSE, NO_LOCO, PROGRAMMING_ACK, PROGRAMMING_BUSY,
    RESULTS_REQUEST, STATUS_POLL, VERSION_REQUEST,
};
use dcc_transport::{ByteStream, ByteStreamOptions};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const CHALLENGE: [u8; 6] = [0x35, 0x01, 0x02, 0x03, 0x04, 0x05];

/// Behaviour of the fake device
#[derive(Debug, Clone)]
pub(crate) struct FakeElink {
    pub initialised: bool,
    pub reject_handshake: bool,
    pub version: u8,
    /// Reply to status polls with these bytes instead
    pub poll_reply: Option<Vec<u8>>,
    /// Only use `poll_reply` after this many polls
    pub poll_reply_after: Option<usize>,
    /// Corrupt the checksum of every status reply after this many polls
    pub corrupt_polls_after: Option<usize>,
    /// Acknowledge each locomotive command
    pub ack_commands: bool,
    pub ack_repeats: usize,
    pub loco_present: bool,
    pub read_only_cvs: bool,
    pub cv_echo_offset: u8,
    pub cvs: HashMap<u8, u8>,
    pub reply_delay_ms: u64,
}

/// Frames the fake device has received
#[derive(Clone)]
pub(crate) struct FakeHandle {
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeHandle {
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.received.lock().unwrap().clear();
    }
}

#[derive(Default)]
struct Session {
    polls: usize,
    cv: u8,
    results_requests: usize,
}

impl FakeElink {
    pub fn new() -> Self {
        Self {
            initialised: true,
            reject_handshake: false,
            version: 107,
            poll_reply: None,
            poll_reply_after: None,
            corrupt_polls_after: None,
            ack_commands: false,
            ack_repeats: 3,
            loco_present: true,
            read_only_cvs: false,
            cv_echo_offset: 0,
            cvs: HashMap::new(),
            reply_delay_ms: 0,
        }
    }

    /// Start the device and return the driver's end of the pipe
    pub fn spawn(self) -> (ByteStream, FakeHandle) {
        let (client, device) = tokio::io::duplex(1024);
        let handle = FakeHandle {
            received: Arc::new(Mutex::new(Vec::new())),
        };
        tokio::spawn(self.run(device, handle.clone()));
        let stream = ByteStream::new(
            client,
            ByteStreamOptions {
                label: "fake-elink".to_string(),
                trace_capacity: Some(32),
            },
        );
        (stream, handle)
    }

    async fn run(mut self, device: DuplexStream, handle: FakeHandle) {
        let (mut rx, mut tx) = tokio::io::split(device);
        let mut session = Session::default();
        loop {
            let mut frame = vec![0u8; 2];
            if rx.read_exact(&mut frame).await.is_err() {
                break;
            }
            let len = match (frame[0], frame[1]) {
                (0x21, _) => 3,
                (0x22, _) => 4,
                (0x23, _) => 5,
                (0x3A, _) => HANDSHAKE_KEY.len(),
                (0x35, _) => messages::HANDSHAKE_EXCHANGE_LEN,
                (0xE4, 0x13) => 6,
                (0xE4, _) => 7,
                _ => 2,
            };
            frame.resize(len, 0);
            if rx.read_exact(&mut frame[2..]).await.is_err() {
                break;
            }
            handle.received.lock().unwrap().push(frame.clone());

            let reply = self.respond(&frame, &mut session);
            if reply.is_empty() {
                continue;
            }
            if self.reply_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.reply_delay_ms)).await;
            }
            if tx.write_all(&reply).await.is_err() {
                break;
            }
        }
    }

    fn respond(&mut self, frame: &[u8], session: &mut Session) -> Vec<u8> {
        if frame == STATUS_POLL {
            session.polls += 1;
            if let Some(reply) = &self.poll_reply {
                if session.polls > self.poll_reply_after.unwrap_or(0) {
                    return reply.clone();
                }
            }
            if !self.initialised {
                return messages::frame(&[0x01, 0x00]);
            }
            if self.corrupt_polls_after.is_some_and(|n| session.polls > n) {
                return vec![0x62, 0x22, 0x40, 0x01];
            }
            return INFO_RESPONSE.to_vec();
        }
        if frame == VERSION_REQUEST {
            return messages::frame(&[0x63, 0x21, self.version, 0x00]);
        }
        if frame == HANDSHAKE_KEY {
            return messages::frame(&CHALLENGE);
        }
        if frame == RESULTS_REQUEST {
            session.results_requests += 1;
            if !self.loco_present {
                return NO_LOCO.to_vec();
            }
            if session.results_requests == 1 {
                return PROGRAMMING_BUSY.repeat(self.ack_repeats);
            }
            let value = self.cvs.get(&session.cv).copied().unwrap_or(0);
            let echo = session.cv.wrapping_add(self.cv_echo_offset);
            return messages::frame(&[0x63, 0x14, echo, value]);
        }
        match frame[0] {
            0x35 => {
                let expected = messages::challenge_response(&messages::frame(&CHALLENGE)).unwrap();
                if frame == expected && !self.reject_handshake {
                    self.initialised = true;
                    COMMAND_ACK.to_vec()
                } else {
                    messages::frame(&[0x01, 0x00])
                }
            }
            0x22 => {
                session.cv = frame[2];
                session.results_requests = 0;
                PROGRAMMING_ACK.repeat(self.ack_repeats)
            }
            0x23 => {
                session.cv = frame[2];
                session.results_requests = 0;
                if self.loco_present && !self.read_only_cvs {
                    self.cvs.insert(frame[2], frame[3]);
                }
                PROGRAMMING_ACK.repeat(self.ack_repeats)
            }
            0xE4 if self.ack_commands => COMMAND_ACK.to_vec(),
            _ => Vec::new(),
        }
    }
}
