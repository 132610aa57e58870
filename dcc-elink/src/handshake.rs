//! Link initialisation: key exchange and firmware version check

use crate::link::Link;
use crate::messages::{self, HANDSHAKE_CONFIRMED, HANDSHAKE_KEY, STATUS_POLL, VERSION_REQUEST};
use dcc_core::{DccError, DccResult};

impl Link {
    /// Bring the link up and return the firmware version byte
    ///
    /// An eLink that was initialised by an earlier session answers the first
    /// status poll with an info response and skips the key exchange.
    ///
    /// # Errors
    /// - "Unrecognised message type, got <n>" for an unexpected reply
    /// - "Handshake failed" if the device rejects the challenge response
    /// - "Unsupported eLink version encountered, version=<v>"
    pub(crate) async fn handshake(&self) -> DccResult<u8> {
        self.send(&STATUS_POLL).await?;
        let head = self.receive_head("handshake status").await?;
        match head[0] {
            messages::TYPE_INFO => {
                let info = self
                    .receive_frame(&head, messages::INFO_RESPONSE_LEN - 1, "info response")
                    .await?;
                messages::expect_ready(&info)?;
                log::info!("{}: link already initialised", self.machine.device_id());
            }
            messages::TYPE_HANDSHAKE_STATUS => {
                let status = self
                    .receive_frame(&head, messages::HANDSHAKE_STATUS_LEN - 1, "handshake status")
                    .await?;
                if status[1] != HANDSHAKE_CONFIRMED {
                    self.exchange_keys().await?;
                }
            }
            other => return Err(messages::unrecognised(other)),
        }
        self.request_version().await
    }

    async fn exchange_keys(&self) -> DccResult<()> {
        log::debug!("{}: starting key exchange", self.machine.device_id());
        self.send(&HANDSHAKE_KEY).await?;

        let head = self.receive_head("handshake challenge").await?;
        if head[0] != messages::TYPE_HANDSHAKE_EXCHANGE {
            return Err(messages::unrecognised(head[0]));
        }
        let challenge = self
            .receive_frame(&head, messages::HANDSHAKE_EXCHANGE_LEN - 1, "handshake challenge")
            .await?;
        let response = messages::challenge_response(&challenge)?;
        self.send(&response).await?;

        let head = self.receive_head("handshake confirmation").await?;
        if head[0] != messages::TYPE_HANDSHAKE_STATUS {
            return Err(messages::unrecognised(head[0]));
        }
        let status = self
            .receive_frame(&head, messages::HANDSHAKE_STATUS_LEN - 1, "handshake confirmation")
            .await?;
        if status[1] != HANDSHAKE_CONFIRMED {
            return Err(DccError::protocol("Handshake failed"));
        }
        Ok(())
    }

    async fn request_version(&self) -> DccResult<u8> {
        self.send(&VERSION_REQUEST).await?;
        let head = self.receive_head("version info").await?;
        if head[0] != messages::TYPE_VERSION {
            return Err(messages::unrecognised(head[0]));
        }
        let info = self
            .receive_frame(&head, messages::VERSION_RESPONSE_LEN - 1, "version info")
            .await?;
        if info[1] != messages::VERSION_ID {
            return Err(DccError::protocol(format!(
                "Unexpected version response {:02X?}",
                &info[..]
            )));
        }
        let version = info[2];
        if !self.config.is_supported_version(version) {
            return Err(DccError::protocol(format!(
                "Unsupported eLink version encountered, version={version}"
            )));
        }
        Ok(version)
    }
}
