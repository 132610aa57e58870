//! Stream accessor trait for the transport layer

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dcc_core::{DccError, DccResult};
use std::time::Duration;

/// Byte-level access to the physical link of a command station
///
/// Implementations are internally synchronised so that a driver can share a
/// single accessor between its foreground operations and its heartbeat.
#[async_trait]
pub trait StreamAccessor: Send + Sync {
    /// Read exactly `size` bytes
    ///
    /// # Arguments
    ///
    /// * `size` - Number of bytes to remove from the receive queue
    /// * `timeout` - Optional upper bound on the wait. None waits forever.
    ///
    /// # Returns
    ///
    /// `Ok(Some(bytes))` with exactly `size` bytes in arrival order, or
    /// `Ok(None)` if the timeout elapsed first. A timeout never discards
    /// buffered bytes.
    ///
    /// # Errors
    ///
    /// `DccError::ReadInProgress` if another read is outstanding, or the link
    /// error if the connection failed or was closed.
    async fn read(&self, size: usize, timeout: Option<Duration>) -> DccResult<Option<Bytes>>;

    /// Read `size` bytes and prepend `prefix`, which the caller already consumed
    async fn concat_read(
        &self,
        prefix: &[u8],
        size: usize,
        timeout: Option<Duration>,
    ) -> DccResult<Option<Bytes>> {
        let Some(rest) = self.read(size, timeout).await? else {
            return Ok(None);
        };
        let mut frame = BytesMut::with_capacity(prefix.len() + rest.len());
        frame.extend_from_slice(prefix);
        frame.extend_from_slice(&rest);
        Ok(Some(frame.freeze()))
    }

    /// Read exactly `size` bytes, turning a timeout into an error
    ///
    /// # Arguments
    ///
    /// * `what` - Description of the awaited data, used in the timeout error
    async fn read_exact(&self, size: usize, timeout: Duration, what: &str) -> DccResult<Bytes> {
        self.read(size, Some(timeout))
            .await?
            .ok_or_else(|| DccError::Timeout(what.to_string()))
    }

    /// Write all of `data` and wait for it to drain
    async fn write(&self, data: &[u8]) -> DccResult<()>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream. Calling this more than once is harmless.
    async fn close(&self) -> DccResult<()>;
}
