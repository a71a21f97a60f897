//! Batched register reads over Modbus TCP.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::{
    DEFAULT_UNIT_ID, FrameError, RESPONSE_HEADER_LEN, ResponseHeader, decode_response,
    encode_request, expected_register_count, expected_response_len, validate_request,
};
use crate::value::{RegisterDescriptor, RegisterValue};

/// Default bound on connect + send + receive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to send request: {0}")]
    Send(#[source] std::io::Error),
    #[error("Failed to receive response: {0}")]
    Receive(#[source] std::io::Error),
    #[error("Connection closed after {received} of {expected} bytes")]
    ConnectionClosed { received: usize, expected: usize },
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),
    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether this is an I/O-level failure talking to the device.
    ///
    /// Cancellation and protocol errors are not.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. }
                | TransportError::Send(_)
                | TransportError::Receive(_)
                | TransportError::ConnectionClosed { .. }
                | TransportError::Timeout(_)
        )
    }
}

/// Reads batches of holding registers from a device.
///
/// One call is one round trip. Implementations do not retry.
pub trait RegisterReader: Send + Sync {
    /// Read `descriptors` and return one value per requested register, in order.
    ///
    /// Returns [`TransportError::Cancelled`] promptly once `cancel` fires.
    fn read_registers(
        &self,
        descriptors: &[RegisterDescriptor],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<RegisterValue>, TransportError>> + Send;
}

impl<T: RegisterReader> RegisterReader for Arc<T> {
    fn read_registers(
        &self,
        descriptors: &[RegisterDescriptor],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<RegisterValue>, TransportError>> + Send {
        (**self).read_registers(descriptors, cancel)
    }
}

/// [`RegisterReader`] that opens a fresh TCP connection for every read.
#[derive(Debug, Clone)]
pub struct TcpRegisterReader {
    endpoint: String,
    unit_id: u8,
    timeout: Duration,
}

impl TcpRegisterReader {
    /// Create a reader for a `host:port` endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            unit_id: DEFAULT_UNIT_ID,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the Modbus unit id put in every request frame.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Set the bound on one complete round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect, send the payload in one write and read back `frames` response frames.
    ///
    /// Each frame is sized from its own header as it arrives, so an exception
    /// frame ends the exchange early. At most `expected_len` bytes are read.
    async fn exchange(
        &self,
        payload: &[u8],
        frames: usize,
        expected_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut stream = TcpStream::connect(self.endpoint.as_str())
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint = %self.endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        stream
            .write_all(payload)
            .await
            .map_err(TransportError::Send)?;

        let mut buf = vec![0u8; expected_len];
        let mut received = 0;

        for _ in 0..frames {
            let header_end = received + RESPONSE_HEADER_LEN;
            if header_end > expected_len {
                break;
            }

            read_span(&mut stream, &mut buf, received, header_end).await?;
            let header = ResponseHeader::parse(&buf[received..header_end])?;
            header.check_exception()?;

            let payload_len = usize::from(header.byte_count);
            let frame_end = expected_len.min(header_end + payload_len);
            read_span(&mut stream, &mut buf, header_end, frame_end).await?;
            received = frame_end;
        }

        buf.truncate(received);
        Ok(buf)
    }
}

/// Fill `buf[from..to]` from the stream.
async fn read_span(
    stream: &mut TcpStream,
    buf: &mut [u8],
    mut from: usize,
    to: usize,
) -> Result<(), TransportError> {
    while from < to {
        let n = stream
            .read(&mut buf[from..to])
            .await
            .map_err(TransportError::Receive)?;

        if n == 0 {
            return Err(TransportError::ConnectionClosed {
                received: from,
                expected: buf.len(),
            });
        }

        from += n;
        trace!(received = from, expected = buf.len(), "Partial response");
    }

    Ok(())
}

impl RegisterReader for TcpRegisterReader {
    async fn read_registers(
        &self,
        descriptors: &[RegisterDescriptor],
        cancel: &CancellationToken,
    ) -> Result<Vec<RegisterValue>, TransportError> {
        validate_request(descriptors)?;

        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let payload = encode_request(descriptors, self.unit_id);
        let expected_len = expected_response_len(descriptors);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio::time::timeout(
                self.timeout,
                self.exchange(&payload, descriptors.len(), expected_len),
            ) => {
                result.map_err(|_| TransportError::Timeout(self.timeout))??
            }
        };

        let values = decode_response(&response)?;
        let expected = expected_register_count(descriptors);
        if values.len() != expected {
            return Err(FrameError::CountMismatch {
                expected,
                actual: values.len(),
            }
            .into());
        }

        debug!(
            endpoint = %self.endpoint,
            frames = descriptors.len(),
            registers = values.len(),
            "Read holding registers"
        );

        Ok(values)
    }
}
