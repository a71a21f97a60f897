//! Modbus TCP framing for batched "read holding registers" requests.
//!
//! One request frame is emitted per [`RegisterDescriptor`] and all frames are
//! concatenated into a single payload. The device answers with one response
//! frame per request, also concatenated.
//!
//! # Request frame (12 bytes)
//!
//! ```text
//! [0:2]   transaction id (index of the frame within the batch)
//! [2:4]   protocol id = 0
//! [4:6]   remaining length = 6
//! [6]     unit id
//! [7]     function code = 3
//! [8:10]  starting address
//! [10:12] register count
//! ```
//!
//! # Response frame
//!
//! ```text
//! [0:2]   transaction id
//! [2:6]   protocol id, length
//! [6]     unit id
//! [7]     function code
//! [8]     byte count
//! [9..]   byte count bytes of big-endian register values
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

use crate::value::{RegisterDescriptor, RegisterValue};

/// Size of one request frame.
pub const REQUEST_FRAME_LEN: usize = 12;

/// Size of a response frame header, up to and including the byte count.
pub const RESPONSE_HEADER_LEN: usize = 9;

/// Function code for "read holding registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Unit id used when none is configured.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Largest register count a single read may request.
pub const MAX_REGISTERS_PER_FRAME: u16 = 125;

/// Remaining length after the length field: unit + function + address + count.
const REQUEST_REMAINING_LEN: u16 = 6;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Truncated frame at {offset}: need {needed} bytes, got {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Odd byte count {byte_count} in response frame at offset {offset}")]
    OddByteCount { offset: usize, byte_count: u8 },

    #[error("Exception {exception_code} for function 0x{function_code:02X}")]
    Exception {
        function_code: u8,
        exception_code: u8,
    },

    #[error("Expected {expected} register values, received {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Header of one response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    /// Payload length, or the exception code for exception frames.
    pub byte_count: u8,
}

impl ResponseHeader {
    /// Parse the header at the start of `bytes`.
    pub fn parse(mut bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < RESPONSE_HEADER_LEN {
            return Err(FrameError::Truncated {
                offset: 0,
                needed: RESPONSE_HEADER_LEN,
                available: bytes.len(),
            });
        }
        Ok(read_header(&mut bytes))
    }

    /// Fail if the device answered with an exception frame.
    pub fn check_exception(&self) -> Result<(), FrameError> {
        if self.function_code & 0x80 != 0 {
            return Err(FrameError::Exception {
                function_code: self.function_code & 0x7F,
                exception_code: self.byte_count,
            });
        }
        Ok(())
    }
}

/// Check that a batch can be expressed as read requests.
pub fn validate_request(descriptors: &[RegisterDescriptor]) -> Result<(), FrameError> {
    if descriptors.is_empty() {
        return Err(FrameError::InvalidRequest(
            "at least one register block is required".to_string(),
        ));
    }

    for descriptor in descriptors {
        if descriptor.count == 0 || descriptor.count > MAX_REGISTERS_PER_FRAME {
            return Err(FrameError::InvalidRequest(format!(
                "register count {} at address {} must be 1-{}",
                descriptor.count, descriptor.address, MAX_REGISTERS_PER_FRAME
            )));
        }
    }

    Ok(())
}

/// Total number of registers requested by a batch.
pub fn expected_register_count(descriptors: &[RegisterDescriptor]) -> usize {
    descriptors.iter().map(|d| usize::from(d.count)).sum()
}

/// Number of bytes the device sends back for a batch.
pub fn expected_response_len(descriptors: &[RegisterDescriptor]) -> usize {
    descriptors
        .iter()
        .map(|d| RESPONSE_HEADER_LEN + 2 * usize::from(d.count))
        .sum()
}

/// Serialize a batch into one payload of concatenated request frames.
pub fn encode_request(descriptors: &[RegisterDescriptor], unit_id: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(REQUEST_FRAME_LEN * descriptors.len());

    for (index, descriptor) in descriptors.iter().enumerate() {
        buf.put_u16(index as u16);
        buf.put_u16(0);
        buf.put_u16(REQUEST_REMAINING_LEN);
        buf.put_u8(unit_id);
        buf.put_u8(READ_HOLDING_REGISTERS);
        buf.put_u16(descriptor.address);
        buf.put_u16(descriptor.count);
    }

    buf.freeze()
}

/// Walk concatenated response frames and collect their register values in order.
///
/// Each frame is located through its own byte-count field. Transaction ids are
/// read but not matched against the requests they answer.
pub fn decode_response(mut buf: &[u8]) -> Result<Vec<RegisterValue>, FrameError> {
    let total = buf.len();
    let mut values = Vec::with_capacity(total / 2);

    while buf.has_remaining() {
        let offset = total - buf.remaining();

        if buf.remaining() < RESPONSE_HEADER_LEN {
            return Err(FrameError::Truncated {
                offset,
                needed: RESPONSE_HEADER_LEN,
                available: buf.remaining(),
            });
        }

        let header = read_header(&mut buf);
        trace!(
            transaction_id = header.transaction_id,
            unit_id = header.unit_id,
            function_code = header.function_code,
            byte_count = header.byte_count,
            "Response frame"
        );

        header.check_exception()?;

        let byte_count = usize::from(header.byte_count);
        if byte_count % 2 != 0 {
            return Err(FrameError::OddByteCount {
                offset,
                byte_count: header.byte_count,
            });
        }
        if buf.remaining() < byte_count {
            return Err(FrameError::Truncated {
                offset,
                needed: RESPONSE_HEADER_LEN + byte_count,
                available: RESPONSE_HEADER_LEN + buf.remaining(),
            });
        }

        for _ in 0..byte_count / 2 {
            values.push(RegisterValue::new(buf.get_u16()));
        }
    }

    Ok(values)
}

fn read_header(buf: &mut &[u8]) -> ResponseHeader {
    let transaction_id = buf.get_u16();
    // protocol id and length
    buf.advance(4);
    let unit_id = buf.get_u8();
    let function_code = buf.get_u8();
    let byte_count = buf.get_u8();

    ResponseHeader {
        transaction_id,
        unit_id,
        function_code,
        byte_count,
    }
}
