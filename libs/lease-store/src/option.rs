// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! DHCPv6 options attached to an identity association or a binding, and their
//! storage encoding.
//!
//! An option list is stored as a concatenation of entries with the following
//! format:
//!
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          option-code          |           option-len          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          option-data                          |
//! |                      (option-len octets)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//! There is no separator and no terminator. An empty list is stored as no
//! buffer at all.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Size of the code and length fields preceding each option value.
const OPTION_HEADER_LEN: usize = 4;

/// A single DHCPv6 option.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DhcpOption {
    code: u16,
    value: Bytes,
}

/// The option value does not fit the 16-bit length field.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("option value of {0} bytes exceeds the maximum of 65535 bytes")]
pub struct OptionValueTooLong(pub usize);

/// Errors when decoding a stored option buffer.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum OptionDecodeError {
    /// Fewer than four bytes left where an option header was expected.
    #[error("option header truncated at offset {offset}")]
    TruncatedHeader {
        /// Offset of the truncated header within the buffer.
        offset: usize,
    },
    /// The declared option length runs past the end of the buffer.
    #[error("option {code} declares {declared} bytes but only {remaining} remain")]
    TruncatedValue {
        /// Code of the truncated option.
        code: u16,
        /// Declared value length.
        declared: usize,
        /// Bytes actually left in the buffer.
        remaining: usize,
    },
}

impl DhcpOption {
    /// Creates a new option.
    pub fn new(code: u16, value: impl Into<Bytes>) -> Result<Self, OptionValueTooLong> {
        let value = value.into();
        if value.len() > u16::MAX as usize {
            return Err(OptionValueTooLong(value.len()));
        }
        Ok(Self { code, value })
    }

    /// The option code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The raw option value.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    fn encoded_length(&self) -> usize {
        OPTION_HEADER_LEN + self.value.len()
    }
}

/// Encodes an option list into its storage representation.
///
/// Returns `None` for an empty list, never an empty buffer.
pub fn encode_options(options: &[DhcpOption]) -> Option<Vec<u8>> {
    if options.is_empty() {
        return None;
    }

    let mut buffer = Vec::with_capacity(options.iter().map(DhcpOption::encoded_length).sum());
    for option in options {
        buffer.put_u16(option.code);
        // Fits, checked on construction.
        buffer.put_u16(option.value.len() as u16);
        buffer.put_slice(&option.value);
    }
    Some(buffer)
}

/// Decodes a stored option buffer.
///
/// An absent buffer decodes to an empty list. A truncated buffer fails the
/// whole decode.
pub fn decode_options(buffer: Option<&[u8]>) -> Result<Vec<DhcpOption>, OptionDecodeError> {
    let Some(buffer) = buffer else {
        return Ok(Vec::new());
    };

    let mut data = Bytes::copy_from_slice(buffer);
    let mut options = Vec::new();
    while data.has_remaining() {
        if data.remaining() < OPTION_HEADER_LEN {
            return Err(OptionDecodeError::TruncatedHeader {
                offset: buffer.len() - data.remaining(),
            });
        }
        let code = data.get_u16();
        let declared = data.get_u16() as usize;
        if data.remaining() < declared {
            return Err(OptionDecodeError::TruncatedValue {
                code,
                declared,
                remaining: data.remaining(),
            });
        }
        let value = data.split_to(declared);
        options.push(DhcpOption { code, value });
    }
    Ok(options)
}
