// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::packet::AsSerializableTlv;
use crate::packet::SerializableTlv;
use crate::packet::parameter::RawParameter;
use crate::packet::parameter::write_parameter_header;
use crate::packet::unknown_parameter::UnknownParameter;
use anyhow::Error;
use std::fmt;

/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.10.12>.
pub(crate) const USER_INITIATED_ABORT_CAUSE_CODE: u16 = 12;

/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.10.13>.
pub(crate) const PROTOCOL_VIOLATION_CAUSE_CODE: u16 = 13;

/// Error causes carried in an ABORT chunk.
///
/// Both causes that this crate produces carry free-form text as their value:
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Cause Code = 12/13      |         Cause Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /              Abort Reason / Additional Information            /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorCause {
    UserInitiatedAbort(String),
    ProtocolViolation(String),
    Unknown(UnknownParameter),
}

fn text_value(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::UserInitiatedAbort(reason) => {
                write!(f, "User-Initiated Abort, reason={reason}")
            }
            ErrorCause::ProtocolViolation(information) => {
                write!(f, "Protocol Violation, additional_information={information}")
            }
            ErrorCause::Unknown(c) => fmt::Display::fmt(c, f),
        }
    }
}

impl TryFrom<RawParameter<'_>> for ErrorCause {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        match raw.typ {
            USER_INITIATED_ABORT_CAUSE_CODE => {
                Ok(ErrorCause::UserInitiatedAbort(text_value(raw.value)))
            }
            PROTOCOL_VIOLATION_CAUSE_CODE => {
                Ok(ErrorCause::ProtocolViolation(text_value(raw.value)))
            }
            _ => UnknownParameter::try_from(raw).map(ErrorCause::Unknown),
        }
    }
}

impl SerializableTlv for ErrorCause {
    fn serialize_to(&self, output: &mut [u8]) {
        match self {
            ErrorCause::UserInitiatedAbort(text) => {
                let value =
                    write_parameter_header(USER_INITIATED_ABORT_CAUSE_CODE, text.len(), output);
                value.copy_from_slice(text.as_bytes());
            }
            ErrorCause::ProtocolViolation(text) => {
                let value =
                    write_parameter_header(PROTOCOL_VIOLATION_CAUSE_CODE, text.len(), output);
                value.copy_from_slice(text.as_bytes());
            }
            ErrorCause::Unknown(c) => c.serialize_to(output),
        }
    }

    fn value_size(&self) -> usize {
        match self {
            ErrorCause::UserInitiatedAbort(text) | ErrorCause::ProtocolViolation(text) => {
                text.len()
            }
            ErrorCause::Unknown(c) => c.value_size(),
        }
    }
}

impl AsSerializableTlv for ErrorCause {
    fn as_serializable(&self) -> &dyn SerializableTlv {
        self
    }
}

pub fn error_cause_from_bytes(data: &[u8]) -> Result<Vec<ErrorCause>, Error> {
    let mut result = Vec::<ErrorCause>::with_capacity(1);
    let mut remaining = data;

    while !remaining.is_empty() {
        let (raw, next_remaining) = RawParameter::from_bytes(remaining)?;
        result.push(ErrorCause::try_from(raw)?);
        remaining = next_remaining;
    }
    Ok(result)
}
