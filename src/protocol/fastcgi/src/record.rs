// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::{ProtocolError, HEADER_LEN, KEEP_CONN, MAX_FRAME_LEN, VERSION_1};
use bytes::BufMut;
use nom::{bytes::streaming::take, IResult};

/// The type field of a record header. Unassigned type codes are preserved so
/// that management queries can be answered with an UnknownType response
/// echoing the offending code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
    Other(u8),
}

impl RecordType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            other => Self::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::BeginRequest => 1,
            Self::AbortRequest => 2,
            Self::EndRequest => 3,
            Self::Params => 4,
            Self::Stdin => 5,
            Self::Stdout => 6,
            Self::Stderr => 7,
            Self::Data => 8,
            Self::GetValues => 9,
            Self::GetValuesResult => 10,
            Self::UnknownType => 11,
            Self::Other(other) => other,
        }
    }
}

/// The role a BeginRequest asks this process to play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Responder,
    Authorizer,
    Filter,
    Other(u16),
}

impl Role {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::Responder,
            2 => Self::Authorizer,
            3 => Self::Filter,
            other => Self::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Responder => 1,
            Self::Authorizer => 2,
            Self::Filter => 3,
            Self::Other(other) => other,
        }
    }
}

/// The protocol status carried in an EndRequest body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete,
    CantMpxConn,
    Overloaded,
    UnknownRole,
}

impl ProtocolStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::RequestComplete => 0,
            Self::CantMpxConn => 1,
            Self::Overloaded => 2,
            Self::UnknownRole => 3,
        }
    }
}

/// The fixed 8-byte record header. The payload is exactly `content_length`
/// bytes and is followed by `padding_length` bytes of filler which must be
/// skipped, never treated as payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub rtype: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Parses a header from the front of `input`. `Ok(None)` means fewer
    /// than 8 bytes are available and the caller must buffer and retry. An
    /// unsupported protocol version is an error and the connection carrying
    /// it must be closed.
    pub fn parse(input: &[u8]) -> Result<Option<Self>, ProtocolError> {
        match header(input) {
            Ok((_, header)) => Ok(Some(header)),
            Err(nom::Err::Incomplete(_)) => Ok(None),
            Err(_) => Err(ProtocolError::MalformedHeader(input[0])),
        }
    }

    /// Writes exactly 8 bytes to the buffer. Total; no failure mode.
    pub fn write_to(&self, buffer: &mut dyn BufMut) {
        buffer.put_u8(self.version);
        buffer.put_u8(self.rtype.to_u8());
        buffer.put_u16(self.request_id);
        buffer.put_u16(self.content_length);
        buffer.put_u8(self.padding_length);
        buffer.put_u8(0);
    }

    /// Creates a header for an outbound record, computing the padding that
    /// rounds header + payload + padding up to a multiple of 8 bytes. This
    /// is a conformance convention other implementations expect, not a
    /// correctness requirement.
    pub fn padded(rtype: RecordType, request_id: u16, content_length: u16) -> Self {
        debug_assert!(content_length as usize <= MAX_FRAME_LEN);
        let padding_length = ((8 - (content_length % 8)) % 8) as u8;

        Self {
            version: VERSION_1,
            rtype,
            request_id,
            content_length,
            padding_length,
        }
    }

    /// Total record length on the wire: header, payload, and padding.
    pub fn record_len(&self) -> usize {
        HEADER_LEN + self.content_length as usize + self.padding_length as usize
    }
}

fn header(input: &[u8]) -> IResult<&[u8], RecordHeader> {
    let (remaining, h) = take(HEADER_LEN)(input)?;

    let header = RecordHeader {
        version: h[0],
        rtype: RecordType::from_u8(h[1]),
        request_id: u16::from_be_bytes([h[2], h[3]]),
        content_length: u16::from_be_bytes([h[4], h[5]]),
        padding_length: h[6],
    };

    if header.version != VERSION_1 {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }

    Ok((remaining, header))
}

/// The 8-byte payload of a BeginRequest record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: Role,
    pub flags: u8,
}

impl BeginRequestBody {
    /// `None` when the payload is shorter than the fixed 8-byte body.
    pub fn parse(input: &[u8]) -> Option<Self> {
        let b = input.get(..8)?;

        Some(Self {
            role: Role::from_u16(u16::from_be_bytes([b[0], b[1]])),
            flags: b[2],
        })
    }

    pub fn keep_conn(&self) -> bool {
        self.flags & KEEP_CONN != 0
    }
}

/// The 8-byte payload of an EndRequest record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequestBody {
    pub fn write_to(&self, buffer: &mut dyn BufMut) {
        buffer.put_u32(self.app_status);
        buffer.put_u8(self.protocol_status.to_u8());
        buffer.put_slice(&[0, 0, 0]);
    }
}

/// The 8-byte payload of an UnknownType response, echoing the type code of
/// the management record that was not recognized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownTypeBody {
    pub rtype: u8,
}

impl UnknownTypeBody {
    pub fn write_to(&self, buffer: &mut dyn BufMut) {
        buffer.put_u8(self.rtype);
        buffer.put_slice(&[0, 0, 0, 0, 0, 0, 0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_roundtrip() {
        let header = RecordHeader {
            version: VERSION_1,
            rtype: RecordType::Params,
            request_id: 513,
            content_length: 12345,
            padding_length: 7,
        };

        let mut buffer = BytesMut::new();
        header.write_to(&mut buffer);
        assert_eq!(buffer.len(), HEADER_LEN);

        let decoded = RecordHeader::parse(&buffer).expect("parse").expect("complete");
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_short_read_is_incomplete() {
        for len in 0..HEADER_LEN {
            let buffer = vec![VERSION_1; len];
            assert_eq!(RecordHeader::parse(&buffer), Ok(None));
        }
    }

    #[test]
    fn header_bad_version_is_an_error() {
        let mut buffer = BytesMut::new();
        RecordHeader::padded(RecordType::Stdin, 1, 0).write_to(&mut buffer);
        buffer[0] = 9;

        assert_eq!(
            RecordHeader::parse(&buffer),
            Err(ProtocolError::MalformedHeader(9))
        );
    }

    #[test]
    fn padding_rounds_record_to_multiple_of_eight() {
        for content_length in [0u16, 1, 7, 8, 9, 4096, 65528 % u16::MAX] {
            let header = RecordHeader::padded(RecordType::Stdout, 1, content_length);
            assert_eq!(header.record_len() % 8, 0);
            assert!(header.padding_length < 8);
        }
    }

    #[test]
    fn unassigned_type_codes_are_preserved() {
        assert_eq!(RecordType::from_u8(42), RecordType::Other(42));
        assert_eq!(RecordType::Other(42).to_u8(), 42);
        assert_eq!(RecordType::from_u8(11), RecordType::UnknownType);
    }

    #[test]
    fn begin_request_body() {
        let raw = [0u8, 1, KEEP_CONN, 0, 0, 0, 0, 0];
        let body = BeginRequestBody::parse(&raw).expect("parse");
        assert_eq!(body.role, Role::Responder);
        assert!(body.keep_conn());

        let raw = [0u8, 3, 0, 0, 0, 0, 0, 0];
        let body = BeginRequestBody::parse(&raw).expect("parse");
        assert_eq!(body.role, Role::Filter);
        assert!(!body.keep_conn());

        assert_eq!(BeginRequestBody::parse(&raw[..5]), None);
    }

    #[test]
    fn end_request_body_layout() {
        let mut buffer = BytesMut::new();
        EndRequestBody {
            app_status: 0x0102_0304,
            protocol_status: ProtocolStatus::RequestComplete,
        }
        .write_to(&mut buffer);

        assert_eq!(&buffer[..], &[1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn unknown_type_body_layout() {
        let mut buffer = BytesMut::new();
        UnknownTypeBody { rtype: 42 }.write_to(&mut buffer);
        assert_eq!(&buffer[..], &[42, 0, 0, 0, 0, 0, 0, 0]);
    }
}
