// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-connection record demultiplexer. Inbound bytes are fed in as they
//! arrive and walked with a three-phase cursor (header, payload, padding)
//! that never assumes a record arrives whole. Records are routed by their
//! requestId: management records are answered directly, request records
//! mutate the request accumulator for that id, and a request whose parameter
//! and body streams are both complete is queued for publication. Outbound
//! records (responses, management replies) accumulate in a buffer the owning
//! transport drains to the socket.

use crate::REQUEST_ABORT;

use bstr::BStr;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use config::FastcgiConfig;
use logger::*;
use protocol_fastcgi::{
    decode_prefix, encode_all, BeginRequestBody, EndRequestBody, ProtocolError, ProtocolStatus,
    RecordHeader, RecordType, Role, UnknownTypeBody, HEADER_LEN, MANAGEMENT_ID, MAX_CONNS,
    MAX_FRAME_LEN, MAX_REQS, MPXS_CONNS,
};
use session::Request;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Implementation limits advertised to GetValues queries.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_conns: usize,
    pub max_reqs: usize,
    pub mpxs_conns: bool,
}

impl Limits {
    pub fn new<T: FastcgiConfig>(config: &T) -> Self {
        Self {
            max_conns: config.fastcgi().max_conns,
            max_reqs: config.fastcgi().max_reqs,
            mpxs_conns: config.fastcgi().mpxs_conns,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_conns: 1024,
            max_reqs: 1024,
            mpxs_conns: true,
        }
    }
}

/// A request whose parameter and body streams are both complete, ready to
/// hand to a worker. The abort flag is shared with the slot that stays
/// behind, so a later AbortRequest or disconnect is observable from the
/// response path.
pub struct Published {
    pub request: Request,
    pub aborted: Arc<AtomicBool>,
}

enum SlotState {
    /// Streams still arriving; the accumulator lives here.
    Assembling(Request),
    /// Handed to the application; only the response path touches this slot.
    Published,
}

struct Slot {
    state: SlotState,
    keep_conn: bool,
    /// Undecoded tail of the parameter stream. Pairs may straddle record
    /// boundaries, so bytes that do not yet form a whole pair wait here.
    pending_params: BytesMut,
    aborted: Arc<AtomicBool>,
}

impl Slot {
    fn new(request_id: u16, role: Role, keep_conn: bool) -> Self {
        Self {
            state: SlotState::Assembling(Request::new(request_id, role, keep_conn)),
            keep_conn,
            pending_params: BytesMut::new(),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Clone, Copy)]
enum Cursor {
    Header,
    Payload(RecordHeader),
    Padding(RecordHeader),
}

pub struct Demux {
    buffer: BytesMut,
    cursor: Cursor,
    limits: Limits,
    slots: HashMap<u16, Slot>,
    published: VecDeque<Published>,
    outbound: BytesMut,
}

impl Demux {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            cursor: Cursor::Header,
            limits,
            slots: HashMap::new(),
            published: VecDeque::new(),
            outbound: BytesMut::new(),
        }
    }

    /// Consumes inbound bytes, advancing the record cursor as far as the
    /// data allows. An error means the connection is unrecoverable and must
    /// be closed; anything the peer gets wrong at record scope is logged and
    /// skipped instead.
    pub fn receive(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.cursor {
                Cursor::Header => {
                    let Some(header) = RecordHeader::parse(&self.buffer)? else {
                        break;
                    };
                    self.buffer.advance(HEADER_LEN);
                    self.cursor = Cursor::Payload(header);
                }
                Cursor::Payload(header) => {
                    let len = header.content_length as usize;
                    if self.buffer.len() < len {
                        break;
                    }
                    let payload = self.buffer.split_to(len).freeze();
                    self.handle_record(header, &payload);
                    self.cursor = Cursor::Padding(header);
                }
                Cursor::Padding(header) => {
                    let len = header.padding_length as usize;
                    if self.buffer.len() < len {
                        break;
                    }
                    // filler, never payload
                    self.buffer.advance(len);
                    self.cursor = Cursor::Header;
                }
            }
        }

        Ok(())
    }

    /// Next request ready to hand to a worker, if any.
    pub fn next_published(&mut self) -> Option<Published> {
        self.published.pop_front()
    }

    /// Outbound record bytes awaiting a socket write.
    pub fn outbound(&mut self) -> &mut BytesMut {
        &mut self.outbound
    }

    /// Frames response body bytes into Stdout records for the given request.
    /// Returns false if the request is no longer open (aborted or already
    /// ended); the bytes are discarded in that case.
    pub fn write_stdout(&mut self, request_id: u16, data: &[u8]) -> bool {
        if !self.slots.contains_key(&request_id) {
            return false;
        }
        if !data.is_empty() {
            self.frame(RecordType::Stdout, request_id, data);
        }
        true
    }

    /// Ends the request: closes its Stdout stream, reports the application
    /// status, and releases the id for reuse. Returns true if the connection
    /// should be closed once the outbound buffer drains (the peer did not
    /// ask to keep it open).
    pub fn end_request(&mut self, request_id: u16, app_status: u32) -> bool {
        let Some(slot) = self.slots.remove(&request_id) else {
            // aborted or never open; nothing to deliver
            return false;
        };

        self.frame(RecordType::Stdout, request_id, &[]);

        let mut body = BytesMut::with_capacity(8);
        EndRequestBody {
            app_status,
            protocol_status: ProtocolStatus::RequestComplete,
        }
        .write_to(&mut body);
        self.frame(RecordType::EndRequest, request_id, &body);

        !slot.keep_conn
    }

    /// The connection dropped out from under us. Published requests observe
    /// a hard close through their abort flag; everything else is discarded.
    pub fn disconnect(&mut self) {
        for (_, slot) in self.slots.drain() {
            if matches!(slot.state, SlotState::Published) {
                slot.aborted.store(true, Ordering::Release);
            }
        }
    }

    pub fn has_open_requests(&self) -> bool {
        !self.slots.is_empty()
    }

    fn handle_record(&mut self, header: RecordHeader, payload: &Bytes) {
        if header.request_id == MANAGEMENT_ID {
            return self.handle_management(header, payload);
        }

        match header.rtype {
            RecordType::BeginRequest => self.handle_begin(header.request_id, payload),
            RecordType::AbortRequest => self.handle_abort(header.request_id),
            RecordType::Params => self.handle_params(header.request_id, payload),
            RecordType::Stdin => self.handle_stdin(header.request_id, payload),
            other => {
                warn!(
                    "ignoring {:?} record for request {}",
                    other, header.request_id
                );
            }
        }
    }

    fn handle_begin(&mut self, request_id: u16, payload: &[u8]) {
        if self.slots.contains_key(&request_id) {
            // id is in use until EndRequest; the duplicate cannot be honored
            warn!("duplicate BeginRequest for open request {}", request_id);
            return;
        }

        let Some(body) = BeginRequestBody::parse(payload) else {
            warn!("short BeginRequest body for request {}", request_id);
            return;
        };

        self.slots.insert(
            request_id,
            Slot::new(request_id, body.role, body.keep_conn()),
        );
    }

    fn handle_abort(&mut self, request_id: u16) {
        let Some(slot) = self.slots.remove(&request_id) else {
            warn!("AbortRequest for unknown request {}", request_id);
            return;
        };

        REQUEST_ABORT.increment();
        if matches!(slot.state, SlotState::Published) {
            slot.aborted.store(true, Ordering::Release);
        }
    }

    fn handle_params(&mut self, request_id: u16, payload: &[u8]) {
        let Some(slot) = self.slots.get_mut(&request_id) else {
            warn!("Params record for unknown request {}", request_id);
            return;
        };
        let SlotState::Assembling(request) = &mut slot.state else {
            warn!("Params record for already published request {}", request_id);
            return;
        };

        if payload.is_empty() {
            // stream terminator
            if !slot.pending_params.is_empty() {
                warn!(
                    "discarding {} trailing bytes of truncated parameters for request {}",
                    slot.pending_params.len(),
                    request_id
                );
                slot.pending_params.clear();
            }
            request.set_params_complete();
            self.maybe_publish(request_id);
            return;
        }

        slot.pending_params.extend_from_slice(payload);
        let (pairs, consumed) = decode_prefix(&slot.pending_params);
        slot.pending_params.advance(consumed);

        for (key, value) in pairs {
            request.add_param(
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            );
        }
    }

    fn handle_stdin(&mut self, request_id: u16, payload: &[u8]) {
        let Some(slot) = self.slots.get_mut(&request_id) else {
            warn!("Stdin record for unknown request {}", request_id);
            return;
        };
        let SlotState::Assembling(request) = &mut slot.state else {
            warn!("Stdin record for already published request {}", request_id);
            return;
        };

        if payload.is_empty() {
            request.set_content_complete();
            self.maybe_publish(request_id);
        } else {
            request.append_content(payload);
        }
    }

    /// Publishes the request once both of its streams are complete.
    fn maybe_publish(&mut self, request_id: u16) {
        let Some(slot) = self.slots.get_mut(&request_id) else {
            return;
        };
        let SlotState::Assembling(request) = &slot.state else {
            return;
        };
        if !(request.is_valid() && request.content_complete()) {
            return;
        }

        let SlotState::Assembling(request) =
            std::mem::replace(&mut slot.state, SlotState::Published)
        else {
            unreachable!();
        };
        self.published.push_back(Published {
            request,
            aborted: slot.aborted.clone(),
        });
    }

    fn handle_management(&mut self, header: RecordHeader, payload: &[u8]) {
        match header.rtype {
            RecordType::GetValues => {
                let (pairs, consumed) = decode_prefix(payload);
                if consumed < payload.len() {
                    warn!("truncated name/value pair in GetValues query");
                }

                let mut result: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
                for (name, _) in pairs {
                    let value = match name.as_slice() {
                        MAX_CONNS => self.limits.max_conns.to_string().into_bytes(),
                        MAX_REQS => self.limits.max_reqs.to_string().into_bytes(),
                        MPXS_CONNS => {
                            let v = if self.limits.mpxs_conns { "1" } else { "0" };
                            v.as_bytes().to_vec()
                        }
                        other => {
                            debug!("unrecognized GetValues name: {:?}", BStr::new(other));
                            continue;
                        }
                    };
                    result.push((name, value));
                }

                let mut body = BytesMut::new();
                encode_all(
                    result.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
                    &mut body,
                );
                self.frame(RecordType::GetValuesResult, MANAGEMENT_ID, &body);
            }
            other => {
                // not a management type we recognize; echo the code back
                let mut body = BytesMut::with_capacity(8);
                UnknownTypeBody {
                    rtype: other.to_u8(),
                }
                .write_to(&mut body);
                self.frame(RecordType::UnknownType, MANAGEMENT_ID, &body);
            }
        }
    }

    /// Writes one or more records carrying `data` to the outbound buffer,
    /// splitting payloads that exceed the per-record limit. An empty `data`
    /// writes exactly one zero-length record (a stream terminator).
    fn frame(&mut self, rtype: RecordType, request_id: u16, data: &[u8]) {
        let mut data = data;
        loop {
            let chunk = std::cmp::min(data.len(), MAX_FRAME_LEN);
            let header = RecordHeader::padded(rtype, request_id, chunk as u16);
            header.write_to(&mut self.outbound);
            self.outbound.extend_from_slice(&data[..chunk]);
            self.outbound.put_bytes(0, header.padding_length as usize);

            data = &data[chunk..];
            if data.is_empty() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_fastcgi::KEEP_CONN;

    fn record(rtype: RecordType, request_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut raw = BytesMut::new();
        let header = RecordHeader::padded(rtype, request_id, payload.len() as u16);
        header.write_to(&mut raw);
        raw.extend_from_slice(payload);
        raw.put_bytes(0, header.padding_length as usize);
        raw.to_vec()
    }

    fn begin(request_id: u16, flags: u8) -> Vec<u8> {
        record(
            RecordType::BeginRequest,
            request_id,
            &[0, 1, flags, 0, 0, 0, 0, 0],
        )
    }

    fn params(request_id: u16, pairs: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut body = BytesMut::new();
        encode_all(pairs.iter().copied(), &mut body);
        record(RecordType::Params, request_id, &body)
    }

    /// A minimal complete GET request as a web server would send it.
    fn get_request(request_id: u16) -> Vec<u8> {
        let mut raw = begin(request_id, 0);
        raw.extend(params(
            request_id,
            &[
                (b"REQUEST_METHOD", b"GET"),
                (b"QUERY_STRING", b"name=value"),
            ],
        ));
        raw.extend(record(RecordType::Params, request_id, &[]));
        raw.extend(record(RecordType::Stdin, request_id, &[]));
        raw
    }

    /// Decodes every complete record in the outbound buffer.
    fn drain_outbound(demux: &mut Demux) -> Vec<(RecordHeader, Vec<u8>)> {
        let mut records = Vec::new();
        let raw = demux.outbound().split();
        let mut raw = &raw[..];
        while !raw.is_empty() {
            let header = RecordHeader::parse(raw)
                .expect("outbound header")
                .expect("whole header");
            let payload = raw[HEADER_LEN..HEADER_LEN + header.content_length as usize].to_vec();
            raw = &raw[header.record_len()..];
            records.push((header, payload));
        }
        records
    }

    #[test]
    fn publishes_after_both_streams_complete() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&get_request(1)).unwrap();

        let published = demux.next_published().expect("published");
        assert!(demux.next_published().is_none());

        let request = published.request;
        assert_eq!(request.request_id(), 1);
        assert_eq!(request.role(), Role::Responder);
        assert_eq!(request.param("REQUEST_METHOD"), Some("GET"));
        assert_eq!(request.get_value("name"), Some("value"));
        assert!(request.content_complete());
        assert!(request.content().is_empty());
    }

    #[test]
    fn any_split_of_the_byte_stream_is_equivalent() {
        let raw = get_request(7);

        for split in 0..=raw.len() {
            let mut demux = Demux::new(Limits::default());
            demux.receive(&raw[..split]).unwrap();
            demux.receive(&raw[split..]).unwrap();

            let published = demux.next_published().expect("published");
            assert_eq!(published.request.request_id(), 7);
            assert_eq!(published.request.param("REQUEST_METHOD"), Some("GET"));
        }
    }

    #[test]
    fn parameter_pairs_straddle_record_boundaries() {
        let mut body = BytesMut::new();
        encode_all(
            [(b"PATH_INFO".as_slice(), b"/some/long/path".as_slice())],
            &mut body,
        );
        // split the single pair across two Params records
        let (a, b) = body.split_at(5);

        let mut demux = Demux::new(Limits::default());
        demux.receive(&begin(1, 0)).unwrap();
        demux.receive(&record(RecordType::Params, 1, a)).unwrap();
        demux.receive(&record(RecordType::Params, 1, b)).unwrap();
        demux.receive(&record(RecordType::Params, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 1, &[])).unwrap();

        let published = demux.next_published().expect("published");
        assert_eq!(published.request.param("PATH_INFO"), Some("/some/long/path"));
    }

    #[test]
    fn interleaved_requests_accumulate_independently() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&begin(1, KEEP_CONN)).unwrap();
        demux.receive(&begin(2, KEEP_CONN)).unwrap();
        demux
            .receive(&params(1, &[(b"REQUEST_METHOD", b"GET")]))
            .unwrap();
        demux
            .receive(&params(2, &[(b"REQUEST_METHOD", b"POST")]))
            .unwrap();
        demux.receive(&record(RecordType::Params, 2, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 2, b"body")).unwrap();
        demux.receive(&record(RecordType::Stdin, 2, &[])).unwrap();
        demux.receive(&record(RecordType::Params, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 1, &[])).unwrap();

        // request 2 completed first
        let first = demux.next_published().expect("first");
        assert_eq!(first.request.request_id(), 2);
        assert_eq!(first.request.content(), b"body");
        let second = demux.next_published().expect("second");
        assert_eq!(second.request.request_id(), 1);
        assert_eq!(second.request.param("REQUEST_METHOD"), Some("GET"));
    }

    #[test]
    fn stream_records_without_begin_are_discarded() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&record(RecordType::Params, 9, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 9, &[])).unwrap();
        assert!(demux.next_published().is_none());

        // the connection remains usable
        demux.receive(&get_request(1)).unwrap();
        assert!(demux.next_published().is_some());
    }

    #[test]
    fn duplicate_begin_does_not_reset_the_open_request() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&begin(1, 0)).unwrap();
        demux
            .receive(&params(1, &[(b"REQUEST_METHOD", b"GET")]))
            .unwrap();
        demux.receive(&begin(1, KEEP_CONN)).unwrap();
        demux.receive(&record(RecordType::Params, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 1, &[])).unwrap();

        let published = demux.next_published().expect("published");
        assert_eq!(published.request.param("REQUEST_METHOD"), Some("GET"));
        // the duplicate's flags were not honored
        assert!(!published.request.keep_conn());
    }

    #[test]
    fn abort_before_publish_discards_the_request() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&begin(1, 0)).unwrap();
        demux.receive(&record(RecordType::AbortRequest, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Params, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 1, &[])).unwrap();

        assert!(demux.next_published().is_none());
        // the id is free for reuse
        demux.receive(&get_request(1)).unwrap();
        assert!(demux.next_published().is_some());
    }

    #[test]
    fn abort_after_publish_raises_the_shared_flag() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&get_request(1)).unwrap();
        let published = demux.next_published().expect("published");
        assert!(!published.aborted.load(Ordering::Acquire));

        demux.receive(&record(RecordType::AbortRequest, 1, &[])).unwrap();
        assert!(published.aborted.load(Ordering::Acquire));

        // response writes for the aborted id are discarded
        assert!(!demux.write_stdout(1, b"late"));
        assert!(drain_outbound(&mut demux).is_empty());
    }

    #[test]
    fn disconnect_aborts_published_requests() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&get_request(1)).unwrap();
        let published = demux.next_published().expect("published");

        demux.disconnect();
        assert!(published.aborted.load(Ordering::Acquire));
        assert!(!demux.has_open_requests());
    }

    #[test]
    fn response_is_stdout_then_terminator_then_end_request() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&get_request(1)).unwrap();
        demux.next_published().expect("published");
        drain_outbound(&mut demux);

        assert!(demux.write_stdout(1, b"Content-Type: text/plain\r\n\r\nhi"));
        let close = demux.end_request(1, 0);
        assert!(close);

        let records = drain_outbound(&mut demux);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].0.rtype, RecordType::Stdout);
        assert_eq!(records[0].1, b"Content-Type: text/plain\r\n\r\nhi");
        assert_eq!(records[0].0.record_len() % 8, 0);

        assert_eq!(records[1].0.rtype, RecordType::Stdout);
        assert!(records[1].1.is_empty());

        assert_eq!(records[2].0.rtype, RecordType::EndRequest);
        assert_eq!(&records[2].1[..4], &[0, 0, 0, 0]);
        assert_eq!(records[2].1[4], ProtocolStatus::RequestComplete.to_u8());
    }

    #[test]
    fn keep_conn_holds_the_connection_open_after_end() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&begin(1, KEEP_CONN)).unwrap();
        demux.receive(&record(RecordType::Params, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 1, &[])).unwrap();
        demux.next_published().expect("published");

        assert!(!demux.end_request(1, 0));

        // the id can be begun again on the same connection
        demux.receive(&get_request(1)).unwrap();
        assert!(demux.next_published().is_some());
    }

    #[test]
    fn large_response_bodies_are_split_across_records() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&get_request(1)).unwrap();
        demux.next_published().expect("published");
        drain_outbound(&mut demux);

        let body = vec![0x61u8; MAX_FRAME_LEN + 100];
        assert!(demux.write_stdout(1, &body));

        let records = drain_outbound(&mut demux);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.len(), MAX_FRAME_LEN);
        assert_eq!(records[1].1.len(), 100);
    }

    #[test]
    fn get_values_is_answered_from_limits() {
        let mut demux = Demux::new(Limits {
            max_conns: 512,
            max_reqs: 256,
            mpxs_conns: true,
        });

        let mut query = BytesMut::new();
        encode_all(
            [
                (MAX_CONNS, b"".as_slice()),
                (MAX_REQS, b"".as_slice()),
                (MPXS_CONNS, b"".as_slice()),
                (b"FCGI_UNKNOWN_NAME".as_slice(), b"".as_slice()),
            ],
            &mut query,
        );
        demux
            .receive(&record(RecordType::GetValues, MANAGEMENT_ID, &query))
            .unwrap();

        let records = drain_outbound(&mut demux);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.rtype, RecordType::GetValuesResult);
        assert_eq!(records[0].0.request_id, MANAGEMENT_ID);

        let (pairs, consumed) = decode_prefix(&records[0].1);
        assert_eq!(consumed, records[0].1.len());
        assert_eq!(
            pairs,
            vec![
                (MAX_CONNS.to_vec(), b"512".to_vec()),
                (MAX_REQS.to_vec(), b"256".to_vec()),
                (MPXS_CONNS.to_vec(), b"1".to_vec()),
            ]
        );
    }

    #[test]
    fn unknown_management_type_is_echoed() {
        let mut demux = Demux::new(Limits::default());
        demux
            .receive(&record(RecordType::Other(42), MANAGEMENT_ID, &[]))
            .unwrap();

        let records = drain_outbound(&mut demux);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.rtype, RecordType::UnknownType);
        assert_eq!(records[0].1, &[42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn bad_version_closes_the_connection() {
        let mut raw = get_request(1);
        raw[0] = 9;

        let mut demux = Demux::new(Limits::default());
        assert_eq!(
            demux.receive(&raw),
            Err(ProtocolError::MalformedHeader(9))
        );
    }

    #[test]
    fn unknown_stream_type_is_skipped_not_fatal() {
        let mut demux = Demux::new(Limits::default());
        demux.receive(&begin(1, 0)).unwrap();
        // a Data record for a Responder is unexpected; skip it
        demux.receive(&record(RecordType::Data, 1, b"xx")).unwrap();
        demux.receive(&record(RecordType::Params, 1, &[])).unwrap();
        demux.receive(&record(RecordType::Stdin, 1, &[])).unwrap();
        assert!(demux.next_published().is_some());
    }
}
