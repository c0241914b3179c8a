// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::BodyReader;

use bytes::BytesMut;
use protocol_fastcgi::Role;

use std::collections::HashMap;
use std::sync::OnceLock;

/// Mutable accumulator for one logical request. Created when the transport
/// sees the request begin, mutated only by the transport that owns its
/// connection, and published to the application once both the parameter and
/// body streams are complete.
pub struct Request {
    request_id: u16,
    role: Role,
    keep_conn: bool,
    params: Vec<(String, String)>,
    get_data: HashMap<String, String>,
    content: BytesMut,
    params_complete: bool,
    content_complete: bool,
    post_data: OnceLock<HashMap<String, String>>,
}

impl Request {
    pub fn new(request_id: u16, role: Role, keep_conn: bool) -> Self {
        Self {
            request_id,
            role,
            keep_conn,
            params: Vec::new(),
            get_data: HashMap::new(),
            content: BytesMut::new(),
            params_complete: false,
            content_complete: false,
            post_data: OnceLock::new(),
        }
    }

    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn keep_conn(&self) -> bool {
        self.keep_conn
    }

    /// A request is valid once its parameter stream has been fully received,
    /// even if body bytes are still arriving.
    pub fn is_valid(&self) -> bool {
        self.params_complete
    }

    /// Appends a decoded parameter. Later parameters with the same key do
    /// not overwrite; duplicates are preserved as repeated entries.
    pub fn add_param(&mut self, key: String, value: String) {
        self.params.push((key, value));
    }

    /// Marks the parameter stream complete and derives the query data from
    /// the `QUERY_STRING` parameter.
    pub fn set_params_complete(&mut self) {
        self.params_complete = true;
        if let Some(query) = self.param("QUERY_STRING") {
            self.get_data = parse_form(query.as_bytes());
        }
    }

    /// The decoded CGI-style environment, in arrival order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// First value for the named parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Query-string key/values, percent-decoded.
    pub fn get_data(&self) -> &HashMap<String, String> {
        &self.get_data
    }

    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.get_data.get(name).map(String::as_str)
    }

    pub fn append_content(&mut self, data: &[u8]) {
        self.content.extend_from_slice(data);
    }

    pub fn set_content_complete(&mut self) {
        self.content_complete = true;
    }

    pub fn content_complete(&self) -> bool {
        self.content_complete
    }

    /// The raw request body received so far.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_type(&self) -> Option<&str> {
        self.param("CONTENT_TYPE")
    }

    pub fn content_length(&self) -> u64 {
        self.param("CONTENT_LENGTH")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Form key/values parsed from the body on first access, and only when
    /// the content type indicates form-encoded data.
    pub fn post_data(&self) -> &HashMap<String, String> {
        self.post_data.get_or_init(|| {
            match self.content_type() {
                Some(t) if t.starts_with("application/x-www-form-urlencoded") => {
                    parse_form(&self.content)
                }
                _ => HashMap::new(),
            }
        })
    }

    /// A read-only view over the body bytes.
    pub fn body(&self) -> BodyReader {
        BodyReader::new(self.content.clone().freeze(), self.content_complete)
    }
}

/// Parses `k=v&k2=v2` data, percent-decoding keys and values. First value
/// wins for repeated keys.
fn parse_form(data: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();

    for piece in data.split(|b| *b == b'&') {
        if piece.is_empty() {
            continue;
        }
        let (key, value) = match piece.iter().position(|b| *b == b'=') {
            Some(idx) => (&piece[..idx], &piece[idx + 1..]),
            None => (piece, &[][..]),
        };
        let key = percent_decode(key);
        map.entry(key).or_insert_with(|| percent_decode(value));
    }

    map
}

fn percent_decode(data: &[u8]) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(data)).into_owned()
}
