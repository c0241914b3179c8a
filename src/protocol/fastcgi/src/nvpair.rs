// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The length-prefixed name/value pair encoding used for Params payloads and
//! management queries. Each length field is 1 byte if the length is below
//! 128, otherwise 4 bytes big-endian with the high bit set.

use bytes::BufMut;
use nom::{bytes::streaming::take, IResult};

/// Decodes whole pairs from the front of `input`, returning the pairs and
/// the number of bytes consumed. A trailing truncated pair is left
/// unconsumed: pairs may straddle record boundaries, so the caller holds the
/// remainder and retries once more bytes arrive.
pub fn decode_prefix(input: &[u8]) -> (Vec<(Vec<u8>, Vec<u8>)>, usize) {
    let mut pairs = Vec::new();
    let mut consumed = 0;

    while consumed < input.len() {
        match pair(&input[consumed..]) {
            Ok((remaining, decoded)) => {
                consumed = input.len() - remaining.len();
                pairs.push(decoded);
            }
            Err(_) => break,
        }
    }

    (pairs, consumed)
}

/// Encodes pairs in order. Total; the inverse of [`decode_prefix`] over a
/// complete buffer. Duplicate keys are written as-is, never coalesced.
pub fn encode_all<'a, I>(pairs: I, buffer: &mut dyn BufMut)
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    for (key, value) in pairs {
        encode_length(key.len(), buffer);
        encode_length(value.len(), buffer);
        buffer.put_slice(key);
        buffer.put_slice(value);
    }
}

fn encode_length(len: usize, buffer: &mut dyn BufMut) {
    if len < 0x80 {
        buffer.put_u8(len as u8);
    } else {
        buffer.put_u32(len as u32 | 0x8000_0000);
    }
}

fn length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first) = take(1usize)(input)?;

    if first[0] < 0x80 {
        Ok((input, first[0] as usize))
    } else {
        let (input, rest) = take(3usize)(input)?;
        let len = u32::from_be_bytes([first[0] & 0x7f, rest[0], rest[1], rest[2]]);
        Ok((input, len as usize))
    }
}

fn pair(input: &[u8]) -> IResult<&[u8], (Vec<u8>, Vec<u8>)> {
    let (input, key_len) = length(input)?;
    let (input, value_len) = length(input)?;
    let (input, key) = take(key_len)(input)?;
    let (input, value) = take(value_len)(input)?;

    Ok((input, (key.to_vec(), value.to_vec())))
}
