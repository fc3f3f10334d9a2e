//! OneJSON envelopes.
//!
//! Requests travel as `{"id":"N","version":"1.0","params":...}` and replies as
//! `{"id":"N","code":200,"msg":"...","data":...}`. Property values and service
//! arguments are arbitrary JSON the device application owns, so this module
//! never deserializes them. It slices them out of the envelope as raw JSON text
//! with a small scanner and leaves the interpretation to the handlers.

use super::Error;
use crate::config::MAX_REPLY_DATA_LEN;
use core::fmt::{self, Write as _};
use heapless::String;

/// Protocol version carried by every request.
pub const VERSION: &str = "1.0";
/// Reply code for success.
pub const CODE_OK: i32 = 200;
/// Reply code the device answers with when a downlink could not be applied.
pub const CODE_FAILED: i32 = 100;
/// Longest request id kept from an envelope.
pub const MAX_ID_LEN: usize = 16;
/// Longest `msg` member kept from a reply.
pub const MAX_MSG_LEN: usize = 64;

/// The `params` member of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body<'a> {
    /// JSON text inserted verbatim.
    Json(&'a str),
    /// Text sent as a JSON string, for example a hex encoded buffer.
    Raw(&'a str),
}

impl Body<'_> {
    /// `true` for [`Body::Raw`].
    pub fn is_raw(&self) -> bool {
        matches!(self, Body::Raw(_))
    }
}

/// A decoded reply envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Id of the request this answers.
    pub id: String<MAX_ID_LEN>,
    /// Platform result code, 200 on success.
    pub code: i32,
    /// Human readable status, possibly empty.
    pub msg: String<MAX_MSG_LEN>,
    /// The `data` member. For raw requests this is the unquoted string, for
    /// structured requests the JSON text. Empty when the reply had none.
    pub data: String<MAX_REPLY_DATA_LEN>,
}

/// A decoded downlink request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    /// Request id to echo in the reply.
    pub id: &'a str,
    /// JSON text of `params`, if present.
    pub params: Option<&'a str>,
}

/// Appends JSON text to a caller buffer.
#[derive(Debug)]
pub struct JsonWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> JsonWriter<'a> {
    /// Start writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Append `text` as is.
    pub fn raw(&mut self, text: &str) -> Result<(), Error> {
        let end = self.len + text.len();
        self.buf
            .get_mut(self.len..end)
            .ok_or(Error::BufferOverflow)?
            .copy_from_slice(text.as_bytes());
        self.len = end;
        Ok(())
    }

    /// Append `text` as a quoted, escaped JSON string.
    pub fn string(&mut self, text: &str) -> Result<(), Error> {
        let n = serde_json_core::to_slice(&text, &mut self.buf[self.len..])
            .map_err(|_| Error::BufferOverflow)?;
        self.len += n;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` before anything was written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The written text.
    pub fn as_str(&self) -> &str {
        // Only whole `&str` values are ever copied in.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    /// Finish and return the number of bytes written.
    pub fn finish(self) -> usize {
        self.len
    }
}

impl fmt::Write for JsonWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.raw(s).map_err(|_| fmt::Error)
    }
}

/// Encode a request envelope into `buf`, returning its length.
pub fn write_request(buf: &mut [u8], id: u32, body: &Body<'_>) -> Result<usize, Error> {
    let mut w = JsonWriter::new(buf);
    write!(w, "{{\"id\":\"{}\",\"version\":\"{}\",\"params\":", id, VERSION)
        .map_err(|_| Error::BufferOverflow)?;
    match body {
        Body::Json(json) if json.trim().is_empty() => w.raw("{}")?,
        Body::Json(json) => w.raw(json)?,
        Body::Raw(raw) => w.string(raw)?,
    }
    w.raw("}")?;
    Ok(w.finish())
}

/// Encode a reply envelope into `buf`, returning its length.
///
/// `data` is JSON text; the member is left out when it is `None`.
pub fn write_reply(buf: &mut [u8], id: &str, code: i32, data: Option<&str>) -> Result<usize, Error> {
    let mut w = JsonWriter::new(buf);
    w.raw("{\"id\":")?;
    w.string(id)?;
    let msg = if code == CODE_OK { "success" } else { "failed" };
    write!(w, ",\"code\":{},\"msg\":\"{}\"", code, msg).map_err(|_| Error::BufferOverflow)?;
    if let Some(data) = data {
        w.raw(",\"data\":")?;
        w.raw(data)?;
    }
    w.raw("}")?;
    Ok(w.finish())
}

/// Append one device entry of a pack post:
/// `{"identity":{"productID":..,"deviceName":..},"properties":..,"events":..}`.
///
/// `properties` and `events` are JSON objects; `None` sends `{}`.
pub fn write_pack_entry(
    w: &mut JsonWriter<'_>,
    product_id: &str,
    device_name: &str,
    properties: Option<&str>,
    events: Option<&str>,
) -> Result<(), Error> {
    w.raw("{\"identity\":{\"productID\":")?;
    w.string(product_id)?;
    w.raw(",\"deviceName\":")?;
    w.string(device_name)?;
    w.raw("},\"properties\":")?;
    w.raw(properties.unwrap_or("{}"))?;
    w.raw(",\"events\":")?;
    w.raw(events.unwrap_or("{}"))?;
    w.raw("}")
}

/// Decode a downlink request.
pub fn parse_request(text: &str) -> Result<Request<'_>, Error> {
    let mut id = None;
    let mut params = None;
    for member in members(text)? {
        let (key, value) = member?;
        match key {
            "id" => id = Some(string_contents(value)?),
            "params" => params = Some(value),
            _ => {}
        }
    }
    Ok(Request {
        id: id.ok_or(Error::Decode)?,
        params,
    })
}

/// Decode a reply. `as_raw` selects how `data` is kept, see [`Reply::data`].
///
/// `id` and `code` are required; a request envelope is not a reply.
pub fn parse_reply(text: &str, as_raw: bool) -> Result<Reply, Error> {
    let mut reply = Reply::default();
    let (mut has_id, mut has_code) = (false, false);
    for member in members(text)? {
        let (key, value) = member?;
        match key {
            "id" => {
                reply.id = decode(value)?;
                has_id = true;
            }
            "code" => {
                reply.code = decode(value)?;
                has_code = true;
            }
            "msg" => reply.msg = decode(value).unwrap_or_default(),
            "data" if as_raw => reply.data = decode(value)?,
            "data" => reply.data = String::try_from(value).map_err(|_| Error::BufferOverflow)?,
            _ => {}
        }
    }
    if has_id && has_code { Ok(reply) } else { Err(Error::Decode) }
}

/// Deserialize one scalar JSON value.
pub fn decode<'de, T: serde::Deserialize<'de>>(value: &'de str) -> Result<T, Error> {
    serde_json_core::from_str(value)
        .map(|(v, _)| v)
        .map_err(|_| Error::Decode)
}

/// The text between the quotes of a JSON string value, escapes left as is.
pub fn string_contents(value: &str) -> Result<&str, Error> {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && string_end(bytes, 0)? == bytes.len() {
        Ok(&value[1..value.len() - 1])
    } else {
        Err(Error::Decode)
    }
}

/// Iterate the `(name, value)` members of a JSON object. Values are raw JSON text.
pub fn members(object: &str) -> Result<Members<'_>, Error> {
    let bytes = object.as_bytes();
    let start = skip_ws(bytes, 0);
    if bytes.get(start) != Some(&b'{') {
        return Err(Error::Decode);
    }
    Ok(Members {
        text: object,
        pos: start + 1,
        done: false,
    })
}

/// Iterate the elements of a JSON array as raw JSON text.
pub fn elements(array: &str) -> Result<Elements<'_>, Error> {
    let bytes = array.as_bytes();
    let start = skip_ws(bytes, 0);
    if bytes.get(start) != Some(&b'[') {
        return Err(Error::Decode);
    }
    Ok(Elements {
        text: array,
        pos: start + 1,
        done: false,
    })
}

/// Iterator returned by [`members`].
#[derive(Debug, Clone)]
pub struct Members<'a> {
    text: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> Iterator for Members<'a> {
    type Item = Result<(&'a str, &'a str), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.scan();
        match result {
            Ok(Some(member)) => Some(Ok(member)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> Members<'a> {
    fn scan(&mut self) -> Result<Option<(&'a str, &'a str)>, Error> {
        let text = self.text;
        let bytes = text.as_bytes();
        let mut i = skip_ws(bytes, self.pos);
        match bytes.get(i) {
            Some(b'}') => return Ok(None),
            Some(b'"') => {}
            _ => return Err(Error::Decode),
        }
        let key_end = string_end(bytes, i)?;
        let key = &text[i + 1..key_end - 1];

        i = skip_ws(bytes, key_end);
        if bytes.get(i) != Some(&b':') {
            return Err(Error::Decode);
        }
        let start = skip_ws(bytes, i + 1);
        let end = value_end(bytes, start)?;
        let value = &text[start..end];

        self.pos = next_separator(bytes, end, b'}', &mut self.done)?;
        Ok(Some((key, value)))
    }
}

/// Iterator returned by [`elements`].
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    text: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<&'a str, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let text = self.text;
        let bytes = text.as_bytes();
        let start = skip_ws(bytes, self.pos);
        if bytes.get(start) == Some(&b']') {
            self.done = true;
            return None;
        }
        let scanned = value_end(bytes, start)
            .and_then(|end| next_separator(bytes, end, b']', &mut self.done).map(|pos| (pos, end)));
        match scanned {
            Ok((pos, end)) => {
                self.pos = pos;
                Some(Ok(&text[start..end]))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// Consume the `,` or closing byte after a value. Returns where scanning resumes.
fn next_separator(bytes: &[u8], from: usize, close: u8, done: &mut bool) -> Result<usize, Error> {
    let i = skip_ws(bytes, from);
    match bytes.get(i) {
        Some(b',') => Ok(i + 1),
        Some(&b) if b == close => {
            *done = true;
            Ok(i + 1)
        }
        _ => Err(Error::Decode),
    }
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while matches!(bytes.get(i), Some(b' ' | b'\t' | b'\r' | b'\n')) {
        i += 1;
    }
    i
}

// One past the closing quote of the string starting at `i`.
fn string_end(bytes: &[u8], i: usize) -> Result<usize, Error> {
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'"' => return Ok(j + 1),
            _ => j += 1,
        }
    }
    Err(Error::Decode)
}

// One past the end of the JSON value starting at `i`.
fn value_end(bytes: &[u8], i: usize) -> Result<usize, Error> {
    match bytes.get(i) {
        None => Err(Error::Decode),
        Some(b'"') => string_end(bytes, i),
        Some(b'{' | b'[') => {
            let mut depth = 0usize;
            let mut j = i;
            while j < bytes.len() {
                match bytes[j] {
                    b'"' => {
                        j = string_end(bytes, j)?;
                        continue;
                    }
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(j + 1);
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            Err(Error::Decode)
        }
        Some(_) => {
            let mut j = i;
            while j < bytes.len()
                && !matches!(bytes[j], b',' | b'}' | b']' | b' ' | b'\t' | b'\r' | b'\n')
            {
                j += 1;
            }
            if j == i { Err(Error::Decode) } else { Ok(j) }
        }
    }
}
