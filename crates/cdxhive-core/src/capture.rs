//! Packed Capture Records
//!
//! This module defines the `Capture` type, a single CDX record encoded to a
//! reasonably space-efficient packed representation. Records are encoded as two
//! byte arrays called the key and the value.
//!
//! ## Key Layout
//! The key is designed to be bytewise sorted: the urlkey concatenated with the
//! timestamp as a big-endian 64-bit value.
//!
//! ```text
//!     0              urlkey.len                    urlkey.len + 8
//!     +--------------+-----------------------------+
//!     | ASCII urlkey | 64-bit big-endian timestamp |
//!     +--------------+-----------------------------+
//! ```
//!
//! Version 4 keys are extended with the WARC filename and record offset plus
//! two NUL bytes. The first NUL determines the length of the filename
//! (searching backwards from the end). The second is a flag indicating this is
//! the new key version, so captures of the same URL and timestamp in different
//! WARC files become distinct records.
//!
//! ```text
//!     +---------+------------------+-----+----------+-----+---------------+
//!     | urlkey  | 64-bit timestamp | NUL | filename | NUL | 64-bit offset |
//!     +---------+------------------+-----+----------+-----+---------------+
//! ```
//!
//! ## Value Layout
//! The value is a static list of fields packed with the varint module. The
//! first field is a schema version number so fields can be added or removed in
//! later versions. Versions 0 through 4 can be decoded; new records are written
//! as version 3 (everything in the value) or version 4 (filename and offset
//! moved into the key). Anything newer is rejected with an "encoding too new"
//! error rather than misread.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::base32;
use crate::error::{Error, Result};
use crate::varint;

/// Field names that may appear as CDXJ extra fields but are still encodable in
/// packed versions 3 and 4, because they are folded into the urlkey instead.
const INFERRABLE_EXTRA_FIELDS: [&str; 2] = ["method", "requestBody"];

/// A single CDX capture record
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub urlkey: String,
    pub timestamp: u64,
    pub original: String,
    pub mimetype: String,
    pub status: i32,
    pub digest: String,
    pub length: i64,
    pub file: String,
    pub compressed_offset: i64,
    pub redirecturl: String,
    pub robotflags: String,

    // Additional properties for CDX14
    pub original_length: i64,
    pub original_compressed_offset: i64,
    pub original_file: String,

    /// Extra CDXJ fields such as "method" and "requestBody"
    pub extra: BTreeMap<String, Value>,
}

impl Default for Capture {
    fn default() -> Self {
        Capture {
            urlkey: String::new(),
            timestamp: 0,
            original: "-".to_string(),
            mimetype: "-".to_string(),
            status: -1,
            digest: "-".to_string(),
            length: -1,
            file: "-".to_string(),
            compressed_offset: -1,
            redirecturl: "-".to_string(),
            robotflags: "-".to_string(),
            original_length: -1,
            original_compressed_offset: -1,
            original_file: "-".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Encode a version 0 style key: urlkey then big-endian timestamp
pub fn encode_key_v0(urlkey: &str, timestamp: u64) -> Vec<u8> {
    let mut key = BytesMut::with_capacity(urlkey.len() + 8);
    key.put_slice(urlkey.as_bytes());
    key.put_u64(timestamp);
    key.to_vec()
}

/// Encode a version 4 style key which also carries the filename and offset
pub fn encode_key_v4(urlkey: &str, timestamp: u64, file: &str, offset: i64) -> Vec<u8> {
    let mut key = BytesMut::with_capacity(urlkey.len() + 8 + 1 + file.len() + 1 + 8);
    key.put_slice(urlkey.as_bytes());
    key.put_u64(timestamp);
    key.put_u8(0);
    key.put_slice(file.as_bytes());
    key.put_u8(0);
    key.put_i64(offset);
    key.to_vec()
}

impl Capture {
    /// Decode a record from its key and value byte arrays
    pub fn decode(key: &[u8], value: &[u8]) -> Result<Capture> {
        let mut capture = Capture::default();
        capture.decode_key(key)?;
        capture.decode_value(&mut &value[..])?;
        Ok(capture)
    }

    pub fn decode_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() > 8 && key[key.len() - 9] == 0 {
            self.decode_key_v4(key)
        } else {
            self.decode_key_v0(key)
        }
    }

    fn decode_key_v0(&mut self, key: &[u8]) -> Result<()> {
        if key.len() < 8 {
            return Err(Error::BadKey);
        }
        let split = key.len() - 8;
        self.urlkey = String::from_utf8_lossy(&key[..split]).into_owned();
        self.timestamp = (&key[split..]).get_u64();
        Ok(())
    }

    fn decode_key_v4(&mut self, key: &[u8]) -> Result<()> {
        // Search backwards, skipping the version flag NUL at len - 9, for the
        // NUL that terminates the timestamp.
        let i = match key[..key.len() - 9].iter().rposition(|&b| b == 0) {
            Some(i) if i > 8 => i,
            _ => return Err(Error::BadKey),
        };
        self.urlkey = String::from_utf8_lossy(&key[..i - 8]).into_owned();
        self.timestamp = (&key[i - 8..i]).get_u64();
        self.file = String::from_utf8_lossy(&key[i + 1..key.len() - 9]).into_owned();
        self.compressed_offset = (&key[key.len() - 8..]).get_i64();
        Ok(())
    }

    pub fn encode_key(&self, version: u32) -> Result<Vec<u8>> {
        match version {
            0..=3 => Ok(encode_key_v0(&self.urlkey, self.timestamp)),
            4 => Ok(encode_key_v4(
                &self.urlkey,
                self.timestamp,
                &self.file,
                self.compressed_offset,
            )),
            _ => Err(Error::UnsupportedIndexVersion(version)),
        }
    }

    pub fn decode_value(&mut self, buf: &mut impl Buf) -> Result<()> {
        let version = varint::decode_u64(buf)?;
        match version {
            0 => self.decode_value_v0(buf),
            1 => self.decode_value_v1(buf),
            2 => self.decode_value_v2(buf),
            3 => self.decode_value_v3(buf),
            4 => self.decode_value_v4(buf),
            v => Err(Error::UnsupportedVersion(v as u32)),
        }
    }

    fn decode_value_v0(&mut self, buf: &mut impl Buf) -> Result<()> {
        self.original = varint::decode_str(buf)?;
        self.status = varint::decode_i64(buf)? as i32;
        self.mimetype = varint::decode_str(buf)?;
        self.length = varint::decode_i64(buf)?;
        self.digest = varint::decode_str(buf)?;
        self.file = varint::decode_str(buf)?;
        self.compressed_offset = varint::decode_i64(buf)?;
        self.redirecturl = varint::decode_str(buf)?;
        self.robotflags = "-".to_string();
        Ok(())
    }

    fn decode_value_v1(&mut self, buf: &mut impl Buf) -> Result<()> {
        self.original = varint::decode_str(buf)?;
        self.status = varint::decode_i64(buf)? as i32;
        self.mimetype = varint::decode_str(buf)?;
        self.length = varint::decode_i64(buf)?;
        self.digest = base32::encode(&varint::decode_bytes(buf)?);
        self.file = varint::decode_str(buf)?;
        self.compressed_offset = varint::decode_i64(buf)?;
        self.redirecturl = varint::decode_str(buf)?;
        self.robotflags = "-".to_string();
        Ok(())
    }

    fn decode_value_v2(&mut self, buf: &mut impl Buf) -> Result<()> {
        self.decode_value_v1(buf)?;
        self.robotflags = varint::decode_str(buf)?;
        Ok(())
    }

    fn decode_value_v3(&mut self, buf: &mut impl Buf) -> Result<()> {
        self.decode_value_v2(buf)?;
        self.original_length = varint::decode_i64(buf)?;
        self.original_file = varint::decode_str(buf)?;
        self.original_compressed_offset = varint::decode_i64(buf)?;
        Ok(())
    }

    fn decode_value_v4(&mut self, buf: &mut impl Buf) -> Result<()> {
        self.original = varint::decode_str(buf)?;
        self.status = varint::decode_i64(buf)? as i32;
        self.mimetype = varint::decode_str(buf)?;
        self.length = varint::decode_i64(buf)?;
        self.digest = base32::encode(&varint::decode_bytes(buf)?);
        self.redirecturl = varint::decode_str(buf)?;
        self.robotflags = varint::decode_str(buf)?;
        self.original_length = varint::decode_i64(buf)?;
        self.original_file = varint::decode_str(buf)?;
        self.original_compressed_offset = varint::decode_i64(buf)?;
        Ok(())
    }

    pub fn encode_value(&self, version: u32) -> Result<Vec<u8>> {
        match version {
            3 => {
                self.ensure_no_extra_fields(version)?;
                Ok(self.encode_value_v3())
            }
            4 => {
                self.ensure_no_extra_fields(version)?;
                Ok(self.encode_value_v4())
            }
            _ => Err(Error::UnsupportedIndexVersion(version)),
        }
    }

    fn ensure_no_extra_fields(&self, version: u32) -> Result<()> {
        for field in self.extra.keys() {
            if !INFERRABLE_EXTRA_FIELDS.contains(&field.as_str()) {
                return Err(Error::ExtraFields(version));
            }
        }
        Ok(())
    }

    fn encode_value_v3(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        varint::encode_u64(&mut buf, 3);
        varint::encode_str(&mut buf, &self.original);
        varint::encode_i64(&mut buf, self.status as i64);
        varint::encode_str(&mut buf, &self.mimetype);
        varint::encode_i64(&mut buf, self.length);
        varint::encode_bytes(&mut buf, &base32::decode(&self.digest));
        varint::encode_str(&mut buf, &self.file);
        varint::encode_i64(&mut buf, self.compressed_offset);
        varint::encode_str(&mut buf, &self.redirecturl);
        varint::encode_str(&mut buf, &self.robotflags);
        varint::encode_i64(&mut buf, self.original_length);
        varint::encode_str(&mut buf, &self.original_file);
        varint::encode_i64(&mut buf, self.original_compressed_offset);
        buf.to_vec()
    }

    fn encode_value_v4(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        varint::encode_u64(&mut buf, 4);
        varint::encode_str(&mut buf, &self.original);
        varint::encode_i64(&mut buf, self.status as i64);
        varint::encode_str(&mut buf, &self.mimetype);
        varint::encode_i64(&mut buf, self.length);
        varint::encode_bytes(&mut buf, &base32::decode(&self.digest));
        varint::encode_str(&mut buf, &self.redirecturl);
        varint::encode_str(&mut buf, &self.robotflags);
        varint::encode_i64(&mut buf, self.original_length);
        varint::encode_str(&mut buf, &self.original_file);
        varint::encode_i64(&mut buf, self.original_compressed_offset);
        buf.to_vec()
    }

    /// Gets the value of a field by name. Several names are supported for some
    /// fields as pywb and wayback-cdx-server use different names.
    ///
    /// Returns `Err` for unknown fields, unless this capture carries extra CDXJ
    /// fields, in which case unknown names simply look up the extra map.
    pub fn get(&self, field: &str) -> Result<Value> {
        match field {
            "urlkey" => Ok(Value::from(self.urlkey.clone())),
            "timestamp" => Ok(Value::from(self.timestamp)),
            "url" | "original" => Ok(Value::from(self.original.clone())),
            "mime" | "mimetype" => Ok(Value::from(self.mimetype.clone())),
            "statuscode" | "status" => Ok(Value::from(self.status)),
            "digest" => Ok(Value::from(self.digest.clone())),
            "redirecturl" | "redirect" => Ok(Value::from(self.redirecturl.clone())),
            "robotflags" => Ok(Value::from(self.robotflags.clone())),
            "length" => Ok(optional_long(self.length)),
            "offset" => Ok(Value::from(self.compressed_offset)),
            "filename" => Ok(Value::from(self.file.clone())),
            "originalLength" => Ok(optional_long(self.original_length)),
            "originalOffset" => Ok(optional_long(self.original_compressed_offset)),
            "originalFilename" => Ok(Value::from(self.original_file.clone())),
            "range" => {
                if self.length == -1 {
                    Ok(Value::from(format!("bytes={}-", self.compressed_offset)))
                } else {
                    Ok(Value::from(format!(
                        "bytes={}-{}",
                        self.compressed_offset,
                        self.compressed_offset + self.length - 1
                    )))
                }
            }
            _ => {
                if self.extra.is_empty() {
                    Err(Error::NoSuchField(field.to_string()))
                } else {
                    Ok(self.extra.get(field).cloned().unwrap_or(Value::Null))
                }
            }
        }
    }

    /// Like [`get`](Capture::get) but rendered as plain text the way filters
    /// and the text output format see it. Null fields become `None`.
    pub fn get_text(&self, field: &str) -> Result<Option<String>> {
        Ok(match self.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    /// Sets a field by name, coercing JSON values to the field's type. Unknown
    /// names land in the extra CDXJ field map.
    pub fn put(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "urlkey" => self.urlkey = coerce_string(field, value)?,
            "timestamp" => self.timestamp = coerce_long(field, value)? as u64,
            "url" | "original" => self.original = coerce_string(field, value)?,
            "mime" | "mimetype" => self.mimetype = coerce_string(field, value)?,
            "statuscode" | "status" => self.status = coerce_long(field, value)? as i32,
            "digest" => self.digest = coerce_string(field, value)?,
            "redirecturl" | "redirect" => self.redirecturl = coerce_string(field, value)?,
            "robotflags" => self.robotflags = coerce_string(field, value)?,
            "length" => self.length = coerce_long(field, value)?,
            "offset" => self.compressed_offset = coerce_long(field, value)?,
            "filename" => self.file = coerce_string(field, value)?,
            "originalLength" => self.original_length = coerce_long(field, value)?,
            "originalOffset" => self.original_compressed_offset = coerce_long(field, value)?,
            "originalFilename" => self.original_file = coerce_string(field, value)?,
            _ => {
                self.extra.insert(field.to_string(), value);
            }
        }
        Ok(())
    }

    /// Format as a CDX11 line, or CDX14 when `cdx14` is set.
    pub fn to_cdx_line(&self, cdx14: bool) -> String {
        let mut out = String::new();
        out.push_str(&self.urlkey);
        out.push(' ');
        out.push_str(&self.timestamp.to_string());
        out.push(' ');
        out.push_str(&self.original);
        out.push(' ');
        out.push_str(&self.mimetype);
        out.push(' ');
        out.push_str(&self.status.to_string());
        out.push(' ');
        out.push_str(&self.digest);
        out.push(' ');
        out.push_str(&self.redirecturl);
        out.push(' ');
        out.push_str(&self.robotflags);
        out.push(' ');
        if self.length == -1 {
            out.push('-');
        } else {
            out.push_str(&self.length.to_string());
        }
        out.push(' ');
        out.push_str(&self.compressed_offset.to_string());
        out.push(' ');
        out.push_str(&self.file);

        if cdx14 {
            out.push(' ');
            if self.original_length > 0 {
                out.push_str(&self.original_length.to_string());
            } else {
                out.push('-');
            }
            out.push(' ');
            if self.original_compressed_offset > 0 {
                out.push_str(&self.original_compressed_offset.to_string());
            } else {
                out.push('-');
            }
            out.push(' ');
            out.push_str(&self.original_file);
        }

        out
    }

    pub fn date(&self) -> Result<DateTime<Utc>> {
        timestamp_to_date(self.timestamp)
    }
}

fn optional_long(value: i64) -> Value {
    if value == -1 {
        Value::Null
    } else {
        Value::from(value)
    }
}

fn coerce_long(field: &str, value: Value) -> Result<i64> {
    match value {
        Value::Null => Ok(-1),
        Value::String(s) => s
            .parse()
            .map_err(|_| Error::ExpectedNumber(field.to_string())),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::ExpectedNumber(field.to_string())),
        _ => Err(Error::ExpectedNumber(field.to_string())),
    }
}

fn coerce_string(field: &str, value: Value) -> Result<String> {
    match value {
        Value::Null => Ok("-".to_string()),
        Value::String(s) => Ok(s),
        _ => Err(Error::InvalidCdxLine(format!(
            "expected a string in field {}",
            field
        ))),
    }
}

pub(crate) const PAD_TIMESTAMP: &str = "00000000000000"; // we expect 14 digits

/// Convert a numeric 14 digit timestamp to a UTC datetime, right-padding with
/// zeroes if it is short.
pub fn timestamp_to_date(timestamp: u64) -> Result<DateTime<Utc>> {
    let mut text = timestamp.to_string();
    if text.len() < PAD_TIMESTAMP.len() {
        warn!("padding timestamp shorter than 14 digits: {}", text);
        text.push_str(&PAD_TIMESTAMP[text.len()..]);
    }
    let naive = NaiveDateTime::parse_from_str(&text, "%Y%m%d%H%M%S")
        .map_err(|_| Error::InvalidTimestamp(text.clone()))?;
    Ok(naive.and_utc())
}

/// Epoch milliseconds for a 14 digit timestamp, used for closest-match ordering
pub fn timestamp_to_millis(timestamp: u64) -> Result<i64> {
    Ok(timestamp_to_date(timestamp)?.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn dummy_record() -> Capture {
        let mut src = Capture::default();
        src.compressed_offset = 1234;
        src.digest = "2HQQSVUDLU4NZ67TN2KS3NG5AIVBVNFB".to_string();
        src.file = "file".to_string();
        src.length = 12345;
        src.mimetype = "mimetype".to_string();
        src.original = "original".to_string();
        src.redirecturl = "redirecturl".to_string();
        src.status = 200;
        src.timestamp = 20140101123400;
        src.urlkey = "urlkey".to_string();
        src
    }

    fn assert_fields_equal(src: &Capture, dst: &Capture) {
        assert_eq!(src.compressed_offset, dst.compressed_offset);
        assert_eq!(src.digest, dst.digest);
        assert_eq!(src.file, dst.file);
        assert_eq!(src.length, dst.length);
        assert_eq!(src.mimetype, dst.mimetype);
        assert_eq!(src.original, dst.original);
        assert_eq!(src.redirecturl, dst.redirecturl);
        assert_eq!(src.status, dst.status);
        assert_eq!(src.timestamp, dst.timestamp);
        assert_eq!(src.urlkey, dst.urlkey);
    }

    // ---------------------------------------------------------------
    // Version 3 key and value
    // ---------------------------------------------------------------

    #[test]
    fn test_records_can_be_encoded_and_decoded() {
        let src = dummy_record();

        let key = src.encode_key(3).unwrap();
        let value = src.encode_value(3).unwrap();

        assert_eq!(value[0], 3);
        assert_eq!(value[1], 8);
        assert_eq!(value[2], b'o');
        assert_eq!(value[3], b'r');

        let dst = Capture::decode(&key, &value).unwrap();
        assert_fields_equal(&src, &dst);

        assert_eq!(src.date().unwrap(), dst.date().unwrap());
        assert_eq!(src.date().unwrap().timestamp_millis(), 1388579640000);
    }

    #[test]
    fn test_v0_key_layout() {
        let key = encode_key_v0("urlkey", 20140101123400);
        assert_eq!(key.len(), "urlkey".len() + 8);
        assert_eq!(&key[..6], b"urlkey");

        let mut capture = Capture::default();
        capture.decode_key(&key).unwrap();
        assert_eq!(capture.urlkey, "urlkey");
        assert_eq!(capture.timestamp, 20140101123400);
    }

    // ---------------------------------------------------------------
    // Version 4 key and value
    // ---------------------------------------------------------------

    #[test]
    fn test_v4_records_can_be_encoded_and_decoded() {
        let src = dummy_record();

        let key = src.encode_key(4).unwrap();
        let value = src.encode_value(4).unwrap();

        assert_eq!(value[0], 4);

        let dst = Capture::decode(&key, &value).unwrap();
        assert_fields_equal(&src, &dst);
    }

    #[test]
    fn test_v4_key_carries_file_and_offset() {
        let key = encode_key_v4("urlkey", 20140101123400, "a.warc.gz", 5678);
        // Version flag NUL sits just before the trailing offset.
        assert_eq!(key[key.len() - 9], 0);

        let mut capture = Capture::default();
        capture.decode_key(&key).unwrap();
        assert_eq!(capture.urlkey, "urlkey");
        assert_eq!(capture.timestamp, 20140101123400);
        assert_eq!(capture.file, "a.warc.gz");
        assert_eq!(capture.compressed_offset, 5678);
    }

    #[test]
    fn test_v4_keys_distinguish_files() {
        let a = encode_key_v4("urlkey", 20140101123400, "a.warc.gz", 0);
        let b = encode_key_v4("urlkey", 20140101123400, "b.warc.gz", 0);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_bad_v4_key_is_rejected() {
        // NUL flag is present but there is no room for a timestamp before it.
        let mut key = vec![0u8; 10];
        key[1] = 1;
        assert!(matches!(
            Capture::default().decode_key(&key),
            Err(Error::BadKey)
        ));
    }

    // ---------------------------------------------------------------
    // Older value versions and forward compatibility
    // ---------------------------------------------------------------

    #[test]
    fn test_decode_v0_value() {
        let mut buf = bytes::BytesMut::new();
        varint::encode_u64(&mut buf, 0);
        varint::encode_str(&mut buf, "http://example.org/");
        varint::encode_i64(&mut buf, 200);
        varint::encode_str(&mut buf, "text/html");
        varint::encode_i64(&mut buf, 1024);
        varint::encode_str(&mut buf, "SHA1TEXT");
        varint::encode_str(&mut buf, "example.warc.gz");
        varint::encode_i64(&mut buf, 42);
        varint::encode_str(&mut buf, "-");

        let mut capture = Capture::default();
        capture.decode_value(&mut buf.freeze()).unwrap();
        assert_eq!(capture.original, "http://example.org/");
        assert_eq!(capture.status, 200);
        assert_eq!(capture.mimetype, "text/html");
        assert_eq!(capture.length, 1024);
        // Version 0 kept the digest as text rather than packed bytes.
        assert_eq!(capture.digest, "SHA1TEXT");
        assert_eq!(capture.file, "example.warc.gz");
        assert_eq!(capture.compressed_offset, 42);
        assert_eq!(capture.robotflags, "-");
    }

    #[test]
    fn test_too_new_value_version_is_an_error() {
        let mut buf = bytes::BytesMut::new();
        varint::encode_u64(&mut buf, 5);
        let err = Capture::default().decode_value(&mut buf.freeze()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(5)));
        assert!(err.to_string().contains("too new"));
    }

    #[test]
    fn test_truncated_value_is_an_error() {
        let src = dummy_record();
        let value = src.encode_value(3).unwrap();
        let err = Capture::default()
            .decode_value(&mut &value[..value.len() / 2])
            .unwrap_err();
        assert!(matches!(err, Error::Truncated));
    }

    #[test]
    fn test_absent_fields_survive_encoding() {
        let mut src = Capture::default();
        src.urlkey = "org,example)/".to_string();
        src.timestamp = 20060101000000;
        src.original = "http://example.org/".to_string();

        let value = src.encode_value(3).unwrap();
        let key = src.encode_key(3).unwrap();
        let dst = Capture::decode(&key, &value).unwrap();
        assert_eq!(dst.status, -1);
        assert_eq!(dst.length, -1);
        assert_eq!(dst.digest, "");
        assert_eq!(dst.original_length, -1);
    }

    // ---------------------------------------------------------------
    // Field access
    // ---------------------------------------------------------------

    #[test]
    fn test_get_supports_field_aliases() {
        let src = dummy_record();
        assert_eq!(src.get("url").unwrap(), src.get("original").unwrap());
        assert_eq!(src.get("mime").unwrap(), src.get("mimetype").unwrap());
        assert_eq!(src.get("status").unwrap(), src.get("statuscode").unwrap());
        assert_eq!(src.get("redirect").unwrap(), src.get("redirecturl").unwrap());
    }

    #[test]
    fn test_get_unknown_field_is_an_error() {
        let err = Capture::default().get("nope").unwrap_err();
        assert!(matches!(err, Error::NoSuchField(_)));
    }

    #[test]
    fn test_get_null_fields() {
        let capture = Capture::default();
        assert_eq!(capture.get("length").unwrap(), Value::Null);
        assert_eq!(capture.get("originalLength").unwrap(), Value::Null);
        assert_eq!(capture.get_text("length").unwrap(), None);
    }

    #[test]
    fn test_range_field_is_computed() {
        let mut capture = dummy_record();
        assert_eq!(
            capture.get("range").unwrap(),
            Value::from("bytes=1234-13578")
        );
        capture.length = -1;
        assert_eq!(capture.get("range").unwrap(), Value::from("bytes=1234-"));
    }

    #[test]
    fn test_extra_fields_accessible_by_name() {
        let mut capture = dummy_record();
        capture.put("method", Value::from("POST")).unwrap();
        assert_eq!(capture.get("method").unwrap(), Value::from("POST"));
        // With extras present, unknown names are null rather than an error.
        assert_eq!(capture.get("nope").unwrap(), Value::Null);
    }

    #[test]
    fn test_extra_fields_block_packed_encoding() {
        let mut capture = dummy_record();
        capture.put("weird", Value::from("x")).unwrap();
        assert!(matches!(
            capture.encode_value(3),
            Err(Error::ExtraFields(3))
        ));
        // method and requestBody are folded into the urlkey so they're fine.
        let mut capture = dummy_record();
        capture.put("method", Value::from("POST")).unwrap();
        assert!(capture.encode_value(3).is_ok());
    }

    // ---------------------------------------------------------------
    // CDX line formatting
    // ---------------------------------------------------------------

    #[test]
    fn test_to_cdx11_line() {
        let src = dummy_record();
        assert_eq!(
            src.to_cdx_line(false),
            "urlkey 20140101123400 original mimetype 200 \
             2HQQSVUDLU4NZ67TN2KS3NG5AIVBVNFB redirecturl - 12345 1234 file"
        );
    }

    #[test]
    fn test_to_cdx14_line() {
        let src = dummy_record();
        assert_eq!(
            src.to_cdx_line(true),
            "urlkey 20140101123400 original mimetype 200 \
             2HQQSVUDLU4NZ67TN2KS3NG5AIVBVNFB redirecturl - 12345 1234 file - - -"
        );
    }

    // ---------------------------------------------------------------
    // Timestamp conversion
    // ---------------------------------------------------------------

    #[test]
    fn test_short_timestamp_padded_with_zeroes() {
        let date = timestamp_to_date(20140101).unwrap();
        assert_eq!(date, timestamp_to_date(20140101000000).unwrap());
        // a bare year pads to month zero, which is not a date
        assert!(timestamp_to_date(2014).is_err());
    }

    #[test]
    fn test_invalid_timestamp_is_an_error() {
        assert!(timestamp_to_date(20141399000000).is_err());
    }
}
