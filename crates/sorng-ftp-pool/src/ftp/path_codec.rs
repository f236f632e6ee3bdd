//! Path handling between human-readable names and FTP wire arguments.
//!
//! FTP servers without `OPTS UTF8` treat command arguments as raw bytes.
//! A segment is therefore rendered in the server's charset and the
//! resulting bytes are relabelled one-to-one as Latin-1 chars, which the
//! `Latin1` control encoding writes back out unchanged.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{ControlEncoding, FtpConnectionConfig};
use encoding_rs::Encoding;
use std::fmt;

/// A normalised remote location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemotePath {
    pub absolute: bool,
    pub segments: Vec<String>,
}

impl RemotePath {
    /// `/` or the empty relative path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split off the last segment: `(directory, file name)`.
    pub fn split_last(&self) -> Option<(RemotePath, &str)> {
        let (last, rest) = self.segments.split_last()?;
        Some((
            RemotePath {
                absolute: self.absolute,
                segments: rest.to_vec(),
            },
            last.as_str(),
        ))
    }

    pub fn join(&self, segment: &str) -> RemotePath {
        let mut next = self.clone();
        next.segments.extend(normalize_path(segment).segments);
        next
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Collapse duplicate separators, record a leading `/`, split into
/// segments. `.` segments are dropped.
pub fn normalize_path(path: &str) -> RemotePath {
    RemotePath {
        absolute: path.starts_with('/'),
        segments: path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect(),
    }
}

/// Transcodes path segments for one connection configuration.
#[derive(Debug, Clone, Copy)]
pub struct PathCodec {
    charset: &'static Encoding,
    relabel: bool,
}

impl PathCodec {
    /// `charset` is a WHATWG label such as `"UTF-8"` or `"GBK"`.
    pub fn new(charset: &str, control: ControlEncoding) -> FtpResult<Self> {
        let charset = Encoding::for_label(charset.trim().as_bytes()).ok_or_else(|| {
            FtpError::invalid_config(format!("Unknown source charset '{}'", charset))
        })?;
        Ok(Self {
            charset,
            relabel: control == ControlEncoding::Latin1,
        })
    }

    pub fn for_connection(config: &FtpConnectionConfig) -> FtpResult<Self> {
        Self::new(&config.source_charset, config.control_encoding)
    }

    pub fn charset_name(&self) -> &'static str {
        self.charset.name()
    }

    /// Human-readable segment → wire argument.
    ///
    /// Pure ASCII passes through unchanged. A character the source charset
    /// cannot represent fails the whole segment.
    pub fn encode_segment(&self, text: &str) -> FtpResult<String> {
        if text.is_ascii() {
            return Ok(text.to_string());
        }
        let (bytes, _, unmappable) = self.charset.encode(text);
        if unmappable {
            return Err(FtpError::encoding(format!(
                "'{}' cannot be represented in {}",
                text,
                self.charset.name()
            )));
        }
        if !self.relabel {
            // UTF-8 control channel: the server reads the text as-is.
            return Ok(text.to_string());
        }
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }

    /// Wire argument for a whole path.
    pub fn encode_path(&self, path: &RemotePath) -> FtpResult<String> {
        let segments = path
            .segments
            .iter()
            .map(|s| self.encode_segment(s))
            .collect::<FtpResult<Vec<_>>>()?;
        let joined = segments.join("/");
        Ok(if path.absolute {
            format!("/{}", joined)
        } else {
            joined
        })
    }

    /// Wire name (e.g. from a listing) → human-readable text. Undecodable
    /// bytes become U+FFFD.
    pub fn decode_segment(&self, wire: &str) -> String {
        if !self.relabel || wire.is_ascii() || wire.chars().any(|c| u32::from(c) > 0xFF) {
            return wire.to_string();
        }
        let bytes: Vec<u8> = wire.chars().map(|c| u32::from(c) as u8).collect();
        self.charset.decode_without_bom_handling(&bytes).0.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;

    fn utf8() -> PathCodec {
        PathCodec::new("UTF-8", ControlEncoding::Latin1).unwrap()
    }

    #[test]
    fn test_normalize_path() {
        let p = normalize_path("//reports///2026/q1/");
        assert!(p.absolute);
        assert_eq!(p.segments, vec!["reports", "2026", "q1"]);
        assert_eq!(p.to_string(), "/reports/2026/q1");

        let rel = normalize_path("a/./b");
        assert!(!rel.absolute);
        assert_eq!(rel.segments, vec!["a", "b"]);

        assert!(normalize_path("/").is_root());
        assert!(normalize_path("").is_root());
    }

    #[test]
    fn test_split_last_and_join() {
        let p = normalize_path("/data/in/file.csv");
        let (dir, name) = p.split_last().unwrap();
        assert_eq!(dir.to_string(), "/data/in");
        assert_eq!(name, "file.csv");
        assert_eq!(dir.join("x/y").to_string(), "/data/in/x/y");
        assert!(normalize_path("/").split_last().is_none());
    }

    #[test]
    fn test_ascii_is_identity() {
        let codec = PathCodec::new("GBK", ControlEncoding::Latin1).unwrap();
        for s in ["reports", "a b-c_d.txt", "2026"] {
            assert_eq!(codec.encode_segment(s).unwrap(), s);
            assert_eq!(utf8().encode_segment(s).unwrap(), s);
        }
    }

    #[test]
    fn test_utf8_relabel() {
        let wire = utf8().encode_segment("报").unwrap();
        assert_eq!(wire, "\u{e6}\u{8a}\u{a5}");
        assert_eq!(utf8().decode_segment(&wire), "报");
    }

    #[test]
    fn test_gbk_relabel_round_trip() {
        let codec = PathCodec::new("GBK", ControlEncoding::Latin1).unwrap();
        let wire = codec.encode_segment("报告").unwrap();
        assert_eq!(wire, "\u{b1}\u{a8}\u{b8}\u{e6}");
        assert_eq!(codec.decode_segment(&wire), "报告");
    }

    #[test]
    fn test_unmappable_is_encoding_error() {
        let codec = PathCodec::new("windows-1252", ControlEncoding::Latin1).unwrap();
        let err = codec.encode_segment("报告").unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::EncodingError);

        let err = codec.encode_path(&normalize_path("/ok/报告")).unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::EncodingError);
    }

    #[test]
    fn test_encode_path() {
        let wire = utf8().encode_path(&normalize_path("/a//报")).unwrap();
        assert_eq!(wire, "/a/\u{e6}\u{8a}\u{a5}");
    }

    #[test]
    fn test_utf8_control_passes_text_through() {
        let codec = PathCodec::new("UTF-8", ControlEncoding::Utf8).unwrap();
        assert_eq!(codec.encode_segment("报告").unwrap(), "报告");
        assert_eq!(codec.decode_segment("报告"), "报告");
    }

    #[test]
    fn test_unknown_charset() {
        let err = PathCodec::new("klingon", ControlEncoding::Latin1).unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::InvalidConfig);
    }
}
