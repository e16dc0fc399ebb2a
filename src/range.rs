//! `Range: bytes=...` decoding and resolution against a body size.

use std::fmt;

use axum::http::header::RANGE;
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::headers::{Header, HeaderMapExt, Range};
use thiserror::Error;

const BYTES_UNIT: &str = "bytes=";

/// A single byte range as it appears in the request, before the body size is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRangeSpec {
    /// `bytes=<start>-` or `bytes=<start>-<end>`, inclusive end.
    FromStart { start: u64, end: Option<u64> },
    /// `bytes=-<length>`, the last `length` bytes.
    Suffix { length: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("malformed range header: {0}")]
    Malformed(String),
    #[error("unsupported range unit: {0}")]
    UnsupportedUnit(String),
}

/// An inclusive byte range resolved against the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        ResolvedRange { start, end }
    }

    /// Number of bytes covered, `end - start + 1`.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ResolvedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl From<ResolvedRange> for ByteRangeSpec {
    fn from(range: ResolvedRange) -> Self {
        ByteRangeSpec::FromStart { start: range.start, end: Some(range.end) }
    }
}

/// What a byte source is asked to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// The whole body.
    Full,
    /// A range with both ends known.
    Resolved(ResolvedRange),
    /// A range that cannot be resolved without the total size. The source
    /// determines the end itself, e.g. by passing the range upstream.
    Forward(ByteRangeSpec),
}

impl ByteRangeSpec {
    /// First range of a decoded `Range` header.
    ///
    /// Multi-range headers (`bytes=0-9,20-29`) are reduced to their first range;
    /// answering one of the requested ranges is compliant with RFC 7233.
    pub fn from_header(range: &Range) -> Result<ByteRangeSpec, RangeError> {
        let mut values: Vec<HeaderValue> = Vec::with_capacity(1);
        range.encode(&mut values);
        let value = values.first().and_then(|v| v.to_str().ok()).unwrap_or_default();
        parse_spec(value)
    }

    /// Value for an upstream `Range` request header.
    pub fn to_header_value(&self) -> String {
        match *self {
            ByteRangeSpec::FromStart { start, end: Some(end) } => format!("{BYTES_UNIT}{start}-{end}"),
            ByteRangeSpec::FromStart { start, end: None } => format!("{BYTES_UNIT}{start}-"),
            ByteRangeSpec::Suffix { length } => format!("{BYTES_UNIT}-{length}"),
        }
    }

    /// Resolves against a body of `total` bytes. An end past the last byte
    /// is clamped, as is a suffix longer than the body.
    pub fn resolve(self, total: u64) -> Result<ResolvedRange, Unsatisfiable> {
        if total == 0 {
            return Err(Unsatisfiable::EmptyBody);
        }
        let last = total - 1;

        match self {
            ByteRangeSpec::FromStart { start, end } => {
                if start > last {
                    return Err(Unsatisfiable::StartBeyondEnd { start, total });
                }
                let end = end.map_or(last, |end| end.min(last));
                Ok(ResolvedRange::new(start, end))
            }
            ByteRangeSpec::Suffix { length: 0 } => Err(Unsatisfiable::EmptySuffix),
            ByteRangeSpec::Suffix { length } => Ok(ResolvedRange::new(total.saturating_sub(length), last)),
        }
    }
}

/// Decodes the request's `Range` header. A header the typed decoder rejects
/// (another unit, non-ASCII bytes) is an error rather than absent.
pub fn range_header(headers: &HeaderMap) -> Result<Option<Range>, RangeError> {
    headers.typed_try_get::<Range>().map_err(|_| {
        let raw = headers
            .get(RANGE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        unit_error(&raw)
    })
}

fn unit_error(raw: &str) -> RangeError {
    match raw.split_once('=') {
        Some((unit, _)) => RangeError::UnsupportedUnit(unit.trim().to_string()),
        None => RangeError::Malformed(raw.to_string()),
    }
}

fn parse_spec(header: &str) -> Result<ByteRangeSpec, RangeError> {
    let header = header.trim();
    let Some(ranges) = header.strip_prefix(BYTES_UNIT) else {
        return Err(unit_error(header));
    };

    let first = ranges.split(',').next().unwrap_or_default().trim();
    let Some((start, end)) = first.split_once('-') else {
        return Err(RangeError::Malformed(header.to_string()));
    };
    let (start, end) = (start.trim(), end.trim());
    let number = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| RangeError::Malformed(header.to_string()))
    };

    if start.is_empty() {
        if end.is_empty() {
            return Err(RangeError::Malformed(header.to_string()));
        }
        return Ok(ByteRangeSpec::Suffix { length: number(end)? });
    }

    let start = number(start)?;
    let end = if end.is_empty() { None } else { Some(number(end)?) };
    if matches!(end, Some(end) if end < start) {
        return Err(RangeError::Malformed(header.to_string()));
    }

    Ok(ByteRangeSpec::FromStart { start, end })
}

/// Why a range header could not be served against a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unsatisfiable {
    #[error(transparent)]
    Parse(#[from] RangeError),
    #[error("range start {start} is beyond the last byte of a {total} byte body")]
    StartBeyondEnd { start: u64, total: u64 },
    #[error("zero-length suffix range")]
    EmptySuffix,
    #[error("range requested on an empty body")]
    EmptyBody,
}

/// Resolves an optional range header against an optional total size.
///
/// With an unknown total, only a range with an explicit end is resolved;
/// open-ended and suffix ranges are forwarded for the source to serve.
pub fn resolve_range(
    header: Option<&Range>,
    total_size: Option<u64>,
) -> Result<RangeRequest, Unsatisfiable> {
    let Some(header) = header else {
        return Ok(RangeRequest::Full);
    };
    let spec = ByteRangeSpec::from_header(header)?;

    match total_size {
        Some(total) => spec.resolve(total).map(RangeRequest::Resolved),
        None => Ok(match spec {
            ByteRangeSpec::FromStart { start, end: Some(end) } => {
                RangeRequest::Resolved(ResolvedRange::new(start, end))
            }
            ByteRangeSpec::Suffix { length: 0 } => return Err(Unsatisfiable::EmptySuffix),
            spec => RangeRequest::Forward(spec),
        }),
    }
}

#[cfg(test)]
fn header(value: &'static str) -> Range {
    Range::decode(&mut std::iter::once(&HeaderValue::from_static(value))).unwrap()
}

#[test]
fn test_parse_spec() {
    use ByteRangeSpec::*;

    let tests = [
        ("bytes=0-100", Ok(FromStart { start: 0, end: Some(100) })),
        ("bytes=100-", Ok(FromStart { start: 100, end: None })),
        ("bytes= 5 - 9 ", Ok(FromStart { start: 5, end: Some(9) })),
        ("bytes=-100", Ok(Suffix { length: 100 })),
        ("bytes=0-0,-1", Ok(FromStart { start: 0, end: Some(0) })),
        ("bytes=10-20,30-40", Ok(FromStart { start: 10, end: Some(20) })),
        ("bytes=abc-10", Err(RangeError::Malformed("bytes=abc-10".to_string()))),
        ("bytes=20-10", Err(RangeError::Malformed("bytes=20-10".to_string()))),
        ("bytes=-", Err(RangeError::Malformed("bytes=-".to_string()))),
        ("bytes=12", Err(RangeError::Malformed("bytes=12".to_string()))),
        ("none", Err(RangeError::Malformed("none".to_string()))),
        ("bleets=100-324", Err(RangeError::UnsupportedUnit("bleets".to_string()))),
    ];

    for (i, (value, expected)) in tests.iter().enumerate() {
        assert_eq!(parse_spec(value), *expected, "range header #{i}: {value}");
    }
}

#[test]
fn test_spec_from_typed_header() {
    assert_eq!(
        Ok(ByteRangeSpec::FromStart { start: 0, end: Some(29) }),
        ByteRangeSpec::from_header(&Range::bytes(0..30).unwrap())
    );
    assert_eq!(
        Ok(ByteRangeSpec::FromStart { start: 90, end: None }),
        ByteRangeSpec::from_header(&Range::bytes(90..).unwrap())
    );
    assert_eq!(Ok(ByteRangeSpec::Suffix { length: 20 }), ByteRangeSpec::from_header(&header("bytes=-20")));
}

#[test]
fn test_range_header_decoding() {
    let mut headers = HeaderMap::new();
    assert_eq!(Ok(None), range_header(&headers));

    headers.insert(RANGE, HeaderValue::from_static("bytes=5-9"));
    assert_eq!(Ok(Some(Range::bytes(5..=9).unwrap())), range_header(&headers));

    headers.insert(RANGE, HeaderValue::from_static("items=0-5"));
    assert_eq!(Err(RangeError::UnsupportedUnit("items".to_string())), range_header(&headers));
}

#[test]
fn test_resolve_range_known_size() {
    use RangeRequest::Resolved;

    let tests = [
        ("bytes=0-99", Ok(Resolved(ResolvedRange::new(0, 99)))),
        ("bytes=0-0", Ok(Resolved(ResolvedRange::new(0, 0)))),
        ("bytes=100-", Ok(Resolved(ResolvedRange::new(100, 499)))),
        ("bytes=-100", Ok(Resolved(ResolvedRange::new(400, 499)))),
        ("bytes=-1", Ok(Resolved(ResolvedRange::new(499, 499)))),
        ("bytes=-1000", Ok(Resolved(ResolvedRange::new(0, 499)))),
        ("bytes=0-24646", Ok(Resolved(ResolvedRange::new(0, 499)))),
        ("bytes=499-499", Ok(Resolved(ResolvedRange::new(499, 499)))),
        ("bytes=500-", Err(Unsatisfiable::StartBeyondEnd { start: 500, total: 500 })),
        ("bytes=-0", Err(Unsatisfiable::EmptySuffix)),
    ];

    for (i, (value, expected)) in tests.iter().enumerate() {
        assert_eq!(resolve_range(Some(&header(value)), Some(500)), *expected, "range header #{i}: {value}");
    }
}

#[test]
fn test_resolve_range_edges() {
    assert_eq!(resolve_range(None, Some(500)), Ok(RangeRequest::Full));
    assert_eq!(resolve_range(None, None), Ok(RangeRequest::Full));
    assert_eq!(resolve_range(Some(&header("bytes=0-1")), Some(0)), Err(Unsatisfiable::EmptyBody));
    assert!(matches!(
        resolve_range(Some(&header("bytes=x-1")), Some(10)),
        Err(Unsatisfiable::Parse(RangeError::Malformed(_)))
    ));
}

#[test]
fn test_resolve_range_unknown_size() {
    assert_eq!(
        resolve_range(Some(&header("bytes=10-19")), None),
        Ok(RangeRequest::Resolved(ResolvedRange::new(10, 19)))
    );
    assert_eq!(
        resolve_range(Some(&header("bytes=90-")), None),
        Ok(RangeRequest::Forward(ByteRangeSpec::FromStart { start: 90, end: None }))
    );
    assert_eq!(
        resolve_range(Some(&header("bytes=-10")), None),
        Ok(RangeRequest::Forward(ByteRangeSpec::Suffix { length: 10 }))
    );
    assert_eq!(resolve_range(Some(&header("bytes=-0")), None), Err(Unsatisfiable::EmptySuffix));
}

#[test]
fn test_header_values() {
    assert_eq!("bytes=30-53", ByteRangeSpec::from(ResolvedRange::new(30, 53)).to_header_value());
    assert_eq!("bytes=90-", ByteRangeSpec::FromStart { start: 90, end: None }.to_header_value());
    assert_eq!("bytes=-10", ByteRangeSpec::Suffix { length: 10 }.to_header_value());

    for (start, end) in [(0, 0), (0, 99), (17, 4096)] {
        assert_eq!(end - start + 1, ResolvedRange::new(start, end).content_length());
    }
}
