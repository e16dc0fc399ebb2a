use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange, ContentType, HeaderMapExt};

use crate::range::ResolvedRange;
use crate::RangeNotSatisfiable;

/// Computes status and headers for a download response.
///
/// A resolved range yields `206 Partial Content` with `Content-Range`;
/// otherwise `200 OK`, with `Content-Length` only when the total is known.
/// Fails for a range that does not lie within `total_size`.
pub fn build_response_headers(
    resolved: Option<ResolvedRange>,
    total_size: Option<u64>,
    file_name: &str,
) -> Result<(StatusCode, HeaderMap), RangeNotSatisfiable> {
    let mut headers = HeaderMap::new();

    let status = match resolved {
        Some(range) => {
            headers.typed_insert(content_range(range, total_size)?);
            headers.typed_insert(ContentLength(range.content_length()));
            StatusCode::PARTIAL_CONTENT
        }
        None => {
            if let Some(total) = total_size {
                headers.typed_insert(ContentLength(total));
            }
            StatusCode::OK
        }
    };

    headers.typed_insert(AcceptRanges::bytes());
    headers.typed_insert(ContentType::octet_stream());
    headers.insert(header::CONTENT_DISPOSITION, attachment(file_name));

    Ok((status, headers))
}

/// `bytes {start}-{end}/{total}`, or `/*` when the total is unknown.
fn content_range(range: ResolvedRange, total_size: Option<u64>) -> Result<ContentRange, RangeNotSatisfiable> {
    let unsatisfied = || RangeNotSatisfiable(total_size.map(ContentRange::unsatisfied_bytes));
    if range.start > range.end || total_size.is_some_and(|total| range.end >= total) {
        return Err(unsatisfied());
    }
    ContentRange::bytes(range.start..=range.end, total_size).map_err(|_| unsatisfied())
}

fn attachment(file_name: &str) -> HeaderValue {
    let name = header_safe_file_name(file_name);
    HeaderValue::from_str(&format!("attachment; filename={name}"))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Keeps a file name usable as an unquoted header token: anything outside
/// visible ASCII, and separators that would end the parameter, become `_`.
fn header_safe_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let c = if c.is_ascii_graphic() && !matches!(c, '"' | ';' | ',' | '\\' | '/') {
            c
        } else {
            '_'
        };
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        out.push(c);
    }

    match out.trim_matches('_') {
        "" => "download".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).map(|v| v.to_str().unwrap())
    }

    #[test]
    fn test_partial_headers() {
        let (status, headers) =
            build_response_headers(Some(ResolvedRange::new(0, 99)), Some(1000), "large-file.bin").unwrap();

        assert_eq!(StatusCode::PARTIAL_CONTENT, status);
        assert_eq!(Some("bytes 0-99/1000"), get(&headers, "content-range"));
        assert_eq!(Some("100"), get(&headers, "content-length"));
        assert_eq!(Some("bytes"), get(&headers, "accept-ranges"));
        assert_eq!(Some("application/octet-stream"), get(&headers, "content-type"));
        assert_eq!(Some("attachment; filename=large-file.bin"), get(&headers, "content-disposition"));
    }

    #[test]
    fn test_partial_headers_unknown_total() {
        let (status, headers) = build_response_headers(Some(ResolvedRange::new(10, 19)), None, "a.bin").unwrap();

        assert_eq!(StatusCode::PARTIAL_CONTENT, status);
        assert_eq!(Some("bytes 10-19/*"), get(&headers, "content-range"));
        assert_eq!(Some("10"), get(&headers, "content-length"));
    }

    #[test]
    fn test_full_headers() {
        let (status, headers) = build_response_headers(None, Some(54), "fixture.txt").unwrap();

        assert_eq!(StatusCode::OK, status);
        assert_eq!(None, get(&headers, "content-range"));
        assert_eq!(Some("54"), get(&headers, "content-length"));
        assert_eq!(Some("bytes"), get(&headers, "accept-ranges"));
        assert_eq!(Some("attachment; filename=fixture.txt"), get(&headers, "content-disposition"));
    }

    #[test]
    fn test_full_headers_unknown_total() {
        let (status, headers) = build_response_headers(None, None, "stream.bin").unwrap();

        assert_eq!(StatusCode::OK, status);
        assert_eq!(None, get(&headers, "content-length"));
        assert_eq!(None, get(&headers, "content-range"));
        assert_eq!(Some("bytes"), get(&headers, "accept-ranges"));
        assert_eq!(Some("attachment; filename=stream.bin"), get(&headers, "content-disposition"));
    }

    #[test]
    fn test_range_outside_body_is_rejected() {
        let err = build_response_headers(Some(ResolvedRange::new(0, 99)), Some(50), "a.bin").unwrap_err();
        assert_eq!(Some(ContentRange::unsatisfied_bytes(50)), err.0);

        let err = build_response_headers(Some(ResolvedRange { start: 9, end: 3 }), None, "a.bin").unwrap_err();
        assert_eq!(None, err.0);
    }

    #[test]
    fn test_header_safe_file_name() {
        assert_eq!("report.pdf", header_safe_file_name("report.pdf"));
        assert_eq!("my_report_2024.pdf", header_safe_file_name("my report  2024.pdf"));
        assert_eq!("r_sum_.txt", header_safe_file_name("résumé.txt"));
        assert_eq!("a_b", header_safe_file_name("a\";b"));
        assert_eq!("download", header_safe_file_name("  "));
    }
}
