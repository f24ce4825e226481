//! Access log line parser.
//!
//! Turns one raw line of the form
//!
//! ```text
//! <source> <ident> <user> [<YYYY-MM-DD HH:MM:SS±HHMM>] "<request>" <status> <bytes>
//! ```
//!
//! into a [`LogEvent`]. The pattern is anchored at the start of the line only,
//! so trailing fields (referer, user agent) are tolerated. A line either
//! yields a complete event or a [`RejectReason`]; nothing is defaulted.

use chrono::{DateTime, FixedOffset};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::RejectReason;

/// The single timestamp layout accepted inside the brackets.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Lowest and highest status codes treated as HTTP responses.
const STATUS_RANGE: std::ops::RangeInclusive<u16> = 100..=599;

lazy_static! {
    // ASCII digit classes: `\d` would also admit non-ASCII digits.
    static ref ACCESS_LINE: Regex =
        Regex::new(r#"^(\S+) \S+ \S+ \[(.*?)\] "(.*?)" ([0-9]+) ([0-9]+)"#)
            .expect("access log pattern is valid");
}

/// One accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub source_address: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Method, path and protocol, kept verbatim.
    pub request_line: String,
    pub status_code: u16,
    pub bytes_sent: u64,
}

/// Parses a single log line.
pub fn parse_line(line: &str) -> Result<LogEvent, RejectReason> {
    let caps = ACCESS_LINE
        .captures(line)
        .ok_or(RejectReason::PatternMismatch)?;

    let timestamp = DateTime::parse_from_str(&caps[2], TIMESTAMP_FORMAT)
        .map_err(|_| RejectReason::InvalidTimestamp)?;

    // Both groups are pure digit runs, so a failed parse can only be overflow.
    let status_code: u16 = caps[4]
        .parse()
        .map_err(|_| RejectReason::NumericOverflow)?;
    if !STATUS_RANGE.contains(&status_code) {
        return Err(RejectReason::StatusOutOfRange);
    }

    let bytes_sent: u64 = caps[5]
        .parse()
        .map_err(|_| RejectReason::NumericOverflow)?;

    Ok(LogEvent {
        source_address: caps[1].to_string(),
        timestamp,
        request_line: caps[3].to_string(),
        status_code,
        bytes_sent,
    })
}

#[cfg(test)]
impl LogEvent {
    /// Renders the event back into the accepted line layout.
    pub fn to_line(&self) -> String {
        format!(
            "{} - - [{}] \"{}\" {} {}",
            self.source_address,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.request_line,
            self.status_code,
            self.bytes_sent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VALID: &str =
        r#"192.168.1.10 - - [2024-03-15 10:30:45+0400] "GET /index.html HTTP/1.1" 200 5123"#;

    #[test]
    fn test_parse_valid_line() {
        let event = parse_line(VALID).unwrap();

        assert_eq!(event.source_address, "192.168.1.10");
        assert_eq!(event.request_line, "GET /index.html HTTP/1.1");
        assert_eq!(event.status_code, 200);
        assert_eq!(event.bytes_sent, 5123);
        assert_eq!(event.timestamp.offset().local_minus_utc(), 4 * 3600);
        assert_eq!(
            event.timestamp.to_rfc3339(),
            "2024-03-15T10:30:45+04:00"
        );
    }

    #[test]
    fn test_trailing_fields_are_tolerated() {
        let line = format!("{} \"-\" \"Mozilla/5.0\"", VALID);
        let event = parse_line(&line).unwrap();
        assert_eq!(event.bytes_sent, 5123);
    }

    #[test]
    fn test_request_line_with_embedded_quote() {
        let line = r#"10.0.0.1 - - [2024-03-15 10:30:45+0000] "GET /a"b HTTP/1.1" 404 0"#;
        let event = parse_line(line).unwrap();
        assert_eq!(event.request_line, r#"GET /a"b HTTP/1.1"#);
        assert_eq!(event.status_code, 404);
    }

    #[test]
    fn test_pattern_mismatch() {
        assert_eq!(parse_line(""), Err(RejectReason::PatternMismatch));
        assert_eq!(
            parse_line("garbage line without structure"),
            Err(RejectReason::PatternMismatch)
        );
        // Dash in place of a byte count is not a digit run.
        let dash = r#"10.0.0.1 - - [2024-03-15 10:30:45+0000] "GET / HTTP/1.1" 304 -"#;
        assert_eq!(parse_line(dash), Err(RejectReason::PatternMismatch));
    }

    #[test]
    fn test_invalid_timestamp() {
        let apache = r#"10.0.0.1 - - [15/Mar/2024:10:30:45 +0000] "GET / HTTP/1.1" 200 10"#;
        assert_eq!(parse_line(apache), Err(RejectReason::InvalidTimestamp));

        let no_offset = r#"10.0.0.1 - - [2024-03-15 10:30:45] "GET / HTTP/1.1" 200 10"#;
        assert_eq!(parse_line(no_offset), Err(RejectReason::InvalidTimestamp));

        let bad_day = r#"10.0.0.1 - - [2024-02-30 10:30:45+0000] "GET / HTTP/1.1" 200 10"#;
        assert_eq!(parse_line(bad_day), Err(RejectReason::InvalidTimestamp));
    }

    #[test]
    fn test_status_out_of_range() {
        let line = r#"10.0.0.1 - - [2024-03-15 10:30:45+0000] "GET / HTTP/1.1" 999 10"#;
        assert_eq!(parse_line(line), Err(RejectReason::StatusOutOfRange));

        let low = r#"10.0.0.1 - - [2024-03-15 10:30:45+0000] "GET / HTTP/1.1" 099 10"#;
        assert_eq!(parse_line(low), Err(RejectReason::StatusOutOfRange));
    }

    #[test]
    fn test_numeric_overflow() {
        let status = r#"10.0.0.1 - - [2024-03-15 10:30:45+0000] "GET / HTTP/1.1" 70000 10"#;
        assert_eq!(parse_line(status), Err(RejectReason::NumericOverflow));

        let bytes = r#"10.0.0.1 - - [2024-03-15 10:30:45+0000] "GET / HTTP/1.1" 200 99999999999999999999999"#;
        assert_eq!(parse_line(bytes), Err(RejectReason::NumericOverflow));
    }

    #[test]
    fn test_non_ascii_digits_rejected() {
        let line = "10.0.0.1 - - [2024-03-15 10:30:45+0000] \"GET / HTTP/1.1\" \u{0662}00 10";
        assert_eq!(parse_line(line), Err(RejectReason::PatternMismatch));
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_fields(
            octets in proptest::array::uniform4(0u8..=255),
            status in 100u16..=599,
            bytes in any::<u64>(),
            secs in 0i64..4_000_000_000,
            offset_quarters in -48i32..=56,
        ) {
            let offset = FixedOffset::east_opt(offset_quarters * 900).unwrap();
            let timestamp = DateTime::from_timestamp(secs, 0).unwrap().with_timezone(&offset);
            let event = LogEvent {
                source_address: format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]),
                timestamp,
                request_line: "GET /x HTTP/1.1".to_string(),
                status_code: status,
                bytes_sent: bytes,
            };

            let parsed = parse_line(&event.to_line()).unwrap();
            prop_assert_eq!(&parsed.source_address, &event.source_address);
            prop_assert_eq!(parsed.status_code, event.status_code);
            prop_assert_eq!(parsed.bytes_sent, event.bytes_sent);
            prop_assert_eq!(parsed.timestamp, event.timestamp);
        }
    }
}
