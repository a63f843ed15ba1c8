//! Log Sequence Number helpers.
//!
//! PostgreSQL prints an LSN as two hex words separated by `/`, e.g. `16/B374D848`.
//! Internally it is a single 64-bit WAL byte offset; the high word is the upper
//! 32 bits, the low word the lower 32 bits.

use crate::error::{CdcError, ProtocolError};

/// A 64-bit monotonically non-decreasing WAL position.
pub type Lsn = u64;

/// Parse a `"X/Y"` textual LSN into its `u64` representation.
pub fn parse_lsn(text: &str) -> Result<Lsn, CdcError> {
    let (high, low) = text
        .split_once('/')
        .ok_or_else(|| ProtocolError::Malformed(format!("invalid lsn: {text}")))?;

    let high = u64::from_str_radix(high, 16)
        .map_err(|_| ProtocolError::Malformed(format!("invalid lsn high word: {high}")))?;
    let low = u64::from_str_radix(low, 16)
        .map_err(|_| ProtocolError::Malformed(format!("invalid lsn low word: {low}")))?;

    Ok((high << 32) | low)
}

/// Format an `Lsn` back into PostgreSQL's `"X/Y"` textual form.
pub fn format_lsn(lsn: Lsn) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_typical_lsn() {
        let text = "16/B374D848";
        let lsn = parse_lsn(text).unwrap();
        assert_eq!(format_lsn(lsn), text);
    }

    #[test]
    fn zero_lsn() {
        assert_eq!(parse_lsn("0/0").unwrap(), 0);
        assert_eq!(format_lsn(0), "0/0");
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_lsn("not-an-lsn").is_err());
        assert!(parse_lsn("16").is_err());
    }
}
