//! # Byte Quantity Formatting and Parsing
//!
//! This module renders byte counts with human-readable unit suffixes and
//! parses such strings back from command-line input.
//!
//! ## Unit Tables
//!
//! Two unit tables are supported:
//!
//! - **Binary**: B, KiB, MiB, GiB, TiB, PiB, EiB (powers of 1024)
//! - **Decimal**: B, KB, MB, GB, TB, PB, EB (powers of 1000)
//!
//! Formatting picks the largest unit not exceeding the quantity.
//!
//! ## Parse Syntax
//!
//! A size is a number with an optional, case-insensitive unit suffix:
//!
//! - `k`, `m`, `g`, `t`, `p`, `e` — powers of 1024 (`5M` = 5 MiB)
//! - `kb`, `mb`, `gb`, `tb`, `pb`, `eb` — powers of 1000 (`2MB` = 2 MB)
//! - full symbols `B`, `KiB`, `MiB`, ... are also accepted, so formatted
//!   output parses back
//! - no suffix means a raw byte count

use anyhow::{anyhow, Result};

/// Unit table selector for [`format_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// Powers of 1024 (KiB, MiB, ...).
    Binary,
    /// Powers of 1000 (KB, MB, ...).
    Decimal,
}

const BINARY_SYMBOLS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
const DECIMAL_SYMBOLS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

// Suffixes are matched longest-first so that "mib" is not mistaken for "b".
// Each entry maps a lowercase suffix to its multiplier in bytes.
const SUFFIXES: [(&str, i64); 19] = [
    ("kib", 1 << 10),
    ("mib", 1 << 20),
    ("gib", 1 << 30),
    ("tib", 1 << 40),
    ("pib", 1 << 50),
    ("eib", 1 << 60),
    ("kb", 1_000),
    ("mb", 1_000_000),
    ("gb", 1_000_000_000),
    ("tb", 1_000_000_000_000),
    ("pb", 1_000_000_000_000_000),
    ("eb", 1_000_000_000_000_000_000),
    ("k", 1 << 10),
    ("m", 1 << 20),
    ("g", 1 << 30),
    ("t", 1 << 40),
    ("p", 1 << 50),
    ("e", 1 << 60),
    ("b", 1),
];

/// Format a byte count with two decimals, e.g. `1.00 KiB`.
///
/// # Arguments
///
/// * `n` - The byte count.
/// * `base` - The unit table to use.
///
pub fn format_size(n: u64, base: Base) -> String {
    format_size_prec(n, base, 2)
}

/// Format a byte count with a caller-specified number of decimals.
///
/// The value is scaled to the largest unit not exceeding the quantity.
///
/// # Arguments
///
/// * `n` - The byte count.
/// * `base` - The unit table to use.
/// * `precision` - Number of decimals to render.
///
pub fn format_size_prec(n: u64, base: Base, precision: usize) -> String {
    let (step, symbols) = match base {
        Base::Binary => (1024u64, &BINARY_SYMBOLS),
        Base::Decimal => (1000u64, &DECIMAL_SYMBOLS),
    };

    // Find the largest unit that keeps the scaled value >= 1
    let mut unit = 1u64;
    let mut index = 0;
    while n / unit >= step && index < symbols.len() - 1 {
        unit *= step;
        index += 1;
    }

    format!(
        "{:.*} {}",
        precision,
        n as f64 / unit as f64,
        symbols[index]
    )
}

/// Parse a size string into a byte count.
///
/// Returns an error if the numeric portion is not a finite number.
///
/// # Arguments
///
/// * `s` - The size string, e.g. `"5M"`, `"2MB"`, `"1.00 KiB"`, `"4096"`.
///
pub fn parse_size(s: &str) -> Result<i64> {
    let lower = s.trim().to_lowercase();

    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = lower.strip_suffix(suffix) {
            let x = parse_number(number.trim_end(), s)?;
            return Ok((x * multiplier as f64) as i64);
        }
    }

    let x = parse_number(&lower, s)?;
    Ok(x as i64)
}

/// Parse the numeric portion of a size string, rejecting NaN and infinities.
fn parse_number(number: &str, original: &str) -> Result<f64> {
    match number.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(x),
        _ => Err(anyhow!("cannot parse size {:?}", original)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_binary_units() {
        assert_eq!(format_size(0, Base::Binary), "0.00 B");
        assert_eq!(format_size(1023, Base::Binary), "1023.00 B");
        assert_eq!(format_size(1024, Base::Binary), "1.00 KiB");
        assert_eq!(format_size(1536, Base::Binary), "1.50 KiB");
        assert_eq!(format_size(1048576, Base::Binary), "1.00 MiB");
        assert_eq!(format_size(5_000_000_000, Base::Binary), "4.66 GiB");
    }

    #[test]
    fn format_decimal_units() {
        assert_eq!(format_size(1000, Base::Decimal), "1.00 KB");
        assert_eq!(format_size(2_000_000, Base::Decimal), "2.00 MB");
        assert_eq!(format_size(999, Base::Decimal), "999.00 B");
    }

    #[test]
    fn format_precision() {
        assert_eq!(format_size_prec(1536, Base::Binary, 0), "2 KiB");
        assert_eq!(format_size_prec(1536, Base::Binary, 3), "1.500 KiB");
    }

    #[test]
    fn parse_short_suffixes_are_binary() {
        assert_eq!(parse_size("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
    }

    #[test]
    fn parse_long_suffixes_are_decimal() {
        assert_eq!(parse_size("2MB").unwrap(), 2 * 1000 * 1000);
        assert_eq!(parse_size("1kb").unwrap(), 1000);
        assert_eq!(parse_size("3Gb").unwrap(), 3_000_000_000);
    }

    #[test]
    fn parse_without_suffix_is_raw_bytes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_size("notanumber").is_err());
        assert!(parse_size("").is_err());
        assert!(parse_size("NaNM").is_err());
        assert!(parse_size("infG").is_err());
    }

    #[test]
    fn parse_accepts_formatter_output() {
        assert_eq!(parse_size("1.00 KiB").unwrap(), 1024);
        assert_eq!(parse_size("1023.00 B").unwrap(), 1023);
        assert_eq!(parse_size("1.00 MB").unwrap(), 1_000_000);
    }

    #[test]
    fn format_parse_round_trip() {
        // Parsing formatted output must recover the original value within
        // one unit of the displayed precision.
        for n in [0u64, 1023, 1024, 1048576, 5_000_000_000] {
            let formatted = format_size(n, Base::Binary);
            let parsed = parse_size(&formatted).unwrap() as f64;

            let mut unit = 1.0;
            while n as f64 / unit >= 1024.0 {
                unit *= 1024.0;
            }
            let tolerance = unit * 0.01;
            assert!(
                (parsed - n as f64).abs() <= tolerance,
                "round trip of {} gave {} (formatted {:?})",
                n,
                parsed,
                formatted
            );
        }
    }
}
