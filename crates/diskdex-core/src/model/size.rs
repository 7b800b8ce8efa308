/// Byte-count helpers.
///
/// All sizes are `u64` bytes internally. Units are binary (1 KB = 1024 B),
/// labelled with the short forms users type and expect from a disk tool.

const UNITS: [(&str, u64); 5] = [
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("B", 1),
];

/// Human-readable byte count, used in log lines.
pub fn format_size(bytes: u64) -> String {
    for &(unit, scale) in &UNITS[..UNITS.len() - 1] {
        if bytes >= scale {
            return format!("{:.1} {unit}", bytes as f64 / scale as f64);
        }
    }
    format!("{bytes} B")
}

/// Parse a size expression such as `"500"`, `"10MB"`, `"1.5 gb"`.
///
/// Returns `None` for anything that is not a non-negative number with an
/// optional unit suffix.
pub fn parse_size(input: &str) -> Option<u64> {
    let text = input.trim().to_ascii_uppercase();
    let (number, scale) = UNITS
        .iter()
        .find_map(|&(unit, scale)| text.strip_suffix(unit).map(|n| (n, scale)))
        .unwrap_or((text.as_str(), 1));
    let number = number.trim();
    if number.is_empty() {
        return None;
    }
    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(scale);
    }
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let bytes = value * scale as f64;
    (bytes <= u64::MAX as f64).then_some(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_picks_largest_unit() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_073_741_824), "1.0 GB");
    }

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(parse_size("500"), Some(500));
        assert_eq!(parse_size(" 42 "), Some(42));
        assert_eq!(parse_size("7B"), Some(7));
    }

    #[test]
    fn parse_units_case_insensitively() {
        assert_eq!(parse_size("10MB"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("1gb"), Some(1 << 30));
        assert_eq!(parse_size("500 KB"), Some(500 * 1024));
        assert_eq!(parse_size("1.5KB"), Some(1536));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("MB"), None);
        assert_eq!(parse_size("-1KB"), None);
        assert_eq!(parse_size("ten"), None);
    }
}
