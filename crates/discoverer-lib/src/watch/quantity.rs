//! Kubernetes resource quantity parsing
//!
//! CPU quantities come out in cores (`250m` -> 0.25) and memory quantities
//! in bytes (`1Ki` -> 1024, `1k` -> 1000).

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

/// Decimal suffixes as powers of ten
const DECIMAL_SUFFIXES: &[(char, i32)] = &[
    ('n', -9),
    ('u', -6),
    ('m', -3),
    ('k', 3),
    ('M', 6),
    ('G', 9),
    ('T', 12),
    ('P', 15),
    ('E', 18),
];

/// Parse a quantity string, returning 0 for anything unparseable
pub fn parse_quantity(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return number.parse::<f64>().map(|n| n * factor).unwrap_or(0.0);
        }
    }

    for (suffix, exp) in DECIMAL_SUFFIXES {
        if let Some(number) = s.strip_suffix(*suffix) {
            // "1e3" style exponents never end in a suffix letter
            return number.parse::<f64>().map(|n| scale(n, *exp)).unwrap_or(0.0);
        }
    }

    s.parse::<f64>().unwrap_or(0.0)
}

/// Divide for negative exponents so `1500m` comes out as exactly 1.5
fn scale(n: f64, exp: i32) -> f64 {
    if exp < 0 {
        n / 10f64.powi(-exp)
    } else {
        n * 10f64.powi(exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn test_parse_cpu() {
        assert!(close(parse_quantity("250m"), 0.25));
        assert!(close(parse_quantity("2"), 2.0));
        assert!(close(parse_quantity("1.5"), 1.5));
        assert!(close(parse_quantity("125000000n"), 0.125));
        assert!(close(parse_quantity("500u"), 0.0005));
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_quantity("1Ki"), 1024.0);
        assert_eq!(parse_quantity("128Mi"), 128.0 * 1024.0 * 1024.0);
        assert_eq!(parse_quantity("2Gi"), 2.0 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(parse_quantity("1k"), 1000.0);
        assert_eq!(parse_quantity("1M"), 1e6);
        assert_eq!(parse_quantity("104857600"), 104857600.0);
    }

    #[test]
    fn test_parse_exponent() {
        assert_eq!(parse_quantity("1e3"), 1000.0);
        assert_eq!(parse_quantity("1E3"), 1000.0);
        assert_eq!(parse_quantity("1E"), 1e18);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_quantity(""), 0.0);
        assert_eq!(parse_quantity("abc"), 0.0);
        assert_eq!(parse_quantity("Mi"), 0.0);
    }
}
