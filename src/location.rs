//! ISO 6709 location parsing.
//!
//! Containers store capture location as a compact string such as `+37.5090-122.2500/` or
//! `+37.5090-122.2500+010.0/`. We only care about the leading latitude/longitude pair.

use std::sync::OnceLock;

use regex::Regex;

/// Parse the latitude and longitude out of an ISO 6709 point string.
///
/// Returns `None` when the string does not start with a signed latitude/longitude pair or the
/// numbers don't parse.
pub fn parse_iso6709(location: &str) -> Option<(f32, f32)> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"([+\-][0-9.]+)([+\-][0-9.]+)").ok())
        .as_ref()?;

    let captures = pattern.captures(location)?;
    let latitude = captures.get(1)?.as_str().parse::<f32>().ok()?;
    let longitude = captures.get(2)?.as_str().parse::<f32>().ok()?;
    Some((latitude, longitude))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_latitude_and_longitude() {
        assert_eq!(parse_iso6709("+37.5090-122.2500/"), Some((37.509, -122.25)));
    }

    #[test]
    fn ignores_trailing_altitude() {
        assert_eq!(
            parse_iso6709("-33.8688+151.2093+010.000/"),
            Some((-33.8688, 151.2093))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_iso6709("somewhere nice"), None);
        assert_eq!(parse_iso6709("+1.2.3-4/"), None);
    }
}
