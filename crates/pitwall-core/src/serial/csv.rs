//! CSV line decoding for the serial stream.

use std::collections::BTreeMap;

/// Parses one CSV line into channel values.
///
/// Columns pair positionally with `channel_order`; extra columns are
/// ignored and missing or unparseable columns are simply absent from the
/// result, so a frame never carries fabricated values.
#[must_use]
pub fn parse_csv_line(
    line: &str,
    channel_order: &[String],
    separator: &str,
) -> BTreeMap<String, f64> {
    let mut channels = BTreeMap::new();
    for (i, part) in line.trim().split(separator).enumerate() {
        let Some(sensor_id) = channel_order.get(i) else {
            break;
        };
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Ok(value) = part.parse::<f64>() {
            channels.insert(sensor_id.clone(), value);
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Vec<String> {
        vec!["speed".into(), "rpm".into(), "throttle".into()]
    }

    #[test]
    fn test_parse_full_line() {
        let got = parse_csv_line("101.5, 9300, 45.2\n", &order(), ",");
        assert_eq!(got.get("speed"), Some(&101.5));
        assert_eq!(got.get("rpm"), Some(&9300.0));
        assert_eq!(got.get("throttle"), Some(&45.2));
    }

    #[test]
    fn test_missing_columns_are_absent() {
        let got = parse_csv_line("101.5", &order(), ",");
        assert_eq!(got.len(), 1);
        assert!(!got.contains_key("rpm"));
    }

    #[test]
    fn test_extra_columns_ignored() {
        let got = parse_csv_line("1,2,3,4,5", &order(), ",");
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn test_unparseable_column_skipped() {
        let got = parse_csv_line("101.5,fast,45.2", &order(), ",");
        assert!(!got.contains_key("rpm"));
        assert_eq!(got.get("throttle"), Some(&45.2));
    }

    #[test]
    fn test_custom_separator() {
        let got = parse_csv_line("101.5;9300;45.2", &order(), ";");
        assert_eq!(got.len(), 3);
    }
}
