//! Utterance normalization and phrasing signals.

use std::sync::OnceLock;

use regex::RegexSet;

/// Lower-case, trim and collapse runs of whitespace to one space.
///
/// Diacritics are kept: keywords and patterns are written with them.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn offline_signals() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"\bxem\b",
            r"không.*?truy.*?vấn.*?sql",
            r"\bno\b.*?query.*?sql",
            r"không.?online",
            r"\boffline\b",
            r"xem.*?(báo cáo|danh sách|dữ liệu)",
            r"xem.*?(task ids?)",
        ])
        .expect("offline signal patterns are valid")
    })
}

/// Whether the utterance asks to view stored data without refreshing it
/// from upstream ("xem ...", "offline", "không online", ...).
pub fn is_offline_request(utterance: &str) -> bool {
    offline_signals().is_match(&normalize(utterance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Xem   DM\tTechnical \n"), "xem dm technical");
    }

    #[test]
    fn offline_phrasings() {
        assert!(is_offline_request("Xem DM Technical cho S24M12345"));
        assert!(is_offline_request("báo cáo process wip offline"));
        assert!(is_offline_request("lấy dm actual không online"));
        assert!(is_offline_request("dm actual, không truy vấn SQL"));
        assert!(is_offline_request("dm actual no query sql please"));
    }

    #[test]
    fn online_phrasings() {
        assert!(!is_offline_request("Báo cáo DM Technical"));
        assert!(!is_offline_request("Lấy dữ liệu fabric trans cho S24M12345"));
        // "xem" only counts as a word.
        assert!(!is_offline_request("lấy báo cáo xeminar"));
    }
}
