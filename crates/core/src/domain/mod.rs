pub mod consulting;
pub mod opportunity;
pub mod task;
pub mod thread;

use uuid::Uuid;

/// Builds a short, prefixed identifier such as `opp_1a2b3c4d`.
pub fn short_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &raw[..8])
}

/// Splits a comma separated list, trimming entries and dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|value| !value.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::{short_id, split_list};

    #[test]
    fn short_id_has_prefix_and_eight_hex_chars() {
        let id = short_id("opp");
        let (prefix, suffix) = id.split_once('_').expect("separator");

        assert_eq!(prefix, "opp");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn split_list_drops_blank_entries() {
        assert_eq!(split_list(" Ana, ,Bo ,"), vec!["Ana".to_string(), "Bo".to_string()]);
        assert!(split_list("").is_empty());
    }
}
