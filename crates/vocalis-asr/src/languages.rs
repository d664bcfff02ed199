//! Language tag handling for transcription requests

/// Base language of a tag: `"zh-TW"` -> `"zh"`, `"en_US"` -> `"en"`
pub fn base_language(tag: &str) -> String {
    tag.split(|c| c == '-' || c == '_')
        .next()
        .unwrap_or(tag)
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_language() {
        assert_eq!(base_language("zh-TW"), "zh");
        assert_eq!(base_language("en_US"), "en");
        assert_eq!(base_language("yue"), "yue");
        assert_eq!(base_language("DE"), "de");
    }
}
