/// Canonical language code for the translator.
///
/// Chinese variants collapse onto `zh-tw` / `zh-cn`; anything not in the
/// alias table is returned unchanged.
pub fn normalize(code: &str) -> String {
    let trimmed = code.trim();
    match trimmed.to_lowercase().as_str() {
        "zh" | "zh_tw" | "zh-tw" | "zh-hant" | "chinese" | "chinesetraditional"
        | "traditionalchinese" => "zh-tw".to_string(),
        "zh_cn" | "zh-cn" | "zh-hans" | "chinesesimplified" | "simplifiedchinese" => {
            "zh-cn".to_string()
        }
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traditional_aliases() {
        for code in ["zh", "zh_TW", "zh-tw", "ZH-TW", "chinese", "Chinese"] {
            assert_eq!(normalize(code), "zh-tw", "alias {}", code);
        }
    }

    #[test]
    fn test_simplified_aliases() {
        for code in ["zh_CN", "zh-cn", "chinesesimplified", "zh-Hans"] {
            assert_eq!(normalize(code), "zh-cn", "alias {}", code);
        }
    }

    #[test]
    fn test_unknown_codes_pass_through() {
        assert_eq!(normalize("en"), "en");
        assert_eq!(normalize("ja"), "ja");
        assert_eq!(normalize("pt-BR"), "pt-BR");
    }

    #[test]
    fn test_idempotent() {
        assert_eq!(normalize(&normalize("zh_TW")), "zh-tw");
        assert_eq!(normalize(&normalize("zh_CN")), "zh-cn");
    }
}
