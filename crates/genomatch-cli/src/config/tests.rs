#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.graphkb.url, DEFAULT_GRAPHKB_URL);
        assert_eq!(config.graphkb.page_size, DEFAULT_QUERY_LIMIT);
        assert_eq!(config.ipr.url, DEFAULT_IPR_URL);
        assert!(config.ipr.upload);
        assert!(config.report.match_germline);
        assert!(!config.report.generate_therapeutics);
        assert_eq!(config.report.excluded_variant_types, vec!["wildtype".to_string()]);
    }

    #[test]
    fn test_match_filters_are_parsed() {
        let config: Config = toml::from_str(
            r#"
            [report]
            generate_therapeutics = true

            [[report.kb_match_filters]]
            require_all_of = [{ field = "category", values = ["cancer predisposition"] }]
            exclude_all_of = [{ field = "externalSource", values = ["CGL"] }]
            "#,
        )
        .unwrap();
        assert!(config.report.generate_therapeutics);
        let filter = &config.report.kb_match_filters[0];
        assert_eq!(filter.require_all_of[0].field, "category");
        assert_eq!(filter.exclude_all_of[0].values, vec![serde_json::json!("CGL")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_filter_field_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[report.kb_match_filters]]
            require_all_of = [{ field = "colour", values = ["blue"] }]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_report_options_carry_upload_flag() {
        let report = ReportConfig {
            output_json_path: Some(PathBuf::from("out.json")),
            ..ReportConfig::default()
        };
        let options = report.options(false);
        assert!(!options.upload);
        assert_eq!(options.output_json_path, Some(PathBuf::from("out.json")));
    }
}
