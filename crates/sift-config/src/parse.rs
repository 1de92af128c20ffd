//! Configuration file parsing.

use std::{fs, path::Path};

use crate::{Config, ConfigError};

/// Parses a TOML configuration file without validating it.
pub fn parse_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a TOML configuration string without validating it.
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod test {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::FieldKind;

    #[test]
    fn parses_empty_document() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parses_fields_and_analyzers() {
        let config = parse_config_str(
            r#"
            [index]
            search_threads = 2

            [analyzers.english]
            language = "english"
            max_token_length = 20

            [fields.title]
            kind = "text"
            analyzer = "english"
            stored = true

            [fields."price_*"]
            kind = "double"
            sortable = true
            "#,
        )
        .unwrap();
        assert_eq!(config.index.search_threads, 2);
        assert_eq!(config.analyzers["english"].max_token_length, 20);
        assert_eq!(config.fields["title"].kind, FieldKind::Text);
        assert!(config.fields["price_*"].sortable);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse_config_str("[index]\nwriter_threads = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseStr(_)));
    }

    #[test]
    fn reports_file_path_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.toml");
        fs::write(&path, "[fields.title\n").unwrap();
        let err = parse_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
        assert!(err.to_string().contains("index.toml"));
    }

    #[test]
    fn reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = parse_config_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
