//! XSD validation for invoice documents
//!
//! Backed by libxml2, the same validator the official schema distribution
//! targets. Validation is optional and controlled by configuration; when
//! enabled, any schema violation aborts the parse before extraction.

use std::path::{Path, PathBuf};

use libxml::parser::Parser as XmlParser;
use libxml::schemas::{SchemaParserContext, SchemaValidationContext};

use nfe_common::{NfeError, Result};

/// Location of the schema set to validate against.
#[derive(Debug, Clone)]
pub struct XsdSettings {
    /// Root directory of the schema distribution.
    pub dir: PathBuf,
    /// Entry schema file, absolute or relative to `dir`
    /// (e.g. `procNFe_v4.00.xsd`).
    pub main: String,
}

impl XsdSettings {
    /// Resolve the entry schema to a concrete path.
    pub fn resolve(&self) -> Result<PathBuf> {
        if self.main.trim().is_empty() {
            return Err(NfeError::config(
                "XSD validation enabled but no entry schema configured",
                "Set NFE_XSD_MAIN (e.g. procNFe_v4.00.xsd)",
            ));
        }

        let main = Path::new(&self.main);
        if main.is_absolute() {
            Ok(main.to_path_buf())
        } else {
            Ok(self.dir.join(main))
        }
    }
}

/// Validate raw XML bytes against the schema at `schema_path`.
pub fn validate(data: &[u8], schema_path: &Path) -> Result<()> {
    if !schema_path.exists() {
        return Err(NfeError::schema_validation(
            schema_path.display().to_string(),
            "schema file not found",
        ));
    }

    let schema_file = schema_path.to_string_lossy();
    let mut parser_ctx = SchemaParserContext::from_file(&schema_file);
    let mut schema = SchemaValidationContext::from_parser(&mut parser_ctx)
        .map_err(|errors| {
            NfeError::schema_validation(schema_file.to_string(), format_errors(&errors))
        })?;

    let text = std::str::from_utf8(data).map_err(|e| {
        NfeError::schema_validation(schema_file.to_string(), format!("not valid UTF-8: {}", e))
    })?;

    let doc = XmlParser::default().parse_string(text).map_err(|e| {
        NfeError::schema_validation(schema_file.to_string(), format!("malformed XML: {}", e))
    })?;

    schema.validate_document(&doc).map_err(|errors| {
        NfeError::schema_validation(schema_file.to_string(), format_errors(&errors))
    })
}

fn format_errors(errors: &[libxml::error::StructuredError]) -> String {
    let mut messages: Vec<String> = errors
        .iter()
        .filter_map(|e| e.message.as_ref().map(|m| m.trim().to_string()))
        .collect();
    if messages.is_empty() {
        messages.push("unknown schema error".to_string());
    }
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_joins_dir() {
        let settings = XsdSettings {
            dir: PathBuf::from("/opt/schemas"),
            main: "procNFe_v4.00.xsd".to_string(),
        };
        assert_eq!(
            settings.resolve().unwrap(),
            PathBuf::from("/opt/schemas/procNFe_v4.00.xsd")
        );
    }

    #[test]
    fn test_resolve_absolute_wins() {
        let settings = XsdSettings {
            dir: PathBuf::from("/opt/schemas"),
            main: "/etc/nfe/procNFe_v4.00.xsd".to_string(),
        };
        assert_eq!(
            settings.resolve().unwrap(),
            PathBuf::from("/etc/nfe/procNFe_v4.00.xsd")
        );
    }

    #[test]
    fn test_resolve_empty_main_is_config_error() {
        let settings = XsdSettings {
            dir: PathBuf::from("/opt/schemas"),
            main: "  ".to_string(),
        };
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn test_validate_missing_schema_file() {
        let err = validate(b"<NFe/>", Path::new("/nonexistent/schema.xsd")).unwrap_err();
        assert!(err.to_string().contains("schema file not found"));
    }
}
