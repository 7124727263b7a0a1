//! Entity definitions: named SQL templates per operation plus import/export functions.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Identifier every lookup falls back to.
pub const PRIMARY: &str = "primary";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryEntry {
    pub identifier: String,
    pub query: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub entity: String,
    /// By-id query used for scalar value lookups; `primary` when absent.
    #[serde(default)]
    pub scalar_value_query: Option<String>,
    #[serde(default)]
    pub list_query: Vec<QueryEntry>,
    #[serde(default)]
    pub new_query: Vec<QueryEntry>,
    #[serde(default)]
    pub by_id_query: Vec<QueryEntry>,
    #[serde(default)]
    pub save_statement: Vec<QueryEntry>,
    #[serde(default)]
    pub remove_statement: Option<String>,
    #[serde(default)]
    pub custom_functions: Vec<EntityFunction>,
}

/// Which operation list a template was looked up in; used in error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    List,
    New,
    ById,
    Save,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::List => "list query",
            QueryKind::New => "new query",
            QueryKind::ById => "by-id query",
            QueryKind::Save => "save statement",
        }
    }
}

impl EntityDefinition {
    fn entries(&self, kind: QueryKind) -> &[QueryEntry] {
        match kind {
            QueryKind::List => &self.list_query,
            QueryKind::New => &self.new_query,
            QueryKind::ById => &self.by_id_query,
            QueryKind::Save => &self.save_statement,
        }
    }

    /// Template for `identifier`, falling back to `primary`.
    pub fn query(&self, kind: QueryKind, identifier: &str) -> Result<&str, ConfigError> {
        let entries = self.entries(kind);
        entries
            .iter()
            .find(|e| e.identifier == identifier)
            .or_else(|| entries.iter().find(|e| e.identifier == PRIMARY))
            .map(|e| e.query.as_str())
            .ok_or_else(|| self.unsupported(kind.as_str(), identifier))
    }

    /// Template for exactly `identifier`, no fallback.
    pub fn exact_query(&self, kind: QueryKind, identifier: &str) -> Result<&str, ConfigError> {
        self.entries(kind)
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.query.as_str())
            .ok_or_else(|| self.unsupported(kind.as_str(), identifier))
    }

    pub fn function(&self, kind: FunctionKind, identifier: &str) -> Result<&EntityFunction, ConfigError> {
        self.custom_functions
            .iter()
            .find(|f| f.kind == kind && f.identifier == identifier)
            .ok_or_else(|| self.unsupported(kind.as_str(), identifier))
    }

    fn unsupported(&self, kind: &'static str, identifier: &str) -> ConfigError {
        ConfigError::UnsupportedIdentifier {
            kind,
            entity: self.entity.clone(),
            identifier: identifier.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Import,
    Export,
}

impl FunctionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Import => "import function",
            FunctionKind::Export => "export function",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityFunction {
    pub identifier: String,
    #[serde(rename = "type")]
    pub kind: FunctionKind,
    #[serde(default)]
    pub options: FunctionOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FunctionOptions {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
}

/// Wire format of an import or export function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeFormat {
    Csv { delimiter: u8 },
    Json,
}

impl FunctionOptions {
    pub fn exchange_format(&self) -> Result<ExchangeFormat, ConfigError> {
        let format = self.format.as_deref().unwrap_or_default();
        match format.to_ascii_lowercase().as_str() {
            "csv" => {
                let delimiter = match self.delimiter.as_deref() {
                    None | Some("") => b',',
                    Some(d) if d.len() == 1 => d.as_bytes()[0],
                    Some("\\t") => b'\t',
                    Some(d) => {
                        return Err(ConfigError::UnsupportedFormat(format!(
                            "csv delimiter must be a single byte, got '{}'",
                            d
                        )))
                    }
                };
                Ok(ExchangeFormat::Csv { delimiter })
            }
            "json" => Ok(ExchangeFormat::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Export payload; storing it is the caller's business.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericExport {
    pub file_name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveResult {
    pub result: bool,
    pub messages: Vec<String>,
}

impl RemoveResult {
    pub fn success() -> Self {
        RemoveResult {
            result: true,
            messages: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        RemoveResult {
            result: false,
            messages: vec![message.into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> EntityDefinition {
        serde_json::from_str(
            r#"{
                "entity": "order",
                "listQuery": [
                    { "identifier": "primary", "query": "SELECT 1" },
                    { "identifier": "open", "query": "SELECT 2" }
                ],
                "customFunctions": [
                    { "identifier": "importcsv", "type": "import", "options": { "format": "csv", "delimiter": ";" } },
                    { "identifier": "exportjson", "type": "export", "options": { "format": "json" } }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn falls_back_to_primary() {
        let def = definition();
        assert_eq!(def.query(QueryKind::List, "open").unwrap(), "SELECT 2");
        assert_eq!(def.query(QueryKind::List, "missing").unwrap(), "SELECT 1");
        assert!(def.exact_query(QueryKind::List, "missing").is_err());
    }

    #[test]
    fn missing_list_without_primary_is_unsupported() {
        let def = definition();
        let err = def.query(QueryKind::ById, "primary").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedIdentifier { kind: "by-id query", .. }));
    }

    #[test]
    fn resolves_function_format() {
        let def = definition();
        let import = def.function(FunctionKind::Import, "importcsv").unwrap();
        assert_eq!(import.options.exchange_format().unwrap(), ExchangeFormat::Csv { delimiter: b';' });
        let export = def.function(FunctionKind::Export, "exportjson").unwrap();
        assert_eq!(export.options.exchange_format().unwrap(), ExchangeFormat::Json);
        assert!(def.function(FunctionKind::Export, "importcsv").is_err());
    }

    #[test]
    fn rejects_unknown_format() {
        let options = FunctionOptions {
            format: Some("xlsx".into()),
            delimiter: None,
        };
        assert!(matches!(options.exchange_format(), Err(ConfigError::UnsupportedFormat(f)) if f == "xlsx"));
    }
}
