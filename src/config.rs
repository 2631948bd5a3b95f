use serde::{Deserialize, Serialize};

/// Settings for the JSON reader and writer.
///
/// The three envelope field names are emitted/recognized at the top level
/// of a JSON document; setting one to `None` suppresses that field
/// entirely.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JsonSettings {
    #[serde(default = "default_processing_directives_field")]
    pub processing_directives_field: Option<String>,
    #[serde(default = "default_schema_version_field")]
    pub schema_version_field: Option<String>,
    #[serde(default = "default_taxonomy_field")]
    pub taxonomy_field: Option<String>,
    /// Prefer the name over the ordinal as the JSON key when a field
    /// carries both.
    #[serde(default = "default_true")]
    pub prefer_field_names: bool,
    /// Interpret all-digit JSON keys as field ordinals when reading.
    #[serde(default = "default_true")]
    pub numbers_are_ordinals: bool,
}

impl Default for JsonSettings {
    fn default() -> Self {
        Self {
            processing_directives_field: default_processing_directives_field(),
            schema_version_field: default_schema_version_field(),
            taxonomy_field: default_taxonomy_field(),
            prefer_field_names: true,
            numbers_are_ordinals: true,
        }
    }
}

fn default_processing_directives_field() -> Option<String> {
    Some("fudgeProcessingDirectives".to_owned())
}

fn default_schema_version_field() -> Option<String> {
    Some("fudgeSchemaVersion".to_owned())
}

fn default_taxonomy_field() -> Option<String> {
    Some("fudgeTaxonomy".to_owned())
}

fn default_true() -> bool {
    true
}

/// Settings for the binary writer.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CodecSettings {
    /// Flush the underlying sink after each completed top-level message.
    #[serde(default = "default_true")]
    pub auto_flush_on_message_end: bool,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            auto_flush_on_message_end: true,
        }
    }
}
