//! Collector configuration: the YAML document model and its validated form.
//!
//! A collectors file is deserialized into [`CollectorsFile`] (raw, defaulted
//! by serde) and then turned into [`CollectorDefinition`]s, which are the
//! only shape the scheduler accepts. Every structural rule is enforced on
//! that conversion so a bad file fails before any task runs.

use std::collections::HashSet;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Keyword accepting every exit code.
pub const ANY_EXIT_CODE: &str = "any";

/// Columns every collector table carries before its declared fields.
pub const RESERVED_COLUMNS: &[&str] = &["id", "created_at", "updated_at", "deleted_at"];

fn default_duration() -> String {
    "0s".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_exit_codes() -> String {
    ANY_EXIT_CODE.to_string()
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

// ── Raw YAML document ─────────────────────────────────────────

/// A collectors file as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorsFile {
    #[serde(default)]
    pub collections: IndexMap<String, CollectionSpec>,
    #[serde(default, rename = "import", skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
}

impl CollectorsFile {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Validate every collection, in file order.
    pub fn definitions(&self) -> Result<Vec<CollectorDefinition>, ConfigError> {
        let definitions = self
            .collections
            .iter()
            .map(|(name, spec)| spec.to_definition(name))
            .collect::<Result<Vec<_>, _>>()?;
        validate_unique(&definitions)?;
        Ok(definitions)
    }
}

/// One `collections.<name>` entry with serde defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CollectionSpec {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default = "default_duration")]
    pub run_every: String,
    #[serde(default = "default_duration")]
    pub timeout: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default = "default_exit_codes")]
    pub exit_codes: String,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub database: DatabaseSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Database,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseSpec {
    #[serde(default)]
    pub map_values: MapValuesSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MapValuesSpec {
    #[serde(default = "default_separator")]
    pub field_separator: String,
    #[serde(default = "default_true")]
    pub add_timestamp: bool,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_regex: Option<String>,
}

impl Default for MapValuesSpec {
    fn default() -> Self {
        Self {
            field_separator: default_separator(),
            add_timestamp: true,
            fields: Vec::new(),
            ignore_regex: None,
        }
    }
}

/// A single output column: where its value comes from and how it is typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(rename = "field-index", default)]
    pub index: usize,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, index: usize) -> Self {
        Self {
            name: name.into(),
            field_type,
            index,
        }
    }
}

/// Declared field types. Anything that is not `int`, `float` or `string`
/// is `Raw`: stored as text, inserted as a bare literal.
///
/// A field without a `type` is a `String` and gets quoted. Configs that
/// relied on untyped fields passing through unquoted must now declare a
/// type such as `raw`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Float,
    #[serde(other)]
    Raw,
}

// ── Validated definition ──────────────────────────────────────

/// What a task executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// Literal shell command line.
    Command(String),
    /// Inline script body, materialized to an executable file at startup.
    Script(String),
}

/// Which exit statuses count as a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCodePolicy {
    Any,
    AllowList(Vec<i32>),
}

impl ExitCodePolicy {
    /// Parse `any` or a space-separated list of integers.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        if spec == ANY_EXIT_CODE {
            return Ok(ExitCodePolicy::Any);
        }
        let codes = spec
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<i32>()
                    .map_err(|_| format!("invalid exit code '{}' in exit-codes '{}'", token, spec))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if codes.is_empty() {
            return Err("exit-codes must be 'any' or a list of integers".to_string());
        }
        Ok(ExitCodePolicy::AllowList(codes))
    }

    /// `None` means the process died without an exit code (killed by a signal).
    pub fn accepts(&self, code: Option<i32>) -> bool {
        match (self, code) {
            (ExitCodePolicy::Any, _) => true,
            (ExitCodePolicy::AllowList(_), Some(0)) => true,
            (ExitCodePolicy::AllowList(codes), Some(code)) => codes.contains(&code),
            (ExitCodePolicy::AllowList(_), None) => false,
        }
    }
}

/// How database rows are cut out of a collector's output.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub separator: String,
    pub add_timestamp: bool,
    pub fields: Vec<FieldSpec>,
    pub ignore: Option<Regex>,
}

impl FieldMapping {
    pub fn new(separator: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            separator: separator.into(),
            add_timestamp: true,
            fields,
            ignore: None,
        }
    }

    pub fn with_ignore(mut self, ignore: Regex) -> Self {
        self.ignore = Some(ignore);
        self
    }

    fn validate(&self, collection: &str) -> Result<(), ConfigError> {
        if self.fields.is_empty() {
            return Err(ConfigError::invalid(
                collection,
                "database store requires at least one field in map-values",
            ));
        }
        if self.separator.is_empty() {
            return Err(ConfigError::invalid(collection, "field-separator must not be empty"));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(ConfigError::invalid(
                    collection,
                    format!("field name '{}' is reserved", field.name),
                ));
            }
            if let Some(j) = self.fields[..i].iter().position(|f| f.name == field.name) {
                return Err(ConfigError::invalid(
                    collection,
                    format!(
                        "duplicate field name: {} - idx: {} and idx: {}, please rename one of them",
                        field.name, j, i
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Where a task's output ends up.
#[derive(Debug, Clone)]
pub enum SinkKind {
    File,
    Database(FieldMapping),
}

/// A validated collector, ready to become a scheduled task.
#[derive(Debug, Clone)]
pub struct CollectorDefinition {
    pub name: String,
    pub command: CommandSource,
    pub run_every: Duration,
    /// Zero means the run is not bounded.
    pub timeout: Duration,
    pub run_once: bool,
    pub exit_codes: ExitCodePolicy,
    pub batch_size: usize,
    pub sink: SinkKind,
}

impl CollectorDefinition {
    /// A periodic file-sink collector with no timeout and `any` exit codes.
    pub fn new(name: impl Into<String>, command: CommandSource, run_every: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            run_every,
            timeout: Duration::ZERO,
            run_once: false,
            exit_codes: ExitCodePolicy::Any,
            batch_size: 1,
            sink: SinkKind::File,
        }
    }

    /// Table that database rows of this collector go to.
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// The per-run deadline, if any.
    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid(&self.name, "collection name must not be empty"));
        }
        match &self.command {
            CommandSource::Command(c) | CommandSource::Script(c) if c.trim().is_empty() => {
                return Err(ConfigError::invalid(&self.name, "command or script must not be empty"));
            }
            _ => {}
        }
        if self.run_once && !self.run_every.is_zero() {
            return Err(ConfigError::invalid(
                &self.name,
                "must be defined as run-once or run-every, not both",
            ));
        }
        if !self.run_once && self.run_every.is_zero() {
            return Err(ConfigError::invalid(
                &self.name,
                "run-every must be positive unless run-once is set",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(&self.name, "batch-size must be at least 1"));
        }
        if let SinkKind::Database(mapping) = &self.sink {
            mapping.validate(&self.name)?;
        }
        Ok(())
    }
}

impl CollectionSpec {
    /// Apply the structural rules and produce a [`CollectorDefinition`].
    pub fn to_definition(&self, name: &str) -> Result<CollectorDefinition, ConfigError> {
        let command = non_empty(&self.command);
        let script = non_empty(&self.script);
        let command = match (command, script) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(
                    name,
                    "command or script stanzas are mutually exclusive",
                ));
            }
            (Some(c), None) => CommandSource::Command(c.to_string()),
            (None, Some(s)) => CommandSource::Script(s.to_string()),
            (None, None) => {
                return Err(ConfigError::invalid(name, "one of command or script is required"));
            }
        };

        let run_every = parse_duration(name, "run-every", &self.run_every)?;
        let timeout = parse_duration(name, "timeout", &self.timeout)?;
        let exit_codes =
            ExitCodePolicy::parse(&self.exit_codes).map_err(|e| ConfigError::invalid(name, e))?;

        let sink = match self.store {
            StoreKind::File => SinkKind::File,
            StoreKind::Database => {
                let spec = &self.database.map_values;
                let ignore = match spec.ignore_regex.as_deref().filter(|r| !r.is_empty()) {
                    Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                        ConfigError::invalid(name, format!("invalid ignore-regex: {}", e))
                    })?),
                    None => None,
                };
                SinkKind::Database(FieldMapping {
                    separator: spec.field_separator.clone(),
                    add_timestamp: spec.add_timestamp,
                    fields: spec.fields.clone(),
                    ignore,
                })
            }
        };

        let definition = CollectorDefinition {
            name: name.to_string(),
            command,
            run_every,
            timeout,
            run_once: self.run_once,
            exit_codes,
            batch_size: self.batch_size,
            sink,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Reject duplicate collector names, and database collectors whose
/// lower-cased names would share a table.
pub fn validate_unique(definitions: &[CollectorDefinition]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut tables = HashSet::new();
    for def in definitions {
        if !names.insert(def.name.as_str()) {
            return Err(ConfigError::DuplicateCollection(def.name.clone()));
        }
        if matches!(def.sink, SinkKind::Database(_)) && !tables.insert(def.table_name()) {
            return Err(ConfigError::invalid(
                &def.name,
                format!("table '{}' is already used by another collection", def.table_name()),
            ));
        }
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn parse_duration(collection: &str, key: &str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if value.is_empty() || value.chars().all(|c| c == '0') {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value).map_err(|e| {
        ConfigError::invalid(collection, format!("invalid {} '{}': {}", key, value, e))
    })
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
collections:
  testing:
    command: ps aux
  process_list:
    command: ps auxh
    run-every: 2s
    timeout: 500ms
    exit-codes: "2 3"
    batch-size: 10
    store: database
    database:
      map-values:
        field-separator: " "
        ignore-regex: "^USER"
        fields:
          - name: user
            type: string
            field-index: 0
          - name: pid
            type: int
            field-index: 1
          - name: cpu
            type: float
            field-index: 2
          - name: started
            type: datetime
            field-index: 8
"#;

    fn spec(yaml: &str) -> CollectionSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let file = CollectorsFile::from_yaml(SAMPLE).unwrap();
        let testing = &file.collections["testing"];
        assert_eq!(testing.run_every, "0s");
        assert_eq!(testing.timeout, "0s");
        assert_eq!(testing.batch_size, 1);
        assert_eq!(testing.exit_codes, "any");
        assert_eq!(testing.store, StoreKind::File);
        assert_eq!(testing.database.map_values.field_separator, ",");
        assert!(testing.database.map_values.add_timestamp);
    }

    #[test]
    fn collections_keep_file_order() {
        let file = CollectorsFile::from_yaml(SAMPLE).unwrap();
        let names: Vec<&str> = file.collections.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["testing", "process_list"]);
    }

    #[test]
    fn database_collection_converts() {
        let file = CollectorsFile::from_yaml(SAMPLE).unwrap();
        let def = file.collections["process_list"].to_definition("process_list").unwrap();
        assert_eq!(def.run_every, Duration::from_secs(2));
        assert_eq!(def.deadline(), Some(Duration::from_millis(500)));
        assert_eq!(def.exit_codes, ExitCodePolicy::AllowList(vec![2, 3]));
        assert_eq!(def.batch_size, 10);
        match &def.sink {
            SinkKind::Database(mapping) => {
                assert_eq!(mapping.separator, " ");
                assert_eq!(mapping.fields.len(), 4);
                assert_eq!(mapping.fields[1], FieldSpec::new("pid", FieldType::Int, 1));
                assert_eq!(mapping.fields[3].field_type, FieldType::Raw);
                assert!(mapping.ignore.as_ref().unwrap().is_match("USER PID"));
            }
            SinkKind::File => panic!("expected database sink"),
        }
    }

    #[test]
    fn run_once_without_period_is_valid() {
        let def = spec("command: uname -a\nrun-once: true")
            .to_definition("uname")
            .unwrap();
        assert!(def.run_once);
        assert!(def.run_every.is_zero());
        assert_eq!(def.deadline(), None);
    }

    #[test]
    fn run_once_with_period_is_rejected() {
        let err = spec("command: uname\nrun-once: true\nrun-every: 5s")
            .to_definition("uname")
            .unwrap_err();
        assert!(err.to_string().contains("run-once or run-every"));
    }

    #[test]
    fn untyped_field_defaults_to_string() {
        let yaml = "command: ps\nrun-every: 1s\nstore: database\ndatabase:\n  map-values:\n    fields:\n      - name: user\n        field-index: 0";
        let def = spec(yaml).to_definition("ps").unwrap();
        match &def.sink {
            SinkKind::Database(mapping) => {
                assert_eq!(mapping.fields[0].field_type, FieldType::String);
            }
            SinkKind::File => panic!("expected database sink"),
        }
    }

    #[test]
    fn periodic_task_needs_a_period() {
        let err = spec("command: uname").to_definition("uname").unwrap_err();
        assert!(err.to_string().contains("run-every must be positive"));
    }

    #[test]
    fn command_and_script_are_exclusive() {
        let err = spec("command: ls\nscript: echo hi\nrun-every: 1s")
            .to_definition("both")
            .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        let err = spec("run-every: 1s").to_definition("neither").unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn script_becomes_script_source() {
        let def = spec("script: |\n  #!/bin/bash\n  echo hi\nrun-every: 1s")
            .to_definition("scripted")
            .unwrap();
        assert!(matches!(def.command, CommandSource::Script(ref s) if s.contains("echo hi")));
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let yaml = r#"
command: ps
run-every: 1s
store: database
database:
  map-values:
    fields:
      - {name: pid, type: int, field-index: 0}
      - {name: pid, type: int, field-index: 1}
"#;
        let err = spec(yaml).to_definition("ps").unwrap_err();
        assert!(err.to_string().contains("duplicate field name: pid"));
    }

    #[test]
    fn reserved_field_names_are_rejected() {
        let yaml = r#"
command: ps
run-every: 1s
store: database
database:
  map-values:
    fields:
      - {name: created_at, field-index: 0}
"#;
        let err = spec(yaml).to_definition("ps").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn database_store_requires_fields() {
        let err = spec("command: ps\nrun-every: 1s\nstore: database")
            .to_definition("ps")
            .unwrap_err();
        assert!(err.to_string().contains("at least one field"));
    }

    #[test]
    fn invalid_regex_and_duration_are_rejected() {
        let yaml = r#"
command: ps
run-every: 1s
store: database
database:
  map-values:
    ignore-regex: "("
    fields:
      - {name: a, field-index: 0}
"#;
        assert!(spec(yaml).to_definition("ps").is_err());
        assert!(spec("command: ps\nrun-every: soon").to_definition("ps").is_err());
    }

    #[test]
    fn unknown_store_fails_to_parse() {
        assert!(serde_yaml::from_str::<CollectionSpec>("command: ps\nstore: s3").is_err());
    }

    #[test]
    fn exit_code_policy_parsing() {
        assert_eq!(ExitCodePolicy::parse("any").unwrap(), ExitCodePolicy::Any);
        assert_eq!(
            ExitCodePolicy::parse(" 2  3 ").unwrap(),
            ExitCodePolicy::AllowList(vec![2, 3])
        );
        assert!(ExitCodePolicy::parse("2 x").is_err());
        assert!(ExitCodePolicy::parse("").is_err());
    }

    #[test]
    fn exit_code_policy_accepts() {
        let any = ExitCodePolicy::Any;
        assert!(any.accepts(Some(0)));
        assert!(any.accepts(Some(127)));
        assert!(any.accepts(None));

        let listed = ExitCodePolicy::AllowList(vec![2, 3]);
        assert!(listed.accepts(Some(0)));
        assert!(listed.accepts(Some(3)));
        assert!(!listed.accepts(Some(4)));
        assert!(!listed.accepts(None));
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let mapping = FieldMapping::new(",", vec![FieldSpec::new("a", FieldType::Int, 0)]);
        let mut upper = CollectorDefinition::new(
            "PS",
            CommandSource::Command("ps".into()),
            Duration::from_secs(1),
        );
        upper.sink = SinkKind::Database(mapping.clone());
        let mut lower = upper.clone();
        lower.name = "ps".into();

        let err = validate_unique(&[upper.clone(), lower]).unwrap_err();
        assert!(err.to_string().contains("table 'ps'"));

        let err = validate_unique(&[upper.clone(), upper]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateCollection(ref n) if n == "PS"));
    }
}
