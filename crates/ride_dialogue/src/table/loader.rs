use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use super::{StateTable, StateTableError};

const BUILTIN_TABLE: &str = include_str!("../../config/states.yaml");

impl StateTable {
    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self, StateTableError> {
        parse_table("builtin", BUILTIN_TABLE)
    }

    pub fn from_file(path: &Path) -> Result<Self, StateTableError> {
        if !path.exists() {
            return Err(StateTableError::FileNotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(StateTableError::NotAFile(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| StateTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = parse_table(&path.display().to_string(), &content)?;
        tracing::info!(path = %path.display(), states = table.len(), "state table loaded");
        Ok(table)
    }
}

/// Parse and structurally validate a YAML table. `origin` only labels errors.
pub fn parse_table(origin: &str, content: &str) -> Result<StateTable, StateTableError> {
    let mut value: Value = serde_yaml::from_str(content).map_err(|source| {
        StateTableError::Parse {
            origin: origin.to_string(),
            source,
        }
    })?;
    normalize_table(&mut value);

    let table: StateTable =
        serde_yaml::from_value(value).map_err(|source| StateTableError::Parse {
            origin: origin.to_string(),
            source,
        })?;
    table.validate()?;
    Ok(table)
}

fn normalize_table(table: &mut Value) {
    let Some(states) = table
        .as_mapping_mut()
        .and_then(|mapping| mapping.get_mut(&yaml_key("states")))
        .and_then(Value::as_mapping_mut)
    else {
        return;
    };

    for (key, state) in states.iter_mut() {
        let Some(id) = key.as_str() else {
            continue;
        };
        if state.is_null() {
            *state = Value::Mapping(Mapping::new());
        }
        let Some(mapping) = state.as_mapping_mut() else {
            continue;
        };
        mapping.insert(yaml_key("id"), yaml_key(id));
        normalize_options(mapping);
    }
}

/// Options may be written as bare labels.
fn normalize_options(state: &mut Mapping) {
    let Some(options) = state
        .get_mut(&yaml_key("options"))
        .and_then(Value::as_sequence_mut)
    else {
        return;
    };

    for option in options {
        if let Some(label) = option.as_str().map(str::to_string) {
            let mut mapping = Mapping::new();
            mapping.insert(yaml_key("label"), yaml_key(&label));
            *option = Value::Mapping(mapping);
        }
    }
}

fn yaml_key(value: &str) -> Value {
    Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::InputKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SMALL_TABLE: &str = r#"
initial_state: start
states:
  start:
    condition: is_registered
    next: menu
    else_next: ask_full_name
  ask_full_name:
    prompt: "What is your name?"
    input: text
    next: menu
  menu:
    prompt: "Pick one"
    input: choice
    options:
      - "Request a ride"
      - label: "Offer a ride"
        aliases: ["offer"]
        next: start
    next: start
"#;

    #[test]
    fn test_parse_fills_ids_and_bare_options() {
        let table = parse_table("test", SMALL_TABLE).unwrap();
        assert_eq!(table.len(), 3);

        let menu = table.state("menu").unwrap();
        assert_eq!(menu.id, "menu");
        assert_eq!(menu.input, InputKind::Choice);
        assert_eq!(menu.options[0].label, "Request a ride");
        assert_eq!(menu.options[1].aliases, vec!["offer".to_string()]);
        assert_eq!(table.state("ask_full_name").unwrap().field_name(), "full_name");
        // Defaults apply when the table omits them.
        assert!(table.commands.restart.iter().any(|c| c == "restart"));
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            StateTable::from_file(&missing),
            Err(StateTableError::FileNotFound(_))
        ));
        assert!(matches!(
            StateTable::from_file(dir.path()),
            Err(StateTableError::NotAFile(_))
        ));
    }

    #[test]
    fn test_from_file_rejects_self_referencing_state() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "initial_state: start\nstates:\n  start:\n    next: start\n"
        )
        .unwrap();

        let err = StateTable::from_file(file.path()).unwrap_err();
        assert!(matches!(err, StateTableError::RoutingCycle { .. }));
    }

    #[test]
    fn test_parse_error_carries_origin() {
        let err = parse_table("broken.yaml", "initial_state: [").unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_builtin_table_is_consistent() {
        let table = StateTable::builtin().unwrap();
        assert!(table.state(&table.initial_state).is_some());
        assert!(table.state("main_menu").is_some());
    }
}
