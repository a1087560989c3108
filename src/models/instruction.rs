use crate::models::guid::{self, parse_guid};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of step an instruction performs during installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum ActionKind {
    Extract,
    Move,
    Copy,
    Rename,
    Delete,
    Patcher,
    Execute,
    DelDuplicate,
    Choose,
    Run,
    CleanList,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Extract => "Extract",
            ActionKind::Move => "Move",
            ActionKind::Copy => "Copy",
            ActionKind::Rename => "Rename",
            ActionKind::Delete => "Delete",
            ActionKind::Patcher => "Patcher",
            ActionKind::Execute => "Execute",
            ActionKind::DelDuplicate => "DelDuplicate",
            ActionKind::Choose => "Choose",
            ActionKind::Run => "Run",
            ActionKind::CleanList => "CleanList",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ActionKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let action = match value.trim().to_ascii_lowercase().as_str() {
            "extract" | "unzip" => ActionKind::Extract,
            "move" => ActionKind::Move,
            "copy" => ActionKind::Copy,
            "rename" => ActionKind::Rename,
            "delete" => ActionKind::Delete,
            "patcher" | "tslpatcher" | "holopatcher" => ActionKind::Patcher,
            "execute" => ActionKind::Execute,
            "delduplicate" | "deleteduplicate" => ActionKind::DelDuplicate,
            "choose" => ActionKind::Choose,
            "run" => ActionKind::Run,
            "cleanlist" => ActionKind::CleanList,
            other => return Err(format!("Unknown instruction action '{}'", other)),
        };
        Ok(action)
    }
}

/// One entry of a `Choose` instruction's source list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceReference {
    Id(Uuid),
    Malformed(String),
}

/// A single step of a component's install procedure.
///
/// `source` holds filesystem paths for every action except [`ActionKind::Choose`], where it
/// holds option identifiers. Use [`Instruction::source_paths`] and
/// [`Instruction::choice_references`] rather than reading `source` directly so the two
/// interpretations never mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instruction {
    #[serde(
        rename = "Guid",
        default = "Uuid::new_v4",
        deserialize_with = "guid::deserialize_or_new"
    )]
    pub id: Uuid,

    pub action: ActionKind,

    #[serde(default, deserialize_with = "one_or_many")]
    pub source: Vec<String>,

    #[serde(default)]
    pub destination: String,

    #[serde(default)]
    pub arguments: String,

    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

impl Instruction {
    pub fn new(action: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            source: Vec::new(),
            destination: String::new(),
            arguments: String::new(),
            overwrite: true,
        }
    }

    pub fn with_source<I, S>(mut self, source: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source = source.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    /// Source entries that name filesystem paths. Always empty for `Choose`.
    pub fn source_paths(&self) -> &[String] {
        if self.action == ActionKind::Choose {
            &[]
        } else {
            &self.source
        }
    }

    /// Source entries interpreted as option identifiers. Always empty unless `Choose`.
    pub fn choice_references(&self) -> Vec<ChoiceReference> {
        if self.action != ActionKind::Choose {
            return Vec::new();
        }

        self.source
            .iter()
            .map(|raw| match parse_guid(raw) {
                Ok(id) => ChoiceReference::Id(id),
                Err(_) => ChoiceReference::Malformed(raw.clone()),
            })
            .collect()
    }

    /// Destination, or `None` when the field is blank
    pub fn destination_path(&self) -> Option<&str> {
        let trimmed = self.destination.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Accept either a single string or a list of strings.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) if value.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing_is_case_insensitive() {
        assert_eq!(ActionKind::try_from("extract".to_string()), Ok(ActionKind::Extract));
        assert_eq!(ActionKind::try_from("DELDUPLICATE".to_string()), Ok(ActionKind::DelDuplicate));
        assert_eq!(ActionKind::try_from("TSLPatcher".to_string()), Ok(ActionKind::Patcher));
        assert!(ActionKind::try_from("explode".to_string()).is_err());
    }

    #[test]
    fn test_choose_sources_are_not_paths() {
        let option_id = Uuid::new_v4();
        let choose = Instruction::new(ActionKind::Choose)
            .with_source([option_id.to_string(), "nonsense".to_string()]);

        assert!(choose.source_paths().is_empty());
        assert_eq!(
            choose.choice_references(),
            vec![
                ChoiceReference::Id(option_id),
                ChoiceReference::Malformed("nonsense".to_string())
            ]
        );
    }

    #[test]
    fn test_paths_are_not_choices() {
        let copy = Instruction::new(ActionKind::Copy).with_source(["<<modDirectory>>/a.tga"]);
        assert_eq!(copy.source_paths().len(), 1);
        assert!(copy.choice_references().is_empty());
    }

    #[test]
    fn test_deserialize_single_source_and_missing_guid() {
        let yaml = r#"
Action: move
Source: "<<modDirectory>>/mod/file.2da"
Destination: "<<kotorDirectory>>/Override"
"#;
        let instruction: Instruction = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(instruction.action, ActionKind::Move);
        assert_eq!(instruction.source, vec!["<<modDirectory>>/mod/file.2da"]);
        assert!(instruction.overwrite);
        assert!(!instruction.id.is_nil());
    }

    #[test]
    fn test_choose_survives_serialization() {
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        let choose = Instruction::new(ActionKind::Choose).with_source(ids.map(|id| id.to_string()));

        let yaml = serde_yaml_ng::to_string(&choose).unwrap();
        let back: Instruction = serde_yaml_ng::from_str(&yaml).unwrap();

        assert_eq!(back, choose);
        assert_eq!(
            back.choice_references(),
            ids.iter().map(|id| ChoiceReference::Id(*id)).collect::<Vec<_>>()
        );
    }
}
