use crate::models::guid::{self, ReferenceSet};
use crate::models::instruction::{Instruction, one_or_many};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Per-filename download policy
///
/// Older instruction files store this as a nullable bool (`true`, `false`, `null`), newer
/// ones as a string. Both forms are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DownloadFlag {
    /// Always download this file
    Download,
    /// Never download this file
    Skip,
    /// Download only when the file is not already in the mod directory
    #[default]
    AutoDetect,
}

impl<'de> Deserialize<'de> for DownloadFlag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawFlag {
            Bool(bool),
            Text(String),
        }

        Ok(match Option::<RawFlag>::deserialize(deserializer)? {
            None => DownloadFlag::AutoDetect,
            Some(RawFlag::Bool(true)) => DownloadFlag::Download,
            Some(RawFlag::Bool(false)) => DownloadFlag::Skip,
            Some(RawFlag::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "download" | "true" => DownloadFlag::Download,
                "skip" | "false" => DownloadFlag::Skip,
                _ => DownloadFlag::AutoDetect,
            },
        })
    }
}

/// A sub-selectable variant nested in a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModOption {
    #[serde(
        rename = "Guid",
        default = "Uuid::new_v4",
        deserialize_with = "guid::deserialize_or_new"
    )]
    pub id: Uuid,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub instructions: Vec<Instruction>,

    #[serde(default)]
    pub is_selected: bool,
}

impl ModOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            instructions: Vec::new(),
            is_selected: false,
        }
    }
}

/// An instruction positioned within a component's flattened install order
#[derive(Debug, Clone, Copy)]
pub struct PlacedInstruction<'a> {
    pub index: usize,
    pub instruction: &'a Instruction,
    /// The option that owns the instruction, `None` for the component's own list
    pub option_id: Option<Uuid>,
}

/// A selectable mod unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Component {
    #[serde(
        rename = "Guid",
        default = "Uuid::new_v4",
        deserialize_with = "guid::deserialize_or_new"
    )]
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, deserialize_with = "one_or_many")]
    pub category: Vec<String>,

    #[serde(default)]
    pub tier: String,

    #[serde(default)]
    pub instructions: Vec<Instruction>,

    #[serde(default)]
    pub dependencies: ReferenceSet,

    #[serde(default)]
    pub restrictions: ReferenceSet,

    #[serde(default)]
    pub options: Vec<ModOption>,

    #[serde(rename = "ModLink", default, deserialize_with = "one_or_many")]
    pub mod_links: Vec<String>,

    #[serde(default)]
    pub download_filenames: IndexMap<String, IndexMap<String, DownloadFlag>>,

    #[serde(default)]
    pub is_selected: bool,

    #[serde(default)]
    pub is_downloaded: bool,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            author: String::new(),
            description: String::new(),
            category: Vec::new(),
            tier: String::new(),
            instructions: Vec::new(),
            dependencies: ReferenceSet::new(),
            restrictions: ReferenceSet::new(),
            options: Vec::new(),
            mod_links: Vec::new(),
            download_filenames: IndexMap::new(),
            is_selected: false,
            is_downloaded: false,
        }
    }

    /// Own instructions followed by each selected option's instructions, in declared order.
    ///
    /// `include_option` forces an option into the list even when it is not selected, which
    /// is how an instruction inside an unselected option still gets a position to validate at.
    pub fn flattened_instructions(&self, include_option: Option<Uuid>) -> Vec<PlacedInstruction<'_>> {
        let own = self.instructions.iter().map(|instruction| (instruction, None));

        let from_options = self
            .options
            .iter()
            .filter(|option| option.is_selected || Some(option.id) == include_option)
            .flat_map(|option| {
                option
                    .instructions
                    .iter()
                    .map(move |instruction| (instruction, Some(option.id)))
            });

        own.chain(from_options)
            .enumerate()
            .map(|(index, (instruction, option_id))| PlacedInstruction {
                index,
                instruction,
                option_id,
            })
            .collect()
    }

    /// The option whose instruction list contains `instruction_id`
    pub fn option_containing(&self, instruction_id: Uuid) -> Option<&ModOption> {
        self.options
            .iter()
            .find(|option| option.instructions.iter().any(|i| i.id == instruction_id))
    }

    /// Find an instruction in the component's own list or any option
    pub fn find_instruction(&self, instruction_id: Uuid) -> Option<&Instruction> {
        self.instructions
            .iter()
            .chain(self.options.iter().flat_map(|o| o.instructions.iter()))
            .find(|i| i.id == instruction_id)
    }

    /// Position of `instruction_id` within the flattened install order.
    pub fn instruction_position(&self, instruction_id: Uuid) -> Option<usize> {
        let owner = self.option_containing(instruction_id).map(|o| o.id);
        self.flattened_instructions(owner)
            .iter()
            .find(|placed| placed.instruction.id == instruction_id)
            .map(|placed| placed.index)
    }

    pub fn find_option(&self, option_id: Uuid) -> Option<&ModOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// The link a file is downloaded from: the URL whose filename map lists it, else the
    /// first mod link
    pub fn link_for_file(&self, filename: &str) -> Option<&str> {
        self.download_filenames
            .iter()
            .find(|(_, files)| files.keys().any(|f| f.eq_ignore_ascii_case(filename)))
            .map(|(url, _)| url.as_str())
            .or_else(|| self.mod_links.first().map(String::as_str))
    }

    /// Well-formedness problems that are reported but tolerated
    pub fn integrity_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.dependencies.contains(&self.id) {
            warnings.push(format!("'{}' lists itself as a dependency", self.name));
        }
        if self.restrictions.contains(&self.id) {
            warnings.push(format!("'{}' lists itself as a restriction", self.name));
        }

        for id in self.dependencies.intersection(&*self.restrictions) {
            warnings.push(format!(
                "'{}' both depends on and is restricted by {}",
                self.name, id
            ));
        }

        let mut seen = IndexSet::new();
        for instruction in self
            .instructions
            .iter()
            .chain(self.options.iter().flat_map(|o| o.instructions.iter()))
        {
            if !seen.insert(instruction.id) {
                warnings.push(format!(
                    "'{}' contains duplicate instruction id {}",
                    self.name, instruction.id
                ));
            }
        }

        warnings
    }
}
