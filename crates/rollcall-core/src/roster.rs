//! Roster store — the authoritative list of people who can be checked in.
//!
//! Rosters are read from TOML files with one `[[person]]` table per entry:
//!
//! ```toml
//! [[person]]
//! id = 7
//! name = "Alice"
//! group = "5B"
//! age = 11
//! roll_number = "0412"
//! ```

use crate::types::{Person, PersonId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad roster TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate person id {0} in roster")]
    DuplicateId(PersonId),
    #[error("person {0} has an empty name")]
    EmptyName(PersonId),
    #[error("duplicate name '{0}' in roster; names must be unique ignoring case")]
    DuplicateName(String),
}

/// Read-only access to the people eligible for check-in.
///
/// The ledger only ever reads through this trait; it never adds or removes people.
pub trait RosterStore: Send + Sync {
    fn list_people(&self) -> Vec<Person>;

    fn get(&self, id: PersonId) -> Option<Person> {
        self.list_people().into_iter().find(|p| p.id == id)
    }

    /// Case-insensitive lookup by display name.
    fn find_by_name(&self, name: &str) -> Option<Person> {
        let wanted = name.trim().to_lowercase();
        self.list_people()
            .into_iter()
            .find(|p| p.display_name.to_lowercase() == wanted)
    }
}

/// Top-level roster file structure.
#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default, rename = "person")]
    people: Vec<Person>,
}

/// In-memory roster.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    people: Vec<Person>,
}

impl Roster {
    /// A roster with nobody on it. Every manual check-in is then ad hoc.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The three people the stock recognition service knows about.
    pub fn demo() -> Self {
        let person = |id: u32, name: &str| Person {
            id: PersonId(id),
            display_name: name.to_string(),
            group: None,
            age: None,
            roll_number: None,
        };
        Self {
            people: vec![person(1, "Alice"), person(2, "Bob"), person(3, "Charlie")],
        }
    }

    /// Build a roster, rejecting duplicate ids, duplicate names and blank names.
    ///
    /// Names are matched case-insensitively on lookup, so they must be unique
    /// the same way.
    pub fn new(people: Vec<Person>) -> Result<Self, RosterError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for person in &people {
            let name = person.display_name.trim();
            if name.is_empty() {
                return Err(RosterError::EmptyName(person.id));
            }
            if !ids.insert(person.id) {
                return Err(RosterError::DuplicateId(person.id));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(RosterError::DuplicateName(name.to_string()));
            }
        }
        Ok(Self { people })
    }

    pub fn from_toml_str(src: &str) -> Result<Self, RosterError> {
        let file: RosterFile = toml::from_str(src)?;
        Self::new(file.people)
    }

    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let src = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let roster = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), people = roster.len(), "roster loaded");
        Ok(roster)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

impl RosterStore for Roster {
    fn list_people(&self) -> Vec<Person> {
        self.people.clone()
    }

    fn get(&self, id: PersonId) -> Option<Person> {
        self.people.iter().find(|p| p.id == id).cloned()
    }

    fn find_by_name(&self, name: &str) -> Option<Person> {
        let wanted = name.trim().to_lowercase();
        self.people
            .iter()
            .find(|p| p.display_name.to_lowercase() == wanted)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS_5B: &str = r#"
[[person]]
id = 7
name = "Alice"
group = "5B"
age = 11

[[person]]
id = 8
display_name = "Bob"
roll_number = "0413"
"#;

    #[test]
    fn test_parse_roster_toml() {
        let roster = Roster::from_toml_str(CLASS_5B).unwrap();
        assert_eq!(roster.len(), 2);
        let alice = roster.get(PersonId(7)).unwrap();
        assert_eq!(alice.display_name, "Alice");
        assert_eq!(alice.group.as_deref(), Some("5B"));
        assert_eq!(alice.age, Some(11));
        let bob = roster.get(PersonId(8)).unwrap();
        assert_eq!(bob.roll_number.as_deref(), Some("0413"));
    }

    #[test]
    fn test_empty_file_is_empty_roster() {
        let roster = Roster::from_toml_str("").unwrap();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let src = r#"
[[person]]
id = 1
name = "Alice"

[[person]]
id = 1
name = "Alicia"
"#;
        assert!(matches!(
            Roster::from_toml_str(src),
            Err(RosterError::DuplicateId(PersonId(1)))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let src = r#"
[[person]]
id = 1
name = "Alice"

[[person]]
id = 2
name = " alice "
"#;
        match Roster::from_toml_str(src) {
            Err(RosterError::DuplicateName(name)) => assert_eq!(name, "alice"),
            other => panic!("expected duplicate name, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_name_rejected() {
        let src = "[[person]]\nid = 4\nname = \"  \"\n";
        assert!(matches!(
            Roster::from_toml_str(src),
            Err(RosterError::EmptyName(PersonId(4)))
        ));
    }

    #[test]
    fn test_find_by_name_case_insensitive() {
        let roster = Roster::demo();
        assert_eq!(roster.find_by_name("bob").map(|p| p.id), Some(PersonId(2)));
        assert_eq!(roster.find_by_name(" CHARLIE ").map(|p| p.id), Some(PersonId(3)));
        assert!(roster.find_by_name("Dana").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Roster::load(Path::new("/nonexistent/roster.toml")).unwrap_err();
        assert!(matches!(err, RosterError::Io { .. }));
    }
}
