//! Static user credentials and per-user permission flags.
//!
//! Loaded once at startup from a CSV-shaped user-list file (`id,
//! password, msgDown, msgUp, fileDown, fileUp`, header row skipped) and
//! immutable for the lifetime of the process. Duplicate ids are rejected
//! at load time.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserPerms {
    pub msg_down: bool,
    pub msg_up: bool,
    pub file_down: bool,
    pub file_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub password: String,
    pub perms: UserPerms,
}

#[derive(Debug, Default)]
pub struct UserTable {
    users: HashMap<String, UserRecord>,
}

impl UserTable {
    pub fn from_records(records: Vec<UserRecord>) -> ServerResult<Self> {
        let mut users = HashMap::with_capacity(records.len());
        for record in records {
            let id = record.id.clone();
            if users.insert(id.clone(), record).is_some() {
                return Err(ServerError::DuplicateUser { id });
            }
        }
        Ok(UserTable { users })
    }

    pub fn get(&self, id: &str) -> Option<&UserRecord> {
        self.users.get(id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }
}

/// Parses a boolean flag the way the source user-list format does:
/// `0`/`1`/`true`/`false`, case-insensitive.
fn parse_flag(raw: &str, field: &str, line: usize) -> ServerResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(ServerError::UserListMalformed {
            line,
            reason: format!("field `{field}` must be 0/1/true/false, got `{other}`"),
        }),
    }
}

/// Loads the user list from a CSV-shaped text file: `id, password,
/// msgDown, msgUp, fileDown, fileUp` per line, first line is a header
/// and is skipped.
pub fn load_user_table(path: &Path) -> ServerResult<UserTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(false)
        .from_path(path)
        .map_err(|e| ServerError::Config(format!("opening user list {path:?}: {e}")))?;

    let mut records = Vec::new();
    let mut seen = HashMap::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2; // +1 for 0-index, +1 for the skipped header line
        let row = result.map_err(|e| ServerError::UserListMalformed {
            line,
            reason: e.to_string(),
        })?;
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        if row.len() != 6 {
            return Err(ServerError::UserListMalformed {
                line,
                reason: format!("expected 6 fields, got {}", row.len()),
            });
        }
        let id = row[0].to_string();
        let password = row[1].to_string();
        let perms = UserPerms {
            msg_down: parse_flag(&row[2], "msgDown", line)?,
            msg_up: parse_flag(&row[3], "msgUp", line)?,
            file_down: parse_flag(&row[4], "fileDown", line)?,
            file_up: parse_flag(&row[5], "fileUp", line)?,
        };
        if seen.insert(id.clone(), line).is_some() {
            return Err(ServerError::DuplicateUser { id });
        }
        records.push(UserRecord {
            id,
            password,
            perms,
        });
    }

    UserTable::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_well_formed_list_and_skips_header() {
        let f = write_temp("id,password,msgDown,msgUp,fileDown,fileUp\nalice,pw,1,1,1,1\nbob,pw2,0,1,true,false\n");
        let table = load_user_table(f.path()).unwrap();
        assert_eq!(table.len(), 2);
        let alice = table.get("alice").unwrap();
        assert_eq!(alice.password, "pw");
        assert!(alice.perms.msg_down);
        let bob = table.get("bob").unwrap();
        assert!(!bob.perms.msg_down);
        assert!(bob.perms.file_down);
        assert!(!bob.perms.file_up);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let f = write_temp("id,password,msgDown,msgUp,fileDown,fileUp\nalice,pw,1,1,1,1\nalice,pw2,0,0,0,0\n");
        let err = load_user_table(f.path()).unwrap_err();
        assert!(matches!(err, ServerError::DuplicateUser { id } if id == "alice"));
    }

    #[test]
    fn rejects_bad_boolean_flag() {
        let f = write_temp("id,password,msgDown,msgUp,fileDown,fileUp\nalice,pw,yes,1,1,1\n");
        let err = load_user_table(f.path()).unwrap_err();
        assert!(matches!(err, ServerError::UserListMalformed { .. }));
    }
}
