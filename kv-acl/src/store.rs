//! # User Table
//!
//! Holds every known user behind a single reader-preferring lock, and the
//! JSON/YAML load and save paths for the ACL config file.

use crate::error::{AclError, AclResult};
use crate::user::User;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// How a freshly loaded user list is merged into the current table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Per-user merge: an entry with an existing username overwrites it,
    /// entries for new usernames are added, nothing already present is
    /// removed.
    Merge,
    /// The loaded list becomes the entire table; any user not present in
    /// the file is dropped.
    Replace,
}

pub struct AclStore {
    users: RwLock<HashMap<String, User>>,
}

impl Default for AclStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AclStore {
    pub fn new() -> Self {
        AclStore { users: RwLock::new(HashMap::new()) }
    }

    /// The default user, pre-bound to a connection before `AUTH`.
    pub fn default_user(&self) -> Option<User> {
        self.users.read().get("default").cloned()
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.users.read().get(username).cloned()
    }

    pub fn upsert(&self, mut user: User) {
        user.normalize();
        self.users.write().insert(user.username.clone(), user);
    }

    pub fn remove(&self, username: &str) -> AclResult<()> {
        self.users.write().remove(username).ok_or_else(|| AclError::UnknownUser(username.to_string()))?;
        Ok(())
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Loads a JSON or YAML list of users (format chosen by file
    /// extension) and applies it under the given mode.
    pub fn load(&self, path: impl AsRef<Path>, mode: LoadMode) -> AclResult<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut loaded: Vec<User> = match extension(path) {
            Some("json") => serde_json::from_slice(&bytes)?,
            Some("yml") | Some("yaml") => serde_yaml::from_slice(&bytes)?,
            other => {
                return Err(AclError::UnknownFormat(other.unwrap_or("").to_string()));
            }
        };
        for user in &mut loaded {
            user.normalize();
        }

        let mut table = self.users.write();
        if mode == LoadMode::Replace {
            table.clear();
        }
        for user in loaded {
            table.insert(user.username.clone(), user);
        }
        Ok(())
    }

    /// Serializes every user to the given path, format chosen by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> AclResult<()> {
        let path = path.as_ref();
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        let bytes = match extension(path) {
            Some("json") => serde_json::to_vec_pretty(&users)?,
            Some("yml") | Some("yaml") => serde_yaml::to_string(&users)?.into_bytes(),
            other => {
                return Err(AclError::UnknownFormat(other.unwrap_or("").to_string()));
            }
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Category;

    #[test]
    fn upsert_then_get_round_trips() {
        let store = AclStore::new();
        store.upsert(User::new("alice"));
        assert!(store.get("alice").is_some());
        assert!(store.get("bob").is_none());
    }

    #[test]
    fn remove_unknown_user_errors() {
        let store = AclStore::new();
        assert!(store.remove("nobody").is_err());
    }

    #[test]
    fn save_then_load_json_round_trips() {
        let dir = std::env::temp_dir().join(format!("kv-acl-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("users.json");

        let store = AclStore::new();
        let mut user = User::new("alice");
        user.enabled = true;
        user.categories_include.insert(Category::Read);
        store.upsert(user);
        store.save(&path).unwrap();

        let loaded = AclStore::new();
        loaded.load(&path, LoadMode::Replace).unwrap();
        let alice = loaded.get("alice").unwrap();
        assert!(alice.enabled);
        assert!(alice.categories_include.contains(&Category::Read));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn merge_mode_keeps_existing_users_not_in_file() {
        let dir = std::env::temp_dir().join(format!("kv-acl-test-merge-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("users.json");

        let writer = AclStore::new();
        writer.upsert(User::new("bob"));
        writer.save(&path).unwrap();

        let store = AclStore::new();
        store.upsert(User::new("alice"));
        store.load(&path, LoadMode::Merge).unwrap();

        assert!(store.get("alice").is_some());
        assert!(store.get("bob").is_some());

        std::fs::remove_dir_all(&dir).ok();
    }
}
