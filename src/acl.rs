//! Users and Passwords
//!
//! A deliberately small registry backing `AUTH` and the `ACL` subcommands.
//! Users carry a flag set (only `nopass` has meaning) and a list of SHA-256
//! password digests. The `default` user starts with `nopass`, which is what
//! lets fresh connections skip authentication.

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_USER: &str = "default";

const NOPASS: &str = "nopass";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AclError {
    #[error("Error in ACL SETUSER modifier '{0}': Syntax error")]
    Syntax(String),
}

/// Snapshot of a user as reported by `ACL GETUSER`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub flags: BTreeSet<String>,
    pub passwords: Vec<String>,
}

impl User {
    fn nopass() -> Self {
        Self {
            flags: BTreeSet::from([NOPASS.to_string()]),
            passwords: Vec::new(),
        }
    }

    fn accepts(&self, password: &[u8]) -> bool {
        self.flags.contains(NOPASS) || self.passwords.contains(&digest(password))
    }

    fn apply(&mut self, rule: &str) -> Result<(), AclError> {
        if let Some(password) = rule.strip_prefix('>') {
            let hash = digest(password.as_bytes());
            if !self.passwords.contains(&hash) {
                self.passwords.push(hash);
            }
            self.flags.remove(NOPASS);
        } else if let Some(password) = rule.strip_prefix('<') {
            let hash = digest(password.as_bytes());
            self.passwords.retain(|p| *p != hash);
        } else if rule.eq_ignore_ascii_case(NOPASS) {
            self.passwords.clear();
            self.flags.insert(NOPASS.to_string());
        } else if rule.eq_ignore_ascii_case("resetpass") {
            self.passwords.clear();
            self.flags.remove(NOPASS);
        } else {
            return Err(AclError::Syntax(rule.to_string()));
        }
        Ok(())
    }
}

/// Hex-encoded SHA-256 of a password.
pub fn digest(password: &[u8]) -> String {
    hex::encode(Sha256::digest(password))
}

#[derive(Debug)]
pub struct UserRegistry {
    users: Mutex<HashMap<String, User>>,
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRegistry {
    pub fn new() -> Self {
        let users = HashMap::from([(DEFAULT_USER.to_string(), User::nopass())]);
        Self {
            users: Mutex::new(users),
        }
    }

    fn users(&self) -> MutexGuard<'_, HashMap<String, User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when new connections start out authenticated as `default`.
    pub fn default_is_open(&self) -> bool {
        self.users()
            .get(DEFAULT_USER)
            .is_some_and(|user| user.flags.contains(NOPASS))
    }

    pub fn authenticate(&self, username: &str, password: &[u8]) -> bool {
        self.users()
            .get(username)
            .is_some_and(|user| user.accepts(password))
    }

    /// Creates the user if needed and applies every rule in order. Rules are
    /// validated before anything changes.
    pub fn set_user(&self, username: &str, rules: &[String]) -> Result<(), AclError> {
        let mut users = self.users();
        let mut user = users.get(username).cloned().unwrap_or_default();
        for rule in rules {
            user.apply(rule)?;
        }
        users.insert(username.to_string(), user);
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> Option<User> {
        self.users().get(username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_is_open() {
        let registry = UserRegistry::new();
        assert!(registry.default_is_open());
        assert!(registry.authenticate(DEFAULT_USER, b"anything"));

        let user = registry.get_user(DEFAULT_USER).unwrap();
        assert_eq!(user.flags, BTreeSet::from(["nopass".to_string()]));
        assert!(user.passwords.is_empty());
    }

    #[test]
    fn test_setting_a_password_closes_default() {
        let registry = UserRegistry::new();
        registry
            .set_user(DEFAULT_USER, &[">mypassword".to_string()])
            .unwrap();

        assert!(!registry.default_is_open());
        assert!(registry.authenticate(DEFAULT_USER, b"mypassword"));
        assert!(!registry.authenticate(DEFAULT_USER, b"wrong"));

        let user = registry.get_user(DEFAULT_USER).unwrap();
        assert!(user.flags.is_empty());
        assert_eq!(
            user.passwords,
            vec!["89e01536ac207279409d4de1e5253e01f4a1769e696db0d6062ca9b8f56767c8".to_string()]
        );
    }

    #[test]
    fn test_new_user_and_unknown_user() {
        let registry = UserRegistry::new();
        assert!(registry.get_user("alice").is_none());
        assert!(!registry.authenticate("alice", b"pw"));

        registry.set_user("alice", &[">pw".to_string()]).unwrap();
        assert!(registry.authenticate("alice", b"pw"));

        registry.set_user("alice", &["nopass".to_string()]).unwrap();
        assert!(registry.authenticate("alice", b"other"));
        assert!(registry.get_user("alice").unwrap().passwords.is_empty());
    }

    #[test]
    fn test_bad_rule_changes_nothing() {
        let registry = UserRegistry::new();
        let err = registry
            .set_user(DEFAULT_USER, &[">pw".to_string(), "bogus".to_string()])
            .unwrap_err();
        assert_eq!(err, AclError::Syntax("bogus".to_string()));
        assert!(registry.default_is_open());
    }
}
