// Cumulus file transfer engine.
// Copyright 2024-2026 Cumulus contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Storage accounts, the settings store, and the credential vault.
//!
//! An [Account] names a reachable storage root: a local directory tree or
//! an S3-family bucket prefix, together with the client parameters needed
//! to talk to it. Accounts are enumerated from a JSON settings document.
//! Secret material is never part of the account record; it is fetched
//! from a [SecretStore] keyed by access key id.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which family of backend an account speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Local,
    S3,
    /// S3-compatible stores (Digital Ocean Spaces and friends): the S3
    /// wire protocol against a custom endpoint.
    #[serde(rename = "digital_ocean", alias = "s3_compat")]
    S3Compat,
}

impl AccountKind {
    /// The tag stored in `source_kind`/`destination_kind` columns.
    pub fn as_tag(&self) -> &'static str {
        match self {
            AccountKind::Local => "local",
            AccountKind::S3 => "s3",
            AccountKind::S3Compat => "s3_compat",
        }
    }

    pub fn from_tag(tag: &str) -> Option<AccountKind> {
        match tag {
            "local" => Some(AccountKind::Local),
            "s3" => Some(AccountKind::S3),
            // "digital_ocean" appears in settings documents written by
            // older releases.
            "s3_compat" | "digital_ocean" => Some(AccountKind::S3Compat),
            _ => None,
        }
    }

    /// Path separator for this kind's path grammar.
    pub fn separator(&self) -> char {
        match self {
            AccountKind::Local => std::path::MAIN_SEPARATOR,
            AccountKind::S3 | AccountKind::S3Compat => '/',
        }
    }

    pub fn is_s3_family(&self) -> bool {
        matches!(self, AccountKind::S3 | AccountKind::S3Compat)
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A stored account record.
///
/// `root` is an absolute path in the account kind's grammar; for the S3
/// family it is `/{bucket}` or `/{bucket}/{prefix}`. The record carries
/// no secret material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub kind: AccountKind,
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default)]
    pub nickname: String,
}

impl Account {
    /// A local account anchored at a directory.
    pub fn local<P: AsRef<Path>>(root: P) -> Account {
        Account {
            kind: AccountKind::Local,
            root: root.as_ref().to_string_lossy().into_owned(),
            region: None,
            endpoint: None,
            access_key: None,
            nickname: String::new(),
        }
    }

    /// The same account rebased to a different root, as handed to a
    /// backend constructed for one transfer row.
    pub fn with_root(&self, root: &str) -> Account {
        Account {
            root: root.to_owned(),
            ..self.clone()
        }
    }
}

/// The settings document: panels shown by a UI and the full set of
/// client accounts used for root lookup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub panels: Vec<Account>,
    #[serde(default)]
    pub clients: Vec<Account>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        let file = File::open(path).map_err(|source| Error::SettingsRead {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_reader(file).map_err(|source| Error::SettingsFormat {
            path: path.to_owned(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| Error::SettingsRead {
            path: path.to_owned(),
            source,
        })?;
        serde_json::to_writer_pretty(file, self).map_err(|source| Error::SettingsFormat {
            path: path.to_owned(),
            source,
        })
    }
}

/// Source of account records, re-read when the feeder misses a lookup.
pub trait AccountSource: Send + Sync {
    fn accounts(&self) -> Vec<Account>;
}

/// Accounts enumerated from a settings file on every refresh.
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> SettingsFile {
        SettingsFile { path: path.into() }
    }
}

impl AccountSource for SettingsFile {
    fn accounts(&self) -> Vec<Account> {
        match Settings::load(&self.path) {
            Ok(settings) => settings.clients,
            Err(err) => {
                tracing::warn!(?err, path = ?self.path, "cannot re-read settings");
                Vec::new()
            }
        }
    }
}

/// A fixed set of accounts, for embedding and tests.
pub struct StaticAccounts(pub Vec<Account>);

impl AccountSource for StaticAccounts {
    fn accounts(&self) -> Vec<Account> {
        self.0.clone()
    }
}

/// Read-only secret lookup keyed by access key id.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, access_key: &str) -> Option<String>;
}

/// Secrets held in memory, for embedding and tests.
#[derive(Default)]
pub struct MemorySecrets {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecrets {
    pub fn new() -> MemorySecrets {
        MemorySecrets::default()
    }

    pub fn insert(&self, access_key: &str, secret: &str) {
        self.secrets
            .lock()
            .unwrap()
            .insert(access_key.to_owned(), secret.to_owned());
    }
}

impl SecretStore for MemorySecrets {
    fn get_secret(&self, access_key: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(access_key).cloned()
    }
}

/// Secrets read from a JSON document of `{access_key: secret}`.
///
/// Stands in for a platform keyring in headless deployments; the file
/// should be owner-readable only.
pub struct FileSecrets {
    path: PathBuf,
}

impl FileSecrets {
    pub fn new<P: Into<PathBuf>>(path: P) -> FileSecrets {
        FileSecrets { path: path.into() }
    }
}

impl SecretStore for FileSecrets {
    fn get_secret(&self, access_key: &str) -> Option<String> {
        let file = File::open(&self.path).ok()?;
        let map: HashMap<String, String> = serde_json::from_reader(file).ok()?;
        map.get(access_key).cloned()
    }
}

/// Index over account roots, queried by `(kind, path)`.
///
/// Resolves the account whose root is the longest path-prefix of the
/// queried path, considering only whole path components: `/bucket1` is
/// not a prefix of `/bucket10/key`.
#[derive(Default)]
pub struct AccountIndex {
    by_kind: HashMap<AccountKind, Vec<Account>>,
}

impl AccountIndex {
    pub fn new(accounts: Vec<Account>) -> AccountIndex {
        let mut index = AccountIndex::default();
        index.refresh(accounts);
        index
    }

    /// Replace the indexed accounts.
    pub fn refresh(&mut self, accounts: Vec<Account>) {
        self.by_kind.clear();
        for account in accounts {
            self.by_kind.entry(account.kind).or_default().push(account);
        }
        for list in self.by_kind.values_mut() {
            // Longest root first, so the first prefix hit wins.
            list.sort_by(|a, b| b.root.len().cmp(&a.root.len()));
        }
    }

    /// Find the account covering `path`, if any.
    pub fn lookup(&self, kind: AccountKind, path: &str) -> Option<&Account> {
        let sep = kind.separator();
        self.by_kind
            .get(&kind)?
            .iter()
            .find(|account| root_covers(&account.root, path, sep))
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(Vec::is_empty)
    }
}

/// True if `path` equals `root` or lies under it on a component boundary.
fn root_covers(root: &str, path: &str, sep: char) -> bool {
    let root = root.trim_end_matches(sep);
    if root.is_empty() {
        // An account rooted at the filesystem root covers everything.
        return path.starts_with(sep);
    }
    match path.strip_prefix(root) {
        Some("") => true,
        Some(rest) => rest.starts_with(sep),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn s3_account(root: &str, nickname: &str) -> Account {
        Account {
            kind: AccountKind::S3,
            root: root.to_owned(),
            region: Some("us-east-1".to_owned()),
            endpoint: None,
            access_key: Some("AKID".to_owned()),
            nickname: nickname.to_owned(),
        }
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in [AccountKind::Local, AccountKind::S3, AccountKind::S3Compat] {
            assert_eq!(AccountKind::from_tag(kind.as_tag()), Some(kind));
        }
        assert_eq!(AccountKind::from_tag("digital_ocean"), Some(AccountKind::S3Compat));
        assert_eq!(AccountKind::from_tag("gopher"), None);
    }

    #[test]
    fn longest_prefix_wins() {
        let index = AccountIndex::new(vec![
            s3_account("/bucket", "outer"),
            s3_account("/bucket/deep/prefix", "inner"),
        ]);
        let hit = index
            .lookup(AccountKind::S3, "/bucket/deep/prefix/a.txt")
            .unwrap();
        assert_eq!(hit.nickname, "inner");
        let hit = index.lookup(AccountKind::S3, "/bucket/other/a.txt").unwrap();
        assert_eq!(hit.nickname, "outer");
    }

    #[test]
    fn prefix_respects_component_boundaries() {
        let index = AccountIndex::new(vec![s3_account("/bucket1", "one")]);
        assert!(index.lookup(AccountKind::S3, "/bucket10/key").is_none());
        assert!(index.lookup(AccountKind::S3, "/bucket1/key").is_some());
        assert!(index.lookup(AccountKind::S3, "/bucket1").is_some());
    }

    #[test]
    fn kinds_do_not_cross_match() {
        let index = AccountIndex::new(vec![s3_account("/bucket", "s3")]);
        assert!(index.lookup(AccountKind::S3Compat, "/bucket/key").is_none());
        assert!(index.lookup(AccountKind::Local, "/bucket/key").is_none());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.json");
        let settings = Settings {
            panels: vec![Account::local("/home/someone")],
            clients: vec![s3_account("/bucket", "media")],
        };
        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.clients, settings.clients);
        assert_eq!(loaded.panels, settings.panels);
    }

    #[test]
    fn settings_kind_tokens() {
        let json = r#"{
            "clients": [
                {"kind": "local", "root": "/srv/data"},
                {"kind": "digital_ocean", "root": "/space", "region": "nyc3",
                 "endpoint": "https://nyc3.digitaloceanspaces.com",
                 "access_key": "DO00"}
            ]
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.clients[0].kind, AccountKind::Local);
        assert_eq!(settings.clients[1].kind, AccountKind::S3Compat);
    }

    #[test]
    fn memory_secrets() {
        let secrets = MemorySecrets::new();
        secrets.insert("AKID", "hunter2");
        assert_eq!(secrets.get_secret("AKID").as_deref(), Some("hunter2"));
        assert_eq!(secrets.get_secret("OTHER"), None);
    }
}
