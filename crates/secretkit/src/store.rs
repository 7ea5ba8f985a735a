//! File-backed secret store, one per deployment identity
//!
//! Values are generated once and reused on every later run. The store file
//! is written atomically with mode 0600 before a new value is handed out.

use crate::error::{Error, Result};
use crate::material::{MASK, SecretMaterial, SecretSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

/// Placeholder substituted for secret values in free text
pub const REDACTED: &str = "[REDACTED]";

#[derive(Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    identity: String,
    #[serde(default)]
    secrets: BTreeMap<String, Zeroizing<String>>,
}

type Entries = BTreeMap<String, Zeroizing<String>>;

/// Generate-once secret store for one deployment identity
pub struct SecretStore {
    path: PathBuf,
    identity: String,
    entries: Mutex<Entries>,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("keys", &self.keys())
            .finish()
    }
}

impl SecretStore {
    /// Open the store at `path`. A missing file is an empty store; nothing is
    /// written until the first secret is generated.
    pub fn open(path: impl Into<PathBuf>, identity: &str) -> Result<Self> {
        let path = path.into();
        let mut entries = Entries::new();

        if path.exists() {
            tighten_permissions(&path)?;
            let content = Zeroizing::new(
                fs::read_to_string(&path)
                    .map_err(|e| Error::backend(&path, format!("failed to read: {e}")))?,
            );
            let file: StoreFile = toml::from_str(&content)
                .map_err(|e| Error::backend(&path, format!("failed to parse: {}", e.message())))?;

            if !file.identity.is_empty() && file.identity != identity {
                return Err(Error::IdentityMismatch {
                    path,
                    expected: identity.to_string(),
                    found: file.identity,
                });
            }
            entries.extend(file.secrets);
            log::debug!("Loaded {} secret(s) from {}", entries.len(), path.display());
        }

        Ok(Self {
            path,
            identity: identity.to_string(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Return the secret for `key`, generating and persisting it first if
    /// this deployment has never had one.
    ///
    /// An existing value is returned as-is even if `spec` has since
    /// changed; regenerating would break services initialised with it.
    pub fn get_or_generate(&self, key: &str, spec: &SecretSpec) -> Result<SecretMaterial> {
        validate_key(key)?;
        if spec.length == 0 {
            return Err(Error::InvalidSpec {
                key: key.to_string(),
                message: "length must be at least 1".to_string(),
            });
        }

        let mut entries = self.entries();
        if let Some(value) = entries.get(key) {
            if !spec.is_satisfied_by(value) {
                log::warn!(
                    "Secret '{}' for {} no longer matches its spec; keeping the existing value",
                    key,
                    self.identity
                );
            }
            return Ok(SecretMaterial::new(key, value.clone()));
        }

        let value = spec.generate();
        entries.insert(key.to_string(), value.clone());
        if let Err(e) = self.persist(&entries) {
            entries.remove(key);
            return Err(e);
        }

        log::info!("Generated secret '{}' for {}", key, self.identity);
        Ok(SecretMaterial::new(key, value))
    }

    /// Existing secret, without generating
    pub fn get(&self, key: &str) -> Option<SecretMaterial> {
        self.entries()
            .get(key)
            .map(|value| SecretMaterial::new(key, value.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    /// Name -> raw value, for rendering the environment file
    pub fn export_env(&self) -> BTreeMap<String, SecretMaterial> {
        self.entries()
            .iter()
            .map(|(k, v)| (k.clone(), SecretMaterial::new(k, v.clone())))
            .collect()
    }

    /// Same keys as [`SecretStore::export_env`], every value masked
    pub fn redacted_view(&self) -> BTreeMap<String, String> {
        self.entries()
            .keys()
            .map(|k| (k.clone(), MASK.to_string()))
            .collect()
    }

    /// Replace every known secret value occurring in `text`
    pub fn redact(&self, text: &str) -> String {
        let entries = self.entries();
        let mut values: Vec<&str> = entries
            .values()
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .collect();
        // Longest first so a value containing another is masked whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut out = text.to_string();
        for value in values {
            if out.contains(value) {
                out = out.replace(value, REDACTED);
            }
        }
        out
    }

    fn persist(&self, entries: &Entries) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| Error::backend(&self.path, format!("failed to create directory: {e}")))?;

        let file = StoreFile {
            identity: self.identity.clone(),
            secrets: entries.clone(),
        };
        let content = Zeroizing::new(
            toml::to_string_pretty(&file)
                .map_err(|e| Error::backend(&self.path, format!("failed to serialize: {e}")))?,
        );

        // NamedTempFile is created 0600; keep it that way explicitly
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::backend(&self.path, format!("failed to create temp file: {e}")))?;
        set_private(tmp.path())?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::backend(&self.path, format!("failed to write: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::backend(&self.path, format!("failed to replace: {}", e.error)))?;

        log::debug!("Persisted secret store {}", self.path.display());
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidKey(key.to_string()))
    }
}

#[cfg(unix)]
fn set_private(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::backend(path, format!("failed to set permissions: {e}")))
}

#[cfg(not(unix))]
fn set_private(_path: &Path) -> Result<()> {
    Ok(())
}

/// Fix a store file that became group/world readable
#[cfg(unix)]
fn tighten_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)
        .map_err(|e| Error::backend(path, format!("failed to stat: {e}")))?
        .permissions()
        .mode();
    if mode & 0o077 != 0 {
        log::warn!(
            "Secret store {} had mode {:o}; restricting to 600",
            path.display(),
            mode & 0o777
        );
        set_private(path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn tighten_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, identity: &str) -> SecretStore {
        SecretStore::open(dir.path().join(identity).join("secrets.toml"), identity).unwrap()
    }

    #[test]
    fn test_same_identity_returns_same_value() {
        let dir = TempDir::new().unwrap();
        let spec = SecretSpec::password(24);

        let store = store(&dir, "web-1");
        let first = store.get_or_generate("admin_password", &spec).unwrap();
        let second = store.get_or_generate("admin_password", &spec).unwrap();
        assert_eq!(first.expose(), second.expose());

        // And after reopening from disk
        let reopened = SecretStore::open(store.path(), "web-1").unwrap();
        let third = reopened.get_or_generate("admin_password", &spec).unwrap();
        assert_eq!(first.expose(), third.expose());
    }

    #[test]
    fn test_distinct_identities_are_independent() {
        let dir = TempDir::new().unwrap();
        let spec = SecretSpec::password(32);

        let a = store(&dir, "web-1").get_or_generate("admin_password", &spec).unwrap();
        let b = store(&dir, "web-2").get_or_generate("admin_password", &spec).unwrap();
        assert_ne!(a.expose(), b.expose());
        assert!(spec.is_satisfied_by(a.expose()));
        assert!(spec.is_satisfied_by(b.expose()));
    }

    #[cfg(unix)]
    #[test]
    fn test_store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "web-1");
        store.get_or_generate("db_root", &SecretSpec::password(16)).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_tightens_loose_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "identity = \"web-1\"\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        SecretStore::open(&path, "web-1").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_persist_failure_is_backend_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let store = SecretStore::open(blocker.join("secrets.toml"), "web-1").unwrap();
        let err = store
            .get_or_generate("db_root", &SecretSpec::password(16))
            .unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
        // The unpersisted value is not kept around
        assert!(!store.contains("db_root"));
    }

    #[test]
    fn test_identity_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "web-1");
        store.get_or_generate("db_root", &SecretSpec::password(16)).unwrap();

        let err = SecretStore::open(store.path(), "web-2").unwrap_err();
        assert!(matches!(err, Error::IdentityMismatch { .. }));
    }

    #[test]
    fn test_redaction() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "web-1");
        let secret = store.get_or_generate("cache_auth", &SecretSpec::hex(32)).unwrap();

        let text = format!("redis-cli -a {} ping failed", secret.expose());
        let redacted = store.redact(&text);
        assert!(!redacted.contains(secret.expose()));
        assert!(redacted.contains(REDACTED));

        let view = store.redacted_view();
        assert_eq!(view.get("cache_auth").map(String::as_str), Some(MASK));
        assert_eq!(store.export_env()["cache_auth"].expose(), secret.expose());
    }

    #[test]
    fn test_invalid_keys_and_specs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "web-1");
        assert!(matches!(
            store.get_or_generate("DB Root", &SecretSpec::password(8)),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            store.get_or_generate("db_root", &SecretSpec::password(0)),
            Err(Error::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_debug_lists_keys_only() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "web-1");
        let secret = store.get_or_generate("jwt_secret", &SecretSpec::hex(64)).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("jwt_secret"));
        assert!(!debug.contains(secret.expose()));
    }
}
