use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Loaded records are reused for this long unless a write happens first.
pub const CONFIG_CACHE_TTL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
    Markdown,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_format: Option<OutputFormat>,
}

impl ConfigRecord {
    pub fn is_configured(&self) -> bool {
        self.api_id.unwrap_or(0) > 0 && self.api_hash.as_deref().is_some_and(|hash| !hash.is_empty())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        if !self.is_configured() {
            return None;
        }
        Some(Credentials {
            api_id: self.api_id?,
            api_hash: self.api_hash.clone()?,
        })
    }

    pub fn output_format(&self) -> OutputFormat {
        self.default_format.unwrap_or_default()
    }

    /// Projects a parsed config object onto the known fields. Fields with the
    /// wrong type are reported and treated as unset.
    fn from_object(object: &Map<String, Value>, warn_sink: &mut dyn FnMut(&str)) -> Self {
        let mut record = ConfigRecord::default();
        if let Some(value) = object.get("apiId") {
            record.api_id = value.as_i64();
            if record.api_id.is_none() && !value.is_null() {
                warn_sink("Ignoring config field apiId: expected an integer");
            }
        }
        if let Some(value) = object.get("apiHash") {
            record.api_hash = value.as_str().map(str::to_string);
            if record.api_hash.is_none() && !value.is_null() {
                warn_sink("Ignoring config field apiHash: expected a string");
            }
        }
        if let Some(value) = object.get("sessionString") {
            record.session_string = value.as_str().map(str::to_string);
        }
        if let Some(value) = object.get("defaultFormat") {
            match serde_json::from_value::<OutputFormat>(value.clone()) {
                Ok(format) => record.default_format = Some(format),
                Err(_) => warn_sink("Ignoring config field defaultFormat: expected plain, json or markdown"),
            }
        }
        record
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: i64,
    pub api_hash: String,
}

struct CachedConfig {
    record: ConfigRecord,
    captured_at: Instant,
}

/// Owner of the single config file.
///
/// Only this path is ever read. Nothing is looked up in the working
/// directory, so a checked-out repo cannot supply credentials or a session.
pub struct ConfigStore {
    path: PathBuf,
    cache: RefCell<Option<CachedConfig>>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: RefCell::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current record. Unreadable or malformed files degrade to
    /// an empty record and a warning; this never fails.
    pub fn load(&self) -> ConfigRecord {
        self.load_with(|message| warn!("{message}"))
    }

    pub fn load_with(&self, mut warn_sink: impl FnMut(&str)) -> ConfigRecord {
        self.load_at(Instant::now(), &mut warn_sink)
    }

    fn load_at(&self, now: Instant, warn_sink: &mut dyn FnMut(&str)) -> ConfigRecord {
        if let Some(cached) = self.cache.borrow().as_ref() {
            if now.saturating_duration_since(cached.captured_at) < CONFIG_CACHE_TTL {
                return cached.record.clone();
            }
        }

        let record = match read_raw(&self.path) {
            RawConfig::Absent => ConfigRecord::default(),
            RawConfig::Object(object) => ConfigRecord::from_object(&object, warn_sink),
            RawConfig::Invalid(message) => {
                warn_sink(&message);
                ConfigRecord::default()
            }
        };

        *self.cache.borrow_mut() = Some(CachedConfig {
            record: record.clone(),
            captured_at: now,
        });
        record
    }

    pub fn is_configured(&self) -> bool {
        self.load_with(|_| {}).is_configured()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.load_with(|_| {}).credentials()
    }

    pub fn session_string(&self) -> Option<String> {
        self.load_with(|_| {})
            .session_string
            .filter(|session| !session.is_empty())
    }

    /// Shallow-merges the set fields of `partial` over the file's current
    /// contents and rewrites it.
    pub fn save(&self, partial: &ConfigRecord) -> Result<(), StoreError> {
        let fields = match serde_json::to_value(partial)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        self.rewrite(|object| {
            for (key, value) in fields {
                object.insert(key, value);
            }
        })
    }

    pub fn set_credentials(&self, api_id: i64, api_hash: &str) -> Result<(), StoreError> {
        self.save(&ConfigRecord {
            api_id: Some(api_id),
            api_hash: Some(api_hash.to_string()),
            ..ConfigRecord::default()
        })
    }

    pub fn set_session_string(&self, session: &str) -> Result<(), StoreError> {
        self.save(&ConfigRecord {
            session_string: Some(session.to_string()),
            ..ConfigRecord::default()
        })
    }

    /// Drops the session token and keeps the API credentials.
    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.rewrite(|object| {
            object.remove("sessionString");
        })
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.invalidate();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn rewrite(&self, edit: impl FnOnce(&mut Map<String, Value>)) -> Result<(), StoreError> {
        let mut object = match read_raw(&self.path) {
            RawConfig::Absent => Map::new(),
            RawConfig::Object(object) => object,
            RawConfig::Invalid(message) => {
                warn!("Could not read existing config, it will be overwritten: {message}");
                Map::new()
            }
        };
        edit(&mut object);

        let payload = serde_json::to_string_pretty(&Value::Object(object))?;
        let result = write_atomic(&self.path, payload.as_bytes());
        self.invalidate();
        result?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }

    fn invalidate(&self) {
        self.cache.borrow_mut().take();
    }
}

enum RawConfig {
    Absent,
    Object(Map<String, Value>),
    Invalid(String),
}

fn read_raw(path: &Path) -> RawConfig {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return RawConfig::Absent,
        Err(err) => {
            return RawConfig::Invalid(format!("Failed to read config at {}: {err}", path.display()));
        }
    };

    match json5::from_str::<Value>(&contents).map(integral_numbers) {
        Ok(Value::Object(object)) => RawConfig::Object(object),
        Ok(other) => RawConfig::Invalid(format!(
            "Config at {} must be an object, got {}",
            path.display(),
            json_type_name(&other)
        )),
        Err(err) => RawConfig::Invalid(format!("Failed to parse config at {}: {err}", path.display())),
    }
}

/// JSON5 numbers may come back as floats; whole ones are stored as integers
/// so `apiId: 12345` round-trips as `12345`, not `12345.0`.
fn integral_numbers(value: Value) -> Value {
    match value {
        Value::Number(number) if number.as_i64().is_none() && number.as_u64().is_none() => {
            match number.as_f64() {
                Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
                    Value::from(float as i64)
                }
                _ => Value::Number(number),
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(integral_numbers).collect()),
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, value)| (key, integral_numbers(value)))
                .collect(),
        ),
        other => other,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Writes a sibling temp file with owner-only permissions and renames it over
/// `path`, so readers see either the old file or the new one.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let result = (|| {
        let mut file = open_private(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        set_file_permissions(path, 0o600)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn ensure_dir(path: &Path) -> Result<(), io::Error> {
    if path.as_os_str().is_empty() || path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    set_dir_permissions(path, 0o700)?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> Result<fs::File, io::Error> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> Result<fs::File, io::Error> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let perm = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perm)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let perm = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perm)
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> ConfigStore {
        ConfigStore::new(dir.join("tg").join("config.json5"))
    }

    fn collect_warnings(store: &ConfigStore) -> (ConfigRecord, Vec<String>) {
        let mut warnings = Vec::new();
        let record = store.load_with(|message| warnings.push(message.to_string()));
        (record, warnings)
    }

    #[test]
    fn absent_file_is_not_configured_and_silent() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let (record, warnings) = collect_warnings(&store);
        assert_eq!(record, ConfigRecord::default());
        assert!(warnings.is_empty());
        assert!(!store.is_configured());
        assert_eq!(record.output_format(), OutputFormat::Plain);
    }

    #[test]
    fn reads_commented_json5() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(
            store.path(),
            "{\n  // credentials from my.telegram.org\n  apiId: 12345,\n  apiHash: 'abc',\n  defaultFormat: 'json',\n}\n",
        )
        .expect("write");

        let record = store.load();
        assert_eq!(record.api_id, Some(12345));
        assert_eq!(record.api_hash.as_deref(), Some("abc"));
        assert_eq!(record.output_format(), OutputFormat::Json);
        assert!(store.is_configured());
    }

    #[test]
    fn malformed_or_non_object_config_degrades_with_warning() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");

        fs::write(store.path(), "{ apiId: ").expect("write");
        let (record, warnings) = collect_warnings(&store);
        assert_eq!(record, ConfigRecord::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Failed to parse"));

        store.invalidate();
        fs::write(store.path(), "[1, 2]").expect("write");
        let (record, warnings) = collect_warnings(&store);
        assert_eq!(record, ConfigRecord::default());
        assert!(warnings[0].contains("must be an object, got array"));
    }

    #[test]
    fn configured_requires_positive_id_and_hash() {
        let record = ConfigRecord {
            api_id: Some(0),
            api_hash: Some("hash".to_string()),
            ..ConfigRecord::default()
        };
        assert!(!record.is_configured());
        let record = ConfigRecord {
            api_id: Some(1),
            api_hash: Some(String::new()),
            ..ConfigRecord::default()
        };
        assert!(!record.is_configured());
        let record = ConfigRecord {
            api_id: Some(1),
            api_hash: Some("hash".to_string()),
            ..ConfigRecord::default()
        };
        assert!(record.is_configured());
    }

    #[test]
    fn save_merges_and_is_visible_immediately() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.set_credentials(42, "secret").expect("save credentials");
        assert!(store.is_configured());

        // Warm the cache, then write: the next load must not be stale.
        assert_eq!(store.session_string(), None);
        store.set_session_string("session-token").expect("save session");
        let record = store.load();
        assert_eq!(record.session_string.as_deref(), Some("session-token"));
        assert_eq!(record.api_id, Some(42));
        assert_eq!(record.api_hash.as_deref(), Some("secret"));
    }

    #[test]
    fn save_preserves_unknown_keys() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "{ apiId: 1, theme: 'dark' }").expect("write");

        store.set_session_string("s").expect("save");
        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).expect("read")).expect("json");
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["apiId"], 1);
        assert_eq!(raw["sessionString"], "s");
    }

    #[test]
    fn save_overwrites_unreadable_file() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "not json at all {{").expect("write");

        store.set_credentials(7, "h").expect("save");
        let record = store.load();
        assert_eq!(record.api_id, Some(7));
    }

    #[test]
    fn cache_serves_stale_reads_within_ttl() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.set_credentials(1, "first").expect("save");

        let start = Instant::now();
        let first = store.load_at(start, &mut |_| {});
        assert_eq!(first.api_hash.as_deref(), Some("first"));

        // External writer (another process) changes the file.
        fs::write(store.path(), "{ apiId: 1, apiHash: 'second' }").expect("write");

        let cached = store.load_at(start + Duration::from_millis(500), &mut |_| {});
        assert_eq!(cached.api_hash.as_deref(), Some("first"));

        let fresh = store.load_at(start + CONFIG_CACHE_TTL, &mut |_| {});
        assert_eq!(fresh.api_hash.as_deref(), Some("second"));
    }

    #[test]
    fn clear_session_keeps_credentials() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.set_credentials(5, "hash").expect("save");
        store.set_session_string("token").expect("save");

        store.clear_session().expect("clear");
        let record = store.load();
        assert_eq!(record.session_string, None);
        assert!(record.is_configured());
    }

    #[test]
    fn clear_all_removes_file() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.set_credentials(5, "hash").expect("save");
        assert!(store.path().exists());

        store.clear_all().expect("clear");
        assert!(!store.path().exists());
        assert!(!store.is_configured());
        store.clear_all().expect("clearing twice is fine");
    }

    #[cfg(unix)]
    #[test]
    fn writes_owner_only_file_and_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.set_credentials(5, "hash").expect("save");

        let file_mode = fs::metadata(store.path()).expect("file").permissions().mode() & 0o777;
        let dir_mode = fs::metadata(store.path().parent().expect("parent"))
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn wrong_typed_fields_are_ignored() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "{ apiId: 'abc', apiHash: 'h', defaultFormat: 'xml' }").expect("write");

        let (record, warnings) = collect_warnings(&store);
        assert_eq!(record.api_id, None);
        assert_eq!(record.api_hash.as_deref(), Some("h"));
        assert_eq!(record.default_format, None);
        assert_eq!(warnings.len(), 2);
    }
}
