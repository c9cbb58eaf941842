use crate::config::Config;
use crate::utils::{atomic_write, ensure_dir, get_wabridge_home};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_wabridge_home()?.join("config.json"))
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    match config_path {
        Some(path) => path.to_owned(),
        None => get_config_path().unwrap_or_else(|_| PathBuf::from("config.json")),
    }
}

/// Load the config file (or defaults when it does not exist) and apply env overrides.
///
/// Validation is left to the caller so tooling can inspect an incomplete config.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let path = resolve_path(config_path);
    let mut config = if path.exists() {
        let raw = read_locked(&path)?;
        check_file_permissions(&path);
        serde_json::from_value(migrate_config(raw))
            .with_context(|| format!("invalid config in {}", path.display()))?
    } else {
        debug!("no config file at {}, using defaults", path.display());
        Config::default()
    };

    crate::config::credentials::apply_env_overrides(&mut config);
    crate::config::credentials::apply_deployment_env(&mut config);
    Ok(config)
}

/// Read and parse the file under a shared lock so a concurrent save is never
/// observed half-written.
fn read_locked(path: &Path) -> Result<Value> {
    let file = fs::File::open(path)
        .with_context(|| format!("cannot open config {}", path.display()))?;
    file.lock_shared()
        .with_context(|| format!("cannot lock config {}", path.display()))?;
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("cannot parse config JSON in {}", path.display()))
}

/// Warn if the config file has overly permissive permissions.
/// Only emits the warning once per process.
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Once;

    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    "config file {} has permissions {:o}, recommend 0600 (it holds the access key)",
                    path.display(),
                    mode & 0o777
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}

/// Legacy flat keys from `.env`-style deployments, mapped to their nested location.
const LEGACY_KEYS: &[(&str, &str, &str)] = &[
    ("port", "gateway", "port"),
    ("accessKey", "gateway", "accessKey"),
    ("companyName", "gateway", "companyName"),
    ("clientId", "gateway", "clientId"),
    ("sessionName", "session", "name"),
    ("webhookUrl", "webhook", "url"),
];

fn migrate_config(data: Value) -> Value {
    let Value::Object(mut map) = data else {
        return data;
    };
    for (legacy, section, key) in LEGACY_KEYS {
        let Some(value) = map.remove(*legacy) else {
            continue;
        };
        let entry = map
            .entry((*section).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(section_map) = entry
            && !section_map.contains_key(*key)
        {
            section_map.insert((*key).to_string(), value);
        }
    }
    Value::Object(map)
}

/// Persist `config` as pretty JSON readable only by the owner.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let path = resolve_path(config_path);
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    ensure_dir(dir)?;

    // atomic_write renames over the config, so the lock lives on a sibling
    // file whose inode survives the swap.
    let _guard = lock_for_write(&path.with_extension("json.lock"))?;
    let body = serde_json::to_string_pretty(config)?;
    atomic_write(&path, &body)
        .with_context(|| format!("cannot save config to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o600)) {
            warn!("could not restrict {} to 0600: {}", path.display(), e);
        }
    }
    Ok(())
}

fn lock_for_write(lock_path: &Path) -> Result<fs::File> {
    let lock = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)
        .with_context(|| format!("cannot open lock file {}", lock_path.display()))?;
    lock.lock_exclusive()
        .with_context(|| format!("cannot lock {}", lock_path.display()))?;
    Ok(lock)
}
