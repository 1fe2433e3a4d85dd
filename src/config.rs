use std::path::PathBuf;

use anyhow::Result;

pub const ENV_DB: &str = "FLOCKBOOK_DB";
pub const ENV_LOG: &str = "FLOCKBOOK_LOG";
pub const ENV_LOG_DIR: &str = "FLOCKBOOK_LOG_DIR";
pub const ENV_CALLER: &str = "FLOCKBOOK_CALLER";

pub const DEFAULT_LOG_FILTER: &str = "flockbook=info,sqlx=warn";

/// Values given on the command line; each one wins over its environment variable.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db: Option<PathBuf>,
    pub caller: Option<String>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
    pub caller: Option<String>,
}

impl AppConfig {
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::resolve`] with an explicit environment lookup.
    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let db_path = match overrides.db.or_else(|| lookup(ENV_DB).map(PathBuf::from)) {
            Some(path) => path,
            None => default_db_path()?,
        };

        Ok(AppConfig {
            db_path,
            log_filter: lookup(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_dir: overrides
                .log_dir
                .or_else(|| lookup(ENV_LOG_DIR).map(PathBuf::from)),
            caller: overrides.caller.or_else(|| lookup(ENV_CALLER)),
        })
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().unwrap_or(std::env::current_dir()?);
    Ok(base.join("flockbook").join("flockbook.sqlite3"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn flags_win_over_environment() -> Result<()> {
        let env = env_of(&[(ENV_DB, "/env/ledger.sqlite3"), (ENV_CALLER, "env-user")]);
        let config = AppConfig::resolve_with(
            ConfigOverrides {
                db: Some(PathBuf::from("/flag/ledger.sqlite3")),
                caller: Some("flag-user".into()),
                log_dir: None,
            },
            env,
        )?;
        assert_eq!(config.db_path, PathBuf::from("/flag/ledger.sqlite3"));
        assert_eq!(config.caller.as_deref(), Some("flag-user"));
        Ok(())
    }

    #[test]
    fn environment_fills_missing_flags() -> Result<()> {
        let env = env_of(&[
            (ENV_DB, "/env/ledger.sqlite3"),
            (ENV_LOG, "flockbook=debug"),
            (ENV_LOG_DIR, "/var/log/flockbook"),
            (ENV_CALLER, "env-user"),
        ]);
        let config = AppConfig::resolve_with(ConfigOverrides::default(), env)?;
        assert_eq!(config.db_path, PathBuf::from("/env/ledger.sqlite3"));
        assert_eq!(config.log_filter, "flockbook=debug");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/flockbook")));
        assert_eq!(config.caller.as_deref(), Some("env-user"));
        Ok(())
    }

    #[test]
    fn blank_environment_values_fall_back_to_defaults() -> Result<()> {
        let env = env_of(&[(ENV_LOG, "  "), (ENV_CALLER, "")]);
        let config = AppConfig::resolve_with(ConfigOverrides::default(), env)?;
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert!(config.caller.is_none());
        assert!(config.db_path.ends_with("flockbook/flockbook.sqlite3"));
        Ok(())
    }
}
