//! Config file loading and credential resolution.
//!
//! The config file is a relaxed INI file:
//!
//! ```text
//! [client]
//! user = ${DB_USER}
//! password = "s3cret;with;semicolons"
//!
//! [osc]
//! chunk-size = 2000
//! max-lag-millis = 1500
//! replication-lag-query = select lag from meta.heartbeat
//! max-load = Threads_running=25
//! ```
//!
//! Unknown sections and keys are ignored. Key names are case-insensitive and
//! `-` matches `_`.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use ini::Ini;
use regex::Regex;
use tracing::{debug, info};

use super::MigrationContext;
use crate::error::{ContextError, Result};
use crate::instance::ConnectionConfig;

/// `[client]` section.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientSection {
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for ClientSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSection")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `[osc]` section. Zero and empty values mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OscSection {
    /// Rows per copy chunk.
    pub chunk_size: i64,
    /// Replication lag threshold in milliseconds.
    pub max_lag_millis: i64,
    /// Custom replica lag query.
    pub replication_lag_query: String,
    /// Max-load thresholds, `Name=Value,...`.
    pub max_load: String,
}

/// Parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// Client credentials.
    pub client: ClientSection,
    /// Migration defaults.
    pub osc: OscSection,
}

impl ConfigFile {
    /// Read, parse and resolve `${NAME}` credentials of a config file.
    pub fn read(path: &Path) -> Result<Self> {
        let config_read = |reason: String| ContextError::ConfigRead {
            path: path.to_path_buf(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| config_read(e.to_string()))?;
        let mut config = Self::parse(&text).map_err(config_read)?;
        config.client.user = resolve_env_reference(&config.client.user).map_err(config_read)?;
        config.client.password =
            resolve_env_reference(&config.client.password).map_err(config_read)?;
        Ok(config)
    }

    /// Parse config text without resolving environment references.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let ini = Ini::load_from_str(text).map_err(|e| e.to_string())?;
        let mut config = ConfigFile::default();

        for (section, properties) in ini.iter() {
            let Some(section) = section.map(normalize_name) else {
                continue;
            };
            for (key, value) in properties.iter() {
                let key = normalize_name(key);
                let value = value.trim();
                match (section.as_str(), key.as_str()) {
                    ("client", "user") => config.client.user = value.to_string(),
                    ("client", "password") => config.client.password = value.to_string(),
                    ("osc", "chunk_size") => config.osc.chunk_size = parse_int(&key, value)?,
                    ("osc", "max_lag_millis") => {
                        config.osc.max_lag_millis = parse_int(&key, value)?
                    }
                    ("osc", "replication_lag_query") => {
                        config.osc.replication_lag_query = value.to_string()
                    }
                    ("osc", "max_load") => config.osc.max_load = value.to_string(),
                    _ => {}
                }
            }
        }

        Ok(config)
    }
}

/// Section and key names match case-insensitively, with `-` equal to `_`.
fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

fn parse_int(key: &str, value: &str) -> std::result::Result<i64, String> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| format!("{} is not an integer: {:?}", key, value))
}

fn env_reference_regex() -> &'static Regex {
    static ENV_REFERENCE: OnceLock<Regex> = OnceLock::new();
    ENV_REFERENCE.get_or_init(|| {
        Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("valid env reference regex")
    })
}

/// Replace a whole-value `${NAME}` with the environment variable `NAME`.
///
/// Other values pass through unchanged. An unset or empty variable is an error.
fn resolve_env_reference(value: &str) -> std::result::Result<String, String> {
    let Some(captures) = env_reference_regex().captures(value.trim()) else {
        return Ok(value.to_string());
    };
    let name = &captures[1];
    match std::env::var(name) {
        Ok(resolved) if !resolved.is_empty() => Ok(resolved),
        _ => Err(format!("environment variable {} is not set or empty", name)),
    }
}

/// Everything guarded by the credentials mutex.
#[derive(Default)]
pub(super) struct CredentialState {
    file: ConfigFile,
    cli_user: String,
    cli_password: String,
    cli_migrate_user: String,
    cli_migrate_password: String,
    inspector: ConnectionConfig,
    applier: ConnectionConfig,
    migrate_target: ConnectionConfig,
}

impl MigrationContext {
    /// Read the config file, if one is configured.
    ///
    /// On failure the previously loaded config stays in place.
    pub fn read_config_file(&self) -> Result<()> {
        let Some(path) = self.config_file.as_deref() else {
            return Ok(());
        };
        let config = ConfigFile::read(path)?;
        debug!(path = %path.display(), "config file read");
        self.credentials.lock().file = config;
        Ok(())
    }

    /// Copy of the loaded config file.
    pub fn config(&self) -> ConfigFile {
        self.credentials.lock().file.clone()
    }

    /// Push the `[osc]` values of the loaded config through the regular setters.
    ///
    /// Unset values are skipped. Called before command-line overrides.
    pub fn apply_config_file_options(&self) -> Result<()> {
        let osc = self.credentials.lock().file.osc.clone();
        if osc.chunk_size != 0 {
            self.set_chunk_size(osc.chunk_size);
        }
        if osc.max_lag_millis != 0 {
            self.set_max_lag_milliseconds_throttle_threshold(osc.max_lag_millis);
        }
        if !osc.replication_lag_query.is_empty() {
            self.set_replication_lag_query(osc.replication_lag_query);
        }
        if !osc.max_load.is_empty() {
            self.read_max_load(&osc.max_load)?;
        }
        Ok(())
    }

    /// Credentials given on the command line. Empty values do not override.
    pub fn set_cli_credentials(&self, user: impl Into<String>, password: impl Into<String>) {
        let mut state = self.credentials.lock();
        state.cli_user = user.into();
        state.cli_password = password.into();
    }

    /// Credentials for the migrate target given on the command line.
    ///
    /// Empty values fall back to the inspector's resolved credentials.
    pub fn set_cli_migrate_credentials(
        &self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) {
        let mut state = self.credentials.lock();
        state.cli_migrate_user = user.into();
        state.cli_migrate_password = password.into();
    }

    /// Resolve the inspector's credentials: config file first, then command line.
    ///
    /// User and password are resolved independently. The migrate target takes
    /// its command-line credentials, else the inspector's. Repeated calls with
    /// the same inputs give the same result.
    pub fn apply_credentials(&self) {
        let mut state = self.credentials.lock();
        let CredentialState {
            file,
            cli_user,
            cli_password,
            cli_migrate_user,
            cli_migrate_password,
            inspector,
            migrate_target,
            ..
        } = &mut *state;

        let mut user_source = "unchanged";
        if !file.client.user.is_empty() {
            inspector.user = file.client.user.clone();
            user_source = "config file";
        }
        if !cli_user.is_empty() {
            inspector.user = cli_user.clone();
            user_source = "command line";
        }
        if !file.client.password.is_empty() {
            inspector.password = file.client.password.clone();
        }
        if !cli_password.is_empty() {
            inspector.password = cli_password.clone();
        }

        migrate_target.user = if cli_migrate_user.is_empty() {
            inspector.user.clone()
        } else {
            cli_migrate_user.clone()
        };
        migrate_target.password = if cli_migrate_password.is_empty() {
            inspector.password.clone()
        } else {
            cli_migrate_password.clone()
        };
        info!(
            user = %inspector.user,
            user_source,
            migrate_user = %migrate_target.user,
            "credentials applied"
        );
    }

    /// Copy of the inspector connection descriptor.
    pub fn inspector_connection_config(&self) -> ConnectionConfig {
        self.credentials.lock().inspector.clone()
    }

    /// Replace the inspector connection descriptor.
    pub fn set_inspector_connection_config(&self, config: ConnectionConfig) {
        self.credentials.lock().inspector = config;
    }

    /// Copy of the applier connection descriptor.
    pub fn applier_connection_config(&self) -> ConnectionConfig {
        self.credentials.lock().applier.clone()
    }

    /// Replace the applier connection descriptor.
    pub fn set_applier_connection_config(&self, config: ConnectionConfig) {
        self.credentials.lock().applier = config;
    }

    /// Copy of the migrate target connection descriptor.
    pub fn migrate_connection_config(&self) -> ConnectionConfig {
        self.credentials.lock().migrate_target.clone()
    }

    /// Replace the migrate target connection descriptor.
    pub fn set_migrate_connection_config(&self, config: ConnectionConfig) {
        self.credentials.lock().migrate_target = config;
    }

    /// Whether inspector and applier reach the same server, as when running
    /// directly on the master or testing on a replica.
    pub fn inspector_is_also_applier(&self) -> bool {
        let state = self.credentials.lock();
        state.inspector.same_instance(&state.applier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceKey;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn context_with_config(file: &tempfile::NamedTempFile) -> MigrationContext {
        let mut ctx = MigrationContext::new("db", "t");
        ctx.config_file = Some(file.path().to_path_buf());
        ctx
    }

    #[test]
    fn test_parse_full_config() {
        let config = ConfigFile::parse(
            "; comment\n\
             [client]\n\
             user = migrator\n\
             password = \"p;a ss\"\n\
             \n\
             [OSC]\n\
             Chunk-Size = 2000\n\
             max_lag_millis=2500\n\
             replication-lag-query = select lag from meta.heartbeat # note\n\
             max-load = Threads_running=25\n\
             [unknown]\n\
             whatever = 1\n",
        )
        .unwrap();

        assert_eq!(
            config,
            ConfigFile {
                client: ClientSection {
                    user: "migrator".to_string(),
                    password: "p;a ss".to_string(),
                },
                osc: OscSection {
                    chunk_size: 2000,
                    max_lag_millis: 2500,
                    replication_lag_query: "select lag from meta.heartbeat".to_string(),
                    max_load: "Threads_running=25".to_string(),
                },
            }
        );
    }

    #[test]
    fn test_parse_section_header_with_comment() {
        let config = ConfigFile::parse("[client] ; creds\nuser = u\n[osc] # tuning\nchunk_size = 500\n")
            .unwrap();
        assert_eq!(config.client.user, "u");
        assert_eq!(config.osc.chunk_size, 500);
    }

    #[test]
    fn test_parse_rejects_corrupt_config() {
        assert!(ConfigFile::parse("[osc]\nchunk-size = many\n").is_err());
        assert!(ConfigFile::parse("[osc]\nmax-lag-millis = 1.5\n").is_err());
        assert!(ConfigFile::parse("[client]\nuser\n").is_err());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let config =
            ConfigFile::parse("user = global\n[client]\nhost = db1\n[osc]\nexact-rowcount = true\n")
                .unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_read_config_file_resolves_env() {
        std::env::set_var("GHOSTMIG_TEST_DB_PASS", "from-env");
        let file = write_config("[client]\nuser = app\npassword = ${GHOSTMIG_TEST_DB_PASS}\n");
        let ctx = context_with_config(&file);

        ctx.read_config_file().unwrap();
        let config = ctx.config();
        assert_eq!(config.client.user, "app");
        assert_eq!(config.client.password, "from-env");
    }

    #[test]
    fn test_read_config_file_missing_env_discards_file() {
        std::env::remove_var("GHOSTMIG_TEST_UNSET_USER");
        let good = write_config("[client]\nuser = first\n");
        let ctx = context_with_config(&good);
        ctx.read_config_file().unwrap();

        let bad = write_config("[client]\nuser = ${GHOSTMIG_TEST_UNSET_USER}\npassword = x\n");
        let mut ctx = ctx;
        ctx.config_file = Some(bad.path().to_path_buf());
        let err = ctx.read_config_file().unwrap_err();
        assert!(matches!(err, ContextError::ConfigRead { .. }));
        assert_eq!(ctx.config().client.user, "first");
        assert_eq!(ctx.config().client.password, "");
    }

    #[test]
    fn test_read_config_file_without_path() {
        let ctx = MigrationContext::new("db", "t");
        ctx.read_config_file().unwrap();
        assert_eq!(ctx.config(), ConfigFile::default());
    }

    #[test]
    fn test_read_missing_config_file() {
        let mut ctx = MigrationContext::new("db", "t");
        ctx.config_file = Some("/nonexistent/ghostmig.cnf".into());
        assert!(matches!(
            ctx.read_config_file(),
            Err(ContextError::ConfigRead { .. })
        ));
    }

    #[test]
    fn test_apply_credentials_precedence() {
        let file = write_config("[client]\nuser = cfguser\npassword = cfgpass\n");
        let ctx = context_with_config(&file);
        ctx.read_config_file().unwrap();

        ctx.apply_credentials();
        let inspector = ctx.inspector_connection_config();
        assert_eq!(inspector.user, "cfguser");
        assert_eq!(inspector.password, "cfgpass");

        ctx.set_cli_credentials("cliuser", "");
        ctx.apply_credentials();
        ctx.apply_credentials();
        let inspector = ctx.inspector_connection_config();
        assert_eq!(inspector.user, "cliuser");
        assert_eq!(inspector.password, "cfgpass");
    }

    #[test]
    fn test_migrate_credentials_fall_back_to_inspector() {
        let file = write_config("[client]\nuser = cfguser\npassword = cfgpass\n");
        let ctx = context_with_config(&file);
        ctx.read_config_file().unwrap();
        ctx.apply_credentials();

        let target = ctx.migrate_connection_config();
        assert_eq!(target.user, "cfguser");
        assert_eq!(target.password, "cfgpass");

        ctx.set_migrate_connection_config(ConnectionConfig::new(InstanceKey::new("archive", 3306)));
        ctx.set_cli_migrate_credentials("archiver", "");
        ctx.apply_credentials();
        let target = ctx.migrate_connection_config();
        assert_eq!(target.key, InstanceKey::new("archive", 3306));
        assert_eq!(target.user, "archiver");
        assert_eq!(target.password, "cfgpass");
        assert_eq!(ctx.inspector_connection_config().user, "cfguser");
    }

    #[test]
    fn test_apply_config_file_options() {
        let file = write_config(
            "[osc]\nchunk-size = 50\nmax-lag-millis = 3000\nmax-load = Threads_running=30\n",
        );
        let ctx = context_with_config(&file);
        ctx.read_config_file().unwrap();
        ctx.apply_config_file_options().unwrap();

        assert_eq!(ctx.chunk_size(), 100);
        assert_eq!(ctx.max_lag_milliseconds_throttle_threshold(), 3000);
        assert_eq!(ctx.max_load().get("Threads_running"), Some(30.0));
    }

    #[test]
    fn test_apply_config_file_options_bad_max_load() {
        let file = write_config("[osc]\nmax-load = Threads_running=lots\n");
        let ctx = context_with_config(&file);
        ctx.read_config_file().unwrap();
        assert!(matches!(
            ctx.apply_config_file_options(),
            Err(ContextError::Parse { .. })
        ));
        assert!(ctx.max_load().is_empty());
    }

    #[test]
    fn test_inspector_is_also_applier() {
        let ctx = MigrationContext::new("db", "t");
        let master = ConnectionConfig::new(InstanceKey::new("master", 3306));
        ctx.set_inspector_connection_config(master.clone());
        ctx.set_applier_connection_config(master.duplicate_for(InstanceKey::new("master", 3306)));
        assert!(ctx.inspector_is_also_applier());

        ctx.set_inspector_connection_config(ConnectionConfig::new(InstanceKey::new("replica", 3306)));
        assert!(!ctx.inspector_is_also_applier());
    }
}
