//! Command-line configuration.

use std::path::PathBuf;

use clap::Parser;
use ghostmig_core::instance::DEFAULT_PORT;
use ghostmig_core::{ConnectionConfig, CutOver, InstanceKey, MigrationContext, MigrationMode};
use tracing::debug;

use crate::error::{CliError, Result};

/// Default inspector host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Command-line arguments for a migration.
#[derive(Parser, Debug)]
#[command(name = "ghostmig")]
#[command(version, about = "Online ghost-table schema migrations", long_about = None)]
pub struct Args {
    /// Server to inspect.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the inspected server.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Login user. Overrides the config file.
    #[arg(long, default_value = "")]
    pub user: String,

    /// Login password. Overrides the config file.
    #[arg(long, default_value = "")]
    pub password: String,

    /// Config file with `[client]` and `[osc]` sections.
    #[arg(long)]
    pub conf: Option<PathBuf>,

    /// Schema holding the table.
    #[arg(long)]
    pub database: String,

    /// Table to alter.
    #[arg(long)]
    pub table: String,

    /// `ALTER TABLE` body, without the `ALTER TABLE <name>` prefix.
    #[arg(long)]
    pub alter: String,

    /// Write into an explicit target instead of `_<table>_gho`.
    #[arg(long)]
    pub migrate: bool,

    /// Target schema for `--migrate`. Defaults to `--database`.
    #[arg(long, requires = "migrate")]
    pub migrate_database: Option<String>,

    /// Target table for `--migrate`. Defaults to `--table`.
    #[arg(long, requires = "migrate")]
    pub migrate_table: Option<String>,

    /// Login user on the migrate target. Defaults to the resolved user.
    #[arg(long, default_value = "")]
    pub migrate_user: String,

    /// Login password on the migrate target. Defaults to the resolved password.
    #[arg(long, default_value = "")]
    pub migrate_password: String,

    /// Dry run on a replica, keeping the swapped-out table for comparison.
    #[arg(long, conflicts_with = "migrate_on_replica")]
    pub test_on_replica: bool,

    /// Migrate the table on a replica only.
    #[arg(long)]
    pub migrate_on_replica: bool,

    /// Permit inspecting the master directly.
    #[arg(long)]
    pub allow_on_master: bool,

    /// Permit active-active master topologies.
    #[arg(long)]
    pub allow_master_master: bool,

    /// Permit switching the server's binlog format to ROW.
    #[arg(long)]
    pub switch_to_rbr: bool,

    /// Permit iterating on a unique key with nullable columns.
    #[arg(long)]
    pub allow_nullable_unique_key: bool,

    /// Approve the detected column renames.
    #[arg(long)]
    pub approve_renamed_columns: bool,

    /// Do not copy renamed columns.
    #[arg(long)]
    pub skip_renamed_columns: bool,

    /// Drop the old table after cut-over.
    #[arg(long)]
    pub ok_to_drop_table: bool,

    /// Drop a leftover old table before starting.
    #[arg(long)]
    pub initially_drop_old_table: bool,

    /// Drop a leftover ghost table before starting.
    #[arg(long)]
    pub initially_drop_ghost_table: bool,

    /// Cut-over strategy: atomic or two-step.
    #[arg(long, default_value = "atomic")]
    pub cut_over: String,

    /// Seconds the cut-over may hold table locks (1-10).
    #[arg(long)]
    pub cut_over_lock_timeout_seconds: Option<i64>,

    /// Rows per copy chunk (clamped to 100-100000).
    #[arg(long)]
    pub chunk_size: Option<i64>,

    /// Sleep this fraction of each chunk's copy time after it (0-100).
    #[arg(long)]
    pub nice_ratio: Option<f64>,

    /// Replication lag in milliseconds above which work is throttled.
    #[arg(long)]
    pub max_lag_millis: Option<i64>,

    /// Query returning replica lag in seconds.
    #[arg(long)]
    pub replication_lag_query: Option<String>,

    /// Comma-delimited `host[:port]` replicas whose lag is polled.
    #[arg(long)]
    pub throttle_control_replicas: Option<String>,

    /// Query whose positive result throttles work.
    #[arg(long)]
    pub throttle_query: Option<String>,

    /// Throttle while this file exists.
    #[arg(long)]
    pub throttle_flag_file: Option<PathBuf>,

    /// Second throttle file, shared by concurrent migrations.
    #[arg(long)]
    pub throttle_additional_flag_file: Option<PathBuf>,

    /// Hold before cut-over while this file exists.
    #[arg(long)]
    pub postpone_cut_over_flag_file: Option<PathBuf>,

    /// Abort as soon as this file appears.
    #[arg(long)]
    pub panic_flag_file: Option<PathBuf>,

    /// Throttle thresholds, e.g. `Threads_running=25`.
    #[arg(long)]
    pub max_load: Option<String>,

    /// Abort thresholds, e.g. `Threads_running=1000`.
    #[arg(long)]
    pub critical_load: Option<String>,

    /// Retry budget for transient failures.
    #[arg(long)]
    pub default_retries: Option<i64>,

    /// Unix socket for interactive commands.
    #[arg(long)]
    pub serve_socket_file: Option<PathBuf>,

    /// Remove a stale socket file before listening.
    #[arg(long)]
    pub replace_serve_socket: bool,

    /// TCP port for interactive commands.
    #[arg(long)]
    pub serve_tcp_port: Option<u16>,

    /// Count rows exactly instead of trusting the estimate.
    #[arg(long)]
    pub exact_rowcount: bool,

    /// Actually migrate. Without it the run is a no-op.
    #[arg(long)]
    pub execute: bool,
}

impl Args {
    fn mode(&self) -> Result<MigrationMode> {
        match (self.test_on_replica, self.migrate_on_replica) {
            (false, false) => Ok(MigrationMode::Direct),
            (true, false) => Ok(MigrationMode::TestOnReplica),
            (false, true) => Ok(MigrationMode::MigrateOnReplica),
            (true, true) => Err(CliError::Config(
                "--test-on-replica and --migrate-on-replica are mutually exclusive".to_string(),
            )),
        }
    }

    /// Build the migration context.
    ///
    /// The config file is applied first, then command-line settings, then
    /// credentials are resolved.
    pub fn into_context(self) -> Result<MigrationContext> {
        let mode = self.mode()?;
        let cut_over: CutOver = self.cut_over.parse()?;

        let mut ctx = MigrationContext::new(self.database, self.table);
        ctx.alter_statement = self.alter;
        ctx.migrate = self.migrate;
        ctx.migrate_database_name = self.migrate_database;
        ctx.migrate_table_name = self.migrate_table;
        ctx.mode = mode;
        ctx.cut_over_type = cut_over;
        ctx.config_file = self.conf;

        ctx.count_table_rows = self.exact_rowcount;
        ctx.allowed_running_on_master = self.allow_on_master;
        ctx.allowed_master_master = self.allow_master_master;
        ctx.switch_to_row_binlog_format = self.switch_to_rbr;
        ctx.nullable_unique_key_allowed = self.allow_nullable_unique_key;
        ctx.approve_renamed_columns = self.approve_renamed_columns;
        ctx.skip_renamed_columns = self.skip_renamed_columns;
        ctx.noop = !self.execute;
        ctx.ok_to_drop_table = self.ok_to_drop_table;
        ctx.initially_drop_old_table = self.initially_drop_old_table;
        ctx.initially_drop_ghost_table = self.initially_drop_ghost_table;

        ctx.throttle_flag_file = self.throttle_flag_file;
        ctx.throttle_additional_flag_file = self.throttle_additional_flag_file;
        ctx.postpone_cut_over_flag_file = self.postpone_cut_over_flag_file;
        ctx.panic_flag_file = self.panic_flag_file;
        ctx.serve_socket_file = self.serve_socket_file;
        ctx.drop_serve_socket = self.replace_serve_socket;
        ctx.serve_tcp_port = self.serve_tcp_port;

        ctx.read_config_file()?;
        ctx.apply_config_file_options()?;

        if let Some(timeout) = self.cut_over_lock_timeout_seconds {
            ctx.set_cut_over_lock_timeout_seconds(timeout)?;
        }
        if let Some(chunk_size) = self.chunk_size {
            ctx.set_chunk_size(chunk_size);
        }
        if let Some(ratio) = self.nice_ratio {
            ctx.set_nice_ratio(ratio);
        }
        if let Some(millis) = self.max_lag_millis {
            ctx.set_max_lag_milliseconds_throttle_threshold(millis);
        }
        if let Some(query) = self.replication_lag_query {
            ctx.set_replication_lag_query(query);
        }
        if let Some(query) = self.throttle_query {
            ctx.set_throttle_query(query);
        }
        if let Some(replicas) = self.throttle_control_replicas.as_deref() {
            ctx.read_throttle_control_replica_keys(replicas)?;
        }
        if let Some(max_load) = self.max_load.as_deref() {
            ctx.read_max_load(max_load)?;
        }
        if let Some(critical_load) = self.critical_load.as_deref() {
            ctx.read_critical_load(critical_load)?;
        }
        if let Some(retries) = self.default_retries {
            ctx.set_default_num_retries(retries)?;
        }

        let inspector_key = InstanceKey::new(self.host, self.port);
        debug!(inspector = %inspector_key, "inspector configured");
        ctx.set_inspector_connection_config(ConnectionConfig::new(inspector_key.clone()));
        if self.migrate {
            ctx.set_migrate_connection_config(ConnectionConfig::new(inspector_key.clone()));
        }
        ctx.set_cli_credentials(self.user, self.password);
        ctx.set_cli_migrate_credentials(self.migrate_user, self.migrate_password);
        ctx.apply_credentials();

        // On a replica, or when allowed on the master, the inspected server is
        // also where rows are written.
        if mode != MigrationMode::Direct || self.allow_on_master {
            let applier = ctx.inspector_connection_config().duplicate_for(inspector_key);
            ctx.set_applier_connection_config(applier);
        }

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "ghostmig",
            "--database",
            "shop",
            "--table",
            "orders",
            "--alter",
            "ADD COLUMN note TEXT",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let ctx = args(&[]).into_context().unwrap();
        assert_eq!(ctx.database_name, "shop");
        assert_eq!(ctx.ghost_table_name(), "_orders_gho");
        assert_eq!(ctx.alter_statement, "ADD COLUMN note TEXT");
        assert_eq!(ctx.mode, MigrationMode::Direct);
        assert_eq!(ctx.cut_over_type, CutOver::Atomic);
        assert!(ctx.noop);
        assert_eq!(ctx.chunk_size(), 1000);
        assert_eq!(
            ctx.inspector_connection_config().key,
            InstanceKey::new("127.0.0.1", 3306)
        );
        assert!(!ctx.inspector_is_also_applier());
    }

    #[test]
    fn test_tunables_and_modes() {
        let ctx = args(&[
            "--migrate-on-replica",
            "--cut-over",
            "two-step",
            "--chunk-size",
            "50",
            "--nice-ratio",
            "0.5",
            "--throttle-control-replicas",
            "r1,r2:3307",
            "--max-load",
            "Threads_running=25",
            "--execute",
        ])
        .into_context()
        .unwrap();

        assert_eq!(ctx.mode, MigrationMode::MigrateOnReplica);
        assert_eq!(ctx.old_table_name(), "_orders_ghr");
        assert_eq!(ctx.cut_over_type, CutOver::TwoStep);
        assert_eq!(ctx.chunk_size(), 100);
        assert_eq!(ctx.nice_ratio(), 0.5);
        assert_eq!(ctx.throttle_control_replica_keys().len(), 2);
        assert_eq!(ctx.max_load().get("Threads_running"), Some(25.0));
        assert!(!ctx.noop);
        assert!(ctx.inspector_is_also_applier());
    }

    #[test]
    fn test_migrate_to_other_database() {
        let ctx = args(&[
            "--user",
            "app",
            "--password",
            "pw",
            "--migrate",
            "--migrate-database",
            "shop_archive",
            "--migrate-table",
            "orders_2024",
            "--migrate-user",
            "archiver",
        ])
        .into_context()
        .unwrap();

        assert!(ctx.migrate);
        assert_eq!(ctx.ghost_database_name(), "shop_archive");
        assert_eq!(ctx.ghost_table_name(), "orders_2024");
        let target = ctx.migrate_connection_config();
        assert_eq!(target.key, InstanceKey::new("127.0.0.1", 3306));
        assert_eq!(target.user, "archiver");
        assert_eq!(target.password, "pw");

        assert!(Args::try_parse_from([
            "ghostmig",
            "--database",
            "shop",
            "--table",
            "orders",
            "--alter",
            "x",
            "--migrate-table",
            "orders_2024",
        ])
        .is_err());
    }

    #[test]
    fn test_rejected_values() {
        assert!(matches!(
            args(&["--cut-over-lock-timeout-seconds", "11"]).into_context(),
            Err(CliError::Context(_))
        ));
        assert!(matches!(
            args(&["--default-retries", "0"]).into_context(),
            Err(CliError::Context(_))
        ));
        assert!(args(&["--cut-over", "sideways"]).into_context().is_err());
        assert!(args(&["--max-load", "Threads_running=lots"])
            .into_context()
            .is_err());
        assert!(Args::try_parse_from([
            "ghostmig",
            "--database",
            "shop",
            "--table",
            "orders",
            "--alter",
            "x",
            "--test-on-replica",
            "--migrate-on-replica",
        ])
        .is_err());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[client]\nuser = file_user\npassword = file_pass\n[osc]\nchunk_size = 3000\nmax_lag_millis = 4000"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let ctx = args(&["--conf", &path, "--chunk-size", "2000", "--user", "cli_user"])
            .into_context()
            .unwrap();

        assert_eq!(ctx.chunk_size(), 2000);
        assert_eq!(ctx.max_lag_milliseconds_throttle_threshold(), 4000);
        let inspector = ctx.inspector_connection_config();
        assert_eq!(inspector.user, "cli_user");
        assert_eq!(inspector.password, "file_pass");
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.cnf");
        let result = args(&["--conf", missing.to_str().unwrap()]).into_context();
        assert!(matches!(
            result,
            Err(CliError::Context(ghostmig_core::ContextError::ConfigRead { .. }))
        ));
    }
}
