use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use super::DriverKind;

/// Command-line arguments for the cachepool binary.
#[derive(Debug, Parser)]
#[command(name = "cachepool", version, about = "Inspect and edit a cache pool")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CACHEPOOL_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CacheOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Storage driver backing the pool.
    #[arg(long = "driver", value_name = "DRIVER", value_enum, global = true)]
    pub driver: Option<DriverKind>,

    /// Override the storage root.
    #[arg(
        long = "path",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub path: Option<PathBuf>,

    /// Override the security key segment (`auto` derives it).
    #[arg(long = "security-key", value_name = "KEY", global = true)]
    pub security_key: Option<String>,

    /// Override the default TTL in seconds.
    #[arg(
        long = "default-ttl",
        value_name = "SECONDS",
        allow_negative_numbers = true,
        global = true
    )]
    pub default_ttl: Option<i64>,

    /// Toggle atomic (lock + rename) writes.
    #[arg(
        long = "secure-writes",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub secure_writes: Option<bool>,

    /// Toggle falling back to the temporary root when storage is unwritable.
    #[arg(
        long = "auto-tmp-fallback",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub auto_tmp_fallback: Option<bool>,

    /// Act as a served request for this host (derives the security key).
    #[arg(long = "host", value_name = "HOST", global = true)]
    pub host: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the stored value of a key.
    Get(GetArgs),
    /// Store a JSON value under a key.
    Set(SetArgs),
    /// Delete one or more keys.
    Delete(DeleteArgs),
    /// Remove every entry of the pool.
    Clear,
    /// List the live keys indexed under a tag.
    Tags(TagsArgs),
    /// Print the storage root, or the record file of a key.
    Path(PathArgs),
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct SetArgs {
    #[arg(value_name = "KEY")]
    pub key: String,

    /// Value as JSON; anything that fails to parse is stored as a string.
    #[arg(value_name = "VALUE")]
    pub value: String,

    /// Time to live in seconds; defaults to the pool's default TTL.
    #[arg(long, value_name = "SECONDS")]
    pub ttl: Option<u64>,

    /// Tag to attach; repeatable.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct DeleteArgs {
    #[arg(value_name = "KEY", required = true, num_args = 1..)]
    pub keys: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct TagsArgs {
    #[arg(value_name = "TAG")]
    pub tag: String,
}

#[derive(Debug, Args, Clone)]
pub struct PathArgs {
    #[arg(value_name = "KEY")]
    pub key: Option<String>,
}
