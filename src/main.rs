use std::{io::IsTerminal, path::PathBuf, process, sync::Arc, time::Duration};

use cachepool::{
    cache::{CacheDriver, CachePool, TracingSink},
    config::{self, Command, DriverKind, PathArgs, SetArgs},
    drivers::{FilesDriver, MemoryDriver},
    error::AppError,
    infra::telemetry,
};
use serde_json::Value;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match settings.driver {
        DriverKind::Files => {
            let driver = FilesDriver::new(settings.cache.clone(), settings.context.clone())
                .with_events(Arc::new(TracingSink::new()));
            execute(&CachePool::new(driver, settings.cache), cli_args.command)
        }
        DriverKind::Memory => {
            execute(&CachePool::new(MemoryDriver::new(), settings.cache), cli_args.command)
        }
    }
}

/// Where a driver keeps its data, for the `path` command.
trait StorageLocation {
    fn locate(&self, key: Option<&str>) -> Result<PathBuf, AppError>;
}

impl StorageLocation for FilesDriver {
    fn locate(&self, key: Option<&str>) -> Result<PathBuf, AppError> {
        Ok(match key {
            Some(key) => {
                cachepool::cache::validate_key(key)?;
                self.file_path(key)?
            }
            None => self.probe_root()?,
        })
    }
}

impl StorageLocation for MemoryDriver {
    fn locate(&self, _key: Option<&str>) -> Result<PathBuf, AppError> {
        Err(AppError::validation(
            "the memory driver keeps no data on disk",
        ))
    }
}

fn execute<D>(pool: &CachePool<D>, command: Command) -> Result<(), AppError>
where
    D: CacheDriver + StorageLocation,
{
    match command {
        Command::Get(args) => run_get(pool, &args.key),
        Command::Set(args) => run_set(pool, args),
        Command::Delete(args) => {
            let deleted = pool.delete_items(&args.keys)?;
            println!("{deleted}");
            Ok(())
        }
        Command::Clear => {
            let cleared = pool.clear()?;
            println!("{cleared}");
            Ok(())
        }
        Command::Tags(args) => {
            for item in pool.get_items_by_tag(&args.tag)? {
                println!("{}", item.key());
            }
            Ok(())
        }
        Command::Path(PathArgs { key }) => {
            let path = pool.driver().locate(key.as_deref())?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn run_get<D: CacheDriver>(pool: &CachePool<D>, key: &str) -> Result<(), AppError> {
    let item = pool.get_item(key)?;
    if !item.is_hit() {
        return Err(AppError::miss(key));
    }

    let rendered = serde_json::to_string(&item.get())
        .map_err(|err| AppError::unexpected(format!("failed to render value: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn run_set<D: CacheDriver>(pool: &CachePool<D>, args: SetArgs) -> Result<(), AppError> {
    let value =
        serde_json::from_str::<Value>(&args.value).unwrap_or_else(|_| Value::String(args.value));
    let ttl = args
        .ttl
        .map(Duration::from_secs)
        .unwrap_or_else(|| pool.config().default_ttl());

    let item = pool.get_item(&args.key)?;
    item.set(value).expires_after(ttl).add_tags(&args.tags);

    if !pool.save(&item)? {
        return Err(AppError::unexpected(format!(
            "driver `{}` did not persist `{}`",
            pool.name(),
            args.key
        )));
    }

    info!(
        key = %args.key,
        ttl_secs = ttl.as_secs(),
        tags = ?args.tags,
        "Entry stored"
    );
    Ok(())
}
