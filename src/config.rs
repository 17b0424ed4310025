use crate::db::{check_identifier, ConnectionParams, Driver};
use crate::error::{Result, WorkbenchError};
use crate::logging::{is_truthy, mask_secret};
use crate::project::Project;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "bgaproject.yml";

const DEFAULT_NAME_PREFIX: &str = "bgawb_game_";
const DEFAULT_HOST: &str = "127.0.0.1";
const NAME_SUFFIX_LEN: usize = 10;

/// Raw `bgaproject.yml`. Keys of the wider tool (deploy, linting, ...) are ignored.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    test_db: RawTestDb,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawTestDb {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    name_prefix: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    pass: Option<String>,
    #[serde(default)]
    externally_managed: Option<bool>,
    #[serde(default)]
    driver: Option<String>,
}

/// Resolved test database settings.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDbConfig {
    pub name: String,
    pub name_prefix: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(serialize_with = "serialize_masked")]
    pub pass: String,
    pub externally_managed: bool,
    pub driver: Driver,
}

fn serialize_masked<S: serde::Serializer>(value: &str, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&mask_secret(value))
}

impl std::fmt::Debug for TestDbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDbConfig")
            .field("name", &self.name)
            .field("name_prefix", &self.name_prefix)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &mask_secret(&self.pass))
            .field("externally_managed", &self.externally_managed)
            .field("driver", &self.driver)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WorkbenchConfig {
    directory: PathBuf,
    test_db: TestDbConfig,
}

impl WorkbenchConfig {
    pub fn config_path(directory: &Path) -> PathBuf {
        directory.join(CONFIG_FILENAME)
    }

    pub fn exists(directory: &Path) -> bool {
        Self::config_path(directory).is_file()
    }

    pub fn read_from_directory(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let path = Self::config_path(directory);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            WorkbenchError::Config(format!(
                "couldn't read project config in {}: {}",
                directory.display(),
                e
            ))
        })?;
        Self::from_yaml(directory, &content)
    }

    pub fn read_from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| WorkbenchError::Config(format!("getting cwd: {}", e)))?;
        Self::read_from_directory(cwd)
    }

    /// Parses config content; empty values fall back to `TEST_DB_*` env vars, then defaults.
    pub fn from_yaml(directory: impl Into<PathBuf>, content: &str) -> Result<Self> {
        Self::from_yaml_with_env(directory, content, |key| std::env::var(key).ok())
    }

    /// Like [`from_yaml`](Self::from_yaml), reading fallbacks through `env`.
    pub fn from_yaml_with_env(
        directory: impl Into<PathBuf>,
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let directory = directory.into();
        let env_non_empty = |key: &str| non_empty(env(key));
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                WorkbenchError::Config(format!(
                    "invalid YAML in {}: {}",
                    Self::config_path(&directory).display(),
                    e
                ))
            })?
        };
        let db = raw.test_db;

        let driver: Driver = non_empty(db.driver)
            .or_else(|| env_non_empty("TEST_DB_DRIVER"))
            .unwrap_or_else(|| "mysql".into())
            .parse()
            .map_err(WorkbenchError::Config)?;

        let port = match db.port.filter(|p| *p != 0) {
            Some(p) => p,
            None => match env_non_empty("TEST_DB_PORT") {
                Some(raw) => raw.parse().map_err(|e| {
                    WorkbenchError::Config(format!("invalid TEST_DB_PORT '{}': {}", raw, e))
                })?,
                None => driver.default_port(),
            },
        };

        let externally_managed = match db.externally_managed {
            Some(v) => v,
            None => env_non_empty("TEST_DB_EXTERNALLY_MANAGED").is_some_and(|v| is_truthy(&v)),
        };

        let test_db = TestDbConfig {
            name: non_empty(db.name)
                .or_else(|| env_non_empty("TEST_DB_NAME"))
                .unwrap_or_default(),
            name_prefix: non_empty(db.name_prefix)
                .or_else(|| env_non_empty("TEST_DB_NAME_PREFIX"))
                .unwrap_or_else(|| DEFAULT_NAME_PREFIX.into()),
            host: non_empty(db.host)
                .or_else(|| env_non_empty("TEST_DB_HOST"))
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            user: non_empty(db.user)
                .or_else(|| env_non_empty("TEST_DB_USER"))
                .unwrap_or_default(),
            pass: non_empty(db.pass)
                .or_else(|| env_non_empty("TEST_DB_PASS"))
                .unwrap_or_default(),
            externally_managed,
            driver,
        };
        let config = Self { directory, test_db };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let db = &self.test_db;
        if !db.name.is_empty() && check_identifier(&db.name).is_err() {
            return Err(WorkbenchError::Config(format!(
                "test database name '{}' may only contain letters, digits and '_'",
                db.name
            )));
        }
        if check_identifier(&db.name_prefix).is_err() {
            return Err(WorkbenchError::Config(format!(
                "test database name prefix '{}' may only contain letters, digits and '_'",
                db.name_prefix
            )));
        }
        if db.externally_managed && db.name.is_empty() {
            return Err(WorkbenchError::Config(
                "an externally managed test database needs an explicit name".into(),
            ));
        }
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn test_db(&self) -> &TestDbConfig {
        &self.test_db
    }

    /// The configured name, or the prefix plus a random suffix when none is set.
    /// Each call without a configured name yields a fresh name.
    pub fn test_db_name(&self) -> String {
        if !self.test_db.name.is_empty() {
            return self.test_db.name.clone();
        }
        format!("{}{}", self.test_db.name_prefix, random_suffix())
    }

    pub fn externally_managed(&self) -> bool {
        self.test_db.externally_managed
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            driver: self.test_db.driver,
            host: self.test_db.host.clone(),
            port: self.test_db.port,
            username: self.test_db.user.clone(),
            password: self.test_db.pass.clone(),
        }
    }

    pub fn load_project(&self) -> Result<Project> {
        Project::load(&self.directory)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..NAME_SUFFIX_LEN)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}
