use crate::error::{Result, WorkbenchError};
use crate::game::{GameInfos, StateDefinition};
use std::path::{Path, PathBuf};

const GAME_VERSION_PREFIX: &str = "game_version_";

/// A game project on disk: its name and version from `version.php`, plus
/// optional `states.yml` and `gameinfos.yml` metadata.
#[derive(Debug, Clone)]
pub struct Project {
    directory: PathBuf,
    name: String,
    version: String,
    states: Vec<StateDefinition>,
    game_infos: GameInfos,
}

impl Project {
    pub fn load(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let version_file = directory.join("version.php");
        let content = std::fs::read_to_string(&version_file).map_err(|e| {
            WorkbenchError::Config(format!("reading {}: {}", version_file.display(), e))
        })?;
        let (name, version) = parse_version_file(&content).ok_or_else(|| {
            WorkbenchError::Config(format!(
                "file {} missing version variable ${}<project_name>",
                version_file.display(),
                GAME_VERSION_PREFIX
            ))
        })?;

        let states = match read_optional(&directory.join("states.yml"))? {
            Some(raw) => serde_yaml::from_str(&raw)
                .map_err(|e| WorkbenchError::Config(format!("parsing states.yml: {}", e)))?,
            None => Vec::new(),
        };
        let game_infos = match read_optional(&directory.join("gameinfos.yml"))? {
            Some(raw) => serde_yaml::from_str(&raw)
                .map_err(|e| WorkbenchError::Config(format!("parsing gameinfos.yml: {}", e)))?,
            None => GameInfos::new(),
        };

        Ok(Self {
            directory,
            name,
            version,
            states,
            game_infos,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The project's own table definitions.
    pub fn db_model_sql_file(&self) -> PathBuf {
        self.directory.join("dbmodel.sql")
    }

    pub fn states(&self) -> &[StateDefinition] {
        &self.states
    }

    /// First state called `name`.
    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn game_infos(&self) -> &GameInfos {
        &self.game_infos
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WorkbenchError::Config(format!(
            "reading {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Finds `$game_version_<name> = '<version>';` and returns `(name, version)`.
fn parse_version_file(content: &str) -> Option<(String, String)> {
    let marker = format!("${}", GAME_VERSION_PREFIX);
    for line in content.lines() {
        let Some(start) = line.find(&marker) else {
            continue;
        };
        let rest = &line[start + marker.len()..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            continue;
        }
        let version = rest[name.len()..]
            .split_once('=')
            .map(|(_, v)| {
                v.trim()
                    .trim_end_matches(';')
                    .trim()
                    .trim_matches(|c| c == '\'' || c == '"')
                    .to_string()
            })
            .unwrap_or_default();
        return Some((name, version));
    }
    None
}
