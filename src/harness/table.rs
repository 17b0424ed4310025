use super::database::{DatabaseInstance, Ownership, TruncateReport};
use crate::config::WorkbenchConfig;
use crate::db::{Connection, Connector, Row, Value};
use crate::error::{Result, WorkbenchError};
use crate::game::{Game, GameAction, GameOptions, Player, PlayerId, PLAYER_ID_FIELD};
use crate::logging::Logger;
use crate::project::Project;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

const PLAYER_TABLE: &str = "player";
const PLAYER_NO_FIELD: &str = "player_no";

/// Keeps seat numbers clear of each other while amendments reassign them.
const PLAYER_NO_OFFSET: i64 = 10000;

/// One game table under test: its database, its seated players and the
/// game type `G` that seeds and drives it.
pub struct TableInstance<G: Game> {
    config: WorkbenchConfig,
    project: Project,
    database: DatabaseInstance,
    players: Vec<(PlayerId, Player)>,
    amendments: BTreeMap<PlayerId, Row>,
    options: GameOptions,
    is_setup: bool,
    log: Arc<Logger>,
    game: PhantomData<fn() -> G>,
}

impl<G: Game> TableInstance<G> {
    /// Builds the table without touching the database server.
    pub fn new(
        config: WorkbenchConfig,
        players: Vec<Player>,
        amendments: BTreeMap<PlayerId, Row>,
        options: GameOptions,
    ) -> Result<Self> {
        Self::builder(config)
            .players(players)
            .amendments(amendments)
            .options(options)
            .build()
    }

    pub fn builder(config: WorkbenchConfig) -> TableInstanceBuilder<G> {
        TableInstanceBuilder::new(config)
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    pub fn database(&self) -> &DatabaseInstance {
        &self.database
    }

    /// Seated players in order, with their resolved identities.
    pub fn players(&self) -> &[(PlayerId, Player)] {
        &self.players
    }

    pub fn create_database(&mut self) -> Result<&mut Self> {
        self.database.create()?;
        Ok(self)
    }

    /// Seeds a new game, then applies player amendments in one transaction.
    pub fn setup_new_game(&mut self) -> Result<&mut Self> {
        if self.is_setup {
            return Err(WorkbenchError::AlreadySetup);
        }
        if !self.database.is_created() {
            return Err(WorkbenchError::illegal_state(format!(
                "cannot set up game: database '{}' not created",
                self.database.name()
            )));
        }
        self.is_setup = true;

        let mut game = self.create_game_instance_with_no_bound_player();
        let conn = self.database.connection()?;
        game.setup_new_game(conn, &self.players, &self.options)?;
        self.log.info(
            "game set up",
            &[
                ("database", self.database.name()),
                ("players", &self.players.len().to_string()),
            ],
        );

        if !self.amendments.is_empty() {
            let amendments = &self.amendments;
            self.database
                .transactional(|conn| apply_player_amendments(conn, amendments))?;
            self.log.debug(
                "applied player amendments",
                &[("count", &self.amendments.len().to_string())],
            );
        }
        Ok(self)
    }

    pub fn create_game_instance_with_no_bound_player(&self) -> G {
        let mut game = G::new_table();
        game.set_game_infos(self.project.game_infos());
        game
    }

    pub fn create_game_instance_for_current_player(&self, player_id: PlayerId) -> Result<G> {
        if !self.players.iter().any(|(id, _)| *id == player_id) {
            let ids: Vec<String> = self.players.iter().map(|(id, _)| id.to_string()).collect();
            return Err(WorkbenchError::InvalidArgument(format!(
                "current player {} not in {}",
                player_id,
                ids.join(", ")
            )));
        }
        let mut game = self.create_game_instance_with_no_bound_player();
        game.set_current_player(player_id);
        Ok(game)
    }

    pub fn create_action_instance_for_current_player<A>(&self, player_id: PlayerId) -> Result<A>
    where
        A: GameAction<Game = G>,
    {
        Ok(A::for_game(
            self.create_game_instance_for_current_player(player_id)?,
        ))
    }

    /// Plays the turn of an inactive player in the first state called
    /// `state_name` and hands back the game that played it.
    pub fn run_zombie_turn(
        &mut self,
        state_name: &str,
        active_player: Option<PlayerId>,
    ) -> Result<G> {
        let state = self.project.state(state_name).ok_or_else(|| {
            WorkbenchError::InvalidArgument(format!("no state named '{}'", state_name))
        })?;
        let mut game = G::new_table();
        game.set_game_infos(self.project.game_infos());
        let conn = self.database.connection()?;
        game.zombie_turn(conn, state, active_player)?;
        Ok(game)
    }

    pub fn drop_database_and_disconnect(&mut self) -> Result<&mut Self> {
        self.database.drop_database()?;
        self.database.disconnect();
        Ok(self)
    }

    pub fn truncate_database(&mut self) -> Result<TruncateReport> {
        self.database.truncate()
    }

    pub fn fetch_db_rows(&mut self, table: &str, conditions: &Row) -> Result<Vec<Row>> {
        self.database.fetch_rows(table, conditions)
    }

    pub fn fetch_value(&mut self, sql: &str) -> Result<Option<Value>> {
        self.database.fetch_value(sql)
    }

    pub fn db_connection(&mut self) -> Result<&mut dyn Connection> {
        self.database.connection()
    }

    pub fn with_db_connection(
        &mut self,
        f: impl FnOnce(&mut dyn Connection) -> Result<()>,
    ) -> Result<&mut Self> {
        f(self.database.connection()?)?;
        Ok(self)
    }
}

/// Offsets every seat number, then rewrites the amended players, keeping
/// their seat unless overridden. Players without an amendment stay offset,
/// so an amended player may take over any seat.
fn apply_player_amendments(
    conn: &mut dyn Connection,
    amendments: &BTreeMap<PlayerId, Row>,
) -> Result<()> {
    let player = conn.quote_identifier(PLAYER_TABLE)?;
    let player_no = conn.quote_identifier(PLAYER_NO_FIELD)?;
    let player_id = conn.quote_identifier(PLAYER_ID_FIELD)?;

    let seeded: BTreeMap<PlayerId, Value> = conn
        .query(
            &format!("SELECT {}, {} FROM {}", player_no, player_id, player),
            &[],
        )?
        .into_iter()
        .filter_map(|row| {
            let id = row.get(PLAYER_ID_FIELD).and_then(Value::as_i64)?;
            let no = row.get(PLAYER_NO_FIELD).cloned()?;
            Some((id, no))
        })
        .collect();

    conn.execute(
        &format!(
            "UPDATE {} SET {} = {} + {}",
            player, player_no, player_no, PLAYER_NO_OFFSET
        ),
        &[],
    )?;

    for (id, overrides) in amendments {
        let seat = seeded
            .get(id)
            .ok_or(WorkbenchError::AmendmentTargetNotFound(*id))?;
        let mut fields = Row::new().with(PLAYER_NO_FIELD, seat.clone());
        for (column, value) in overrides.iter() {
            fields.set(column, value.clone());
        }
        conn.update(PLAYER_TABLE, &fields, &Row::new().with(PLAYER_ID_FIELD, *id))?;
    }
    Ok(())
}

impl<G: Game> std::fmt::Debug for TableInstance<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableInstance")
            .field("project", &self.project.name())
            .field("players", &self.players)
            .field("amendments", &self.amendments)
            .field("is_setup", &self.is_setup)
            .field("database", &self.database)
            .finish()
    }
}

/// Fluent construction of a [`TableInstance`].
pub struct TableInstanceBuilder<G: Game> {
    config: WorkbenchConfig,
    project: Option<Project>,
    database_name: Option<String>,
    players: Vec<Player>,
    amendments: BTreeMap<PlayerId, Row>,
    options: GameOptions,
    connector: Option<Box<dyn Connector>>,
    log: Option<Arc<Logger>>,
    game: PhantomData<fn() -> G>,
}

impl<G: Game> TableInstanceBuilder<G> {
    fn new(config: WorkbenchConfig) -> Self {
        Self {
            config,
            project: None,
            database_name: None,
            players: Vec::new(),
            amendments: BTreeMap::new(),
            options: GameOptions::new(),
            connector: None,
            log: None,
            game: PhantomData,
        }
    }

    pub fn player(mut self, player: Player) -> Self {
        self.players.push(player);
        self
    }

    pub fn players(mut self, players: impl IntoIterator<Item = Player>) -> Self {
        self.players.extend(players);
        self
    }

    pub fn amend_player(mut self, player_id: PlayerId, fields: Row) -> Self {
        self.amendments.insert(player_id, fields);
        self
    }

    pub fn amendments(mut self, amendments: BTreeMap<PlayerId, Row>) -> Self {
        self.amendments.extend(amendments);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn options(mut self, options: GameOptions) -> Self {
        self.options.extend(options);
        self
    }

    /// Uses an already loaded project instead of reading it from the config directory.
    pub fn project(mut self, project: Project) -> Self {
        self.project = Some(project);
        self
    }

    /// Overrides the name derived from the configuration.
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn logger(mut self, log: Arc<Logger>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Result<TableInstance<G>> {
        let project = match self.project {
            Some(project) => project,
            None => self.config.load_project()?,
        };
        let players = resolve_player_ids(self.players)?;
        let log = self.log.unwrap_or_else(|| Arc::new(Logger::from_env()));

        let name = self
            .database_name
            .unwrap_or_else(|| self.config.test_db_name());
        let params = self.config.connection_params();
        let schema_files = vec![
            params.driver.base_schema(),
            project.db_model_sql_file().into(),
        ];
        let mut database = DatabaseInstance::new(
            name,
            params,
            schema_files,
            Ownership::from_externally_managed(self.config.externally_managed()),
        )
        .with_logger(log.clone());
        if let Some(connector) = self.connector {
            database = database.with_connector(connector);
        }

        Ok(TableInstance {
            config: self.config,
            project,
            database,
            players,
            amendments: self.amendments,
            options: self.options,
            is_setup: false,
            log,
            game: PhantomData,
        })
    }
}

/// Players without an explicit id take their 1-based seat position.
fn resolve_player_ids(players: Vec<Player>) -> Result<Vec<(PlayerId, Player)>> {
    let mut resolved: Vec<(PlayerId, Player)> = Vec::with_capacity(players.len());
    for (index, player) in players.into_iter().enumerate() {
        let id = player.id().unwrap_or(index as PlayerId + 1);
        if resolved.iter().any(|(existing, _)| *existing == id) {
            return Err(WorkbenchError::InvalidArgument(format!(
                "player id {} given twice",
                id
            )));
        }
        resolved.push((id, player));
    }
    Ok(resolved)
}
