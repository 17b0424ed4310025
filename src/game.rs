//! Capabilities a game under test exposes to the harness.
//!
//! The harness never reaches into a game's internals; it constructs the
//! game through [`Game::new_table`] and lends it the database connection
//! for the duration of each call.

use crate::db::{Connection, Row, Value};
use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;

pub type PlayerId = i64;

/// Free-form game configuration handed to [`Game::setup_new_game`].
pub type GameOptions = BTreeMap<String, serde_json::Value>;

/// Static game description (`gameinfos`) fed to every new game instance.
pub type GameInfos = serde_json::Map<String, serde_json::Value>;

/// Column holding a player's identity in the `player` table.
pub const PLAYER_ID_FIELD: &str = "player_id";

/// Open field map describing one seated player.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Player {
    fields: Row,
}

impl Player {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: PlayerId) -> Self {
        Self::new().with(PLAYER_ID_FIELD, id)
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.set(field, value);
        self
    }

    /// Explicit identity, when one was given.
    pub fn id(&self) -> Option<PlayerId> {
        self.fields.get(PLAYER_ID_FIELD).and_then(Value::as_i64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }
}

/// One entry of the game's state machine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StateDefinition {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "possibleactions", default)]
    pub possible_actions: Vec<String>,
    #[serde(default)]
    pub transitions: BTreeMap<String, u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A game implementation the harness can set up and drive.
pub trait Game: Sized {
    /// A fresh instance not bound to any player.
    fn new_table() -> Self;

    fn set_current_player(&mut self, player_id: PlayerId);

    fn set_game_infos(&mut self, _infos: &GameInfos) {}

    /// Seeds the database for a new game. `players` is in seating order.
    fn setup_new_game(
        &mut self,
        db: &mut dyn Connection,
        players: &[(PlayerId, Player)],
        options: &GameOptions,
    ) -> Result<()>;

    /// Plays the turn of an inactive player in `state`.
    fn zombie_turn(
        &mut self,
        db: &mut dyn Connection,
        state: &StateDefinition,
        active_player: Option<PlayerId>,
    ) -> Result<()>;
}

/// Request handler wrapping a player-scoped game instance.
pub trait GameAction: Sized {
    type Game: Game;

    fn for_game(game: Self::Game) -> Self;
}
