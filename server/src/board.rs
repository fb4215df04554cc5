//! Shared grid and the movement rules for every actor on it.
//!
//! Locking protocol:
//! - A cell's mutex must be held to read or write its content or its
//!   collectible flag.
//! - Two-cell moves lock origin and destination in ascending grid index.
//!   Long-range moves lock every cell of the line in ascending grid index,
//!   which is position order along the line. This total order is what keeps
//!   concurrent movers deadlock free.
//! - Actor mutexes come after cells: an agent holds its own mutex for the whole
//!   move, and the player mutex is only taken while already holding the cells
//!   of a move (or with no cell held at all).
//! - `state_lock` is taken in read mode by every actor task and by the
//!   notifier for the duration of one move or one snapshot. Nothing takes it
//!   in write mode during a round.

use crate::actor::{Action, AgentActor, Command, Direction, PlayerActor, Position};
use crate::level::{Level, Tile};
use crate::utils::lock;
use log::debug;
use shared::{
    BoardHeader, BoardSnapshot, TILE_AGENT, TILE_COLLECTIBLE, TILE_EMPTY, TILE_PLAYER,
    TILE_PORTAL, TILE_WALL,
};
use std::collections::BTreeMap;
use std::iter::successors;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::RwLock;

/// Result of every move operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Valid,
    /// Rejected with no state change.
    Invalid,
    /// The player died during this move.
    ActorDied,
    /// The player stepped onto a portal.
    ReachedPortal,
}

#[derive(Debug)]
pub struct CellState {
    pub content: u8,
    pub collectible: bool,
}

#[derive(Debug)]
struct Cell {
    state: Mutex<CellState>,
    portal: bool,
}

impl Cell {
    fn display(&self) -> u8 {
        let state = lock(&self.state);
        match state.content {
            TILE_EMPTY if self.portal => TILE_PORTAL,
            TILE_EMPTY if state.collectible => TILE_COLLECTIBLE,
            content => content,
        }
    }
}

type CellGuard<'a> = MutexGuard<'a, CellState>;

/// One running level: grid, actors and the round-wide lock.
#[derive(Debug)]
pub struct Board {
    width: usize,
    height: usize,
    tempo: u32,
    cells: Vec<Cell>,
    players: Vec<Mutex<PlayerActor>>,
    agents: Vec<Mutex<AgentActor>>,
    state_lock: RwLock<()>,
    initial_collectibles: usize,
}

impl Board {
    /// Builds a fresh board, giving the player `carried_score` from earlier
    /// levels of the session.
    pub fn from_level(level: &Level, carried_score: u32) -> Self {
        let mut cells: Vec<Cell> = level
            .tiles
            .iter()
            .map(|tile| Cell {
                state: Mutex::new(CellState {
                    content: if *tile == Tile::Wall {
                        TILE_WALL
                    } else {
                        TILE_EMPTY
                    },
                    collectible: *tile == Tile::Collectible,
                }),
                portal: *tile == Tile::Portal,
            })
            .collect();

        let index = |position: Position| position.y * level.width + position.x;
        if let Ok(state) = cells[index(level.player)].state.get_mut() {
            state.content = TILE_PLAYER;
        }
        for agent in &level.agents {
            if let Ok(state) = cells[index(agent.position)].state.get_mut() {
                state.content = TILE_AGENT;
            }
        }

        Self {
            width: level.width,
            height: level.height,
            tempo: level.tempo,
            cells,
            players: vec![Mutex::new(PlayerActor::new(
                level.player,
                level.player_period,
                carried_score,
            ))],
            agents: level
                .agents
                .iter()
                .map(|spec| {
                    Mutex::new(AgentActor::new(
                        spec.position,
                        spec.period,
                        spec.script.clone(),
                    ))
                })
                .collect(),
            state_lock: RwLock::new(()),
            initial_collectibles: level.collectible_count(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Round tempo in milliseconds.
    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn initial_collectibles(&self) -> usize {
        self.initial_collectibles
    }

    pub fn state_lock(&self) -> &RwLock<()> {
        &self.state_lock
    }

    fn index(&self, position: Position) -> usize {
        position.y * self.width + position.x
    }

    /// Locks two distinct cells in ascending index order and returns the
    /// guards in argument order.
    fn lock_pair(&self, first: usize, second: usize) -> (CellGuard<'_>, CellGuard<'_>) {
        if first < second {
            let a = lock(&self.cells[first].state);
            let b = lock(&self.cells[second].state);
            (a, b)
        } else {
            let b = lock(&self.cells[second].state);
            let a = lock(&self.cells[first].state);
            (a, b)
        }
    }

    /// Applies one player command.
    pub fn move_player(&self, index: usize, command: &mut Command) -> MoveOutcome {
        let Some(slot) = self.players.get(index) else {
            return MoveOutcome::Invalid;
        };

        let (origin, target) = {
            let mut player = lock(slot);
            if !player.alive {
                return MoveOutcome::ActorDied;
            }
            if !player.cooldown.ready() {
                return MoveOutcome::Valid;
            }
            let direction = match command.action {
                Action::Step(direction) => direction,
                Action::Random => Direction::random(),
                Action::Wait => {
                    if command.tick_wait() {
                        player.moves += 1;
                    }
                    return MoveOutcome::Valid;
                }
                Action::Charge => return MoveOutcome::Invalid,
            };
            player.moves += 1;
            match direction.step(player.position, self.width, self.height) {
                Some(target) => (player.position, target),
                None => return MoveOutcome::Invalid,
            }
        };

        let from = self.index(origin);
        let to = self.index(target);
        let (mut from_cell, mut to_cell) = self.lock_pair(from, to);
        let mut player = lock(slot);

        // An agent may have caught the player between the two locks
        if !player.alive {
            return MoveOutcome::ActorDied;
        }
        if player.position != origin {
            return MoveOutcome::Invalid;
        }

        if self.cells[to].portal {
            from_cell.content = TILE_EMPTY;
            to_cell.content = TILE_PLAYER;
            player.position = target;
            return MoveOutcome::ReachedPortal;
        }

        match to_cell.content {
            TILE_WALL | TILE_PLAYER => MoveOutcome::Invalid,
            TILE_AGENT => {
                from_cell.content = TILE_EMPTY;
                player.alive = false;
                debug!("Player {} walked into an agent at {:?}", index, target);
                MoveOutcome::ActorDied
            }
            _ => {
                if to_cell.collectible {
                    to_cell.collectible = false;
                    player.score += 1;
                }
                from_cell.content = TILE_EMPTY;
                to_cell.content = TILE_PLAYER;
                player.position = target;
                MoveOutcome::Valid
            }
        }
    }

    /// Applies the next command of an agent's script.
    pub fn step_agent(&self, index: usize) -> MoveOutcome {
        let Some(slot) = self.agents.get(index) else {
            return MoveOutcome::Invalid;
        };
        let mut agent = lock(slot);
        let Some(cursor) = agent.script_cursor() else {
            return MoveOutcome::Valid;
        };
        let mut command = agent.script[cursor];
        let outcome = self.apply_agent_move(&mut agent, &mut command);
        agent.script[cursor].turns_left = command.turns_left;
        outcome
    }

    /// Applies an explicit command to an agent, bypassing its script.
    pub fn move_agent(&self, index: usize, command: &mut Command) -> MoveOutcome {
        let Some(slot) = self.agents.get(index) else {
            return MoveOutcome::Invalid;
        };
        let mut agent = lock(slot);
        self.apply_agent_move(&mut agent, command)
    }

    fn apply_agent_move(&self, agent: &mut AgentActor, command: &mut Command) -> MoveOutcome {
        let origin = agent.position;
        if !agent.cooldown.ready() {
            return MoveOutcome::Valid;
        }

        let direction = match command.action {
            Action::Step(direction) => direction,
            Action::Random => Direction::random(),
            Action::Charge => {
                agent.moves += 1;
                agent.charged = true;
                return MoveOutcome::Valid;
            }
            Action::Wait => {
                if command.tick_wait() {
                    agent.moves += 1;
                }
                return MoveOutcome::Valid;
            }
        };
        agent.moves += 1;

        if agent.charged {
            return self.charged_move(agent, origin, direction);
        }

        let Some(target) = direction.step(origin, self.width, self.height) else {
            return MoveOutcome::Invalid;
        };
        let (mut from_cell, mut to_cell) = self.lock_pair(self.index(origin), self.index(target));

        let outcome = match to_cell.content {
            TILE_WALL | TILE_AGENT => return MoveOutcome::Invalid,
            TILE_PLAYER => {
                self.kill_player_at(target);
                MoveOutcome::ActorDied
            }
            _ => MoveOutcome::Valid,
        };

        from_cell.content = TILE_EMPTY;
        to_cell.content = TILE_AGENT;
        agent.position = target;
        outcome
    }

    /// Long-range move: slide along `direction` until the grid edge, stopping
    /// short of a wall or agent, or on top of the player (who dies).
    fn charged_move(
        &self,
        agent: &mut AgentActor,
        origin: Position,
        direction: Direction,
    ) -> MoveOutcome {
        agent.charged = false;

        let path: Vec<Position> =
            successors(direction.step(origin, self.width, self.height), |position| {
                direction.step(*position, self.width, self.height)
            })
            .collect();
        let Some(&edge) = path.last() else {
            return MoveOutcome::Invalid;
        };

        let mut line: Vec<usize> = path.iter().map(|position| self.index(*position)).collect();
        line.push(self.index(origin));
        line.sort_unstable();
        let mut guards: BTreeMap<usize, CellGuard<'_>> = BTreeMap::new();
        for index in line {
            guards.insert(index, lock(&self.cells[index].state));
        }

        let mut destination = edge;
        let mut outcome = MoveOutcome::Valid;
        let mut previous = origin;
        for position in &path {
            let content = guards
                .get(&self.index(*position))
                .map_or(TILE_WALL, |cell| cell.content);
            match content {
                TILE_WALL | TILE_AGENT => {
                    destination = previous;
                    break;
                }
                TILE_PLAYER => {
                    destination = *position;
                    self.kill_player_at(destination);
                    outcome = MoveOutcome::ActorDied;
                    break;
                }
                _ => previous = *position,
            }
        }

        if let Some(cell) = guards.get_mut(&self.index(origin)) {
            cell.content = TILE_EMPTY;
        }
        if let Some(cell) = guards.get_mut(&self.index(destination)) {
            cell.content = TILE_AGENT;
        }
        agent.position = destination;
        debug!(
            "Charged agent moved {:?} from {:?} to {:?}",
            direction, origin, destination
        );
        outcome
    }

    // Caller holds the lock of the cell at `position`
    fn kill_player_at(&self, position: Position) {
        for slot in &self.players {
            let mut player = lock(slot);
            if player.alive && player.position == position {
                player.alive = false;
                debug!("Player caught at {:?}", position);
            }
        }
    }

    /// Copy of a player's state.
    pub fn player(&self, index: usize) -> Option<PlayerActor> {
        self.players.get(index).map(|slot| lock(slot).clone())
    }

    /// Copy of an agent's state.
    pub fn agent(&self, index: usize) -> Option<AgentActor> {
        self.agents.get(index).map(|slot| lock(slot).clone())
    }

    pub fn collectibles_remaining(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| lock(&cell.state).collectible)
            .count()
    }

    pub fn player_on_portal(&self) -> bool {
        self.cells
            .iter()
            .any(|cell| cell.portal && lock(&cell.state).content == TILE_PLAYER)
    }

    /// Display byte of a single cell.
    pub fn display_at(&self, position: Position) -> Option<u8> {
        if position.x >= self.width || position.y >= self.height {
            return None;
        }
        Some(self.cells[self.index(position)].display())
    }

    /// Row-major display bytes of the whole grid, one cell lock at a time.
    pub fn display(&self) -> Vec<u8> {
        self.cells.iter().map(Cell::display).collect()
    }

    pub fn snapshot(&self, victory: bool, game_over: bool, points: u32) -> BoardSnapshot {
        BoardSnapshot {
            header: BoardHeader {
                width: self.width as i32,
                height: self.height as i32,
                tempo: self.tempo as i32,
                victory: victory as i32,
                game_over: game_over as i32,
                points: points as i32,
            },
            cells: self.display(),
        }
    }
}
