//! Actors living on a board: the player and the scripted agents.
//!
//! Each actor carries a cooldown that turns a uniform tick rate into
//! per-actor speeds, and a move counter used to walk agent scripts.

use rand::seq::SliceRandom;
use shared::{CMD_CHARGE, CMD_DOWN, CMD_LEFT, CMD_RANDOM, CMD_RIGHT, CMD_UP, CMD_WAIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Picks one of the four compass directions uniformly.
    pub fn random() -> Self {
        *Self::ALL
            .choose(&mut rand::thread_rng())
            .unwrap_or(&Direction::Up)
    }

    /// Neighbouring position in this direction, or None when it leaves a
    /// `width` x `height` grid.
    pub fn step(self, from: Position, width: usize, height: usize) -> Option<Position> {
        let (x, y) = (from.x, from.y);
        let target = match self {
            Direction::Up => Position::new(x, y.checked_sub(1)?),
            Direction::Down => Position::new(x, y + 1),
            Direction::Left => Position::new(x.checked_sub(1)?, y),
            Direction::Right => Position::new(x + 1, y),
        };
        (target.x < width && target.y < height).then_some(target)
    }
}

/// What a command asks the actor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Step(Direction),
    /// Step in a direction drawn at move time.
    Random,
    /// Stand still; counts as a move only on the last of its turns.
    Wait,
    /// Arm the next directional agent move as a long-range move.
    Charge,
}

/// A command bound to a repeat count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub action: Action,
    pub turns: u32,
    pub turns_left: u32,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self::with_turns(action, 1)
    }

    pub fn with_turns(action: Action, turns: u32) -> Self {
        let turns = turns.max(1);
        Self {
            action,
            turns,
            turns_left: turns,
        }
    }

    /// Decodes a command byte as sent in a PLAY message.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let action = match byte.to_ascii_uppercase() {
            CMD_UP => Action::Step(Direction::Up),
            CMD_DOWN => Action::Step(Direction::Down),
            CMD_LEFT => Action::Step(Direction::Left),
            CMD_RIGHT => Action::Step(Direction::Right),
            CMD_RANDOM => Action::Random,
            CMD_WAIT => Action::Wait,
            CMD_CHARGE => Action::Charge,
            _ => return None,
        };
        Some(Self::new(action))
    }

    /// Parses a script token: a command letter, optionally followed by a
    /// turn count for waits (`T3`).
    pub fn parse_token(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let letter = chars.next()?;
        if !letter.is_ascii() {
            return None;
        }
        let command = Self::from_byte(letter as u8)?;
        let rest = chars.as_str();
        if rest.is_empty() {
            return Some(command);
        }
        if command.action != Action::Wait {
            return None;
        }
        let turns: u32 = rest.parse().ok()?;
        Some(Self::with_turns(Action::Wait, turns))
    }

    /// Consumes one turn of a wait. Returns true when the wait completes,
    /// re-arming it for the next cycle.
    pub fn tick_wait(&mut self) -> bool {
        if self.turns_left <= 1 {
            self.turns_left = self.turns;
            true
        } else {
            self.turns_left -= 1;
            false
        }
    }
}

/// Per-actor move throttle seeded from the actor's period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    period: u32,
    waiting: u32,
}

impl Cooldown {
    pub fn new(period: u32) -> Self {
        Self { period, waiting: 0 }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Called once per move attempt. Returns true when the move should
    /// actually be attempted; otherwise the call only counts down.
    pub fn ready(&mut self) -> bool {
        if self.waiting > 0 {
            self.waiting -= 1;
            false
        } else {
            self.waiting = self.period;
            true
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerActor {
    pub position: Position,
    pub alive: bool,
    pub score: u32,
    pub cooldown: Cooldown,
    pub moves: u32,
}

impl PlayerActor {
    pub fn new(position: Position, period: u32, score: u32) -> Self {
        Self {
            position,
            alive: true,
            score,
            cooldown: Cooldown::new(period),
            moves: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentActor {
    pub position: Position,
    pub cooldown: Cooldown,
    pub charged: bool,
    pub moves: usize,
    pub script: Vec<Command>,
}

impl AgentActor {
    pub fn new(position: Position, period: u32, script: Vec<Command>) -> Self {
        Self {
            position,
            cooldown: Cooldown::new(period),
            charged: false,
            moves: 0,
            script,
        }
    }

    /// Index into the script of the command due next.
    pub fn script_cursor(&self) -> Option<usize> {
        if self.script.is_empty() {
            None
        } else {
            Some(self.moves % self.script.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_from_byte() {
        assert_eq!(
            Command::from_byte(b'W').unwrap().action,
            Action::Step(Direction::Up)
        );
        assert_eq!(
            Command::from_byte(b'd').unwrap().action,
            Action::Step(Direction::Right)
        );
        assert_eq!(Command::from_byte(b'R').unwrap().action, Action::Random);
        assert_eq!(Command::from_byte(b'C').unwrap().action, Action::Charge);
        assert!(Command::from_byte(b'G').is_none());
        assert!(Command::from_byte(b'?').is_none());
    }

    #[test]
    fn test_parse_token() {
        let wait = Command::parse_token("T3").unwrap();
        assert_eq!(wait.action, Action::Wait);
        assert_eq!(wait.turns, 3);
        assert_eq!(wait.turns_left, 3);

        assert_eq!(Command::parse_token("T").unwrap().turns, 1);
        assert_eq!(
            Command::parse_token("A").unwrap().action,
            Action::Step(Direction::Left)
        );
        assert!(Command::parse_token("A2").is_none());
        assert!(Command::parse_token("Tx").is_none());
        assert!(Command::parse_token("").is_none());
    }

    #[test]
    fn test_wait_counts_on_last_turn() {
        let mut wait = Command::with_turns(Action::Wait, 3);
        assert!(!wait.tick_wait());
        assert!(!wait.tick_wait());
        assert!(wait.tick_wait());
        // Re-armed for the next cycle
        assert_eq!(wait.turns_left, 3);
        assert!(!wait.tick_wait());
    }

    #[test]
    fn test_cooldown_period() {
        let mut cooldown = Cooldown::new(2);
        let fired: Vec<bool> = (0..7).map(|_| cooldown.ready()).collect();
        assert_eq!(fired, vec![true, false, false, true, false, false, true]);

        let mut eager = Cooldown::new(0);
        assert!((0..5).all(|_| eager.ready()));
    }

    #[test]
    fn test_direction_step_bounds() {
        let corner = Position::new(0, 0);
        assert_eq!(Direction::Up.step(corner, 3, 3), None);
        assert_eq!(Direction::Left.step(corner, 3, 3), None);
        assert_eq!(
            Direction::Right.step(corner, 3, 3),
            Some(Position::new(1, 0))
        );

        let far = Position::new(2, 2);
        assert_eq!(Direction::Down.step(far, 3, 3), None);
        assert_eq!(Direction::Right.step(far, 3, 3), None);
        assert_eq!(Direction::Up.step(far, 3, 3), Some(Position::new(2, 1)));
    }

    #[test]
    fn test_script_cursor_cycles() {
        let script = vec![
            Command::parse_token("W").unwrap(),
            Command::parse_token("S").unwrap(),
        ];
        let mut agent = AgentActor::new(Position::new(1, 1), 0, script);
        assert_eq!(agent.script_cursor(), Some(0));
        agent.moves = 3;
        assert_eq!(agent.script_cursor(), Some(1));

        let idle = AgentActor::new(Position::new(0, 0), 0, Vec::new());
        assert_eq!(idle.script_cursor(), None);
    }
}
