//! Scripted command source standing in for a keyboard

use shared::{CMD_QUIT, CMD_RIGHT, CMD_UP};

/// Cycles through a fixed list of command bytes
///
/// Letters are upper-cased and whitespace is skipped, so `"w a s d"` and
/// `"WASD"` are the same script. An empty script never produces a command.
#[derive(Debug, Clone)]
pub struct MoveScript {
    commands: Vec<u8>,
    next: usize,
    /// Stop after one pass instead of cycling
    once: bool,
}

impl MoveScript {
    pub fn new(script: &str) -> Self {
        Self {
            commands: script
                .bytes()
                .filter(|b| !b.is_ascii_whitespace())
                .map(|b| b.to_ascii_uppercase())
                .collect(),
            next: 0,
            once: false,
        }
    }

    /// Plays the script a single time, then sends quit.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Returns the next command byte to send
    pub fn next_command(&mut self) -> Option<u8> {
        if self.commands.is_empty() {
            return None;
        }
        if self.next >= self.commands.len() {
            if self.once {
                return Some(CMD_QUIT);
            }
            self.next = 0;
        }
        let command = self.commands[self.next];
        self.next += 1;
        Some(command)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for MoveScript {
    /// Walks up and right forever
    fn default() -> Self {
        Self::new(&String::from_utf8_lossy(&[CMD_UP, CMD_RIGHT]))
    }
}
