//! # Grid Game Client Library
//!
//! Client side of the grid game. A client creates its own pair of FIFOs,
//! registers them with the server over the registration channel, and then
//! sends one command byte per step while printing every board snapshot the
//! server pushes.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! - `MoveScript`: a cycling list of command letters used instead of a keyboard
//!
//! ### Network Module (`network`)
//! - FIFO creation and registration
//! - Acknowledgement, PLAY and DISCONNECT framing
//! - Reading BOARD frames until the server closes the session
//!
//! ### Rendering Module (`rendering`)
//! - Text rendering of a snapshot: one status line and one line per row

pub mod input;
pub mod network;
pub mod rendering;

pub use input::MoveScript;
pub use network::{Client, ClientError};
