//! Client-side mirror of the remote player: what is playing, the local queue
//! and the transport knobs the UI binds to.

pub mod state;
pub mod types;

pub use {
    state::PlayerState,
    types::{Album, Artist, Image, Track},
};
