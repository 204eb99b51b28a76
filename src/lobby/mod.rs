//! Lobby state: the game-list mirror and everything derived from it
//!
//! The mirror is mutated only by the reconciliation engine. Visibility,
//! ordering and projection are pure read-only views over it.

pub mod game;
pub mod mirror;
pub mod notification;
pub mod ordering;
pub mod projection;
pub mod session;
pub mod viewer;
pub mod visibility;
