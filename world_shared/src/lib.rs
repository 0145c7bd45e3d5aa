//! `world_shared`
//!
//! The world-state core and the pieces around it that client and server share.
//!
//! Design goals:
//! - One explicitly owned `WorldState`, mutated only by `router::route`.
//! - Fail-soft merge: bad or unknown input is dropped and counted, never fatal.
//! - Typed messages decoded once at the boundary (`net`).
//! - No `unsafe`.

pub mod apply;
pub mod config;
pub mod math;
pub mod net;
pub mod router;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::apply::*;
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::router::*;
    pub use crate::world::*;
}
