pub mod glulx_terp;

pub use glulx_terp::{Errors, GlulxTerp};
