pub mod config;
pub mod error;
pub mod material;

pub use config::{SolverConfig, WorldConfig};
pub use error::{PhysicsError, Result};
pub use material::Material;
