pub mod agent;
pub mod backend;
pub mod errors;
pub mod point2;
pub mod random;
pub mod rect;
pub mod render;
pub mod resolver;
pub mod settings;
pub mod simulation;
pub mod statistics;
pub mod swapper;
pub mod trail;

pub use errors::SlimeError;
pub use settings::Settings;
pub use simulation::Simulation;
