pub mod gpu;
pub mod camera;
pub mod pointer;
pub mod ticker;
pub mod shader;
pub mod settings;
pub mod view;

// Simulation core (CPU reference + fallback)
pub mod ping_pong;
pub mod grain;
pub mod simulation;
pub mod heightfield;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(target_arch = "wasm32")]
pub mod wasm;
