pub mod context;
pub mod pipeline;
pub mod processing;
pub mod quad;
pub mod sand_layer;
