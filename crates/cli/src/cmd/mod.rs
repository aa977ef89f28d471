mod create;
mod graph;
mod targets;

pub use create::cmd_create;
pub use graph::{GraphFormat, cmd_graph};
pub use targets::cmd_targets;
