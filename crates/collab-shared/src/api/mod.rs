mod board;
mod channels;
mod presence;
mod workspaces;

pub use board::*;
pub use channels::*;
pub use presence::*;
pub use workspaces::*;
