mod channel;
mod invite;
mod kanban;
mod presence;
mod user;
mod workspace;

pub use channel::*;
pub use invite::*;
pub use kanban::*;
pub use presence::*;
pub use user::*;
pub use workspace::*;
