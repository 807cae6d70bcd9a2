mod base;
mod connection;
mod routing;
mod storage;
mod target;

pub use base::*;
pub use connection::*;
pub use routing::*;
pub use storage::*;
pub use target::*;
