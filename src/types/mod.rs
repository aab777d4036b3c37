//! Type definitions

pub mod edit;
pub mod messages;
pub mod plan;
pub mod route;
pub mod stop;

pub use edit::*;
pub use messages::*;
pub use plan::*;
pub use route::*;
pub use stop::*;
