pub mod error;
pub mod job;
pub mod result;
pub mod roster;
pub mod selection;

pub use error::*;
pub use job::*;
pub use result::*;
pub use roster::*;
pub use selection::*;
