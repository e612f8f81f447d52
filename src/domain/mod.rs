pub mod payload;
pub mod site;
pub mod types;

pub use payload::*;
pub use site::*;
pub use types::*;
