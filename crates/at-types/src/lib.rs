pub mod space;
pub mod problem;
pub mod data;
pub mod options;
pub mod errors;

pub use space::*;
pub use problem::*;
pub use data::*;
pub use options::*;
pub use errors::*;
