pub mod definition;

pub use definition::{DependencyFlags, DependencySpec};
