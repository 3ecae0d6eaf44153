pub mod classifier;
pub mod pipeline;
pub mod policy;

pub use classifier::*;
pub use pipeline::*;
pub use policy::*;
