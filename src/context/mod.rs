pub mod descriptor;
pub mod window;

pub use descriptor::*;
pub use window::*;
