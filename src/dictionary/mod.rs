pub mod types;
pub mod normalize;
pub mod fuzzy;
pub mod store;
pub mod book;

pub use types::*;
pub use normalize::normalize;
pub use fuzzy::{FuzzyHit, FuzzyIndex};
pub use store::*;
pub use book::{action_candidates, PhraseDictionary};
