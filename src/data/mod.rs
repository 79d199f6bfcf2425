pub mod loader;
pub mod patch_extractor;
pub mod preprocess;

pub use loader::*;
pub use patch_extractor::*;
pub use preprocess::*;
