pub mod dashboard;
pub mod heatmap;

pub use dashboard::*;
pub use heatmap::*;
