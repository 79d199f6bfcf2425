pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod model;
pub mod service;
pub mod storage;
pub mod visualization;

pub use analysis::*;
pub use data::*;
pub use error::{ClassifierError, Result};
pub use model::*;
pub use service::*;
