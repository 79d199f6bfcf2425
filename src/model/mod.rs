pub mod manager;
pub mod svm;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use manager::*;
pub use svm::*;

/// The two independently trained models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSlot {
    WholeImage,
    Patch,
}

impl ModelSlot {
    pub const ALL: [ModelSlot; 2] = [ModelSlot::WholeImage, ModelSlot::Patch];

    pub fn from_patch_flag(is_patch_model: bool) -> Self {
        if is_patch_model {
            ModelSlot::Patch
        } else {
            ModelSlot::WholeImage
        }
    }

    pub fn is_patch(&self) -> bool {
        matches!(self, ModelSlot::Patch)
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSlot::WholeImage => write!(f, "whole-image"),
            ModelSlot::Patch => write!(f, "patch"),
        }
    }
}
