pub mod error;
pub mod map;
pub mod warp;

pub use error::{CoreError, Result};
pub use map::{expect_map, normalize_for_conversion, MapKind};
pub use warp::{backward_warp, deform_to_backward_map, identity_grid};
