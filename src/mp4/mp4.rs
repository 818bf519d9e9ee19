pub mod box_utils;
pub mod init_patch;
pub mod vexu;

pub use box_utils::BoxType;
pub use init_patch::{patch_init, PatchInitError};
pub use vexu::build_vexu;
