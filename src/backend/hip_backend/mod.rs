//! ROCm/HIP native backend
//!
//! Links `libamdhip64` and forwards every [`Driver`](crate::backend::Driver)
//! call to the HIP runtime.

mod device;
mod driver;
mod ffi;

pub use device::{get_error_string, HipDeviceProp};
pub use driver::HipDriver;
