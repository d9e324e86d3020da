//! Backend selection from cargo features.
//!
//! `cuda` wins over `wgpu`; without either the CPU `ndarray` backend is used.
//! Training runs on [`TrainBackend`], the selected backend wrapped in autodiff.

use burn::{backend::Autodiff, tensor::backend::Backend};
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Selected backend type
        pub type SelectedBackend = burn::backend::Cuda;
        const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        /// Selected backend type
        pub type SelectedBackend = burn::backend::Wgpu;
        const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        /// Selected backend type
        pub type SelectedBackend = burn::backend::NdArray;
        const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

/// Device type of [`SelectedBackend`].
pub type SelectedDevice = <SelectedBackend as Backend>::Device;

/// The selected backend with gradient tracking.
pub type TrainBackend = Autodiff<SelectedBackend>;

/// Default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}

/// Backend name for logging.
pub const fn get_backend_name() -> &'static str {
    BACKEND_NAME
}
