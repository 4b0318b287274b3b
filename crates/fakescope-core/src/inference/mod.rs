//! ML inference using Candle.
//!
//! Provides checkpoint loading, the SwinV2 backbone, the multi-task heads,
//! input preprocessing and regression denormalization.

mod denorm;
mod device;
mod loader;
mod multitask;
mod preprocess;
mod swin;
mod utils;

pub use denorm::{denormalize, Denormalized, RegressionStats};
pub use device::select_device;
pub use loader::{load_non_strict, read_stats_file, strip_parallel_prefix, Checkpoint, LoadReport};
pub use multitask::{ClassifierOutput, MultiTaskModel, MultiTaskOutput};
pub use preprocess::{to_input_tensor, IMAGENET_MEAN, IMAGENET_STD};
pub use swin::{LayerCapture, SwinV2, SwinV2Config};
pub use utils::{argmax, softmax};
