//! Visual explanations for classifier decisions.

mod colormap;
mod gradcam;

pub use colormap::{jet, overlay};
pub use gradcam::{channels_first, nhwc_to_nchw, ReshapeTransform, SaliencyExplainer, SaliencyMap, SplitClassifier};
