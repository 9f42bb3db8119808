pub mod catalog;
pub mod observation;
pub mod segmentation;
pub mod write;

pub use catalog::*;
pub use observation::*;
pub use segmentation::*;
pub use write::*;
