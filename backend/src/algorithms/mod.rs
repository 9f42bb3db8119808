//! Pure numeric building blocks of the segmentation engine.

pub mod classifier;
pub mod outliers;
pub mod statistics;

pub use classifier::{SegmentClassifier, ZERO_MEAN_CV_SENTINEL};
pub use outliers::{remove_outliers, OutlierRemoval};
pub use statistics::{first_period_by_group, group_statistics, mean, population_std, sample_std};
