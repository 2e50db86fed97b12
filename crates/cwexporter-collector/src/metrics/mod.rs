pub mod render;
pub mod types;

pub use render::{render_descriptor, render_exposition};
pub use types::{MetricDescriptor, MetricSample, MetricType, MetricValue};
