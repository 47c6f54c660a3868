//! Data quality scoring and low-score fan-out.

mod scorer;

pub use scorer::{AlertDeliveryError, QualityAlertSink, QualityReport, QualityScorer};
