//! Model artifact, isolation-forest inference and baseline statistics.

pub mod forest;
pub mod model;
pub mod scaler;
pub mod stats;
