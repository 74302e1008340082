pub mod logging;
pub mod prometheus;
