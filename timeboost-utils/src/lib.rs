pub mod types;

mod backoff;

pub use backoff::{Backoff, NUM_DELAYS};
