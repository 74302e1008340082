//! Minimal metrics API used by the auction and sequencer components.
//!
//! Components create their instruments once from a `Metrics` implementation
//! and keep the boxed handles. `NoMetrics` discards every update.

use std::fmt::Debug;

use dyn_clone::DynClone;

pub trait Metrics: Send + Sync + Debug {
    fn create_counter(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Counter>;
    fn create_gauge(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Gauge>;
    fn create_histogram(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Histogram>;
}

pub trait Counter: Send + Sync + Debug + DynClone {
    fn add(&self, amount: usize);
}

pub trait Gauge: Send + Sync + Debug + DynClone {
    fn set(&self, amount: usize);
    fn update(&self, delta: i64);
}

pub trait Histogram: Send + Sync + Debug + DynClone {
    fn add_point(&self, point: f64);
}

dyn_clone::clone_trait_object!(Counter);
dyn_clone::clone_trait_object!(Gauge);
dyn_clone::clone_trait_object!(Histogram);

#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl NoMetrics {
    pub fn boxed() -> Box<dyn Metrics> {
        Box::new(Self)
    }
}

impl Metrics for NoMetrics {
    fn create_counter(&self, _: &str, _: Option<&str>) -> Box<dyn Counter> {
        Box::new(Self)
    }

    fn create_gauge(&self, _: &str, _: Option<&str>) -> Box<dyn Gauge> {
        Box::new(Self)
    }

    fn create_histogram(&self, _: &str, _: Option<&str>) -> Box<dyn Histogram> {
        Box::new(Self)
    }
}

impl Counter for NoMetrics {
    fn add(&self, _: usize) {}
}

impl Gauge for NoMetrics {
    fn set(&self, _: usize) {}
    fn update(&self, _: i64) {}
}

impl Histogram for NoMetrics {
    fn add_point(&self, _: f64) {}
}
