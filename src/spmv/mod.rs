//! Communication schedule and product kernel behind pluggable traits

pub mod kernel;
pub mod schedule;

pub use kernel::{IcrsKernel, MultiplyKernel};
pub use schedule::{CommSchedule, DirectoryScheduleBuilder, ScheduleBuilder};
