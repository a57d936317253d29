pub mod batch;
pub mod defaults;
pub mod jobs;
pub mod servers;
