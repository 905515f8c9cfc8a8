//! Job configuration and stage drivers behind the `opqkit` binary.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::JobConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{
    construct, load_dataset, run_all, run_construct_stage, run_opq_stage, train_rotation,
    CodecReport,
};
