//! Speaker diarization model family
//!
//! pyannote pipelines: a `config.yaml` naming the pipeline class and the
//! segmentation and embedding models it runs.

pub mod error;
pub mod pipeline;
pub mod pyannote;

pub use error::DiarizationError;
pub use pipeline::PipelineConfig;
pub use pyannote::{
    pyannote_executor, PipelineDependency, PyannoteExecutor, PyannoteFamily, PyannoteFiles,
    PyannoteModel,
};
