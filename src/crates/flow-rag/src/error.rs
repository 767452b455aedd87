use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("vector store '{0}' is not registered")]
    UnknownVectorStore(String),

    #[error("graph '{0}' is not registered")]
    UnknownGraph(String),

    #[error("graph summary '{0}' is not registered")]
    UnknownGraphSummary(String),

    #[error("fusion stage references unknown prior stage '{0}'")]
    UnknownFusionSource(String),

    #[error("stage '{0}' requires a frame store but the pipeline was run without one")]
    MissingFrameStore(String),

    #[error(transparent)]
    Store(#[from] flow_store::FrameStoreError),

    #[error(transparent)]
    Core(#[from] flow_core::FlowCoreError),
}
