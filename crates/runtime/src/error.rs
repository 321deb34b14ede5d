use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] protocol::Error),

    #[error(transparent)]
    Tool(#[from] tools::ToolError),
}

pub type Result<T> = std::result::Result<T, Error>;
