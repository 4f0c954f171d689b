use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ShotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("event channel closed: {0}")]
    Channel(String),
    #[error("replay error: {0}")]
    Replay(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("target weight out of range: {0} g")]
    TargetOutOfRange(f32),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
