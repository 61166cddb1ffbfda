use thiserror::Error;

#[derive(Debug, Error)]
pub enum PwlError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("channel {channel}, period {period} (t={time}s, duty={duty}): {reason}")]
    Period {
        channel: usize,
        period: usize,
        time: f64,
        duty: f64,
        reason: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PwlError>;
