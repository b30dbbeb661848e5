#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("missing content store credentials")]
    MissingCredentials,
    #[error("content store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("content store rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("content store response was not JSON: {0}")]
    Decode(String),
    #[error("content store response has no `{0}` field")]
    MissingIdentifier(&'static str),
}

pub type PublishResult<T> = Result<T, PublishError>;
