use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("access forbidden: {0}")]
    Forbidden(String),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("graphql error: {0}")]
    GqlError(String),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("playlist error: {0}")]
    PlaylistError(String),
}
