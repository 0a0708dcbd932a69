use thiserror::Error;

#[derive(Error, Debug)]
pub enum YahooError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited while fetching {0}")]
    RateLimited(String),

    #[error("invalid response from yahoo: {0}")]
    InvalidResponse(String),

    #[error("invalid expiry token: {0}")]
    InvalidExpiry(String),
}
