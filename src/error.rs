use thiserror::Error;

/// Every way a login, discovery or like can fail.
#[derive(Debug, Error)]
pub enum LikerError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Body was neither JSON nor an HTML error page, or JSON of an unexpected shape.
    #[error("unparseable response: {0}")]
    Parse(String),

    /// Server-side error page; carries its `<title>`.
    #[error("{0}")]
    Generic(String),

    /// JSON envelope with an `error`/`errors` field.
    #[error("{0}")]
    Api(String),

    #[error("too many redirects starting from {0}")]
    TooManyRedirects(String),

    #[error("login failed")]
    LoginFailed,

    #[error("SSO handshake failed: missing {0}")]
    SsoHandshakeFailed(String),

    #[error("user not found")]
    UserNotFound,

    #[error("no posts found")]
    NoPostsFound,

    #[error("post {0} was never returned by the posts listing")]
    StaleIdentifier(u64),

    #[error("cookie store error: {0}")]
    CookieStore(String),
}

impl LikerError {
    /// Whether the error means discovery has run out of work for this target.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::UserNotFound | Self::NoPostsFound)
    }
}

impl From<sqlx::Error> for LikerError {
    fn from(e: sqlx::Error) -> Self {
        Self::CookieStore(e.to_string())
    }
}
