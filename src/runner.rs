//! Top-level like loop.

use std::fmt;

use tracing::{info, warn};

use crate::liker::Liker;

/// Outcome of a run: likes given and why the run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub likes: u64,
    pub message: String,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Likes given: {}", self.likes)
    }
}

/// Like posts until any error ends the run.
///
/// Never fails: the terminating error becomes the report's message.
pub async fn run(liker: &mut Liker) -> RunReport {
    let mut likes = 0u64;
    loop {
        match liker.like().await {
            Ok(_) => likes += 1,
            Err(e) => {
                if e.is_terminal() {
                    info!(likes, reason = %e, "No more posts to like");
                } else {
                    warn!(likes, error = %e, "Like run stopped on error");
                }
                return RunReport {
                    likes,
                    message: e.to_string(),
                };
            }
        }
    }
}
