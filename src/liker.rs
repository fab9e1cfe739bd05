//! Submission of likes, one post at a time.

use serde::Serialize;
use tracing::info;

use crate::constants::{
    CSRF_HEADER, LIKE_ACTION_TYPE, REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE,
};
use crate::discovery::PostDiscovery;
use crate::error::LikerError;
use crate::session::Session;

#[derive(Debug, Serialize)]
struct PostActionRequest {
    id: u64,
    post_action_type_id: u8,
}

/// A like that the forum accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikedPost {
    pub author: String,
    pub post_id: u64,
}

/// Drives discovery and like submission for one target.
#[derive(Debug)]
pub struct Liker {
    session: Session,
    discovery: PostDiscovery,
}

impl Liker {
    #[must_use]
    pub fn new(session: Session, target: impl Into<String>) -> Self {
        Self {
            session,
            discovery: PostDiscovery::new(target),
        }
    }

    #[must_use]
    pub fn discovery(&self) -> &PostDiscovery {
        &self.discovery
    }

    /// Like the most recently discovered eligible post.
    ///
    /// Runs discovery passes until the buffer has a post.
    ///
    /// # Errors
    ///
    /// Propagates discovery failures ([`LikerError::UserNotFound`],
    /// [`LikerError::NoPostsFound`], ...) and envelope errors from the like request.
    pub async fn like(&mut self) -> Result<LikedPost, LikerError> {
        let post = loop {
            if let Some(post) = self.discovery.pop() {
                break post;
            }
            self.discovery.discover(&self.session).await?;
        };

        let url = self.session.forum_endpoint("/post_actions");
        let body = PostActionRequest {
            id: post.id,
            post_action_type_id: LIKE_ACTION_TYPE,
        };
        let headers = [
            (CSRF_HEADER, self.session.csrf_token()),
            (REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE),
        ];
        self.session.authenticated_post(&url, &body, &headers).await?;

        info!(post_id = post.id, author = %post.username, "Liked post");

        Ok(LikedPost {
            author: post.username,
            post_id: post.id,
        })
    }
}
