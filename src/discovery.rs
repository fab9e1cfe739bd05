//! Discovery of the target's posts that this account has not reacted to.
//!
//! Each pass reads one page of the target's action feed, then resolves the
//! referenced post ids against `/posts.json?before=<id>` listings, which carry
//! the per-post reaction summary. Eligible posts go into a LIFO buffer.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::{FEED_FILTER, FEED_PAGE_SIZE};
use crate::envelope::decode;
use crate::error::LikerError;
use crate::session::Session;

/// A forum post as returned by `/posts.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Post {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub actions_summary: Vec<ActionSummary>,
}

impl Post {
    /// A post is eligible iff no reaction entry records an action by this account.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        !self.actions_summary.iter().any(|a| a.acted)
    }
}

/// One per-reaction-type aggregate of a post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionSummary {
    /// Reaction type (2 is a like).
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub count: Option<u64>,
    /// Whether the logged-in account has given this reaction.
    #[serde(default, deserialize_with = "truthy")]
    pub acted: bool,
}

/// Accept `true`/`false`, numeric counts, strings and `null` for a flag.
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

#[derive(Debug, Deserialize)]
struct UserActionsResponse {
    user_actions: Vec<UserAction>,
}

#[derive(Debug, Deserialize)]
struct UserAction {
    #[serde(default)]
    post_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LatestPostsResponse {
    latest_posts: Vec<Post>,
}

/// Paginated discovery state for one target.
#[derive(Debug)]
pub struct PostDiscovery {
    target: String,
    cursor: u64,
    buffer: Vec<Post>,
    /// Every post id ever resolved, so no post is queued twice.
    resolved: HashSet<u64>,
}

impl PostDiscovery {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cursor: 0,
            buffer: Vec::new(),
            resolved: HashSet::new(),
        }
    }

    /// Offset of the next feed page to request.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Posts waiting to be liked, oldest-queued first.
    #[must_use]
    pub fn buffer(&self) -> &[Post] {
        &self.buffer
    }

    /// Take the most recently queued post.
    pub fn pop(&mut self) -> Option<Post> {
        self.buffer.pop()
    }

    /// Run one discovery pass and return how many posts were queued.
    ///
    /// The cursor advances by one page before anything is sent, so a failed
    /// pass never re-reads the same page.
    ///
    /// # Errors
    ///
    /// - [`LikerError::UserNotFound`] if the feed response is malformed or an error.
    /// - [`LikerError::NoPostsFound`] if the feed page is empty.
    /// - [`LikerError::StaleIdentifier`] if a posts listing resolves no outstanding id.
    /// - Transport and envelope errors from the posts listing.
    pub async fn discover(&mut self, session: &Session) -> Result<usize, LikerError> {
        let offset = self.cursor;
        self.cursor += FEED_PAGE_SIZE;

        let feed_url = session.forum_endpoint(&format!(
            "/user_actions.json?offset={offset}&username={}&filter={FEED_FILTER}",
            urlencoding::encode(&self.target)
        ));
        debug!(target_user = %self.target, offset, "Fetching action feed");

        let feed: UserActionsResponse = match session
            .authenticated_get(&feed_url)
            .await
            .and_then(decode::<UserActionsResponse>)
        {
            Ok(feed) => feed,
            Err(LikerError::Transport(e)) => return Err(LikerError::Transport(e)),
            Err(e) => {
                warn!(target_user = %self.target, offset, error = %e, "Action feed unreadable");
                return Err(LikerError::UserNotFound);
            }
        };

        if feed.user_actions.is_empty() {
            info!(target_user = %self.target, offset, "Action feed exhausted");
            return Err(LikerError::NoPostsFound);
        }

        let mut unresolved: Vec<u64> = Vec::new();
        for id in feed.user_actions.iter().filter_map(|a| a.post_id) {
            if !self.resolved.contains(&id) && !unresolved.contains(&id) {
                unresolved.push(id);
            }
        }

        let mut queued = 0;
        while let Some(&head) = unresolved.first() {
            let page_url = session.forum_endpoint(&format!("/posts.json?before={head}"));
            let page: LatestPostsResponse = decode(session.authenticated_get(&page_url).await?)?;

            let outstanding = unresolved.len();
            for post in page.latest_posts {
                let Some(pos) = unresolved.iter().position(|&id| id == post.id) else {
                    continue;
                };
                unresolved.remove(pos);
                self.resolved.insert(post.id);

                if post.is_eligible() {
                    debug!(post_id = post.id, author = %post.username, "Queued post");
                    self.buffer.push(post);
                    queued += 1;
                } else {
                    debug!(post_id = post.id, "Already reacted, skipping");
                }
            }

            if unresolved.len() == outstanding {
                warn!(post_id = head, "Posts listing never returned post");
                return Err(LikerError::StaleIdentifier(head));
            }
        }

        debug!(offset, queued, buffered = self.buffer.len(), "Discovery pass complete");
        Ok(queued)
    }
}
