//! Protocol constants shared across the application.

/// Number of entries the forum returns per `user_actions.json` page.
pub const FEED_PAGE_SIZE: u64 = 30;

/// `user_actions.json` filter code, sent as the literal `5`.
///
/// Discourse numbers this action type `REPLY`: entries for posts the target
/// wrote in reply to someone else.
pub const FEED_FILTER: u8 = 5;

/// `post_action_type_id` of a like.
pub const LIKE_ACTION_TYPE: u8 = 2;

/// Name of the cookie carrying the training-site credential.
pub const TOKEN_COOKIE_NAME: &str = "token";

/// Response header the forum uses to report the logged-in user after SSO.
pub const USERNAME_HEADER: &str = "X-Discourse-Username";

/// Request header carrying the CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// AJAX marker the forum expects alongside the CSRF token.
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

pub const DEFAULT_FORUM_URL: &str = "https://forum.olinfo.it";
pub const DEFAULT_TRAINING_URL: &str = "https://training.olinfo.it";
pub const DEFAULT_COOKIE_DOMAIN: &str = ".olinfo.it";

/// User agent sent with every request.
pub const LIKER_USER_AGENT: &str = concat!("forum-liker/", env!("CARGO_PKG_VERSION"));
