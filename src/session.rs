//! Authenticated forum session.
//!
//! The forum delegates login to the training site through Discourse SSO:
//!
//! 1. seed the training-site `token` cookie,
//! 2. check the token with `POST /api/user {"action": "me"}`,
//! 3. ask the forum to start SSO; it redirects to the training site with
//!    `sso`/`sig` in the URL fragment,
//! 4. have the training site sign the payload (`POST /api/sso`),
//! 5. hand the signed parameters back to `/session/sso_login`,
//! 6. fetch the CSRF token for state-changing requests.
//!
//! Each hop depends on cookies or values produced by the previous one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::constants::{TOKEN_COOKIE_NAME, USERNAME_HEADER};
use crate::envelope::{parse_envelope, parse_typed};
use crate::error::LikerError;
use crate::transport::Transport;

#[derive(Debug, Serialize)]
struct IdentityCheck<'a> {
    action: &'a str,
}

#[derive(Debug, Serialize)]
struct SsoPayload<'a> {
    payload: &'a str,
    sig: &'a str,
}

#[derive(Debug, Deserialize)]
struct SsoValidation {
    parameters: String,
}

#[derive(Debug, Deserialize)]
struct CsrfResponse {
    csrf: String,
}

/// A logged-in forum session.
///
/// CSRF token and username are fixed once [`Session::login`] returns.
#[derive(Debug)]
pub struct Session {
    transport: Transport,
    forum_url: String,
    username: String,
    csrf: String,
}

impl Session {
    /// Run the full SSO handshake with the given credential token.
    ///
    /// # Errors
    ///
    /// - [`LikerError::LoginFailed`] if the training site rejects the token.
    /// - [`LikerError::SsoHandshakeFailed`] if the redirect lacks `sso`/`sig`
    ///   or the forum does not report a username.
    /// - Envelope and transport errors from the later hops, unchanged.
    pub async fn login(config: &Config, token: &str) -> Result<Self, LikerError> {
        let transport = Transport::new(config)?;
        seed_token(&transport, config, token)?;

        let identity_url = format!("{}/api/user", config.training_url);
        if let Err(e) = check_identity(&transport, &identity_url).await {
            warn!(error = %e, "Credential token rejected by training site");
            return Err(LikerError::LoginFailed);
        }
        debug!("Credential token accepted");

        let sso_url = format!("{}/session/sso?return_path=%2F", config.forum_url);
        let landing = transport.follow_redirects(&sso_url).await?;
        let (sso, sig) = extract_sso_params(&landing)?;

        let validate_url = format!("{}/api/sso", config.training_url);
        let response = transport
            .post_json(
                &validate_url,
                &SsoPayload {
                    payload: &sso,
                    sig: &sig,
                },
                &[],
            )
            .await?;
        let validation: SsoValidation = parse_typed(&response.body)?;

        let login_url = format!(
            "{}/session/sso_login?{}",
            config.forum_url,
            validation.parameters.trim_start_matches('?')
        );
        let response = transport.get(&login_url).await?;
        let username = response
            .headers
            .get(USERNAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| LikerError::SsoHandshakeFailed(format!("{USERNAME_HEADER} header")))?;

        let csrf_url = format!("{}/session/csrf.json", config.forum_url);
        let response = transport.get(&csrf_url).await?;
        let CsrfResponse { csrf } = parse_typed(&response.body)?;

        info!(username = %username, "Logged into forum");

        Ok(Self {
            transport,
            forum_url: config.forum_url.clone(),
            username,
            csrf,
        })
    }

    /// Username the forum reported after SSO.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn csrf_token(&self) -> &str {
        &self.csrf
    }

    /// Absolute URL of a forum path such as `/posts.json`.
    #[must_use]
    pub fn forum_endpoint(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.forum_url)
    }

    /// GET with session cookies, decoding the JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns transport errors or the envelope's typed failures.
    pub async fn authenticated_get(&self, url: &str) -> Result<Value, LikerError> {
        let response = self.transport.get(url).await?;
        parse_envelope(&response.body)
    }

    /// POST a JSON body with session cookies and extra headers, decoding the envelope.
    ///
    /// # Errors
    ///
    /// Returns transport errors or the envelope's typed failures.
    pub async fn authenticated_post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        extra_headers: &[(&str, &str)],
    ) -> Result<Value, LikerError> {
        let response = self.transport.post_json(url, body, extra_headers).await?;
        parse_envelope(&response.body)
    }
}

async fn check_identity(transport: &Transport, url: &str) -> Result<Value, LikerError> {
    let response = transport
        .post_json(url, &IdentityCheck { action: "me" }, &[])
        .await?;
    parse_envelope(&response.body)
}

/// Put the credential cookie in the jar.
///
/// With a cookie domain the cookie covers both services at once; without one it
/// is stored host-only for each service separately.
fn seed_token(transport: &Transport, config: &Config, token: &str) -> Result<(), LikerError> {
    let training = parse_url(&config.training_url)?;
    let forum = parse_url(&config.forum_url)?;

    match &config.cookie_domain {
        Some(domain) => {
            let cookie = token_cookie(token, Some(domain), training.scheme() == "https");
            transport.add_cookie(&cookie, &training);
        }
        None => {
            for url in [&training, &forum] {
                let cookie = token_cookie(token, None, url.scheme() == "https");
                transport.add_cookie(&cookie, url);
            }
        }
    }
    Ok(())
}

/// Session-scoped `Set-Cookie` value for the credential.
fn token_cookie(token: &str, domain: Option<&str>, secure: bool) -> String {
    let mut cookie = format!("{TOKEN_COOKIE_NAME}={token}; Path=/");
    if let Some(domain) = domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn parse_url(raw: &str) -> Result<Url, LikerError> {
    Url::parse(raw).map_err(|e| LikerError::Parse(format!("invalid URL {raw}: {e}")))
}

/// Pull `sso` and `sig` out of the query string embedded in a URL fragment,
/// e.g. `https://training.example/#/sso?sso=...&sig=...`.
fn extract_sso_params(url: &Url) -> Result<(String, String), LikerError> {
    let fragment = url.fragment().unwrap_or_default();
    let query = fragment.split_once('?').map_or("", |(_, q)| q);

    let mut sso = None;
    let mut sig = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "sso" if sso.is_none() => sso = Some(value.into_owned()),
            "sig" if sig.is_none() => sig = Some(value.into_owned()),
            _ => {}
        }
    }

    match (sso, sig) {
        (Some(sso), Some(sig)) => Ok((sso, sig)),
        (None, _) => Err(LikerError::SsoHandshakeFailed("sso parameter".to_string())),
        (_, None) => Err(LikerError::SsoHandshakeFailed("sig parameter".to_string())),
    }
}
