//! Credential lookup in a browser's cookie database.
//!
//! Chromium keeps cookies in `Default/Cookies` (table `cookies`), values
//! encrypted with AES-128-CBC under a key derived from the fixed password
//! `peanuts` when no desktop keyring is in use. Firefox keeps them in plain text
//! in `<profile>/cookies.sqlite` (table `moz_cookies`).
//!
//! A running browser holds a lock on its database, so every read works on a
//! copy taken into a temporary directory.

use std::fmt;
use std::path::{Path, PathBuf};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use sha1::Sha1;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::LikerError;

type ChromiumDecryptor = cbc::Decryptor<aes::Aes128>;

const CHROMIUM_PASSWORD: &[u8] = b"peanuts";
const CHROMIUM_SALT: &[u8] = b"saltysalt";
const CHROMIUM_IV: [u8; 16] = [b' '; 16];

/// From this schema version on, plaintexts start with a SHA-256 of the host.
const CHROMIUM_HOST_DIGEST_VERSION: i64 = 24;
const CHROMIUM_HOST_DIGEST_LEN: usize = 32;

/// Cookie databases relative to the home directory, most likely first.
const CHROMIUM_PROFILES: &[&str] = &[
    ".config/chromium/Default/Cookies",
    ".config/chromium/Default/Network/Cookies",
    ".config/google-chrome/Default/Cookies",
    ".config/google-chrome/Default/Network/Cookies",
];
const FIREFOX_PROFILES_DIR: &str = ".mozilla/firefox";
const FIREFOX_COOKIES_FILE: &str = "cookies.sqlite";

/// A browser cookie database to read the credential from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    Chromium(PathBuf),
    Firefox(PathBuf),
}

impl CookieSource {
    /// Read cookie `name` stored for exactly `host`.
    ///
    /// # Errors
    ///
    /// Returns [`LikerError::CookieStore`] if the database cannot be read or
    /// decrypted, or the cookie is absent.
    pub async fn load(&self, host: &str, name: &str) -> Result<String, LikerError> {
        match self {
            Self::Chromium(path) => load_chromium_cookie(path, host, name).await,
            Self::Firefox(path) => load_firefox_cookie(path, host, name).await,
        }
    }
}

impl fmt::Display for CookieSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chromium(path) => write!(f, "chromium:{}", path.display()),
            Self::Firefox(path) => write!(f, "firefox:{}", path.display()),
        }
    }
}

/// Databases to try, Chromium before Firefox.
///
/// A configured path replaces discovery under `home` for that browser.
#[must_use]
pub fn cookie_sources(
    chromium: Option<&Path>,
    firefox: Option<&Path>,
    home: Option<&Path>,
) -> Vec<CookieSource> {
    let chromium = chromium
        .map(Path::to_path_buf)
        .or_else(|| home.and_then(find_chromium_cookie_db));
    let firefox = firefox
        .map(Path::to_path_buf)
        .or_else(|| home.and_then(find_firefox_cookie_db));

    chromium
        .map(CookieSource::Chromium)
        .into_iter()
        .chain(firefox.map(CookieSource::Firefox))
        .collect()
}

/// Try each source in order and return the first cookie found.
///
/// # Errors
///
/// Returns the last source's error, or [`LikerError::CookieStore`] when there
/// are no sources at all.
pub async fn load_token(
    sources: &[CookieSource],
    host: &str,
    name: &str,
) -> Result<String, LikerError> {
    let mut last_error = LikerError::CookieStore("no browser cookie database found".to_string());

    for source in sources {
        match source.load(host, name).await {
            Ok(value) => {
                info!(source = %source, "Loaded credential from browser cookies");
                return Ok(value);
            }
            Err(e) => {
                debug!(source = %source, error = %e, "No usable credential in cookie database");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// First existing Chromium or Chrome cookie database under `home`.
#[must_use]
pub fn find_chromium_cookie_db(home: &Path) -> Option<PathBuf> {
    CHROMIUM_PROFILES
        .iter()
        .map(|relative| home.join(relative))
        .find(|path| path.is_file())
}

/// `cookies.sqlite` of the first Firefox profile under `home`, by directory name.
#[must_use]
pub fn find_firefox_cookie_db(home: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(home.join(FIREFOX_PROFILES_DIR)).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path().join(FIREFOX_COOKIES_FILE))
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Read the value of cookie `name` stored for exactly `host` in a Firefox
/// `cookies.sqlite`.
///
/// # Errors
///
/// Returns [`LikerError::CookieStore`] if the database cannot be read or the
/// cookie is absent.
pub async fn load_firefox_cookie(
    db_path: &Path,
    host: &str,
    name: &str,
) -> Result<String, LikerError> {
    let (_snapshot, pool) = open_snapshot(db_path).await?;

    let result: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
        "SELECT value FROM moz_cookies WHERE host = ? AND name = ? \
         ORDER BY lastAccessed DESC LIMIT 1",
    )
    .bind(host)
    .bind(name)
    .fetch_optional(&pool)
    .await;
    pool.close().await;

    match result? {
        Some(v) if !v.is_empty() => {
            debug!(path = %db_path.display(), host = %host, name = %name, "Found Firefox cookie");
            Ok(v)
        }
        _ => Err(LikerError::CookieStore("cookie not found".to_string())),
    }
}

/// Read and decrypt the value of cookie `name` stored for exactly `host` in a
/// Chromium `Cookies` database.
///
/// # Errors
///
/// Returns [`LikerError::CookieStore`] if the database cannot be read, the
/// value cannot be decrypted, or the cookie is absent.
pub async fn load_chromium_cookie(
    db_path: &Path,
    host: &str,
    name: &str,
) -> Result<String, LikerError> {
    let (_snapshot, pool) = open_snapshot(db_path).await?;

    let row: Result<Option<(String, Vec<u8>)>, sqlx::Error> = sqlx::query_as(
        "SELECT value, encrypted_value FROM cookies WHERE host_key = ? AND name = ? \
         ORDER BY last_access_utc DESC LIMIT 1",
    )
    .bind(host)
    .bind(name)
    .fetch_optional(&pool)
    .await;
    // Older databases have no meta table
    let version: Option<i64> =
        sqlx::query_scalar("SELECT CAST(value AS INTEGER) FROM meta WHERE key = 'version'")
            .fetch_optional(&pool)
            .await
            .ok()
            .flatten();
    pool.close().await;

    let Some((value, encrypted)) = row? else {
        return Err(LikerError::CookieStore("cookie not found".to_string()));
    };
    let value = if value.is_empty() && !encrypted.is_empty() {
        decrypt_chromium_value(&encrypted, version.unwrap_or(0))?
    } else {
        value
    };

    if value.is_empty() {
        return Err(LikerError::CookieStore("cookie not found".to_string()));
    }
    debug!(path = %db_path.display(), host = %host, name = %name, "Found Chromium cookie");
    Ok(value)
}

/// Copy the database (and its write-ahead log, if any) into a fresh temporary
/// directory and open the copy. The directory lives as long as the returned
/// guard.
async fn open_snapshot(db_path: &Path) -> Result<(TempDir, SqlitePool), LikerError> {
    let snapshot = TempDir::new().map_err(|e| cookie_io_error(db_path, &e))?;
    let copy = snapshot.path().join("cookies.sqlite");
    std::fs::copy(db_path, &copy).map_err(|e| cookie_io_error(db_path, &e))?;

    let mut wal = db_path.as_os_str().to_owned();
    wal.push("-wal");
    let wal = PathBuf::from(wal);
    if wal.is_file() {
        std::fs::copy(&wal, snapshot.path().join("cookies.sqlite-wal"))
            .map_err(|e| cookie_io_error(&wal, &e))?;
    }

    let options = SqliteConnectOptions::new().filename(&copy);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok((snapshot, pool))
}

fn cookie_io_error(path: &Path, e: &std::io::Error) -> LikerError {
    LikerError::CookieStore(format!("cannot copy {}: {e}", path.display()))
}

/// Decrypt a `v10`/`v11` Chromium value with the fixed Linux key.
///
/// # Errors
///
/// Returns [`LikerError::CookieStore`] for an unknown prefix, bad padding
/// (usually a keyring-protected value) or a non-UTF-8 plaintext.
pub fn decrypt_chromium_value(encrypted: &[u8], db_version: i64) -> Result<String, LikerError> {
    let ciphertext = encrypted
        .strip_prefix(b"v10")
        .or_else(|| encrypted.strip_prefix(b"v11"))
        .ok_or_else(|| LikerError::CookieStore("unknown cookie encryption scheme".to_string()))?;

    let key = chromium_key();
    let plaintext = ChromiumDecryptor::new(&key.into(), &CHROMIUM_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| LikerError::CookieStore("cookie decryption failed".to_string()))?;

    let value = if db_version >= CHROMIUM_HOST_DIGEST_VERSION {
        plaintext
            .get(CHROMIUM_HOST_DIGEST_LEN..)
            .ok_or_else(|| LikerError::CookieStore("decrypted cookie too short".to_string()))?
    } else {
        &plaintext[..]
    };

    String::from_utf8(value.to_vec())
        .map_err(|_| LikerError::CookieStore("decrypted cookie is not UTF-8".to_string()))
}

/// AES key Chromium derives from its fixed password on Linux.
#[must_use]
pub fn chromium_key() -> [u8; 16] {
    let mut key = [0u8; 16];
    pbkdf2::pbkdf2_hmac::<Sha1>(CHROMIUM_PASSWORD, CHROMIUM_SALT, 1, &mut key);
    key
}
