//! Persisted state at the session boundary: a plain cookie file read at start
//! and written at close, and an opaque storage-state blob.

use crate::errors::Result;
use crate::types::CookieRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Cookies plus a local-storage snapshot. The `origins` payload is opaque to
/// this crate; it is carried for the launch collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageState {
    pub cookies: Vec<CookieRecord>,
    pub origins: Value,
    pub captured_at: DateTime<Utc>,
}

impl StorageState {
    pub fn new(cookies: Vec<CookieRecord>, origins: Value) -> Self {
        Self {
            cookies,
            origins,
            captured_at: Utc::now(),
        }
    }
}

/// Read the cookie file. A missing file is an empty jar, not an error.
pub fn load_cookies(path: &Path) -> Result<Vec<CookieRecord>> {
    if !path.exists() {
        debug!(path = %path.display(), "no cookie file, starting with an empty jar");
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    let cookies: Vec<CookieRecord> = serde_json::from_str(&raw)?;
    Ok(cookies)
}

/// Write the cookie file, creating parent directories as needed.
pub fn save_cookies(path: &Path, cookies: &[CookieRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(cookies)?)?;
    debug!(path = %path.display(), count = cookies.len(), "wrote cookie file");
    Ok(())
}

pub fn load_storage_state(path: &Path) -> Result<Option<StorageState>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn save_storage_state(path: &Path, state: &StorageState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(state)?)?;
    Ok(())
}

/// Script returning the current page's cookies as a JSON array shaped like
/// [`CookieRecord`].
pub const COOKIE_EXTRACTION_SCRIPT: &str = r#"
    (function() {
        const cookies = [];
        document.cookie.split(';').forEach(cookie => {
            const [name, ...rest] = cookie.trim().split('=');
            const value = rest.join('=');
            if (name && value) {
                cookies.push({
                    name: name.trim(),
                    value: value.trim(),
                    domain: window.location.hostname,
                    path: '/',
                    expires: null,
                    http_only: false,
                    secure: window.location.protocol === 'https:',
                    same_site: null
                });
            }
        });
        return cookies;
    })()
"#;

pub fn parse_extracted_cookies(value: Value) -> Result<Vec<CookieRecord>> {
    Ok(serde_json::from_value(value)?)
}

/// Script returning the page's localStorage as a JSON object. The payload is
/// carried opaquely inside [`StorageState::origins`].
pub const LOCAL_STORAGE_SNAPSHOT_SCRIPT: &str = r#"
    (function() {
        const storage = {};
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            if (key) {
                storage[key] = localStorage.getItem(key);
            }
        }
        return storage;
    })()
"#;

/// Build a script that replays a localStorage snapshot into the current page.
pub fn local_storage_injection_script(origins: &Value) -> Result<String> {
    let payload = serde_json::to_string(origins)?;
    Ok(format!(
        r#"
        (function() {{
            const storage = {payload};
            let count = 0;
            try {{
                for (const [key, value] of Object.entries(storage)) {{
                    localStorage.setItem(key, value);
                    count++;
                }}
                return {{ success: true, count: count }};
            }} catch (error) {{
                return {{ success: false, error: error.message, count: count }};
            }}
        }})()
        "#
    ))
}

/// Build a script that writes the given cookies into the current page.
pub fn cookie_injection_script(cookies: &[CookieRecord]) -> Result<String> {
    let payload = serde_json::to_string(cookies)?;
    Ok(format!(
        r#"
        (function() {{
            const cookies = {payload};
            let count = 0;
            for (const cookie of cookies) {{
                let str = cookie.name + '=' + cookie.value + '; path=' + cookie.path;
                if (cookie.expires !== null) {{
                    str += '; expires=' + new Date(cookie.expires * 1000).toUTCString();
                }}
                if (cookie.secure) {{
                    str += '; secure';
                }}
                if (cookie.same_site !== null) {{
                    str += '; samesite=' + cookie.same_site;
                }}
                document.cookie = str;
                count++;
            }}
            return {{ success: true, count: count }};
        }})()
        "#
    ))
}
