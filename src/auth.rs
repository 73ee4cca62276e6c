// Authentication: the external credential oracle (paste attestation),
// key/token minting, and input validation.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

// ── Credential minting ───────────────────────────────────────────────

/// 256-bit hex string derived from a seed, the wall clock and fresh
/// randomness. Used for account keys and session tokens.
fn random_digest(seed: &str) -> String {
    let mut rng = rand::thread_rng();
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let nonce: u64 = rng.gen();
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(now.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Long-lived per-account key.
pub fn generate_key(uid: &str) -> String {
    random_digest(uid)
}

/// Per-join session token.
pub fn generate_token(session_id: &str) -> String {
    random_digest(session_id)
}

/// Session ID in the `p_{uid}_{rand}` form. Readable in logs; the random
/// suffix distinguishes repeated joins by the same account.
pub fn generate_session_id(uid: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(100_000..=999_999);
    format!("p_{uid}_{suffix}")
}

/// Random `#RRGGBB` color for players that do not pick one.
pub fn generate_random_color() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "#{:02X}{:02X}{:02X}",
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}

// ── Input validation ─────────────────────────────────────────────────

/// Account UIDs are short digit strings.
pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 10 && uid.chars().all(|c| c.is_ascii_digit())
}

/// Display names: 1..=20 characters, no control characters.
pub fn is_valid_player_name(name: &str) -> bool {
    let count = name.chars().count();
    count >= 1 && count <= 20 && !name.chars().any(|c| c.is_control())
}

/// Hex colors: `#RGB` or `#RRGGBB`.
pub fn is_valid_color(color: &str) -> bool {
    let Some(digits) = color.strip_prefix('#') else {
        return false;
    };
    (digits.len() == 3 || digits.len() == 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Paste proofs are short opaque slugs.
pub fn is_valid_paste(paste: &str) -> bool {
    !paste.is_empty() && paste.len() <= 50
}

// ── Credential oracle ────────────────────────────────────────────────

/// Validates that a paste published by `uid` on the external paste service
/// contains the expected attestation text. The service embeds its data as
/// URL-encoded JSON inside an HTML page; any fetch or parse failure falls
/// back to "reject" rather than surfacing an error.
pub struct PasteVerifier {
    client: reqwest::Client,
    cfg: AuthConfig,
}

impl PasteVerifier {
    pub fn new(cfg: AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_seconds))
            .build()
            .expect("failed to build http client");
        PasteVerifier { client, cfg }
    }

    pub async fn verify(&self, uid: &str, paste: &str) -> bool {
        // Universal paste: accepted without consulting the oracle.
        if !self.cfg.universal_paste.is_empty() && paste == self.cfg.universal_paste {
            tracing::info!(uid, "universal paste accepted");
            return true;
        }

        if !is_valid_uid(uid) || !is_valid_paste(paste) {
            tracing::warn!(uid, "malformed credentials rejected before fetch");
            return false;
        }

        let url = format!("{}/{}", self.cfg.paste_base_url.trim_end_matches('/'), paste);
        let html = match self.fetch(&url).await {
            Some(html) => html,
            None => return false,
        };

        let Some(payload) = extract_paste_payload(&html, paste) else {
            tracing::warn!(uid, "paste payload missing or malformed");
            return false;
        };

        let author = payload
            .get("user")
            .and_then(|u| u.get("uid"))
            .and_then(|v| v.as_i64());
        if author.map(|a| a.to_string()) != Some(uid.to_string()) {
            tracing::warn!(uid, ?author, "paste author does not match uid");
            return false;
        }

        let content = payload.get("data").and_then(|v| v.as_str()).unwrap_or("");
        if !content.contains(&self.cfg.validation_text) {
            tracing::warn!(uid, "paste content lacks the validation text");
            return false;
        }

        tracing::info!(uid, "paste validation successful");
        true
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url, error = %e, "paste fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(url, status = %response.status(), "paste fetch non-200");
            return None;
        }
        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(url, error = %e, "paste body read failed");
                None
            }
        }
    }
}

/// Dig the paste record out of the page's embedded state:
/// `window._feInjection = JSON.parse(decodeURIComponent("..."))`.
fn extract_paste_payload(html: &str, paste_id: &str) -> Option<serde_json::Value> {
    const MARKER: &str = "window._feInjection = JSON.parse(decodeURIComponent(\"";
    let start = html.find(MARKER)? + MARKER.len();
    let rest = &html[start..];
    let end = rest.find("\"))")?;
    let decoded = url_decode(&rest[..end]);
    let root: serde_json::Value = serde_json::from_str(&decoded).ok()?;

    // Single-paste page.
    if let Some(paste) = root.get("currentData").and_then(|d| d.get("paste")) {
        if !paste.is_null() {
            return Some(paste.clone());
        }
    }

    // Paste list page: find the entry with a matching id.
    let results = root
        .get("currentData")
        .and_then(|d| d.get("pastes"))
        .and_then(|p| p.get("result"))
        .and_then(|r| r.as_array())?;
    results
        .iter()
        .find(|item| item.get("id").and_then(|v| v.as_str()) == Some(paste_id))
        .cloned()
}

fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = &input[i + 1..i + 3];
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
