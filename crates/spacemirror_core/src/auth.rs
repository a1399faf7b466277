use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::OAuthSettings;

pub const AUTHORIZE_URL: &str = "https://auth.atlassian.com/authorize";
pub const TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";
pub const ACCESSIBLE_RESOURCES_URL: &str = "https://api.atlassian.com/oauth/token/accessible-resources";
pub const AUDIENCE: &str = "api.atlassian.com";

pub const SCOPES: &[&str] = &[
    "offline_access",
    "read:template:confluence",
    "read:space:confluence",
    "read:space-details:confluence",
    "read:relation:confluence",
    "read:custom-content:confluence",
    "read:content.metadata:confluence",
    "read:content:confluence",
    "read:content-details:confluence",
    "read:comment:confluence",
    "read:attachment:confluence",
    "read:content.property:confluence",
    "read:page:confluence",
    "read:label:confluence",
];

/// Persisted as `auth.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub access_token: String,
    pub refresh_token: String,
    pub cloudid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Rotating refresh tokens come back on every grant; keep the old one if not.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccessibleResource {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// 24 random bytes, URL-safe base64 without padding.
pub fn generate_state() -> String {
    let bytes: [u8; 24] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn authorize_url(oauth: &OAuthSettings, state: &str) -> Result<Url> {
    let scope = SCOPES.join(" ");
    Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("audience", AUDIENCE),
            ("client_id", oauth.client_id.as_str()),
            ("scope", scope.as_str()),
            ("redirect_uri", oauth.callback_url.as_str()),
            ("state", state),
            ("response_type", "code"),
            ("prompt", "consent"),
        ],
    )
    .context("failed to build authorization URL")
}

/// Pull the authorization code out of the URL the browser was redirected to.
pub fn code_from_redirect(redirect_url: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(redirect_url.trim())
        .with_context(|| format!("invalid redirect URL: {redirect_url}"))?;
    let mut state = None;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "state" if state.is_none() => state = Some(value.into_owned()),
            "code" if code.is_none() => code = Some(value.into_owned()),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state) {
        bail!("invalid state parameter in redirect URL");
    }
    match code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => bail!("redirect URL carries no authorization code"),
    }
}

pub fn exchange_code(client: &Client, oauth: &OAuthSettings, code: &str) -> Result<TokenResponse> {
    post_token(
        client,
        &json!({
            "grant_type": "authorization_code",
            "client_id": oauth.client_id,
            "client_secret": oauth.client_secret,
            "code": code,
            "redirect_uri": oauth.callback_url,
        }),
    )
}

pub fn refresh_tokens(
    client: &Client,
    oauth: &OAuthSettings,
    refresh_token: &str,
) -> Result<TokenResponse> {
    post_token(
        client,
        &json!({
            "grant_type": "refresh_token",
            "client_id": oauth.client_id,
            "client_secret": oauth.client_secret,
            "refresh_token": refresh_token,
            "redirect_uri": oauth.callback_url,
        }),
    )
}

fn post_token(client: &Client, body: &serde_json::Value) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_URL)
        .json(body)
        .send()
        .context("failed to reach the token endpoint")?;
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().unwrap_or_default();
        bail!("token request failed with HTTP {status}: {}", detail.trim());
    }
    let tokens: TokenResponse = response
        .json()
        .context("failed to parse token response")?;
    debug!(expires_in = ?tokens.expires_in, "received access token");
    Ok(tokens)
}

/// The first site the token can reach. The mirror talks to that one only.
pub fn accessible_cloud_id(client: &Client, access_token: &str) -> Result<String> {
    let response = client
        .get(ACCESSIBLE_RESOURCES_URL)
        .bearer_auth(access_token)
        .send()
        .context("failed to list accessible resources")?;
    let status = response.status();
    if !status.is_success() {
        bail!("accessible-resources request failed with HTTP {status}");
    }
    let resources: Vec<AccessibleResource> = response
        .json()
        .context("failed to parse accessible resources")?;
    let Some(first) = resources.into_iter().next() else {
        bail!("the token grants access to no Confluence site");
    };
    info!(
        cloudid = %first.id,
        site = first.name.as_deref().unwrap_or("<unnamed>"),
        "resolved Confluence site"
    );
    Ok(first.id)
}

/// Finish the browser flow: validate the redirect, trade the code for tokens,
/// look up the site and persist everything.
pub fn complete_authorization(
    client: &Client,
    oauth: &OAuthSettings,
    redirect_url: &str,
    expected_state: &str,
    auth_path: &Path,
) -> Result<AuthState> {
    let code = code_from_redirect(redirect_url, expected_state)?;
    let tokens = exchange_code(client, oauth, &code)?;
    let Some(refresh_token) = tokens.refresh_token else {
        bail!("token response has no refresh token; is offline_access granted?");
    };
    let cloudid = accessible_cloud_id(client, &tokens.access_token)?;
    let state = AuthState {
        access_token: tokens.access_token,
        refresh_token,
        cloudid,
    };
    store_auth_state(auth_path, &state)?;
    Ok(state)
}

pub fn load_auth_state(path: &Path) -> Result<AuthState> {
    if !path.exists() {
        bail!(
            "no credentials at {}; run `spacemirror auth` first",
            path.display()
        );
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn store_auth_state(path: &Path, state: &AuthState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(state).context("failed to encode credentials")?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

pub fn apply_refresh(state: &AuthState, tokens: TokenResponse) -> AuthState {
    AuthState {
        access_token: tokens.access_token,
        refresh_token: tokens
            .refresh_token
            .unwrap_or_else(|| state.refresh_token.clone()),
        cloudid: state.cloudid.clone(),
    }
}

/// Load `auth.json`, refresh the access token and write the result back.
pub fn refresh_auth_state(
    client: &Client,
    oauth: &OAuthSettings,
    path: &Path,
) -> Result<AuthState> {
    let current = load_auth_state(path)?;
    let tokens = refresh_tokens(client, oauth, &current.refresh_token)
        .context("failed to refresh access token")?;
    let refreshed = apply_refresh(&current, tokens);
    store_auth_state(path, &refreshed)?;
    Ok(refreshed)
}
