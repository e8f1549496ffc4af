use crate::error::UpdateError;
use crate::http::{self, CancelToken, Transport};
use std::time::Duration;

/// Update definition for one platform, as published in the appcast:
///
/// ```json
/// { "updates": { "linux": {
///     "open-url": "", "changelog": "...", "download-url": "https://...",
///     "latest-version": "1.2.0", "mandatory-update": false } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRecord {
    pub open_url: String,
    pub changelog: String,
    pub download_url: String,
    pub latest_version: String,
    /// `None` when the appcast doesn't carry `mandatory-update`.
    pub mandatory: Option<bool>,
}

impl ManifestRecord {
    /// Extracts the record for `platform_key`. A missing `updates` object or
    /// platform entry yields an empty record; only undecodable JSON fails.
    pub fn parse(body: &[u8], platform_key: &str) -> Result<Self, UpdateError> {
        let document: json::Value =
            json::from_slice(body).map_err(|e| UpdateError::InvalidManifest(e.to_string()))?;

        let Some(platform) = document
            .get("updates")
            .and_then(|updates| updates.get(platform_key))
        else {
            log::debug!("Appcast has no entry for platform {platform_key}");
            return Ok(Self::default());
        };

        let text = |key: &str| {
            platform
                .get(key)
                .and_then(json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            open_url: text("open-url"),
            changelog: text("changelog"),
            download_url: text("download-url"),
            latest_version: text("latest-version"),
            mandatory: platform
                .get("mandatory-update")
                .map(|value| value.as_bool().unwrap_or(false)),
        })
    }
}

/// Outcome of one successful appcast fetch.
#[derive(Debug)]
pub enum CheckResponse {
    /// Custom appcast mode: the body, uninterpreted.
    Appcast(Vec<u8>),
    Manifest(ManifestRecord),
}

pub(crate) struct CheckRequest<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    pub timeout: Option<Duration>,
    pub platform_key: &'a str,
    pub custom_appcast: bool,
}

/// Fetches and interprets the appcast. Also returns the URL the appcast was
/// finally served from, after redirects.
pub(crate) fn check(
    transport: &dyn Transport,
    request: &CheckRequest<'_>,
    cancel: &CancelToken,
) -> Result<(String, CheckResponse), UpdateError> {
    let fetched = http::download_bytes(
        transport,
        request.url,
        request.user_agent,
        request.timeout,
        cancel,
    )?;
    log::debug!(
        "Fetched appcast from {} ({} bytes)",
        fetched.url,
        fetched.body.len()
    );

    if request.custom_appcast {
        return Ok((fetched.url, CheckResponse::Appcast(fetched.body)));
    }

    let record = ManifestRecord::parse(&fetched.body, request.platform_key)?;
    Ok((fetched.url, CheckResponse::Manifest(record)))
}
