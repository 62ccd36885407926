//! Profile matching: resolve a machine identifier to a profile.
//!
//! Matching is a pure function evaluated fresh per call — the catalog may be
//! reloaded by the caller between runs, so nothing is cached here.
//!
//! Resolution order (first match wins):
//! 1. explicit manual type override naming a known profile key
//! 2. family keyword extracted from the identifier, against enabled profiles
//! 3. identifier-pattern substring rules of enabled profiles
//! 4. device-id membership (only when an identifier is not required)
//! 5. URL-pattern substring rules (only when an identifier is not required)
//!
//! A `None` result means "skip this machine" — never a fatal error.

use tracing::{info, warn};

use crate::profile::types::{Profile, ProfileCatalog};

/// Extract the family keyword from a machine identifier.
///
/// Identifiers are conventionally `digits-KEYWORD-digits`, e.g.
/// `"873-JJBX-0004"` → `"JJBX"`. When there is no dash structure, leading
/// and trailing numeric runs (and their dashes) are stripped instead, so a
/// bare `"DFDC"` or `"12-DFDC"` still resolves.
pub fn extract_family_keyword(identifier: &str) -> Option<String> {
    if identifier.is_empty() {
        return None;
    }

    let parts: Vec<&str> = identifier.split('-').collect();
    if parts.len() >= 2 {
        let keyword = parts[1].trim().to_ascii_uppercase();
        if !keyword.is_empty() {
            return Some(keyword);
        }
    }

    // No usable dash structure: strip numeric runs from both ends.
    let stripped = identifier
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches('-')
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches('-')
        .trim_matches('-')
        .trim();

    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_ascii_uppercase())
    }
}

/// Extract a device id from a machine URL's `gameid` query parameter.
pub fn device_id_from_url(url: &str) -> Option<String> {
    let rest = url.split("gameid=").nth(1)?;
    let id = rest.split('&').next().unwrap_or(rest);
    if id.is_empty() { None } else { Some(id.to_string()) }
}

/// Resolve a profile for a machine.
///
/// `require_identifier` gates the weaker fallbacks: during endurance runs
/// every machine must be individually identified, so device-id and URL rules
/// are only consulted when `require_identifier` is false.
pub fn match_profile<'a>(
    catalog: &'a ProfileCatalog,
    url: &str,
    identifier: Option<&str>,
    device_id: Option<&str>,
    explicit_type: Option<&str>,
    require_identifier: bool,
) -> Option<&'a Profile> {
    // Priority 1: manual override. An explicitly named profile wins even
    // when disabled — the operator asked for it by name.
    if let Some(explicit) = explicit_type {
        let key = explicit.to_ascii_uppercase();
        if let Some(profile) = catalog.profiles.get(&key) {
            info!("[ProfileMatcher] using explicit machine type: {}", key);
            return Some(profile);
        }
        warn!("[ProfileMatcher] explicit machine type not found: {}", key);
    }

    if require_identifier && identifier.is_none() {
        warn!("[ProfileMatcher] identifier required but not supplied");
        return None;
    }

    if let Some(identifier) = identifier {
        // Priority 2: family keyword against enabled profile keys.
        if let Some(keyword) = extract_family_keyword(identifier) {
            for (key, profile) in catalog.enabled() {
                if key.eq_ignore_ascii_case(&keyword) {
                    info!(
                        "[ProfileMatcher] matched {} by family keyword {}",
                        key, keyword
                    );
                    return Some(profile);
                }
            }
        }

        // Priority 3: identifier-pattern substring rules.
        for (key, profile) in catalog.enabled() {
            for pattern in &profile.match_rules.identifier_patterns {
                if !pattern.is_empty() && identifier.contains(pattern.as_str()) {
                    info!(
                        "[ProfileMatcher] matched {} by identifier pattern {}",
                        key, pattern
                    );
                    return Some(profile);
                }
            }
        }
    }

    if require_identifier {
        warn!("[ProfileMatcher] no profile matched (identifier required)");
        return None;
    }

    // Priority 4: device-id membership. Falls back to the URL's gameid
    // parameter when no device id was supplied.
    let device_id = device_id
        .map(str::to_string)
        .or_else(|| device_id_from_url(url));
    if let Some(device_id) = &device_id {
        for (key, profile) in catalog.enabled() {
            if profile
                .match_rules
                .device_ids
                .iter()
                .any(|d| d == device_id)
            {
                info!("[ProfileMatcher] matched {} by device id {}", key, device_id);
                return Some(profile);
            }
        }
    }

    // Priority 5: URL-pattern substring rules.
    for (key, profile) in catalog.enabled() {
        for pattern in &profile.match_rules.url_patterns {
            if !pattern.is_empty() && url.contains(pattern.as_str()) {
                info!("[ProfileMatcher] matched {} by url pattern {}", key, pattern);
                return Some(profile);
            }
        }
    }

    warn!("[ProfileMatcher] no profile matched");
    None
}
