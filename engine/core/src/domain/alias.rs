// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Alias Normalization
//!
//! Call aliases arrive from the conferencing cluster exactly as the endpoint
//! dialled them: `sip:alice@example.com;transport=tls`, `h323:1234@10.0.0.1:1720`,
//! or a bare `65432`. Matching is done against the normalized form, which drops
//! the URI scheme, URI parameters and, for `user@host` aliases, the host port.

/// Normalize a dialled alias for matching.
///
/// - a leading `sip:`, `sips:`, `h323:` or any other three or four lowercase
///   letter scheme is removed
/// - everything from the first `;` is removed
/// - a numeric `:port` suffix on the host part is removed when the alias
///   contains `@`
pub fn normalize_alias(alias: &str) -> String {
    if alias.is_empty() {
        return String::new();
    }

    let without_scheme = strip_scheme(alias);
    let without_params = without_scheme
        .split_once(';')
        .map(|(head, _)| head)
        .unwrap_or(without_scheme);

    match without_params.rsplit_once('@') {
        Some((user, host)) => match host.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                format!("{}@{}", user, host)
            }
            _ => without_params.to_string(),
        },
        None => without_params.to_string(),
    }
}

fn strip_scheme(alias: &str) -> &str {
    let Some((scheme, rest)) = alias.split_once(':') else {
        return alias;
    };

    let is_scheme = matches!(scheme, "sip" | "sips" | "h323")
        || ((3..=4).contains(&scheme.len()) && scheme.bytes().all(|b| b.is_ascii_lowercase()));

    if is_scheme {
        rest
    } else {
        alias
    }
}
