//! Shared helpers: request metadata, URL building and PHI redaction for logs.

use axum::http::HeaderMap;

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`.
/// Only the first hop of `x-forwarded-for` is kept.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Append query parameters to a URL
pub fn append_query_params(base_url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

/// Mask a credential for display, keeping a recognizable prefix.
///
/// `sk_test_abc123xyz789` -> `sk_test_...z789`. Short values are fully starred.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 12 {
        return "*".repeat(chars.len().max(4));
    }
    let prefix_len = secret
        .rfind('_')
        .map(|i| secret[..=i].chars().count())
        .filter(|&n| n <= 8)
        .unwrap_or(3);
    let prefix: String = chars[..prefix_len].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

/// `jane.doe@example.com` -> `j***@example.com`
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// Keep only the last four digits of a phone number.
pub fn redact_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return "***".to_string();
    }
    let last4: String = digits[digits.len() - 4..].iter().collect();
    format!("***-***-{}", last4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_keeps_only_hints() {
        assert_eq!(redact_email("jane.doe@example.com"), "j***@example.com");
        assert_eq!(redact_email("nonsense"), "***");
        assert_eq!(redact_phone("+1 (555) 123-4567"), "***-***-4567");
        assert_eq!(redact_phone("12"), "***");
    }

    #[test]
    fn query_params_are_appended_and_encoded() {
        assert_eq!(
            append_query_params("https://a.example.com/start", &[("t", "x y"), ("med", "semaglutide")]),
            "https://a.example.com/start?t=x%20y&med=semaglutide"
        );
        assert_eq!(
            append_query_params("https://a.example.com/start?ref=1", &[("t", "abc")]),
            "https://a.example.com/start?ref=1&t=abc"
        );
    }
}
