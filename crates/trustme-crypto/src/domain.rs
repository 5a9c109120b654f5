//! Autofill domain matching on the plaintext website URL.
//!
//! Matching happens before decryption so only the records for the current
//! page are ever opened.

use url::Url;

use crate::record::CredentialRecord;

/// Lowercased host without a leading `www.`. Bare hosts like `example.com`
/// are read as `https://example.com`.
fn normalized_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) if !raw.contains("://") => Url::parse(&format!("https://{raw}")).ok()?,
        Err(_) => return None,
    };
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Whether a stored website URL belongs to the page being filled.
/// Unparseable URLs never match.
pub fn matches_domain(website_url: &str, page_url: &str) -> bool {
    match (normalized_host(website_url), normalized_host(page_url)) {
        (Some(stored), Some(page)) => stored == page,
        _ => false,
    }
}

/// Records whose website matches `page_url`, in input order.
pub fn filter_for_domain<'a>(records: &'a [CredentialRecord], page_url: &str) -> Vec<&'a CredentialRecord> {
    let Some(page) = normalized_host(page_url) else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|r| normalized_host(&r.website_url).as_deref() == Some(page.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EncryptedField;

    fn record(id: u64, url: &str) -> CredentialRecord {
        CredentialRecord {
            id,
            website_url: url.to_string(),
            username: EncryptedField::default(),
            password: EncryptedField::default(),
            notes: None,
        }
    }

    #[test]
    fn test_same_host_matches() {
        assert!(matches_domain("https://github.com/login", "https://github.com/settings"));
        assert!(matches_domain("https://GitHub.com", "http://github.com:8080/x"));
    }

    #[test]
    fn test_www_prefix_ignored() {
        assert!(matches_domain("https://www.example.com", "https://example.com/a"));
    }

    #[test]
    fn test_bare_host_accepted() {
        assert!(matches_domain("example.com", "https://example.com/login"));
    }

    #[test]
    fn test_different_hosts_do_not_match() {
        assert!(!matches_domain("https://example.com", "https://example.com.evil.io"));
        assert!(!matches_domain("https://mail.example.com", "https://example.com"));
    }

    #[test]
    fn test_unparseable_never_matches() {
        assert!(!matches_domain("", "https://example.com"));
        assert!(!matches_domain("https://example.com", "not a url at all"));
        assert!(!matches_domain("http://", "http://"));
    }

    #[test]
    fn test_filter_for_domain() {
        let records = vec![
            record(1, "https://github.com"),
            record(2, "https://gitlab.com"),
            record(3, "www.github.com/login"),
        ];
        let ids: Vec<u64> = filter_for_domain(&records, "https://github.com/pulls")
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(filter_for_domain(&records, "chrome://newtab").is_empty());
    }
}
