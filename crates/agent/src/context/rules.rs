//! Static guidance table: destination-specific hints plus always-on rules.

use regex_lite::Regex;

/// Guidance shown when the current host matches `host_pattern`.
#[derive(Debug, Clone, Copy)]
pub struct DestinationRule {
    pub host_pattern: &'static str,
    pub guidance: &'static [&'static str],
}

pub const DESTINATION_RULES: &[DestinationRule] = &[
    DestinationRule {
        host_pattern: r"^mail\.google\.com$",
        guidance: &[
            "Open a conversation by clicking its row, not the sender name.",
            "The compose button opens a dialog; fill To, Subject and body in that order.",
        ],
    },
    DestinationRule {
        host_pattern: r"(^|\.)google\.[a-z.]+$",
        guidance: &[
            "Type the query into the search box and submit it with \\n instead of clicking the search button.",
            "Sponsored results are marked; prefer organic results unless asked otherwise.",
        ],
    },
    DestinationRule {
        host_pattern: r"(^|\.)amazon\.[a-z.]+$",
        guidance: &[
            "Use the search field at the top of the page and submit with \\n.",
            "Product titles link to the product page; price and rating are separate elements.",
        ],
    },
    DestinationRule {
        host_pattern: r"(^|\.)github\.com$",
        guidance: &[
            "Repository search is behind the search button in the header; it opens an input first.",
            "File contents are rendered read-only; use the Raw button to see plain text.",
        ],
    },
    DestinationRule {
        host_pattern: r"(^|\.)youtube\.com$",
        guidance: &[
            "Video titles link to the watch page; channel names link to the channel.",
        ],
    },
    DestinationRule {
        host_pattern: r"(^|\.)wikipedia\.org$",
        guidance: &[
            "Answers are usually in the first paragraph or the infobox; respond once you have them.",
        ],
    },
];

pub const GENERAL_RULES: &[&str] = &[
    "Only use element ids that appear in the current page snapshot.",
    "Element ids change after every action; never reuse an id from an earlier step.",
    "If the page is still loading or nothing changed, use waiting(seconds) before trying again.",
    "If an action failed, try a different element or approach instead of repeating it.",
    "Use respond(message) to answer a question or to ask the user for something only they can provide.",
    "Call finish() as soon as the task is done and fail(message) if it cannot be done.",
];

/// Host part of a URL, lowercased. Empty when there is none.
pub fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or_default();
    host.to_ascii_lowercase()
}

/// Guidance lines for every rule whose pattern matches the host of `url`.
pub fn guidance_for(url: &str) -> Vec<&'static str> {
    let host = host_of(url);
    if host.is_empty() {
        return Vec::new();
    }
    DESTINATION_RULES
        .iter()
        .filter(|rule| Regex::new(rule.host_pattern).is_ok_and(|re| re.is_match(&host)))
        .flat_map(|rule| rule.guidance.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://www.Google.com/search?q=x"), "www.google.com");
        assert_eq!(host_of("http://user:pw@example.com:8080/a"), "example.com");
        assert_eq!(host_of("about:blank"), "about");
        assert_eq!(host_of(""), "");
    }

    #[test]
    fn every_pattern_compiles() {
        for rule in DESTINATION_RULES {
            assert!(Regex::new(rule.host_pattern).is_ok(), "{}", rule.host_pattern);
        }
    }

    #[test]
    fn matches_by_host_only() {
        let amazon = guidance_for("https://www.amazon.co.uk/s?k=google");
        assert!(amazon.iter().any(|g| g.contains("search field")));
        assert!(!amazon.iter().any(|g| g.contains("Sponsored")));
    }

    #[test]
    fn gmail_and_google_both_apply() {
        let lines = guidance_for("https://mail.google.com/mail/u/0/");
        assert!(lines.iter().any(|g| g.contains("compose")));
        assert!(lines.iter().any(|g| g.contains("search box")));
    }

    #[test]
    fn unknown_host_gets_nothing() {
        assert!(guidance_for("https://example.org").is_empty());
        assert!(guidance_for("not a url").is_empty());
    }
}
