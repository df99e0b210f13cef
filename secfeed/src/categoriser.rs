//! Keyword classification of articles into topic slugs.
//!
//! Rules are evaluated in table order and the first hit wins, so a term shared
//! by two topics resolves to the one listed first.

pub const GENERAL: &str = "general";

/// Characters of body text considered after the title.
const CONTENT_PREFIX_CHARS: usize = 500;

pub static CATEGORY_RULES: &[(&str, &[&str])] = &[
    (
        "ai_security",
        &[
            "shadow ai",
            "llm attack",
            "ai security",
            "model poisoning",
            "prompt injection",
            "ai agent",
            "saas ai",
            "copilot security",
            "generative ai",
            "deepfake",
            "ai-generated malware",
        ],
    ),
    (
        "vulnerabilities",
        &[
            "cve-",
            "nvd",
            "patch tuesday",
            "zero-day",
            "zero day",
            "exploit",
            "vulnerability",
            "advisory",
            "cvss",
            "rce",
            "remote code",
        ],
    ),
    (
        "malware",
        &[
            "ransomware",
            "trojan",
            "botnet",
            "spyware",
            "wiper",
            "rat ",
            "dropper",
            "malware",
            "backdoor",
            "stealer",
            "rootkit",
        ],
    ),
    (
        "threat_intel",
        &[
            "apt",
            "threat actor",
            "campaign",
            "nation-state",
            "ioc",
            "ttps",
            "mitre att&ck",
            "threat intelligence",
            "threat group",
        ],
    ),
    (
        "appsec",
        &[
            "xss",
            "sql injection",
            "owasp",
            "api security",
            "web app",
            "sast",
            "dast",
            "burp",
            "penetration test",
            "csrf",
            "ssrf",
        ],
    ),
    (
        "cloud_security",
        &[
            "aws",
            "azure",
            "gcp",
            "cloud",
            "s3 bucket",
            "iam",
            "kubernetes",
            "container",
            "docker",
            "terraform",
            "misconfiguration",
        ],
    ),
    (
        "compliance",
        &[
            "gdpr",
            "hipaa",
            "pci dss",
            "iso 27001",
            "nist",
            "regulation",
            "audit",
            "compliance",
            "sox",
            "dora",
        ],
    ),
    (
        "privacy",
        &[
            "data breach",
            "privacy",
            "tracking",
            "surveillance",
            "personal data",
            "leak",
            "deanonymization",
            "biometric",
        ],
    ),
];

/// Best matching category slug for an article, or `general`.
pub fn categorise(title: &str, content: &str) -> &'static str {
    let prefix: String = content.chars().take(CONTENT_PREFIX_CHARS).collect();
    let text = format!("{title} {prefix}").to_lowercase();

    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(slug, _)| *slug)
        .unwrap_or(GENERAL)
}

/// Slugs in priority order, `general` last.
pub fn category_slugs() -> Vec<&'static str> {
    CATEGORY_RULES
        .iter()
        .map(|(slug, _)| *slug)
        .chain(std::iter::once(GENERAL))
        .collect()
}
