use regex::Regex;

/// Condense a `User-Agent` header into a short "OS browser" descriptor for
/// the verification record and the audit trail, e.g. `Windows Chrome 126`.
#[must_use]
pub fn describe(user_agent: Option<&str>) -> String {
    let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) else {
        return "unknown".to_string();
    };

    format!("{} {}", os_name(ua), browser_name(ua))
}

fn os_name(ua: &str) -> &'static str {
    // iPhone/iPad/Android carry "like Mac OS X" or "Linux", so they go first.
    if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Other"
    }
}

fn browser_name(ua: &str) -> String {
    // Order matters: Edge and Opera also announce Chrome, Chrome announces
    // Safari.
    let products = [
        ("Edg", "Edge"),
        ("OPR", "Opera"),
        ("Firefox", "Firefox"),
        ("Chrome", "Chrome"),
        ("Version", "Safari"),
    ];

    for (token, name) in products {
        if let Some(version) = product_version(ua, token) {
            return format!("{name} {version}");
        }
    }

    "unknown browser".to_string()
}

fn product_version(ua: &str, token: &str) -> Option<String> {
    let pattern = format!(r"{token}/(\d+)");
    Regex::new(&pattern)
        .ok()?
        .captures(ua)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
