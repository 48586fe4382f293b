/// Verdict on a request's network origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Trusted,
    Suspicious,
}

/// First-octet prefixes of well-known hosting/VPN address blocks.
///
/// Heuristic data, not logic: callers can swap the ruleset without touching
/// the verification flow.
const HOSTING_PREFIXES: &[&str] = &[
    "3.", "13.", "15.", "18.", "34.", "35.", "44.", "52.", "54.", "64.4", "65.", "66.", "67.",
    "70.", "71.", "72.", "73.", "74.", "75.", "76.", "96.", "104.", "107.", "108.", "128.", "129.",
    "131.", "132.", "143.", "144.", "146.", "147.", "149.", "150.", "152.",
];

/// Classifies network origins against a prefix ruleset.
///
/// Pure and deterministic. An origin that cannot be determined is
/// `Suspicious`: the gate fails closed, not open.
#[derive(Debug, Clone)]
pub struct OriginClassifier {
    prefixes: Vec<String>,
}

impl Default for OriginClassifier {
    fn default() -> Self {
        Self::new(HOSTING_PREFIXES.iter().map(ToString::to_string))
    }
}

impl OriginClassifier {
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn classify(&self, origin: &str) -> Classification {
        if origin.is_empty() || origin == "unknown" {
            return Classification::Suspicious;
        }

        if self.prefixes.iter().any(|p| origin.starts_with(p.as_str())) {
            Classification::Suspicious
        } else {
            Classification::Trusted
        }
    }
}
