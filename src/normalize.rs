// 🧹 Address Normalizer - Free text → canonical tokens
//
// "123 Main St., Ste #200" and "123 MAIN STREET SUITE 200" must end up the
// same string before they are compared, otherwise the scorer measures
// formatting instead of location.
//
// Every function here is total: garbage in, empty string out. Applying a
// normalizer to its own output returns the same output.

use crate::model::Address;
use serde::{Deserialize, Serialize};

// ============================================================================
// NORMALIZED ADDRESS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub street: String,
    pub suite: Option<String>,
    pub city: String,
    pub jurisdiction: String,
    pub postal: String,
}

impl NormalizedAddress {
    pub fn has_street(&self) -> bool {
        !self.street.is_empty()
    }
}

/// Normalize every field of an address.
///
/// An explicit suite field wins over a unit designator found inside the
/// street line.
pub fn normalize_address(address: &Address) -> NormalizedAddress {
    let (street, inline_suite) = split_street(address.address.as_deref().unwrap_or(""));
    let explicit_suite = address.suite.as_deref().and_then(normalize_suite);

    NormalizedAddress {
        street,
        suite: explicit_suite.or(inline_suite),
        city: normalize_city(address.city.as_deref().unwrap_or("")),
        jurisdiction: normalize_jurisdiction(address.state.as_deref().unwrap_or("")),
        postal: normalize_postal(address.zip.as_deref().unwrap_or("")),
    }
}

/// Normalize a street line, discarding any unit designator
pub fn normalize_street(line: &str) -> String {
    split_street(line).0
}

/// Normalize a street line into (street, suite)
///
/// Example:
/// - "123 Main St., Ste #200" → ("123 main street", Some("200"))
/// - "400 N. Ocean Blvd"      → ("400 north ocean boulevard", None)
pub fn split_street(line: &str) -> (String, Option<String>) {
    let tokens = tokenize(line, true);

    let mut words: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut suite: Option<String> = None;
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i].as_str();

        // "#200"
        if token.len() > 1 && token.starts_with('#') {
            if suite.is_none() {
                suite = normalize_suite(&token[1..]);
            }
            i += 1;
            continue;
        }

        // "suite 200", "apt b", "# 200"
        if is_unit_marker(token) && i + 1 < tokens.len() {
            let value = tokens[i + 1].trim_start_matches('#');
            if !value.is_empty() && !is_unit_marker(value) {
                if suite.is_none() {
                    suite = normalize_suite(value);
                }
                i += 2;
                continue;
            }
        }

        if token != "#" {
            words.push(expand_street_token(token));
        }
        i += 1;
    }

    (words.join(" "), suite)
}

/// Normalize a suite / unit value: "Ste. 200" → "200", "#4B" → "4b"
pub fn normalize_suite(value: &str) -> Option<String> {
    let tokens: Vec<String> = tokenize(value, false)
        .into_iter()
        .filter(|t| !is_unit_marker(t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

pub fn normalize_city(city: &str) -> String {
    tokenize(city, false).join(" ")
}

/// Map a jurisdiction name or code to a lower-cased two letter code.
/// Unrecognized input yields an empty string.
pub fn normalize_jurisdiction(value: &str) -> String {
    let cleaned = tokenize(value, false).join(" ");

    if cleaned.len() == 2 && cleaned.chars().all(|c| c.is_ascii_alphabetic()) {
        return cleaned;
    }

    JURISDICTIONS
        .iter()
        .find(|(name, _)| *name == cleaned)
        .map(|(_, code)| code.to_string())
        .unwrap_or_default()
}

/// First five digits of a postal code: "32801-1234" → "32801"
pub fn normalize_postal(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).take(5).collect()
}

// ============================================================================
// HELPERS
// ============================================================================

/// Lower-case, drop apostrophes and periods, split on everything else.
/// `#` survives as its own marker when `keep_hash` is set.
fn tokenize(text: &str, keep_hash: bool) -> Vec<String> {
    let mut cleaned = String::with_capacity(text.len() + 4);

    for c in text.chars() {
        match c {
            '\'' | '’' | '.' => {}
            '#' if keep_hash => {
                cleaned.push(' ');
                cleaned.push('#');
            }
            c if c.is_alphanumeric() => cleaned.extend(c.to_lowercase()),
            _ => cleaned.push(' '),
        }
    }

    // "# 200" and "#200" both become "#200"
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_hash = false;
    for word in cleaned.split_whitespace() {
        if word == "#" {
            if pending_hash {
                continue;
            }
            pending_hash = true;
            continue;
        }
        if pending_hash {
            tokens.push(format!("#{}", word.trim_start_matches('#')));
            pending_hash = false;
        } else {
            tokens.push(word.to_string());
        }
    }
    if pending_hash {
        tokens.push("#".to_string());
    }

    tokens
}

fn is_unit_marker(token: &str) -> bool {
    matches!(
        token,
        "suite" | "ste" | "unit" | "apt" | "apartment" | "room" | "rm" | "#"
    )
}

fn expand_street_token(token: &str) -> &str {
    match token {
        // Street types
        "st" | "str" => "street",
        "ave" | "av" | "avn" => "avenue",
        "blvd" | "boul" => "boulevard",
        "rd" => "road",
        "dr" | "drv" => "drive",
        "ln" => "lane",
        "ct" => "court",
        "pl" => "place",
        "pkwy" | "pky" => "parkway",
        "hwy" => "highway",
        "cir" => "circle",
        "ter" | "terr" => "terrace",
        "trl" => "trail",
        "sq" => "square",
        "fwy" => "freeway",
        "expy" => "expressway",
        "plz" => "plaza",
        "ctr" => "center",
        "tpke" => "turnpike",
        "aly" => "alley",
        "cswy" => "causeway",
        "xing" => "crossing",
        "hts" => "heights",
        // Directionals
        "n" => "north",
        "s" => "south",
        "e" => "east",
        "w" => "west",
        "ne" => "northeast",
        "nw" => "northwest",
        "se" => "southeast",
        "sw" => "southwest",
        // Misc
        "bldg" => "building",
        "fl" | "flr" => "floor",
        other => other,
    }
}

const JURISDICTIONS: &[(&str, &str)] = &[
    ("alabama", "al"),
    ("alaska", "ak"),
    ("arizona", "az"),
    ("arkansas", "ar"),
    ("california", "ca"),
    ("colorado", "co"),
    ("connecticut", "ct"),
    ("delaware", "de"),
    ("district of columbia", "dc"),
    ("washington dc", "dc"),
    ("florida", "fl"),
    ("georgia", "ga"),
    ("hawaii", "hi"),
    ("idaho", "id"),
    ("illinois", "il"),
    ("indiana", "in"),
    ("iowa", "ia"),
    ("kansas", "ks"),
    ("kentucky", "ky"),
    ("louisiana", "la"),
    ("maine", "me"),
    ("maryland", "md"),
    ("massachusetts", "ma"),
    ("michigan", "mi"),
    ("minnesota", "mn"),
    ("mississippi", "ms"),
    ("missouri", "mo"),
    ("montana", "mt"),
    ("nebraska", "ne"),
    ("nevada", "nv"),
    ("new hampshire", "nh"),
    ("new jersey", "nj"),
    ("new mexico", "nm"),
    ("new york", "ny"),
    ("north carolina", "nc"),
    ("north dakota", "nd"),
    ("ohio", "oh"),
    ("oklahoma", "ok"),
    ("oregon", "or"),
    ("pennsylvania", "pa"),
    ("rhode island", "ri"),
    ("south carolina", "sc"),
    ("south dakota", "sd"),
    ("tennessee", "tn"),
    ("texas", "tx"),
    ("utah", "ut"),
    ("vermont", "vt"),
    ("virginia", "va"),
    ("washington", "wa"),
    ("west virginia", "wv"),
    ("wisconsin", "wi"),
    ("wyoming", "wy"),
    ("puerto rico", "pr"),
    ("guam", "gu"),
    ("us virgin islands", "vi"),
    ("virgin islands", "vi"),
    ("american samoa", "as"),
    ("northern mariana islands", "mp"),
];

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_street_abbreviations_expand() {
        assert_eq!(normalize_street("123 Main St"), "123 main street");
        assert_eq!(normalize_street("123 MAIN STREET"), "123 main street");
        assert_eq!(normalize_street("400 N. Ocean Blvd."), "400 north ocean boulevard");
        assert_eq!(normalize_street("9 SW 8th Ave"), "9 southwest 8th avenue");
    }

    #[test]
    fn test_punctuation_and_whitespace_collapse() {
        assert_eq!(normalize_street("  12,  O'Hara   Rd. "), "12 ohara road");
        assert_eq!(normalize_street("1-A Elm  Ln"), "1 a elm lane");
    }

    #[test]
    fn test_suite_lifted_out_of_street() {
        assert_eq!(
            split_street("123 Main St., Ste #200"),
            ("123 main street".to_string(), Some("200".to_string()))
        );
        assert_eq!(
            split_street("123 Main St Suite 200"),
            ("123 main street".to_string(), Some("200".to_string()))
        );
        assert_eq!(
            split_street("50 Park Pl #4B"),
            ("50 park place".to_string(), Some("4b".to_string()))
        );
        assert_eq!(
            split_street("50 Park Pl Apt. 7"),
            ("50 park place".to_string(), Some("7".to_string()))
        );
    }

    #[test]
    fn test_explicit_suite_wins() {
        let address = Address::new("123 Main St #9", "Orlando", "FL", "32801").with_suite("Suite 200");
        let normalized = normalize_address(&address);
        assert_eq!(normalized.street, "123 main street");
        assert_eq!(normalized.suite.as_deref(), Some("200"));
    }

    #[test]
    fn test_jurisdiction_names_map_to_codes() {
        assert_eq!(normalize_jurisdiction("FL"), "fl");
        assert_eq!(normalize_jurisdiction("Florida"), "fl");
        assert_eq!(normalize_jurisdiction(" new  york "), "ny");
        assert_eq!(normalize_jurisdiction("District of Columbia"), "dc");
        assert_eq!(normalize_jurisdiction("Atlantis"), "");
    }

    #[test]
    fn test_postal_truncated_to_five_digits() {
        assert_eq!(normalize_postal("32801-1234"), "32801");
        assert_eq!(normalize_postal("328011234"), "32801");
        assert_eq!(normalize_postal(" 0210 "), "0210");
        assert_eq!(normalize_postal("n/a"), "");
    }

    #[test]
    fn test_absent_input_yields_empty() {
        let normalized = normalize_address(&Address::default());
        assert_eq!(normalized, NormalizedAddress::default());
        assert_eq!(normalize_street("...,,,"), "");
        assert_eq!(normalize_street("#"), "");
        assert_eq!(normalize_city(""), "");
    }

    #[test]
    fn test_normalizer_is_idempotent() {
        let samples = [
            "123 Main St., Ste #200",
            "400 N. Ocean Blvd.",
            "Suite",
            "# # 5",
            "1 Apt Apt 3",
            "  PO Box 12 ",
            "12 St James Pl Rm 4",
            "ÅLESUND Vei 3",
        ];

        for sample in samples {
            let once = normalize_street(sample);
            assert_eq!(normalize_street(&once), once, "street: {}", sample);

            let city = normalize_city(sample);
            assert_eq!(normalize_city(&city), city, "city: {}", sample);

            let postal = normalize_postal(sample);
            assert_eq!(normalize_postal(&postal), postal, "postal: {}", sample);
        }

        for state in ["Florida", "fl", "New Mexico", "nowhere", ""] {
            let once = normalize_jurisdiction(state);
            assert_eq!(normalize_jurisdiction(&once), once);
        }
    }
}
