//! Heuristic manufacturer/model identification.
//!
//! Miners do not report their vendor in a uniform field. The classifier
//! gathers the free-form strings of a response (`STATUS` description,
//! `Type`, `Miner`, firmware banners...) and matches them against a small
//! catalog of vendor aliases and model names.

use serde_json::Value;

/// Manufacturer reported for devices that answer but match no signature.
pub const UNKNOWN_MANUFACTURER: &str = "Unknown";

/// A manufacturer and the models it ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vendor {
    pub name: &'static str,
    /// Lowercase substrings that identify the vendor's firmware.
    pub aliases: &'static [&'static str],
    pub models: &'static [&'static str],
}

/// Known vendors.
pub const CATALOG: &[Vendor] = &[
    Vendor {
        name: "Whatsminer",
        aliases: &["whatsminer", "btminer", "microbt"],
        models: &[
            "M10", "M20", "M21", "M30", "M31", "M50", "M53", "M56", "M60", "M63",
        ],
    },
    Vendor {
        name: "AntMiner",
        aliases: &["antminer", "bmminer", "bitmain"],
        models: &[
            "S9", "S9i", "S9j", "S11", "S15", "S17", "S17 Pro", "S17+", "S17e", "S19", "S19 Pro",
            "S19j", "S19j Pro", "S19k Pro", "S21", "S21 Pro", "T9", "T9+", "T15", "T17", "T17+",
            "T19", "T21", "L3+", "L7", "E9 Pro",
        ],
    },
    Vendor {
        name: "Avalon",
        aliases: &["avalon", "canaan"],
        models: &[
            "Miner 721",
            "Miner 741",
            "Miner 761",
            "Miner 821",
            "Miner 841",
            "Miner 851",
            "Miner 921",
            "Miner 1026",
            "Miner 1047",
            "Miner 1066",
            "Miner 1126 Pro",
            "Miner 1166 Pro",
            "Miner 1246",
            "Miner 1266",
        ],
    },
    Vendor {
        name: "Elhapex",
        aliases: &["elhapex"],
        models: &["E10", "E11", "E12", "E20", "E21", "E30", "E50"],
    },
];

/// Outcome of classifying a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identification {
    Known {
        manufacturer: &'static str,
        model: Option<&'static str>,
    },
    Unknown,
}

impl Identification {
    pub fn manufacturer(&self) -> &'static str {
        match self {
            Identification::Known { manufacturer, .. } => manufacturer,
            Identification::Unknown => UNKNOWN_MANUFACTURER,
        }
    }

    pub fn model(&self) -> Option<&'static str> {
        match self {
            Identification::Known { model, .. } => *model,
            Identification::Unknown => None,
        }
    }
}

/// Classify a response by its metadata strings.
pub fn identify(payload: &Value) -> Identification {
    let texts: Vec<String> = metadata_strings(payload)
        .into_iter()
        .map(|s| s.to_ascii_lowercase())
        .collect();

    for vendor in CATALOG {
        let mentioned = texts
            .iter()
            .any(|t| vendor.aliases.iter().any(|a| t.contains(a)));
        if !mentioned {
            continue;
        }
        return Identification::Known {
            manufacturer: vendor.name,
            model: match_model(vendor, &texts),
        };
    }

    Identification::Unknown
}

/// Collect string values from the top two levels of a response, looking
/// through arrays.
pub fn metadata_strings(payload: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    collect_strings(payload, 0, &mut out);
    out
}

fn collect_strings<'a>(value: &'a Value, depth: usize, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, depth, out);
            }
        }
        Value::Object(object) if depth < 2 => {
            for v in object.values() {
                collect_strings(v, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// Longest catalogued model mentioned in any of `texts`.
fn match_model(vendor: &Vendor, texts: &[String]) -> Option<&'static str> {
    let mut models: Vec<&'static str> = vendor.models.to_vec();
    models.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    models.into_iter().find(|model| {
        let needle = model.to_ascii_lowercase();
        texts.iter().any(|t| mentions_model(t, &needle, vendor.aliases))
    })
}

/// `needle` occurs in `text` as a standalone token, or glued to a vendor
/// alias (`avalonminer 1246`), and is not followed by another digit.
fn mentions_model(text: &str, needle: &str, aliases: &[&str]) -> bool {
    let bytes = text.as_bytes();
    text.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = start == 0
            || !bytes[start - 1].is_ascii_alphanumeric()
            || aliases.iter().any(|a| text[..start].ends_with(a));
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_digit();
        before_ok && after_ok
    })
}
