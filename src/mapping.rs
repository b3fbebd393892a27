//! Column mapping: validation and header auto-selection.

use crate::error::ControllerError;
use crate::model::{ColumnField, ColumnMapping, ColumnOverrides};
use std::collections::HashSet;

/// Header patterns per field, most specific first.
fn patterns(field: ColumnField) -> &'static [&'static str] {
    match field {
        ColumnField::Address => &["street address", "address", "street", "addr"],
        ColumnField::City => &["city", "town"],
        ColumnField::State => &["state", "province", "st"],
        ColumnField::Zip => &[
            "zip",
            "zipcode",
            "zip code",
            "postal code",
            "postal",
            "postcode",
        ],
    }
}

/// Require all four bindings to be non-empty.
pub fn validate(mapping: &ColumnMapping) -> Result<(), ControllerError> {
    let missing: Vec<ColumnField> = ColumnField::ALL
        .into_iter()
        .filter(|f| mapping.get(*f).trim().is_empty())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ControllerError::IncompleteMapping { missing })
    }
}

/// Require every binding to name an uploaded header, each header used once.
pub fn check_headers(mapping: &ColumnMapping, headers: &[String]) -> Result<(), ControllerError> {
    let known: HashSet<&str> = headers.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    for field in ColumnField::ALL {
        let header = mapping.get(field);
        if !known.contains(header) {
            return Err(ControllerError::Validation(format!(
                "Column '{}' selected for {} is not in the uploaded file",
                header,
                field.label()
            )));
        }
        if !seen.insert(header) {
            return Err(ControllerError::Validation(format!(
                "Column '{}' is selected for more than one field",
                header
            )));
        }
    }
    Ok(())
}

/// Suggest a mapping from the uploaded headers.
///
/// Exact (case-insensitive) matches are resolved for every field before substring
/// matches, and a header is bound to at most one field. Fields without a match stay
/// empty.
pub fn auto_select(headers: &[String]) -> ColumnMapping {
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let mut mapping = ColumnMapping::default();
    let mut taken = vec![false; headers.len()];

    for field in ColumnField::ALL {
        let hit = patterns(field).iter().find_map(|p| {
            normalized
                .iter()
                .enumerate()
                .position(|(i, h)| !taken[i] && h == p)
        });
        if let Some(i) = hit {
            taken[i] = true;
            mapping.set(field, headers[i].clone());
        }
    }

    for field in ColumnField::ALL {
        if !mapping.get(field).is_empty() {
            continue;
        }
        // Two-letter patterns like "st" only make sense as exact matches.
        let hit = patterns(field).iter().filter(|p| p.len() > 2).find_map(|p| {
            normalized
                .iter()
                .enumerate()
                .position(|(i, h)| !taken[i] && h.contains(p))
        });
        if let Some(i) = hit {
            taken[i] = true;
            mapping.set(field, headers[i].clone());
        }
    }

    mapping
}

/// Overlay command-line overrides on a suggested mapping.
pub fn apply_overrides(mut mapping: ColumnMapping, overrides: &ColumnOverrides) -> ColumnMapping {
    let pairs = [
        (ColumnField::Address, &overrides.address),
        (ColumnField::City, &overrides.city),
        (ColumnField::State, &overrides.state),
        (ColumnField::Zip, &overrides.zip),
    ];
    for (field, value) in pairs {
        if let Some(v) = value {
            mapping.set(field, v.clone());
        }
    }
    mapping
}
