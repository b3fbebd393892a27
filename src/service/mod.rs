//! Remote geocoding service access.
//!
//! The service owns CSV parsing, geocoding and result-file generation; this side only
//! speaks its five HTTP endpoints.

mod client;

pub(crate) use client::GeocoderClient;

/// Only `.csv` files are sent to the service; the check is case-insensitive.
pub(crate) fn is_accepted_file(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}
