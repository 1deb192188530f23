//! Decoding and row mapping for the DGII taxpayer registry text file.
//!
//! The published file has no schema version and has shipped with different
//! encodings and separators over time, so both are detected:
//!
//! 1. strict UTF-8 (a leading BOM is dropped);
//! 2. otherwise Windows-1252, which maps every byte and never fails.
//!
//! Columns are positional (see [`columns`]).

use csv::StringRecord;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::borrow::Cow;

use crate::models::{ProfileField, TaxpayerProfile};
use crate::normalize::sanitize_identifier;

/// Positions in the registry layout.
pub mod columns {
    pub const IDENTIFIER: usize = 0;
    pub const LEGAL_NAME: usize = 1;
    pub const ECONOMIC_ACTIVITY: usize = 2;
    pub const STATUS: usize = 4;
    pub const PAYMENT_REGIME: usize = 5;
}

/// Rows with fewer columns carry no usable name and are skipped.
pub const MIN_COLUMNS: usize = 2;

const DELIMITER_CANDIDATES: [u8; 4] = [b'|', b',', b';', b'\t'];
const SAMPLE_LINES: usize = 20;

#[derive(Debug)]
pub struct DecodedText<'a> {
    pub text: Cow<'a, str>,
    pub encoding: &'static Encoding,
    /// True when the fallback decoder was used.
    pub lossy: bool,
}

/// Stage 1: UTF-8 without replacement.
pub fn decode_strict(bytes: &[u8]) -> Option<Cow<'_, str>> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    UTF_8.decode_without_bom_handling_and_without_replacement(body)
}

/// Stage 2: Windows-1252. Total over all byte sequences.
pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text
}

pub fn decode_registry(bytes: &[u8]) -> DecodedText<'_> {
    match decode_strict(bytes) {
        Some(text) => DecodedText {
            text,
            encoding: UTF_8,
            lossy: false,
        },
        None => {
            tracing::info!("Registry file is not valid UTF-8, decoding as windows-1252");
            DecodedText {
                text: decode_lossy(bytes),
                encoding: WINDOWS_1252,
                lossy: true,
            }
        }
    }
}

/// Picks the separator that appears on every sampled line with the most
/// consistent count. Falls back to `,`.
pub fn detect_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect();
    if sample.is_empty() {
        return b',';
    }

    DELIMITER_CANDIDATES
        .iter()
        .filter_map(|&candidate| {
            let counts: Vec<usize> = sample
                .iter()
                .map(|line| line.bytes().filter(|&b| b == candidate).count())
                .collect();
            let min = *counts.iter().min()?;
            let max = *counts.iter().max()?;
            if min == 0 {
                return None;
            }
            // Consistent counts first, then the richer split
            Some(((min == max), min, candidate))
        })
        .max_by_key(|&(consistent, min, _)| (consistent, min))
        .map(|(_, _, candidate)| candidate)
        .unwrap_or(b',')
}

/// A header row has a non-empty first field without any digit.
pub fn looks_like_header(record: &StringRecord) -> bool {
    record
        .get(columns::IDENTIFIER)
        .map(str::trim)
        .is_some_and(|first| !first.is_empty() && !first.chars().any(|c| c.is_ascii_digit()))
}

/// Maps one registry row to a cache-sourced profile. `None` means skip.
pub fn map_row(record: &StringRecord) -> Option<TaxpayerProfile> {
    if record.len() < MIN_COLUMNS {
        return None;
    }
    let identifier = sanitize_identifier(record.get(columns::IDENTIFIER)?);
    if identifier.is_empty() {
        return None;
    }

    let column = |i: usize| record.get(i).map(str::trim).unwrap_or("").to_string();
    let fields = [
        (ProfileField::Identifier, identifier.clone()),
        (ProfileField::LegalName, column(columns::LEGAL_NAME)),
        (ProfileField::EconomicActivity, column(columns::ECONOMIC_ACTIVITY)),
        (ProfileField::Status, column(columns::STATUS)),
        (ProfileField::PaymentRegime, column(columns::PAYMENT_REGIME)),
    ];
    Some(TaxpayerProfile::from_fields(fields, &identifier, true))
}

/// Iterates the data rows of a decoded registry, skipping a detected header.
/// Unreadable or short rows come out as `None`.
pub fn registry_rows(text: &str, delimiter: u8) -> impl Iterator<Item = Option<TaxpayerProfile>> + '_ {
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.into_records().peekable();
    if matches!(records.peek(), Some(Ok(first)) if looks_like_header(first)) {
        records.next();
    }

    records.map(|record| match record {
        Ok(record) => map_row(&record),
        Err(e) => {
            tracing::debug!("Unreadable registry row skipped: {}", e);
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_stage_accepts_utf8_and_drops_bom() {
        let text = decode_strict("RNC|NOMBRE\n101|JOSÉ".as_bytes()).unwrap();
        assert!(text.contains("JOSÉ"));

        let with_bom = [b"\xEF\xBB\xBF".as_slice(), b"101|A".as_slice()].concat();
        assert_eq!(decode_strict(&with_bom).unwrap(), "101|A");
    }

    #[test]
    fn strict_stage_rejects_latin1() {
        // "JOSÉ" in windows-1252
        assert!(decode_strict(b"101|JOS\xC9").is_none());
    }

    #[test]
    fn lossy_stage_decodes_windows_1252() {
        assert_eq!(decode_lossy(b"101|JOS\xC9"), "101|JOSÉ");
        let decoded = decode_registry(b"101|JOS\xC9");
        assert!(decoded.lossy);
        assert_eq!(decoded.encoding, WINDOWS_1252);
    }

    #[test]
    fn delimiter_detection() {
        assert_eq!(detect_delimiter("101|ACME|X\n102|BETA|Y\n"), b'|');
        assert_eq!(detect_delimiter("101,ACME,X\n102,BETA,Y\n"), b',');
        assert_eq!(detect_delimiter("101\tACME\n102\tBETA\n"), b'\t');
        // Commas inside names are inconsistent; pipes are not
        assert_eq!(detect_delimiter("101|ACME, SRL|X\n102|BETA|Y\n"), b'|');
        assert_eq!(detect_delimiter(""), b',');
        assert_eq!(detect_delimiter("nothing to split"), b',');
    }

    #[test]
    fn header_detection() {
        assert!(looks_like_header(&StringRecord::from(vec!["RNC", "NOMBRE"])));
        assert!(!looks_like_header(&StringRecord::from(vec!["101-00001-2", "ACME"])));
        assert!(!looks_like_header(&StringRecord::from(vec!["", "ACME"])));
    }

    #[test]
    fn row_mapping_uses_fixed_positions() {
        let record = StringRecord::from(vec![
            "101-00001-2",
            " ACME SRL ",
            "VENTA AL POR MAYOR",
            "01/01/2000",
            "ACTIVO",
            "NORMAL",
        ]);
        let profile = map_row(&record).unwrap();
        assert_eq!(profile.identifier, "101000012");
        assert_eq!(profile.queried_identifier, "101000012");
        assert_eq!(profile.legal_name, "ACME SRL");
        assert_eq!(profile.economic_activity, "VENTA AL POR MAYOR");
        assert_eq!(profile.status, "ACTIVO");
        assert_eq!(profile.payment_regime, "NORMAL");
        assert_eq!(profile.trade_name, "");
        assert!(profile.from_cache);
    }

    #[test]
    fn short_or_blank_rows_are_skipped() {
        assert!(map_row(&StringRecord::from(vec!["101"])).is_none());
        assert!(map_row(&StringRecord::from(vec!["--", "ACME"])).is_none());
        // Missing optional columns default to empty
        let profile = map_row(&StringRecord::from(vec!["101", "ACME"])).unwrap();
        assert_eq!(profile.status, "");
    }

    #[test]
    fn rows_skip_header_and_report_short_rows() {
        let text = "RNC|NOMBRE|ACTIVIDAD|FECHA|ESTADO|REGIMEN\n\
                    101|ACME|VENTAS|x|ACTIVO|NORMAL\n\
                    102\n\
                    103|BETA|||SUSPENDIDO|\n";
        let rows: Vec<_> = registry_rows(text, b'|').collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref().unwrap().legal_name, "ACME");
        assert!(rows[1].is_none());
        assert_eq!(rows[2].as_ref().unwrap().status, "SUSPENDIDO");
    }
}
