//! HTML parsing for the DGII lookup page.
//!
//! Two pages matter: the initial form (hidden ASP.NET state fields) and the
//! postback result, which carries either an informational banner or the
//! taxpayer data table.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::{ClassifiedError, ErrorKind, ProfileField, TaxpayerProfile};
use crate::normalize::{fold_text, normalize_label};

/// Banner element the page uses for every non-data response.
pub const INFO_SPAN_ID: &str = "cphMain_lblInformacion";

/// Folded fragment of the "no se encuentra inscrito como Contribuyente" banner.
pub const NOT_REGISTERED_PHRASE: &str = "no se encuentra inscrito";

static HIDDEN_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[type="hidden"]"#).expect("static selector"));
static INFO_SPAN: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(&format!("span#{}", INFO_SPAN_ID)).expect("static selector")
});
static TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("static selector"));
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("static selector"));
static DATA_TABLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)dvDatosContribuyentes").expect("static regex"));

/// Canonical mapping from folded page labels to profile fields.
static LABELS: LazyLock<HashMap<&'static str, ProfileField>> = LazyLock::new(|| {
    HashMap::from([
        ("cedula_rnc", ProfileField::Identifier),
        ("rnc_cedula", ProfileField::Identifier),
        ("rnc", ProfileField::Identifier),
        ("cedula", ProfileField::Identifier),
        ("nombre_razon_social", ProfileField::LegalName),
        ("razon_social", ProfileField::LegalName),
        ("nombre", ProfileField::LegalName),
        ("nombre_comercial", ProfileField::TradeName),
        ("categoria", ProfileField::Category),
        ("regimen_de_pagos", ProfileField::PaymentRegime),
        ("regimen_de_pago", ProfileField::PaymentRegime),
        ("regimen", ProfileField::PaymentRegime),
        ("estado", ProfileField::Status),
        ("actividad_economica", ProfileField::EconomicActivity),
        ("administracion_local", ProfileField::LocalAdministration),
        ("facturador_electronico", ProfileField::ElectronicInvoicing),
        ("licencias_de_comercializacion_de_vhm", ProfileField::VhmLicense),
        ("licencias_de_comercializacion", ProfileField::VhmLicense),
    ])
});

/// Fields read from a successful result page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFields {
    /// Recognized fields in page order.
    pub fields: Vec<(ProfileField, String)>,
    /// Folded labels that have no profile field; their values were dropped.
    pub unrecognized: Vec<String>,
}

impl ParsedFields {
    pub fn into_profile(self, queried_identifier: &str) -> TaxpayerProfile {
        TaxpayerProfile::from_fields(self.fields, queried_identifier, false)
    }
}

/// Maps a folded label (see [`normalize_label`]) to its profile field.
pub fn field_for_label(key: &str) -> Option<ProfileField> {
    LABELS.get(key).copied()
}

/// Collects every named hidden input of the form page.
pub fn extract_hidden_inputs(html: &str) -> HashMap<String, String> {
    let document = Html::parse_document(html);
    document
        .select(&HIDDEN_INPUT)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            if name.is_empty() {
                return None;
            }
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Classifies a banner message after folding accents and case.
pub fn classify_message(message: &str) -> ClassifiedError {
    let folded = collapse_ws(&fold_text(message));
    if folded.contains(NOT_REGISTERED_PHRASE) {
        ClassifiedError::new(ErrorKind::NotRegistered, folded)
    } else {
        ClassifiedError::new(ErrorKind::UpstreamTransient, folded)
    }
}

/// Parses a postback result page.
///
/// A non-empty informational banner always wins over table content. A data
/// table without any row whose label maps to a profile field is reported as
/// [`ErrorKind::EmptyResponse`].
pub fn parse_result_page(html: &str) -> Result<ParsedFields, ClassifiedError> {
    let document = Html::parse_document(html);

    if let Some(span) = document.select(&INFO_SPAN).next() {
        let message = element_text(span);
        if !message.is_empty() {
            return Err(classify_message(&message));
        }
    }

    let Some(table) = document.select(&TABLE).find(|t| {
        t.value()
            .attr("id")
            .is_some_and(|id| DATA_TABLE_ID.is_match(id))
    }) else {
        return Err(ClassifiedError::new(
            ErrorKind::EmptyResponse,
            "result page has neither a message nor a taxpayer table",
        ));
    };

    let mut parsed = ParsedFields::default();
    let mut pairs = 0usize;

    for row in table.select(&ROW) {
        let cells: Vec<ElementRef> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|cell| cell.value().name() == "td")
            .collect();
        if cells.len() != 2 {
            continue;
        }
        pairs += 1;

        let key = normalize_label(&element_text(cells[0]));
        let value = element_text(cells[1]);
        match field_for_label(&key) {
            Some(field) => parsed.fields.push((field, value)),
            None => {
                tracing::warn!("Unrecognized DGII field label '{}' dropped", key);
                parsed.unrecognized.push(key);
            }
        }
    }

    if pairs == 0 {
        return Err(ClassifiedError::new(
            ErrorKind::EmptyResponse,
            "taxpayer table has no data rows",
        ));
    }
    if parsed.fields.is_empty() {
        return Err(ClassifiedError::new(
            ErrorKind::EmptyResponse,
            format!(
                "taxpayer table has {} rows but no known labels ({})",
                pairs,
                parsed.unrecognized.join(", ")
            ),
        ));
    }

    Ok(parsed)
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_ws(&element.text().collect::<String>())
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
