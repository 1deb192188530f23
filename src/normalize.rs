//! Text normalization shared by the lookup flow, the HTML parser and the
//! registry importer.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Keeps only ASCII decimal digits, in their original order.
///
/// `"131-234567-8"` becomes `"1312345678"`. An empty result means the input
/// carried no identifier at all.
pub fn sanitize_identifier(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Strips diacritics and lowercases.
///
/// Works on any Unicode representation of an accented letter: the text is
/// decomposed (NFD) and combining marks are dropped, so both precomposed
/// `"é"` and `"e\u{301}"` fold to `"e"`. `ñ` folds to `n`.
pub fn fold_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Turns a left-hand table label into a field key.
///
/// `"Nombre/Razón Social:"` becomes `"nombre_razon_social"`. Separators
/// (`:`, `/`, whitespace) become underscores; runs of underscores collapse
/// and leading/trailing ones are trimmed.
pub fn normalize_label(label: &str) -> String {
    let folded = fold_text(label.trim());
    let mut key = String::with_capacity(folded.len());
    for c in folded.chars() {
        let c = if c == ':' || c == '/' || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' && (key.is_empty() || key.ends_with('_')) {
            continue;
        }
        key.push(c);
    }
    while key.ends_with('_') {
        key.pop();
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_digits_in_order() {
        assert_eq!(sanitize_identifier("132-01"), "13201");
        assert_eq!(sanitize_identifier("131-234567-8"), "1312345678");
        assert_eq!(sanitize_identifier(" 4 0 2 "), "402");
        assert_eq!(sanitize_identifier(""), "");
        assert_eq!(sanitize_identifier("abc"), "");
    }

    #[test]
    fn sanitize_ignores_non_ascii_digits() {
        // Arabic-Indic digit must not leak into a cache key
        assert_eq!(sanitize_identifier("1٢3"), "13");
    }

    #[test]
    fn fold_handles_precomposed_and_decomposed() {
        assert_eq!(fold_text("Razón"), "razon");
        assert_eq!(fold_text("Raz\u{6f}\u{301}n"), "razon");
        assert_eq!(fold_text("AÑO ÚNICO"), "ano unico");
    }

    #[test]
    fn label_normalization() {
        assert_eq!(normalize_label("Cédula/RNC"), "cedula_rnc");
        assert_eq!(normalize_label("RNC:"), "rnc");
        assert_eq!(normalize_label("Nombre/Razón Social:"), "nombre_razon_social");
        assert_eq!(normalize_label("  Régimen de pagos  "), "regimen_de_pagos");
        assert_eq!(
            normalize_label("Licencias de Comercialización de VHM"),
            "licencias_de_comercializacion_de_vhm"
        );
        assert_eq!(normalize_label("Estado :"), "estado");
    }
}
