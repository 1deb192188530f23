/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;
use rnc_lookup_api::models::ErrorKind;
use rnc_lookup_api::normalize::{fold_text, normalize_label, sanitize_identifier};
use rnc_lookup_api::parser::{classify_message, parse_result_page};

// Property: identifier sanitizing keeps exactly the ASCII digits
proptest! {
    #[test]
    fn sanitized_identifier_is_only_digits(raw in "\\PC*") {
        let id = sanitize_identifier(&raw);
        prop_assert!(id.chars().all(|c| c.is_ascii_digit()));
        prop_assert_eq!(id.len(), raw.chars().filter(|c| c.is_ascii_digit()).count());
    }

    #[test]
    fn sanitizing_is_idempotent(raw in "\\PC*") {
        let once = sanitize_identifier(&raw);
        prop_assert_eq!(sanitize_identifier(&once), once);
    }

    #[test]
    fn formatted_rnc_keeps_its_digits(a in "[0-9]{3}", b in "[0-9]{5}", c in "[0-9]{1}") {
        let formatted = format!(" {}-{}-{} ", a, b, c);
        prop_assert_eq!(sanitize_identifier(&formatted), format!("{}{}{}", a, b, c));
    }
}

// Property: accent folding on Spanish text
proptest! {
    #[test]
    fn folded_spanish_text_is_lowercase_ascii(text in "[a-zA-ZáéíóúüñÁÉÍÓÚÜÑ ]{0,40}") {
        let folded = fold_text(&text);
        prop_assert!(folded.is_ascii());
        prop_assert!(!folded.chars().any(|c| c.is_ascii_uppercase()));
        prop_assert_eq!(folded.chars().count(), text.chars().count());
    }

    #[test]
    fn folding_is_idempotent_on_spanish_text(text in "[a-zA-ZáéíóúüñÁÉÍÓÚÜÑ ]{0,40}") {
        let once = fold_text(&text);
        prop_assert_eq!(fold_text(&once), once);
    }
}

// Property: label keys are underscore-separated words
proptest! {
    #[test]
    fn label_keys_have_no_stray_underscores(label in "[a-zA-ZáéíóúñÑ :/\\t]{0,40}") {
        let key = normalize_label(&label);
        prop_assert!(!key.starts_with('_'));
        prop_assert!(!key.ends_with('_'));
        prop_assert!(!key.contains("__"));
        prop_assert!(!key.contains(':') && !key.contains('/') && !key.contains(' '));
    }

    #[test]
    fn label_normalization_never_panics(label in "\\PC*") {
        let _ = normalize_label(&label);
    }
}

// Property: parsing arbitrary pages never panics
proptest! {
    #[test]
    fn result_page_parsing_never_panics(html in "\\PC*") {
        let _ = parse_result_page(&html);
    }

    #[test]
    fn banner_with_not_registered_phrase_is_negative(
        prefix in "[a-zA-Z ]{0,20}",
        suffix in "[a-zA-Z ]{0,20}"
    ) {
        let message = format!("{} NO SE ENCUENTRA INSCRITO {}", prefix, suffix);
        prop_assert_eq!(classify_message(&message).kind, ErrorKind::NotRegistered);
    }
}
