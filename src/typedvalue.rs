//! The typed, tagged-value representation INFO/FORMAT cells are coerced
//! into at projection time (spec §4.3), replacing the dynamic typing of the
//! source system with a statically-known-per-load variant set (spec §9).

use crate::header::VcfType;

/// One coerced scalar. `None` means "missing" — either the source token was
/// `.` or coercion failed (the two are indistinguishable once coerced; the
/// caller is responsible for counting `CoercionFailure` at the point of
/// coercion, before the distinction is lost).
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Integer(Option<i64>),
    Float(Option<f64>),
    Character(Option<char>),
    Str(Option<String>),
}

/// A projected INFO/FORMAT cell, post-decomposition.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Flag(bool),
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl TypedValue {
    pub fn missing_scalar(vcf_type: VcfType) -> Self {
        TypedValue::Scalar(missing_of(vcf_type))
    }
}

pub(crate) fn missing_of(vcf_type: VcfType) -> Scalar {
    match vcf_type {
        VcfType::Integer => Scalar::Integer(None),
        VcfType::Float => Scalar::Float(None),
        VcfType::Character => Scalar::Character(None),
        VcfType::String => Scalar::Str(None),
        VcfType::Flag => Scalar::Str(None), // unreachable for well-formed headers
    }
}

/// Coerce one raw token against `vcf_type`. `token = None` represents a
/// legitimate `.` (missing, not a failure). Returns the coerced scalar and
/// whether coercion *failed* (token present but unparsable against its
/// declared type) — the caller increments `CoercionFailure` on `true`.
pub(crate) fn coerce_token(token: Option<&[u8]>, vcf_type: VcfType) -> (Scalar, bool) {
    let Some(bytes) = token else {
        return (missing_of(vcf_type), false);
    };
    // An empty string is distinct from missing and preserved only for
    // String types (spec §4.2); for every other type it is invalid.
    let text = String::from_utf8_lossy(bytes);
    match vcf_type {
        VcfType::Integer => match text.parse::<i64>() {
            Ok(v) => (Scalar::Integer(Some(v)), false),
            Err(_) => (Scalar::Integer(None), true),
        },
        VcfType::Float => match text.parse::<f64>() {
            Ok(v) => (Scalar::Float(Some(v)), false),
            Err(_) => (Scalar::Float(None), true),
        },
        VcfType::Character => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => (Scalar::Character(Some(c)), false),
                _ => (Scalar::Character(None), true),
            }
        }
        VcfType::String => (Scalar::Str(Some(text.into_owned())), false),
        VcfType::Flag => (Scalar::Str(None), false), // handled separately by callers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_not_a_coercion_failure() {
        let (scalar, failed) = coerce_token(None, VcfType::Integer);
        assert_eq!(scalar, Scalar::Integer(None));
        assert!(!failed);
    }

    #[test]
    fn garbage_integer_token_is_a_coercion_failure() {
        let (scalar, failed) = coerce_token(Some(b"NaN"), VcfType::Integer);
        assert_eq!(scalar, Scalar::Integer(None));
        assert!(failed);
    }

    #[test]
    fn float_list_element_with_embedded_comma_fails() {
        // The well-known buggy-upstream case from spec scenario S5: a
        // Number=1 Float field that actually contains a comma-joined pair.
        let (scalar, failed) = coerce_token(Some(b"0.123,0.122"), VcfType::Float);
        assert_eq!(scalar, Scalar::Float(None));
        assert!(failed);
    }

    #[test]
    fn empty_string_token_preserved_for_string_type() {
        let (scalar, failed) = coerce_token(Some(b""), VcfType::String);
        assert_eq!(scalar, Scalar::Str(Some(String::new())));
        assert!(!failed);
    }

    #[test]
    fn valid_float_token_parses() {
        let (scalar, failed) = coerce_token(Some(b"0.5"), VcfType::Float);
        assert_eq!(scalar, Scalar::Float(Some(0.5)));
        assert!(!failed);
    }
}
