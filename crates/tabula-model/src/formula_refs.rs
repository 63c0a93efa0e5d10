//! Field-reference extraction for formula expressions.
//!
//! Formulas refer to other fields with `{fieldId}` tokens. This module only finds those tokens;
//! it does not parse or evaluate the rest of the expression language. Braces inside string
//! literals (`"..."` or `'...'`, with `\` escapes) are literal text, not references.

use crate::FieldId;
use smallvec::SmallVec;

/// Returns the field ids referenced by `expression`, in first-occurrence order, without
/// duplicates.
///
/// Unterminated tokens (`{abc` with no closing brace) and empty tokens (`{}`) are ignored.
#[must_use]
pub fn extract_field_references(expression: &str) -> SmallVec<[FieldId; 4]> {
    let mut out: SmallVec<[FieldId; 4]> = SmallVec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' | '\'' => {
                let quote = ch;
                while let Some((_, c)) = chars.next() {
                    if c == '\\' {
                        chars.next();
                    } else if c == quote {
                        break;
                    }
                }
            }
            '{' => {
                let start = idx + ch.len_utf8();
                let mut end = None;
                while let Some(&(j, c)) = chars.peek() {
                    if c == '}' {
                        end = Some(j);
                        chars.next();
                        break;
                    }
                    if c == '{' || c == '"' || c == '\'' {
                        break;
                    }
                    chars.next();
                }
                let Some(end) = end else {
                    continue;
                };
                let token = expression[start..end].trim();
                if token.is_empty() {
                    continue;
                }
                if !out.iter().any(|existing| existing.as_str() == token) {
                    out.push(FieldId::new(token));
                }
            }
            _ => {}
        }
    }

    out
}
