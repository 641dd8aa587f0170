//! Turning a start command into the list of recipients for a session.

use relay_common::error::AppError;
use relay_common::types::{InputSource, StartCommand};

use crate::generator::NumberGenerator;
use crate::store::dedup_preserving_order;

/// Split free-form text on runs of whitespace, commas and semicolons.
///
/// Empty tokens are dropped; order is preserved and duplicates are kept.
pub fn parse_recipient_list(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve the recipients a start command asks for, without duplicates.
///
/// An empty result is not an error here; the controller decides what an
/// empty session means.
pub fn resolve_recipients(
    command: &StartCommand,
    generator: &NumberGenerator,
) -> Result<Vec<String>, AppError> {
    let identifiers = match command.source {
        InputSource::Random => {
            let quantity = command.quantity.ok_or_else(|| {
                AppError::Validation("quantity is required for random recipients".to_string())
            })?;
            generator.generate(quantity)?
        }
        InputSource::Paste | InputSource::File => {
            let list = command.number_list.as_deref().ok_or_else(|| {
                AppError::Validation(format!(
                    "numberList is required for {} recipients",
                    command.source
                ))
            })?;
            parse_recipient_list(list)
        }
    };

    Ok(dedup_preserving_order(identifiers))
}
