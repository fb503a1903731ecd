extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod http_error;

/// Derive macro mapping error variants to an HTTP status and a client-facing message
///
/// Annotate each variant with `#[http_error(STATUS)]` or `#[http_error(STATUS, "message")]`.
///
/// - `STATUS` is a `StatusCode` constant (`NOT_FOUND`) or a number (`404`).
/// - `"message"` is optional. Tuple fields interpolate by index (`{0}`), struct fields by
///   name (`{field}`). Without a message the `Display` implementation is used, so internal
///   details only leak when a variant opts in.
///
/// The derive generates `http_code()` and `http_message()` on the enum. Variants without
/// the attribute fall back to `500` and a generic message.
///
/// ```rust,ignore
/// #[derive(Debug, thiserror::Error, postbox::HttpError)]
/// enum Error {
///     #[error("campaign {0} not found")]
///     #[http_error(NOT_FOUND)]
///     CampaignNotFound(uuid::Uuid),
///
///     #[error("database error: {0}")]
///     #[http_error(INTERNAL_SERVER_ERROR, "an error occurred with the database")]
///     Sqlx(#[from] sqlx::Error),
/// }
/// ```
#[proc_macro_derive(HttpError, attributes(http_error))]
pub fn http_error_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    http_error::expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
