use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Data, DeriveInput, Expr, Fields, Ident, Lit, Token, Variant};

/// What a single `#[http_error(..)]` attribute resolved to.
struct VariantAttrs {
    ident: Ident,
    shape: Shape,
    code: Option<TokenStream>,
    message: Option<String>,
}

enum Shape {
    Unit,
    Tuple(usize),
    Named(Vec<Ident>),
}

pub(crate) fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "HttpError can only be derived for enums",
        ));
    };

    let parsed = data
        .variants
        .iter()
        .map(parse_variant)
        .collect::<syn::Result<Vec<_>>>()?;

    let code_arms = parsed.iter().map(|attrs| {
        let pattern = attrs.wildcard_pattern();
        let code = attrs
            .code
            .clone()
            .unwrap_or_else(|| quote! { http::StatusCode::INTERNAL_SERVER_ERROR });
        quote! { #pattern => #code, }
    });

    let message_arms = parsed.iter().map(|attrs| {
        let pattern = attrs.binding_pattern();
        let message = attrs.message_expr();
        quote! {
            #[allow(unused_variables)]
            #pattern => #message,
        }
    });

    Ok(quote! {
        impl #name {
            pub fn http_code(&self) -> http::StatusCode {
                match self {
                    #(#code_arms)*
                }
            }

            pub fn http_message(&self) -> String {
                match self {
                    #(#message_arms)*
                }
            }
        }
    })
}

fn parse_variant(variant: &Variant) -> syn::Result<VariantAttrs> {
    let shape = match &variant.fields {
        Fields::Unit => Shape::Unit,
        Fields::Unnamed(fields) => Shape::Tuple(fields.unnamed.len()),
        Fields::Named(fields) => Shape::Named(
            fields
                .named
                .iter()
                .filter_map(|f| f.ident.clone())
                .collect(),
        ),
    };

    let mut attrs = VariantAttrs {
        ident: variant.ident.clone(),
        shape,
        code: None,
        message: None,
    };

    for attr in variant.attrs.iter().filter(|a| a.path().is_ident("http_error")) {
        let list = attr.meta.require_list()?;
        let args = Punctuated::<Expr, Token![,]>::parse_terminated.parse2(list.tokens.clone())?;

        for (i, arg) in args.into_iter().enumerate() {
            match (i, arg) {
                (0, Expr::Path(path)) => {
                    let code = &path.path;
                    attrs.code = Some(quote! { http::StatusCode::#code });
                }
                (0, Expr::Lit(expr)) => match &expr.lit {
                    Lit::Int(int) => {
                        let code = int.base10_parse::<u16>()?;
                        if !(100..=999).contains(&code) {
                            return Err(syn::Error::new_spanned(int, "invalid HTTP status code"));
                        }
                        attrs.code = Some(quote! {
                            http::StatusCode::from_u16(#code)
                                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
                        });
                    }
                    other => {
                        return Err(syn::Error::new_spanned(other, "expected a status code"))
                    }
                },
                (1, Expr::Lit(expr)) => match &expr.lit {
                    Lit::Str(s) => attrs.message = Some(s.value()),
                    other => return Err(syn::Error::new_spanned(other, "expected a string")),
                },
                (_, other) => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected `#[http_error(STATUS)]` or `#[http_error(STATUS, \"message\")]`",
                    ))
                }
            }
        }
    }

    Ok(attrs)
}

impl VariantAttrs {
    fn wildcard_pattern(&self) -> TokenStream {
        let ident = &self.ident;
        match &self.shape {
            Shape::Unit => quote! { Self::#ident },
            Shape::Tuple(_) => quote! { Self::#ident(..) },
            Shape::Named(_) => quote! { Self::#ident { .. } },
        }
    }

    fn binding_pattern(&self) -> TokenStream {
        let ident = &self.ident;
        match &self.shape {
            Shape::Unit => quote! { Self::#ident },
            Shape::Tuple(n) => {
                let fields = (0..*n).map(positional_ident);
                quote! { Self::#ident(#(#fields),*) }
            }
            Shape::Named(names) => quote! { Self::#ident { #(#names),* } },
        }
    }

    fn message_expr(&self) -> TokenStream {
        match (&self.message, &self.code) {
            (Some(msg), _) => match &self.shape {
                Shape::Unit => quote! { #msg.to_string() },
                Shape::Tuple(_) => {
                    let msg = rewrite_positional(msg);
                    quote! { format!(#msg) }
                }
                Shape::Named(_) => quote! { format!(#msg) },
            },
            (None, Some(_)) => quote! { self.to_string() },
            (None, None) => quote! { "an internal server error occurred".to_string() },
        }
    }
}

fn positional_ident(i: usize) -> Ident {
    format_ident!("__field_{}", i, span = Span::call_site())
}

/// Rewrites `{0}` / `{1:?}` into references to the bound tuple fields so the
/// message can be passed straight to `format!`.
fn rewrite_positional(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if c != '{' {
            continue;
        }
        if chars.peek() == Some(&'{') {
            out.push(chars.next().unwrap_or('{'));
            continue;
        }
        let mut index = String::new();
        while let Some(&d) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            index.push(d);
            chars.next();
        }
        if !index.is_empty() {
            out.push_str("__field_");
            out.push_str(&index);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::rewrite_positional;

    #[test]
    fn rewrites_indices_only() {
        assert_eq!(rewrite_positional("job {0} failed"), "job {__field_0} failed");
        assert_eq!(rewrite_positional("{1:?} / {0}"), "{__field_1:?} / {__field_0}");
        assert_eq!(rewrite_positional("{{0}} literal"), "{{0}} literal");
        assert_eq!(rewrite_positional("{name}"), "{name}");
    }
}
