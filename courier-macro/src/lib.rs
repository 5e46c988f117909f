/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

#![forbid(unsafe_code)]

//! Courier Macro Library
//!
//! Procedural macros for Courier message types.
//!
//! ```ignore
//! // A local message
//! #[courier_message]
//! pub struct Ping;
//!
//! // A message that can travel between bus instances
//! #[courier_message(wire)]
//! pub struct PriceChanged {
//!     pub symbol: String,
//!     pub price: f64,
//! }
//!
//! // A message that belongs to one order's conversation
//! #[courier_message(wire, correlated_by = order_id)]
//! pub struct OrderShipped {
//!     pub order_id: Uuid,
//! }
//! ```

use proc_macro::TokenStream;

use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Ident};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(trait_name)
                    || meta
                        .path
                        .segments
                        .last()
                        .is_some_and(|segment| segment.ident == trait_name)
                {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

/// Options of `#[courier_message(...)]`.
#[derive(Default)]
struct MessageConfig {
    /// Derive serde so the message can be put on the wire.
    wire: bool,
    /// Field holding the correlation id.
    correlated_by: Option<Ident>,
}

impl MessageConfig {
    fn parser(&mut self) -> impl syn::parse::Parser<Output = ()> + '_ {
        syn::meta::parser(move |meta| {
            if meta.path.is_ident("wire") {
                self.wire = true;
                Ok(())
            } else if meta.path.is_ident("correlated_by") {
                self.correlated_by = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported courier_message option, expected `wire` or `correlated_by = field`"))
            }
        })
    }
}

/// Turns a struct or enum into a Courier message.
///
/// Expands to:
/// - `#[derive(Clone, Debug)]` for the traits not already derived
/// - with `wire`, `serde::Serialize` and `serde::Deserialize` (serde must be a
///   dependency of the calling crate)
/// - with `correlated_by = field`, an implementation of `CorrelatedBy` whose
///   key is that field
/// - a compile-time assertion that the type is `Send + Sync + 'static`
#[proc_macro_attribute]
pub fn courier_message(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut config = MessageConfig::default();
    let parser = config.parser();
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as DeriveInput);
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let derives = {
        let mut traits = Vec::new();
        if !has_derive(&input, "Clone") {
            traits.push(quote!(Clone));
        }
        if !has_derive(&input, "Debug") {
            traits.push(quote!(Debug));
        }
        if config.wire {
            if !has_derive(&input, "Serialize") {
                traits.push(quote!(serde::Serialize));
            }
            if !has_derive(&input, "Deserialize") {
                traits.push(quote!(serde::Deserialize));
            }
        }
        if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        }
    };

    let correlation = match &config.correlated_by {
        None => quote!(),
        Some(field) => {
            let Data::Struct(data) = &input.data else {
                return syn::Error::new_spanned(name, "`correlated_by` requires a struct")
                    .to_compile_error()
                    .into();
            };
            let Fields::Named(fields) = &data.fields else {
                return syn::Error::new_spanned(name, "`correlated_by` requires named fields")
                    .to_compile_error()
                    .into();
            };
            let Some(key_type) = fields
                .named
                .iter()
                .find(|candidate| candidate.ident.as_ref() == Some(field))
                .map(|candidate| &candidate.ty)
            else {
                return syn::Error::new_spanned(field, format!("`{name}` has no field `{field}`"))
                    .to_compile_error()
                    .into();
            };
            quote! {
                impl #impl_generics ::courier::prelude::CorrelatedBy for #name #ty_generics #where_clause {
                    type Key = #key_type;

                    fn correlation_id(&self) -> Self::Key {
                        ::core::clone::Clone::clone(&self.#field)
                    }
                }
            }
        }
    };

    let assert_ident = format_ident!("_AssertCourierMessage_{}", name);

    let expanded = quote! {
        #derives
        #input

        #correlation

        #[doc(hidden)]
        #[allow(dead_code, non_camel_case_types, non_snake_case, clippy::needless_lifetimes)]
        const _: () = {
            fn #assert_ident #impl_generics () #where_clause {
                fn assert_bounds<T: Send + Sync + 'static>() {}
                assert_bounds::<#name #ty_generics>();
            }
        };
    };

    TokenStream::from(expanded)
}
