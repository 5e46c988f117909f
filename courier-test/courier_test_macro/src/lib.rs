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

//! The `#[courier_test]` attribute.

use proc_macro::TokenStream;

use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemFn, ReturnType};

/// Runs an `async fn` test on a multi-threaded Tokio runtime.
///
/// Panics raised anywhere in the runtime, including spawned tasks, are
/// recorded and re-raised on the test thread with their location. A test that
/// returns a `Result` fails when it returns `Err`.
#[proc_macro_attribute]
pub fn courier_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;
    let attrs = &input.attrs;
    let name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "`#[courier_test]` requires an async fn")
            .to_compile_error()
            .into();
    }

    let async_name = format_ident!("__{}_async", name);

    let finish = match output {
        ReturnType::Default => quote!(result),
        ReturnType::Type(..) => quote! {
            if let Err(error) = result {
                panic!("test returned an error: {error:?}");
            }
        },
    };

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            use std::panic;
            use std::sync::atomic::{AtomicBool, Ordering};
            use std::sync::Arc;
            use ::courier_test::__private::{parking_lot, tokio, tracing};

            #[derive(Default)]
            struct PanicRecord {
                occurred: AtomicBool,
                message: parking_lot::Mutex<Option<String>>,
                location: parking_lot::Mutex<Option<String>>,
            }

            let record = Arc::new(PanicRecord::default());
            let hook_record = Arc::clone(&record);
            let original_hook = panic::take_hook();
            panic::set_hook(Box::new(move |info| {
                hook_record.occurred.store(true, Ordering::SeqCst);
                let message = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned());
                *hook_record.location.lock() = info.location().map(|location| {
                    format!("{}:{}:{}", location.file(), location.line(), location.column())
                });
                let cleaned = message
                    .clone()
                    .unwrap_or_else(|| "No error message".to_string())
                    .trim()
                    .replace('\n', " ");
                *hook_record.message.lock() = message;
                tracing::error!("Panic: {}", cleaned);
                original_hook(info);
            }));

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build the test runtime");

            let result = runtime.block_on(async {
                let test_span = tracing::info_span!("courier_test", name = stringify!(#name));
                let _enter = test_span.enter();
                #async_name().await
            });
            drop(runtime);

            if record.occurred.load(Ordering::SeqCst) {
                let location = record
                    .location
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "unknown location".to_string());
                let message = record
                    .message
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "No error message".to_string());
                panic!("Panic at {}: {}", location, message.trim().replace('\n', " "));
            }

            #finish
        }

        async fn #async_name(#inputs) #output #body
    };

    expanded.into()
}
