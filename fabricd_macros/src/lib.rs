// This file is part of fabricd, an application to reconfigure FPGA fabric and drive the IO processors inside it.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fabricd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fabricd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Procedural macros for fabricd.
//!
//! `#[platform(compat_string = "...")]` marks a struct as a reconfiguration platform. The
//! struct must provide a `new()` constructor and implement the daemon's `Platform` trait.
//! The macro adds a `COMPAT_STRING` constant and a `register_platform()` associated function
//! which inserts the platform into the daemon's platform registry.

use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, LitStr, parse_macro_input};

#[proc_macro_attribute]
pub fn platform(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut compat_string: Option<LitStr> = None;
    let attr_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("compat_string") {
            compat_string = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported platform property, expected `compat_string`"))
        }
    });
    parse_macro_input!(attr with attr_parser);
    let item = parse_macro_input!(item as ItemStruct);

    let Some(compat_string) = compat_string else {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[platform] requires a `compat_string = \"...\"` argument",
        )
        .to_compile_error()
        .into();
    };

    let name = &item.ident;
    quote! {
        #item

        impl #name {
            /// Compatibility string this platform was registered with.
            pub const COMPAT_STRING: &'static str = #compat_string;

            /// Insert this platform into the global platform registry.
            pub fn register_platform() {
                crate::platforms::platform::register_platform(#compat_string, || {
                    Box::new(#name::new())
                });
            }
        }
    }
    .into()
}
