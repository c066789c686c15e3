use proc_macro::TokenStream;
use quote::quote;
use syn::{ext::IdentExt, token::{Brace, Paren}, *};

macro_rules! error {
    ($span:expr, $($tt:tt)*) => {
        return Err(syn::Error::new_spanned($span, format!($($tt)*)))
    };
}

pub fn from_row(input: DeriveInput) -> Result<TokenStream> {
    let DeriveInput { attrs: _, vis: _, ident, generics, data } = input;
    let Data::Struct(data) = data else {
        error!(&ident, "only struct are currently supported")
    };

    let mut head = quote! {};
    let mut output = quote! {};

    match data.fields {
        Fields::Unnamed(FieldsUnnamed { unnamed, .. }) => {
            let body = (0..unnamed.len())
                .map(|i|quote! { row.try_get(#i)?, });
            Paren::default().surround(&mut output, |e|e.extend(body));
        },
        Fields::Named(FieldsNamed { named, .. }) => {
            let body = named
                .into_iter()
                .filter_map(|e|e.ident)
                .map(|id|{
                    let name = id.unraw().to_string();
                    quote! { #id: row.try_get(#name)?, }
                });
            Brace::default().surround(&mut output, |e|e.extend(body));
        }
        Fields::Unit => head = quote! { let _ = row; },
    };

    let (g1, g2, g3) = generics.split_for_impl();

    Ok(quote! {
        impl #g1 ::barepg::FromRow for #ident #g2 #g3 {
            fn from_row(row: ::barepg::Row) -> Result<Self, ::barepg::DecodeError> {
                #head
                Ok(Self #output)
            }
        }
    }.into())
}
