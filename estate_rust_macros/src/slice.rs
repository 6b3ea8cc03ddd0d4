use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitStr};

pub fn derive_slice(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let vis = &input.vis;
    let accessor = format_ident!("{}Slice", name);
    let slice_name = extract_name(input)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Slice derive only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Slice derive only supports structs",
            ))
        }
    };

    let idents: Vec<_> = fields.iter().filter_map(|f| f.ident.as_ref()).collect();
    let keys: Vec<String> = idents.iter().map(|ident| ident.to_string()).collect();

    let methods = idents.iter().zip(&keys).map(|(ident, key)| {
        let setter = format_ident!("set_{}", ident);
        let subscriber = format_ident!("subscribe_{}", ident);
        quote! {
            pub fn #ident(
                &self,
            ) -> ::std::result::Result<::std::sync::Arc<estate_rust::Value>, estate_rust::StoreError> {
                self.store.get(#slice_name, #key)
            }

            pub fn #setter(
                &self,
                update: estate_rust::Update,
            ) -> ::std::result::Result<(), estate_rust::StoreError> {
                self.store.set_value(#slice_name, #key, update)
            }

            pub fn #subscriber(
                &self,
                listener: estate_rust::Listener,
            ) -> ::std::result::Result<estate_rust::Subscription, estate_rust::StoreError> {
                self.store.subscribe(#slice_name, #key, listener)
            }
        }
    });

    Ok(quote! {
        impl estate_rust::SliceState for #name {
            const NAME: &'static str = #slice_name;

            type Accessor = #accessor;

            fn keys() -> &'static [&'static str] {
                &[#(#keys),*]
            }

            fn into_values(self) -> ::std::vec::Vec<(::std::string::String, estate_rust::Value)> {
                ::std::vec![
                    #((::std::string::String::from(#keys), estate_rust::Value::from(self.#idents))),*
                ]
            }

            fn accessor(store: estate_rust::Store) -> #accessor {
                #accessor { store }
            }
        }

        #[derive(Clone, Debug)]
        #vis struct #accessor {
            store: estate_rust::Store,
        }

        impl #accessor {
            pub fn store(&self) -> &estate_rust::Store {
                &self.store
            }

            #(#methods)*
        }
    })
}

fn extract_name(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if !attr.path().is_ident("slice") {
            continue;
        }

        let mut name = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `name`"))
            }
        })?;

        if let Some(name) = name {
            return Ok(name);
        }
    }

    // Default: snake_case struct name
    Ok(to_snake_case(&input.ident.to_string()))
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
