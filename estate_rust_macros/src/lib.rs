mod slice;

use proc_macro::TokenStream;

/// Derive macro that turns a named-field struct into a store slice.
///
/// ```ignore
/// #[derive(Slice)]
/// #[slice(name = "user")]
/// struct User {
///     name: String,
///     age: i64,
/// }
///
/// let store = Store::builder()
///     .with_slice(User { name: "John".into(), age: 30 })
///     .build()?;
///
/// let user = store.slice_of::<User>();
/// user.set_name(Update::value("Jane"))?;
/// user.subscribe_age(Listener::new(|_| println!("age changed")))?;
/// ```
///
/// - `#[slice(name = "...")]` sets the slice name.
///   If omitted, defaults to the snake_case struct name.
/// - Every field becomes a key; its type must convert into `Value`.
/// - Generates `<Name>Slice` with `<field>()`, `set_<field>(update)` and
///   `subscribe_<field>(listener)` bound to a store.
#[proc_macro_derive(Slice, attributes(slice))]
pub fn derive_slice(input: TokenStream) -> TokenStream {
    slice::derive_slice(input)
}
