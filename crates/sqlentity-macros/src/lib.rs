//! Procedural macros for sqlentity.
//!
//! `#[derive(Entity)]` turns a plain struct into an entity record: it
//! implements `EntitySchema` (the reflected schema, memoized per type by the
//! runtime), `Record` (field access by column name) and, unless the struct
//! opts out with `hooks`, an empty `EntityHooks`.
//!
//! These macros are used by application crates via the `sqlentity` facade.

use proc_macro::TokenStream;
use quote::quote;

mod parse;

use parse::{EntityDef, parse_entity};

/// Derive macro for entity records.
///
/// # Attributes
///
/// On the struct:
/// - `#[entity(table = "name")]` - table name (defaults to the snake_case,
///   pluralized struct name, or the flattened parent's table)
/// - `#[entity(filter = "sql")]` - static predicate; repeatable
/// - `#[entity(order_by = "sql")]` - ORDER BY clause for the table
/// - `#[entity(hooks)]` - the type implements `EntityHooks` itself
///
/// On fields:
/// - `#[entity(key)]` - key column (`id` is the key when none is marked)
/// - `#[entity(column = "name")]` - storage column; the field name stays the
///   property name
/// - `#[entity(default = expr)]` - default value, any `Into<Value>` expression
/// - `#[entity(sync_filter = path, commit_filter = path)]` -
///   `fn(&Value) -> Value` transforms for reads and writes
/// - `#[entity(flatten)]` - embedded parent entity; its schema is merged
///   first and this struct's declarations win
/// - `#[entity(skip)]` - not stored, initialized with `Default`
///
/// # Example
///
/// ```ignore
/// use sqlentity::Entity;
///
/// #[derive(Entity, Debug)]
/// #[entity(table = "accounts", filter = "deleted = 0")]
/// struct Account {
///     #[entity(key)]
///     id: Option<i64>,
///     #[entity(column = "holder_name")]
///     name: Option<String>,
///     #[entity(default = 0_i64)]
///     balance: i64,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_entity_impl(&entity).into()
}

fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let schema_impl = generate_schema_impl(entity);
    let record_impl = generate_record_impl(entity);
    let hooks_impl = if entity.custom_hooks {
        quote! {}
    } else {
        let name = &entity.name;
        let (impl_generics, ty_generics, where_clause) = entity.generics.split_for_impl();
        quote! {
            impl #impl_generics ::sqlentity::EntityHooks for #name #ty_generics #where_clause {}
        }
    };

    quote! {
        #schema_impl
        #record_impl
        #hooks_impl
    }
}

/// `EntitySchema::describe`: parents first, then this struct's own
/// declarations merged over them.
fn generate_schema_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let (impl_generics, ty_generics, where_clause) = entity.generics.split_for_impl();

    let table = entity
        .table
        .as_ref()
        .map(|t| quote! { .table(#t) });
    let filters = entity.filters.iter().map(|f| quote! { .filter(#f) });
    let order_by = entity
        .order_by
        .as_ref()
        .map(|o| quote! { .order_by(#o) });
    let keys = entity.key_columns();
    let keys = keys.iter().map(|k| quote! { .key(#k)? });

    let fields = entity.column_fields().map(|f| {
        let column = &f.column;
        let property = f.name.to_string();
        let default = f
            .default
            .as_ref()
            .map(|expr| quote! { .default_value(#expr) });
        let sync = f
            .sync_filter
            .as_ref()
            .map(|p| quote! { .sync_filter(::sqlentity::Filter::new(#p)) });
        let commit = f
            .commit_filter
            .as_ref()
            .map(|p| quote! { .commit_filter(::sqlentity::Filter::new(#p)) });
        quote! {
            .field(
                ::sqlentity::FieldSpec::new(#column)
                    .property(#property)
                    #default
                    #sync
                    #commit
            )?
        }
    });

    let parents = entity.flatten_fields().map(|f| {
        let ty = &f.ty;
        quote! { .merge(<#ty as ::sqlentity::EntitySchema>::describe()?)? }
    });
    let default_table = &entity.default_table;

    quote! {
        impl #impl_generics ::sqlentity::EntitySchema for #name #ty_generics #where_clause {
            fn describe() -> ::sqlentity::Result<::sqlentity::SchemaBuilder> {
                let own = ::sqlentity::SchemaBuilder::new()
                    #table
                    #(#filters)*
                    #order_by
                    #(#keys)*
                    #(#fields)*;
                let builder = ::sqlentity::SchemaBuilder::new()
                    #(#parents)*
                    .merge(own)?;
                Ok(builder.table_or(#default_table))
            }
        }
    }
}

/// `Record`: own columns by name, then each flattened parent in order.
fn generate_record_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let (impl_generics, ty_generics, where_clause) = entity.generics.split_for_impl();

    let inits = entity.fields.iter().map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        let column = &f.column;
        if f.skip {
            quote! { #ident: ::core::default::Default::default() }
        } else if f.flatten {
            quote! { #ident: <#ty as ::sqlentity::Record>::from_schema(schema)? }
        } else {
            quote! { #ident: ::sqlentity::record::initial_value::<#ty>(schema, #column)? }
        }
    });

    let get_arms = entity.column_fields().map(|f| {
        let ident = &f.name;
        let column = &f.column;
        quote! {
            #column => ::core::option::Option::Some(
                ::sqlentity::Value::from(::core::clone::Clone::clone(&self.#ident))
            ),
        }
    });
    let get_parents = entity.flatten_fields().map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        quote! {
            if let ::core::option::Option::Some(value) =
                <#ty as ::sqlentity::Record>::field(&self.#ident, name)
            {
                return ::core::option::Option::Some(value);
            }
        }
    });

    let set_arms = entity.column_fields().map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        let column = &f.column;
        quote! {
            #column => {
                self.#ident = <#ty as ::sqlentity::FromValue>::from_value(&value)?;
                ::core::result::Result::Ok(true)
            }
        }
    });
    let set_parents = entity.flatten_fields().map(|f| {
        let ident = &f.name;
        let ty = &f.ty;
        quote! {
            if <#ty as ::sqlentity::Record>::set_field(&mut self.#ident, name, value.clone())? {
                return ::core::result::Result::Ok(true);
            }
        }
    });

    quote! {
        impl #impl_generics ::sqlentity::Record for #name #ty_generics #where_clause {
            fn from_schema(schema: &::sqlentity::Schema) -> ::sqlentity::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#inits,)*
                })
            }

            fn field(&self, name: &str) -> ::core::option::Option<::sqlentity::Value> {
                match name {
                    #(#get_arms)*
                    _ => {
                        #(#get_parents)*
                        ::core::option::Option::None
                    }
                }
            }

            #[allow(unused_variables)]
            fn set_field(
                &mut self,
                name: &str,
                value: ::sqlentity::Value,
            ) -> ::sqlentity::Result<bool> {
                match name {
                    #(#set_arms)*
                    _ => {
                        #(#set_parents)*
                        ::core::result::Result::Ok(false)
                    }
                }
            }
        }
    }
}
