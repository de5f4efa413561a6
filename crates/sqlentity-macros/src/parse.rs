//! Parsing logic for the Entity derive macro.
//!
//! Extracts `#[entity(...)]` attributes from the struct and its fields into
//! an [`EntityDef`] used by code generation.

use proc_macro2::Span;
use syn::{
    Attribute, Data, DeriveInput, Error, Expr, Field, Fields, Generics, Ident, Lit, Path, Result,
    Type,
};

/// Parsed struct with `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityDef {
    /// The struct name (e.g., `Account`).
    pub name: Ident,
    /// Explicit `table = "..."`, if any.
    pub table: Option<String>,
    /// Table name used when neither this type nor a flattened parent names
    /// one.
    pub default_table: String,
    /// Static predicate fragments, in attribute order.
    pub filters: Vec<String>,
    pub order_by: Option<String>,
    /// The type implements `EntityHooks` itself.
    pub custom_hooks: bool,
    pub fields: Vec<FieldDef>,
    pub generics: Generics,
}

/// Parsed struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name, which is also the property name.
    pub name: Ident,
    /// Storage column name (defaults to the field name).
    pub column: String,
    pub ty: Type,
    pub key: bool,
    /// Expression converted into the schema default.
    pub default: Option<Expr>,
    pub sync_filter: Option<Path>,
    pub commit_filter: Option<Path>,
    /// Embedded parent entity whose schema is merged first.
    pub flatten: bool,
    /// Not stored; initialized with `Default`.
    pub skip: bool,
}

impl EntityDef {
    /// Columns declared directly on this struct.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.skip && !f.flatten)
    }

    pub fn flatten_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.flatten)
    }

    /// Key columns, falling back to `id` when nothing declares a key and
    /// no parent is flattened in.
    pub fn key_columns(&self) -> Vec<String> {
        let explicit: Vec<String> = self
            .column_fields()
            .filter(|f| f.key)
            .map(|f| f.column.clone())
            .collect();
        if !explicit.is_empty() || self.flatten_fields().next().is_some() {
            return explicit;
        }
        self.column_fields()
            .find(|f| f.column == "id")
            .map(|f| vec![f.column.clone()])
            .unwrap_or_default()
    }
}

/// Parse a derive input into an [`EntityDef`].
pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let name = input.ident.clone();
    let attrs = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs, not unions",
            ));
        }
    };

    let mut seen = std::collections::HashSet::new();
    for field in fields.iter().filter(|f| !f.skip && !f.flatten) {
        if !seen.insert(field.column.as_str()) {
            return Err(Error::new_spanned(
                &field.name,
                format!("column `{}` is mapped twice", field.column),
            ));
        }
    }

    Ok(EntityDef {
        default_table: derive_table_name(&name.to_string()),
        name,
        table: attrs.table,
        filters: attrs.filters,
        order_by: attrs.order_by,
        custom_hooks: attrs.hooks,
        fields,
        generics: input.generics.clone(),
    })
}

#[derive(Default)]
struct StructAttrs {
    table: Option<String>,
    filters: Vec<String>,
    order_by: Option<String>,
    hooks: bool,
}

/// Parse struct-level `#[entity(...)]` attributes.
///
/// Supported keys: `table = "name"`, `filter = "sql"` (repeatable),
/// `order_by = "sql"`, `hooks`.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<StructAttrs> {
    let mut result = StructAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if result.table.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate entity attribute: table",
                    ));
                }
                result.table = Some(string_value(&meta, "table name")?);
            } else if meta.path.is_ident("filter") {
                result.filters.push(string_value(&meta, "filter")?);
            } else if meta.path.is_ident("order_by") {
                result.order_by = Some(string_value(&meta, "order_by")?);
            } else if meta.path.is_ident("hooks") {
                result.hooks = true;
            } else {
                return Err(meta.error(
                    "unknown entity struct attribute (expected table, filter, order_by or hooks)",
                ));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>, what: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    if let Lit::Str(lit_str) = value {
        Ok(lit_str.value())
    } else {
        Err(Error::new_spanned(
            value,
            format!("expected string literal for {what}"),
        ))
    }
}

/// Derive table name from struct name: convert to snake_case and pluralize.
///
/// Examples:
/// - `Account` -> `accounts`
/// - `LedgerEntry` -> `ledger_entries`
fn derive_table_name(struct_name: &str) -> String {
    pluralize(&to_snake_case(struct_name))
}

/// Convert PascalCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                // Word boundary, or the last capital of an acronym.
                if prev.is_lowercase()
                    || (prev.is_uppercase() && next.is_some_and(char::is_lowercase))
                {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization.
fn pluralize(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        "datum" => return "data".to_string(),
        "index" => return "indices".to_string(),
        _ => {}
    }

    if word.is_empty() {
        return String::new();
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    if let Some(stripped) = word.strip_suffix('y') {
        if stripped
            .chars()
            .last()
            .is_some_and(|c| !"aeiou".contains(c))
        {
            return format!("{stripped}ies");
        }
    }
    format!("{word}s")
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Entity requires a struct with fields, not a unit struct",
        )),
    }
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut def = FieldDef {
        column: name.to_string(),
        name,
        ty: field.ty.clone(),
        key: false,
        default: None,
        sync_filter: None,
        commit_filter: None,
        flatten: false,
        skip: false,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("key") {
                def.key = true;
            } else if path.is_ident("flatten") {
                def.flatten = true;
            } else if path.is_ident("skip") {
                def.skip = true;
            } else if path.is_ident("column") {
                def.column = string_value(&meta, "column name")?;
            } else if path.is_ident("default") {
                def.default = Some(meta.value()?.parse()?);
            } else if path.is_ident("sync_filter") {
                def.sync_filter = Some(meta.value()?.parse()?);
            } else if path.is_ident("commit_filter") {
                def.commit_filter = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error(
                    "unknown entity field attribute (expected key, column, default, \
                     sync_filter, commit_filter, flatten or skip)",
                ));
            }
            Ok(())
        })?;
    }

    validate_field(&def)?;
    Ok(def)
}

/// Reject attribute combinations that cannot be honored.
fn validate_field(def: &FieldDef) -> Result<()> {
    if def.skip && def.flatten {
        return Err(Error::new_spanned(
            &def.name,
            "cannot use both `skip` and `flatten` on the same field",
        ));
    }
    let column_attrs = def.key
        || def.default.is_some()
        || def.sync_filter.is_some()
        || def.commit_filter.is_some()
        || def.column != def.name.to_string();
    if (def.skip || def.flatten) && column_attrs {
        return Err(Error::new_spanned(
            &def.name,
            "`skip` and `flatten` fields are not columns and take no column attributes",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_derive_table_name() {
        assert_eq!(to_snake_case("LedgerEntry"), "ledger_entry");
        assert_eq!(to_snake_case("HTTPLog"), "http_log");
        assert_eq!(derive_table_name("Account"), "accounts");
        assert_eq!(derive_table_name("LedgerEntry"), "ledger_entries");
        assert_eq!(derive_table_name("Box"), "boxes");
        assert_eq!(derive_table_name("Day"), "days");
        assert_eq!(derive_table_name("Person"), "people");
    }

    #[test]
    fn test_parse_struct_attrs() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "accounts", filter = "deleted = 0", filter = "kind = 'a'")]
            #[entity(order_by = "id DESC", hooks)]
            struct Account {
                #[entity(key)]
                id: Option<i64>,
                name: String,
            }
        };

        let def = parse_entity(&input).unwrap();
        assert_eq!(def.table.as_deref(), Some("accounts"));
        assert_eq!(def.filters, ["deleted = 0", "kind = 'a'"]);
        assert_eq!(def.order_by.as_deref(), Some("id DESC"));
        assert!(def.custom_hooks);
        assert_eq!(def.key_columns(), ["id"]);
    }

    #[test]
    fn test_parse_field_attrs() {
        let input: DeriveInput = parse_quote! {
            struct Account {
                id: Option<i64>,
                #[entity(column = "holder_name", default = "anon")]
                name: String,
                #[entity(default = 0, sync_filter = filters::cents_in, commit_filter = filters::cents_out)]
                balance: i64,
                #[entity(skip)]
                cache: Vec<u8>,
            }
        };

        let def = parse_entity(&input).unwrap();
        assert_eq!(def.table, None);
        assert_eq!(def.default_table, "accounts");
        // `id` is the implicit key.
        assert_eq!(def.key_columns(), ["id"]);

        let name = &def.fields[1];
        assert_eq!(name.column, "holder_name");
        assert!(name.default.is_some());
        let balance = &def.fields[2];
        assert!(balance.sync_filter.is_some() && balance.commit_filter.is_some());
        assert!(def.fields[3].skip);
        assert_eq!(def.column_fields().count(), 3);
    }

    #[test]
    fn test_flatten_suppresses_implicit_key() {
        let input: DeriveInput = parse_quote! {
            struct SavingsAccount {
                #[entity(flatten)]
                base: Account,
                id: i64,
                rate: f64,
            }
        };

        let def = parse_entity(&input).unwrap();
        assert_eq!(def.flatten_fields().count(), 1);
        assert!(def.key_columns().is_empty());
    }

    #[test]
    fn test_unknown_attributes_error() {
        let input: DeriveInput = parse_quote! {
            #[entity(not_a_real_key = "x")]
            struct Event { id: i64 }
        };
        let err = parse_entity(&input).unwrap_err();
        assert!(err.to_string().contains("unknown entity struct attribute"), "{err}");

        let input: DeriveInput = parse_quote! {
            struct Event {
                #[entity(primary_key)]
                id: i64,
            }
        };
        let err = parse_entity(&input).unwrap_err();
        assert!(err.to_string().contains("unknown entity field attribute"), "{err}");
    }

    #[test]
    fn test_invalid_combinations_error() {
        let input: DeriveInput = parse_quote! {
            struct Event {
                #[entity(skip, key)]
                id: i64,
            }
        };
        assert!(parse_entity(&input).is_err());

        let input: DeriveInput = parse_quote! {
            struct Event {
                id: i64,
                #[entity(column = "id")]
                other: i64,
            }
        };
        let err = parse_entity(&input).unwrap_err();
        assert!(err.to_string().contains("mapped twice"), "{err}");

        let input: DeriveInput = parse_quote! {
            enum Event { A }
        };
        assert!(parse_entity(&input).is_err());
    }
}
