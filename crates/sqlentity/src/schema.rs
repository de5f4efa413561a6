//! Table metadata consumed by [`Entity`](crate::Entity).
//!
//! A [`Schema`] is produced either by explicit registration through a
//! [`SchemaBuilder`], or by `#[derive(Entity)]`, which implements
//! [`EntitySchema::describe`] for the type. Both routes end in the same
//! validated, immutable structure.

use sqlentity_core::{Dialect, Error, Result, Value, is_plain_identifier};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// A pure value transform applied when reading from or writing to storage.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&Value) -> Value + Send + Sync>);

impl Filter {
    pub fn new(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: &Value) -> Value {
        (self.0)(value)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

/// One registered column.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Storage column name.
    pub name: String,
    /// Public name used by application code; defaults to `name`.
    pub property: String,
    /// Value a fresh entity starts with.
    pub default: Value,
    /// Applied to values read from storage.
    pub sync_filter: Option<Filter>,
    /// Applied to values written to storage.
    pub commit_filter: Option<Filter>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            property: name.clone(),
            name,
            default: Value::Null,
            sync_filter: None,
            commit_filter: None,
        }
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn sync_filter(mut self, filter: Filter) -> Self {
        self.sync_filter = Some(filter);
        self
    }

    pub fn commit_filter(mut self, filter: Filter) -> Self {
        self.commit_filter = Some(filter);
        self
    }

    /// Run the sync filter (if any) over a stored value.
    pub fn on_sync(&self, value: &Value) -> Value {
        match &self.sync_filter {
            Some(filter) => filter.apply(value),
            None => value.clone(),
        }
    }

    /// Run the commit filter (if any) over an outgoing value.
    pub fn on_commit(&self, value: &Value) -> Value {
        match &self.commit_filter {
            Some(filter) => filter.apply(value),
            None => value.clone(),
        }
    }
}

/// Validated metadata for one table.
#[derive(Debug, Clone)]
pub struct Schema {
    table: String,
    fields: Vec<FieldSpec>,
    keys: Vec<String>,
    filters: Vec<String>,
    order_by: Option<String>,
    by_field: HashMap<String, usize>,
    by_property: HashMap<String, usize>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in registration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Key column names in order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.keys.iter().any(|k| k == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.by_field.get(name).map(|&i| &self.fields[i])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.by_field.contains_key(name)
    }

    pub fn field_for_property(&self, property: &str) -> Option<&FieldSpec> {
        self.by_property.get(property).map(|&i| &self.fields[i])
    }

    /// Resolve a property name first, then a storage name.
    pub fn resolve(&self, name: &str) -> Option<&FieldSpec> {
        self.field_for_property(name).or_else(|| self.field(name))
    }

    /// Static predicate fragments attached to the table.
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    /// Quoted table name for `dialect`.
    pub fn table_ref(&self, dialect: Dialect) -> String {
        dialect.quote(&self.table)
    }

    /// `WHERE (a) AND (b)` built from the static filters, or an empty string.
    pub fn where_clause(&self) -> String {
        if self.filters.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self.filters.iter().map(|f| format!("({f})")).collect();
        format!("WHERE {}", parts.join(" AND "))
    }

    /// `ORDER BY ...` or an empty string.
    pub fn order_by_clause(&self) -> String {
        self.order_by
            .as_ref()
            .map(|o| format!("ORDER BY {o}"))
            .unwrap_or_default()
    }
}

/// Explicit schema registration.
///
/// ```
/// use sqlentity::{FieldSpec, SchemaBuilder};
///
/// let schema = SchemaBuilder::new()
///     .table("accounts")
///     .key("id")?
///     .field(FieldSpec::new("name"))?
///     .field(FieldSpec::new("balance").default_value(0_i64))?
///     .build()?;
/// assert_eq!(schema.fields().len(), 2);
/// # Ok::<(), sqlentity::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    table: Option<String>,
    fields: Vec<FieldSpec>,
    keys: Vec<String>,
    filters: Vec<String>,
    order_by: Option<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Set the table only if none was set (derive default naming).
    pub fn table_or(mut self, table: impl Into<String>) -> Self {
        if self.table.is_none() {
            self.table = Some(table.into());
        }
        self
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// Register a field; a name or property already taken is an error.
    pub fn register_field(&mut self, spec: FieldSpec) -> Result<()> {
        check_identifier("field", &spec.name)?;
        check_identifier("property", &spec.property)?;
        if self.fields.iter().any(|f| f.name == spec.name) {
            return Err(Error::config(format!(
                "field '{}' is already registered",
                spec.name
            )));
        }
        if let Some(other) = self.fields.iter().find(|f| f.property == spec.property) {
            return Err(Error::config(format!(
                "property '{}' of field '{}' is already bound to field '{}'",
                spec.property, spec.name, other.name
            )));
        }
        self.fields.push(spec);
        Ok(())
    }

    pub fn field(mut self, spec: FieldSpec) -> Result<Self> {
        self.register_field(spec)?;
        Ok(self)
    }

    /// Declare a key column. Keys need not be registered fields.
    pub fn key(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_identifier("key", &name)?;
        if self.keys.contains(&name) {
            return Err(Error::config(format!("key '{}' declared twice", name)));
        }
        self.keys.push(name);
        Ok(self)
    }

    /// Add a static predicate fragment (ANDed with the others).
    pub fn filter(mut self, fragment: impl Into<String>) -> Self {
        self.filters.push(fragment.into());
        self
    }

    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    /// Compose `child` over `self`.
    ///
    /// The child's table and ORDER BY win when set. Fields are unioned with
    /// the child's spec replacing a parent field of the same name. The
    /// child's keys replace the parent's when it declares any. Filters
    /// accumulate, parent first.
    pub fn merge(mut self, child: SchemaBuilder) -> Result<Self> {
        if child.table.is_some() {
            self.table = child.table;
        }
        if child.order_by.is_some() {
            self.order_by = child.order_by;
        }
        if !child.keys.is_empty() {
            self.keys = child.keys;
        }
        for fragment in child.filters {
            if !self.filters.contains(&fragment) {
                self.filters.push(fragment);
            }
        }
        for spec in child.fields {
            if let Some(pos) = self.fields.iter().position(|f| f.name == spec.name) {
                self.fields.remove(pos);
                if let Some(other) = self.fields.iter().find(|f| f.property == spec.property) {
                    return Err(Error::config(format!(
                        "property '{}' of field '{}' is already bound to field '{}'",
                        spec.property, spec.name, other.name
                    )));
                }
                // Same slot keeps column order stable.
                self.fields.insert(pos, spec);
            } else {
                self.register_field(spec)?;
            }
        }
        Ok(self)
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<Schema> {
        let table = self
            .table
            .ok_or_else(|| Error::config("schema has no table"))?;
        check_identifier("table", &table)?;
        if self.keys.is_empty() {
            return Err(Error::config(format!("table '{}' declares no key", table)));
        }
        let by_field = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let by_property = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.property.clone(), i))
            .collect();
        Ok(Schema {
            table,
            fields: self.fields,
            keys: self.keys,
            filters: self.filters,
            order_by: self.order_by,
            by_field,
            by_property,
        })
    }
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(Error::config(format!("invalid {what} name '{name}'")))
    }
}

static REGISTRY: LazyLock<Mutex<HashMap<TypeId, Arc<Schema>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Types that carry their own schema, usually via `#[derive(Entity)]`.
pub trait EntitySchema: 'static {
    /// Describe the schema. Called at most once per successful resolution.
    fn describe() -> Result<SchemaBuilder>;

    /// The memoized schema for this type.
    fn schema() -> Result<Arc<Schema>> {
        resolve::<Self>()
    }

    fn table_ref(dialect: Dialect) -> Result<String> {
        Ok(Self::schema()?.table_ref(dialect))
    }

    fn where_clause() -> Result<String> {
        Ok(Self::schema()?.where_clause())
    }

    fn order_by_clause() -> Result<String> {
        Ok(Self::schema()?.order_by_clause())
    }
}

fn resolve<T: EntitySchema + ?Sized>() -> Result<Arc<Schema>> {
    let id = TypeId::of::<T>();
    if let Some(schema) = REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
    {
        return Ok(Arc::clone(schema));
    }

    // Built outside the lock: describe() may resolve parent schemas.
    let schema = Arc::new(T::describe()?.build()?);
    tracing::debug!(
        table = schema.table(),
        fields = schema.fields().len(),
        "registered entity schema"
    );
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(registry.entry(id).or_insert(schema)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn accounts() -> SchemaBuilder {
        SchemaBuilder::new()
            .table("accounts")
            .key("id")
            .unwrap()
            .field(FieldSpec::new("id"))
            .unwrap()
            .field(FieldSpec::new("holder_name").property("name"))
            .unwrap()
            .field(FieldSpec::new("balance").default_value(0_i64))
            .unwrap()
    }

    #[test]
    fn lookups_by_property_and_field() {
        let schema = accounts().build().unwrap();
        assert_eq!(schema.table(), "accounts");
        assert_eq!(schema.keys(), ["id".to_string()]);
        assert_eq!(
            schema.field_for_property("name").map(|f| f.name.as_str()),
            Some("holder_name")
        );
        assert!(schema.field_for_property("holder_name").is_none());
        assert_eq!(
            schema.resolve("holder_name").map(|f| f.property.as_str()),
            Some("name")
        );
        assert_eq!(schema.field("balance").unwrap().default, Value::BigInt(0));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = accounts()
            .field(FieldSpec::new("balance"))
            .unwrap_err();
        assert!(err.is_config_error());

        let err = accounts()
            .field(FieldSpec::new("other").property("name"))
            .unwrap_err();
        assert!(err.to_string().contains("already bound"));

        assert!(accounts().key("id").is_err());
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        assert!(SchemaBuilder::new().field(FieldSpec::new("bad name")).is_err());
        assert!(SchemaBuilder::new().key("id;drop").is_err());
        let err = SchemaBuilder::new()
            .table("no-dash")
            .key("id")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn build_requires_table_and_key() {
        assert!(SchemaBuilder::new().key("id").unwrap().build().is_err());
        assert!(SchemaBuilder::new().table("t").build().is_err());
    }

    #[test]
    fn merge_child_wins_and_unions_fields() {
        let parent = accounts()
            .filter("deleted = 0")
            .order_by("id");
        let child = SchemaBuilder::new()
            .table("savings_accounts")
            .field(FieldSpec::new("balance").default_value(100_i64))
            .unwrap()
            .field(FieldSpec::new("rate"))
            .unwrap()
            .filter("kind = 'savings'");

        let schema = parent.merge(child).unwrap().build().unwrap();
        assert_eq!(schema.table(), "savings_accounts");
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "holder_name", "balance", "rate"]);
        assert_eq!(schema.field("balance").unwrap().default, Value::BigInt(100));
        assert_eq!(schema.keys(), ["id".to_string()]);
        assert_eq!(
            schema.where_clause(),
            "WHERE (deleted = 0) AND (kind = 'savings')"
        );
        assert_eq!(schema.order_by_clause(), "ORDER BY id");
    }

    #[test]
    fn merge_detects_property_clash() {
        let child = SchemaBuilder::new()
            .field(FieldSpec::new("balance").property("name"))
            .unwrap();
        assert!(accounts().merge(child).is_err());
    }

    #[test]
    fn filters_apply() {
        let spec = FieldSpec::new("flag")
            .sync_filter(Filter::new(|v| Value::Bool(v.as_i64() == Some(1))))
            .commit_filter(Filter::new(|v| Value::Int(i32::from(v.as_bool() == Some(true)))));
        assert_eq!(spec.on_sync(&Value::BigInt(1)), Value::Bool(true));
        assert_eq!(spec.on_commit(&Value::Bool(false)), Value::Int(0));
        assert_eq!(FieldSpec::new("x").on_sync(&Value::Int(3)), Value::Int(3));
    }

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Memo;

    impl EntitySchema for Memo {
        fn describe() -> Result<SchemaBuilder> {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(accounts().table("memo").filter("active = 1"))
        }
    }

    #[test]
    fn entity_schema_is_memoized() {
        let a = Memo::schema().unwrap();
        let b = Memo::schema().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(Memo::table_ref(Dialect::MySql).unwrap(), "`memo`");
        assert_eq!(Memo::where_clause().unwrap(), "WHERE (active = 1)");
        assert_eq!(Memo::order_by_clause().unwrap(), "");
    }
}
