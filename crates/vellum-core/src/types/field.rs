use crate::error::Result;
use crate::types::record::wire;
use serde_json::Value;

/// Accessor for one declared record field
///
/// `get`/`set` move values in and out of the record as JSON so the change
/// tracker and encryption pipe can work without knowing the concrete type.
pub struct FieldSpec<R> {
    /// Stable wire name, also the property path in events
    pub name: &'static str,
    pub get: fn(&R) -> Value,
    pub set: fn(&mut R, Value) -> Result<()>,
    /// Changes to tracked fields are listed in events
    pub tracked: bool,
    /// Value is stored and logged only in encrypted form
    pub encrypted: bool,
}

impl<R> FieldSpec<R> {
    pub fn new(
        name: &'static str,
        get: fn(&R) -> Value,
        set: fn(&mut R, Value) -> Result<()>,
    ) -> Self {
        Self {
            name,
            get,
            set,
            tracked: false,
            encrypted: false,
        }
    }

    pub fn tracked(mut self) -> Self {
        self.tracked = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Declared fields of a record type, in declaration order
pub struct FieldTable<R> {
    fields: Vec<FieldSpec<R>>,
    catalog: FieldCatalog,
}

impl<R> FieldTable<R> {
    pub fn new(fields: Vec<FieldSpec<R>>) -> Self {
        let catalog = FieldCatalog::new(
            fields
                .iter()
                .map(|f| FieldInfo {
                    name: f.name,
                    encrypted: f.encrypted,
                })
                .collect(),
        );
        Self { fields, catalog }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec<R>> {
        self.fields.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec<R>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn encrypted(&self) -> impl Iterator<Item = &FieldSpec<R>> {
        self.fields.iter().filter(|f| f.encrypted)
    }

    pub fn has_encrypted(&self) -> bool {
        self.fields.iter().any(|f| f.encrypted)
    }

    /// Type-erased view used by the query translator
    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub encrypted: bool,
}

/// Names a query may reference: envelope properties plus declared fields
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: Vec<FieldInfo>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<FieldInfo>) -> Self {
        Self { fields }
    }

    pub fn lookup(&self, name: &str) -> Option<FieldInfo> {
        if let Some(envelope) = wire::ALL.iter().find(|w| **w == name) {
            return Some(FieldInfo {
                name: envelope,
                encrypted: false,
            });
        }
        self.fields.iter().find(|f| f.name == name).copied()
    }
}

/// Build a [`FieldSpec`] for a struct member that is (de)serialized with serde
///
/// ```ignore
/// field!(Widget, "publicField", public_field).tracked()
/// ```
#[macro_export]
macro_rules! field {
    ($ty:ty, $wire:literal, $member:ident) => {
        $crate::types::field::FieldSpec::<$ty>::new(
            $wire,
            |record: &$ty| {
                $crate::__private::serde_json::to_value(&record.$member)
                    .unwrap_or($crate::__private::serde_json::Value::Null)
            },
            |record: &mut $ty, value| {
                record.$member = $crate::__private::serde_json::from_value(value)?;
                Ok(())
            },
        )
    };
}
