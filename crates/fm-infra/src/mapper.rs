//! Bidirectional field mapping between provider API records and canonical
//! entities.
//!
//! Each entity type declares one static [`Mapping`]: an ordered table of
//! canonical fields, each sourced either from a dotted path into the provider
//! record (`State.Name`, `Attachments[0].Device`) or from a pure function of
//! the whole record.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Canonical entity: canonical field name → value.
pub type Entity = Map<String, Value>;

/// Where a canonical field's value comes from.
#[derive(Clone, Copy)]
pub enum FieldSource {
    /// Dotted path into the provider record. Also the inverse path for
    /// `unmap`.
    Path(&'static str),
    /// Pure function of the whole provider record. Has no inverse.
    Derived(fn(&Value) -> Value),
}

#[derive(Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub source: FieldSource,
}

pub const fn path(name: &'static str, path: &'static str) -> Field {
    Field {
        name,
        source: FieldSource::Path(path),
    }
}

pub const fn derived(name: &'static str, f: fn(&Value) -> Value) -> Field {
    Field {
        name,
        source: FieldSource::Derived(f),
    }
}

/// Output of [`Mapping::map`]; cardinality mirrors the input.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Mapped<T> {
    /// Flatten into a collection regardless of input cardinality.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }

    pub fn into_one(self) -> Option<T> {
        match self {
            Self::One(item) => Some(item),
            Self::Many(_) => None,
        }
    }

    pub fn try_map<U>(self, f: impl Fn(T) -> Result<U>) -> Result<Mapped<U>> {
        Ok(match self {
            Self::One(item) => Mapped::One(f(item)?),
            Self::Many(items) => Mapped::Many(items.into_iter().map(f).collect::<Result<_>>()?),
        })
    }
}

/// Static mapping table for one entity type.
pub struct Mapping {
    pub entity: &'static str,
    pub fields: &'static [Field],
}

impl Mapping {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Map one provider record. Null or empty records are rejected.
    pub fn map_record(&self, record: &Value) -> Result<Entity> {
        let empty = match record {
            Value::Null => true,
            Value::Object(fields) => fields.is_empty(),
            _ => false,
        };
        if empty {
            return Err(Error::EmptyRecord {
                entity: self.entity,
            });
        }

        let mut entity = Entity::new();
        for field in self.fields {
            let value = match field.source {
                FieldSource::Path(p) => lookup(record, p).cloned().unwrap_or(Value::Null),
                FieldSource::Derived(f) => f(record),
            };
            entity.insert(field.name.to_string(), value);
        }
        Ok(entity)
    }

    /// Map a record or an array of records. Null elements of an array are
    /// skipped; a non-array input yields a single entity.
    pub fn map(&self, input: &Value) -> Result<Mapped<Entity>> {
        match input {
            Value::Array(records) => records
                .iter()
                .filter(|r| !r.is_null())
                .map(|r| self.map_record(r))
                .collect::<Result<Vec<_>>>()
                .map(Mapped::Many),
            record => self.map_record(record).map(Mapped::One),
        }
    }

    /// Project canonical fields back onto provider paths. Fields without a
    /// path (derived or undeclared) are keyed under their own name; null
    /// fields are omitted.
    pub fn unmap_record(&self, entity: &Entity) -> Value {
        let mut out = Value::Object(Map::new());
        for (key, value) in entity {
            if value.is_null() {
                continue;
            }
            let target = match self.field(key).map(|f| f.source) {
                Some(FieldSource::Path(p)) => p,
                _ => key.as_str(),
            };
            assign(&mut out, target, value.clone());
        }
        out
    }

    pub fn unmap(&self, input: &Mapped<Entity>) -> Mapped<Value> {
        match input {
            Mapped::One(entity) => Mapped::One(self.unmap_record(entity)),
            Mapped::Many(entities) => {
                Mapped::Many(entities.iter().map(|e| self.unmap_record(e)).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split `a.b[0].c` into key and index segments. Malformed indices are
/// treated as keys.
fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            out.push(Segment::Key(key));
        }
        while let Some(close) = rest.find(']') {
            match rest[1..close].parse::<usize>() {
                Ok(index) => out.push(Segment::Index(index)),
                Err(_) => out.push(Segment::Key(&rest[1..close])),
            }
            rest = &rest[close + 1..];
        }
    }
    out
}

/// Resolve a dotted path. Missing intermediate values yield `None`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).into_iter().try_fold(value, |current, segment| match segment {
        Segment::Key(key) => current.get(key),
        Segment::Index(index) => current.get(index),
    })
}

/// Write `value` at a dotted path, creating objects and arrays on the way.
pub fn assign(target: &mut Value, path: &str, value: Value) {
    let segments = segments(path);
    let mut current = target;
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let next_is_index = matches!(segments.get(i + 1), Some(Segment::Index(_)));
        let placeholder = || {
            if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        };

        current = match segment {
            Segment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let Value::Object(map) = current else {
                    unreachable!("coerced to object above")
                };
                if last {
                    map.insert((*key).to_string(), value);
                    return;
                }
                map.entry((*key).to_string()).or_insert_with(placeholder)
            }
            Segment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let Value::Array(items) = current else {
                    unreachable!("coerced to array above")
                };
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                if last {
                    items[*index] = value;
                    return;
                }
                if items[*index].is_null() {
                    items[*index] = placeholder();
                }
                &mut items[*index]
            }
        };
    }
}
