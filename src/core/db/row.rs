/// Row Formatting Module
///
/// Rows travel across the caller boundary as single text records. Field values
/// are joined with the ASCII unit separator (U+001F) and SQL NULL is rendered
/// as the literal `NULL`, so a one-column row renders as the bare value.
use serde_json::{Map, Value};

/// Separator placed between field values of a serialized row.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// One row of a result set; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Row { values }
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Serializes the row into a delimited text record.
    pub fn to_record(&self) -> String {
        let mut record = String::new();
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                record.push(FIELD_SEPARATOR);
            }
            record.push_str(value.as_deref().unwrap_or("NULL"));
        }
        record
    }

    /// Renders the row as a JSON object keyed by column name.
    ///
    /// Values without a matching column name are keyed by their index.
    pub fn to_json(&self, columns: &[String]) -> Value {
        let mut object = Map::with_capacity(self.values.len());
        for (i, value) in self.values.iter().enumerate() {
            let key = columns.get(i).cloned().unwrap_or_else(|| i.to_string());
            let json = match value {
                Some(text) => Value::String(text.clone()),
                None => Value::Null,
            };
            object.insert(key, json);
        }
        Value::Object(object)
    }
}

impl From<Vec<Option<String>>> for Row {
    fn from(values: Vec<Option<String>>) -> Self {
        Row::new(values)
    }
}
