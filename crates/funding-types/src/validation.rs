//! Validation of pluggable implementation tables in the configuration.
//!
//! Each backend (balance source, bridge provider, rewards oracle, storage)
//! describes the shape of its TOML table with a [`Schema`] and is checked
//! before the backend is constructed.

use alloy_primitives::Address;
use std::str::FromStr;
use thiserror::Error;

use crate::Amount;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

/// Type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// A hex encoded 20 byte address.
	Address,
	/// An http(s) URL.
	Url,
	/// A non-negative integer amount in base units, as integer or decimal string.
	Amount,
	Array(Box<FieldType>),
	Table(Schema),
}

pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A field definition with name and type.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Adds a custom validator to this field.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}
}

/// Schema definition with required and optional fields.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML value against this schema.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			check_field(field, value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				check_field(field, value)?;
			}
		}

		Ok(())
	}
}

fn check_field(field: &Field, value: &toml::Value) -> Result<(), ValidationError> {
	validate_field_type(&field.name, value, &field.field_type)?;

	if let Some(validator) = &field.validator {
		validator(value).map_err(|msg| ValidationError::InvalidValue {
			field: field.name.clone(),
			message: msg,
		})?;
	}
	Ok(())
}

fn type_mismatch(field_name: &str, expected: &str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: field_name.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

fn invalid(field_name: &str, message: impl Into<String>) -> ValidationError {
	ValidationError::InvalidValue {
		field: field_name.to_string(),
		message: message.into(),
	}
}

/// Validates that a value matches the expected field type.
fn validate_field_type(
	field_name: &str,
	value: &toml::Value,
	expected_type: &FieldType,
) -> Result<(), ValidationError> {
	match expected_type {
		FieldType::String => {
			if !value.is_str() {
				return Err(type_mismatch(field_name, "string", value));
			}
		}
		FieldType::Integer { min, max } => {
			let int_val = value
				.as_integer()
				.ok_or_else(|| type_mismatch(field_name, "integer", value))?;

			if let Some(min_val) = min {
				if int_val < *min_val {
					return Err(invalid(
						field_name,
						format!("Value {} is less than minimum {}", int_val, min_val),
					));
				}
			}

			if let Some(max_val) = max {
				if int_val > *max_val {
					return Err(invalid(
						field_name,
						format!("Value {} is greater than maximum {}", int_val, max_val),
					));
				}
			}
		}
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(type_mismatch(field_name, "boolean", value));
			}
		}
		FieldType::Address => {
			let raw = value
				.as_str()
				.ok_or_else(|| type_mismatch(field_name, "address string", value))?;
			Address::from_str(raw).map_err(|e| invalid(field_name, e.to_string()))?;
		}
		FieldType::Url => {
			let raw = value
				.as_str()
				.ok_or_else(|| type_mismatch(field_name, "url string", value))?;
			if !(raw.starts_with("http://") || raw.starts_with("https://")) {
				return Err(invalid(
					field_name,
					format!("'{}' must start with http:// or https://", raw),
				));
			}
		}
		FieldType::Amount => match value {
			toml::Value::Integer(int_val) if *int_val < 0 => {
				return Err(invalid(field_name, format!("Amount {} is negative", int_val)));
			}
			toml::Value::Integer(_) => {}
			toml::Value::String(raw) => {
				Amount::from_str(raw).map_err(|e| invalid(field_name, e.to_string()))?;
			}
			other => return Err(type_mismatch(field_name, "amount", other)),
		},
		FieldType::Array(inner_type) => {
			let array = value
				.as_array()
				.ok_or_else(|| type_mismatch(field_name, "array", value))?;

			for (i, item) in array.iter().enumerate() {
				validate_field_type(&format!("{}[{}]", field_name, i), item, inner_type)?;
			}
		}
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| match e {
				ValidationError::MissingField(f) => {
					ValidationError::MissingField(format!("{}.{}", field_name, f))
				}
				ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
					field: format!("{}.{}", field_name, field),
					message,
				},
				ValidationError::TypeMismatch {
					field,
					expected,
					actual,
				} => ValidationError::TypeMismatch {
					field: format!("{}.{}", field_name, field),
					expected,
					actual,
				},
				other => other,
			})?;
		}
	}

	Ok(())
}

/// A configuration schema that can validate TOML values.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn schema() -> Schema {
		Schema::new(
			vec![
				Field::new("base_url", FieldType::Url),
				Field::new("source", FieldType::Address),
			],
			vec![
				Field::new(
					"timeout_secs",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
				Field::new("threshold", FieldType::Amount),
			],
		)
	}

	#[test]
	fn test_valid_table() {
		let config: toml::Value = toml::from_str(
			r#"
			base_url = "http://localhost:8000"
			source = "0x1111111111111111111111111111111111111111"
			timeout_secs = 30
			threshold = "1000000000000000000"
			"#,
		)
		.unwrap();
		assert!(schema().validate(&config).is_ok());
	}

	#[test]
	fn test_rejects_bad_values() {
		let missing: toml::Value = toml::from_str(r#"base_url = "http://x""#).unwrap();
		assert!(matches!(
			schema().validate(&missing),
			Err(ValidationError::MissingField(field)) if field == "source"
		));

		let bad_url: toml::Value = toml::from_str(
			r#"
			base_url = "ftp://x"
			source = "0x1111111111111111111111111111111111111111"
			"#,
		)
		.unwrap();
		assert!(matches!(
			schema().validate(&bad_url),
			Err(ValidationError::InvalidValue { field, .. }) if field == "base_url"
		));

		let negative: toml::Value = toml::from_str(
			r#"
			base_url = "https://x"
			source = "0x1111111111111111111111111111111111111111"
			threshold = -1
			"#,
		)
		.unwrap();
		assert!(schema().validate(&negative).is_err());
	}
}
