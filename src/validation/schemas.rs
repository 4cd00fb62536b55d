use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::json;

/// Compiled JSON schemas for gateway webhook payloads
pub struct SchemaRegistry {
    pub gateway_callback_v1: JSONSchema,
}

impl SchemaRegistry {
    fn new() -> Self {
        Self {
            gateway_callback_v1: JSONSchema::compile(&gateway_callback_schema_v1())
                .expect("Failed to compile gateway callback schema"),
        }
    }
}

/// Global schema registry with cached compiled schemas
pub static SCHEMAS: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::new);

/// JSON schema for the payment gateway callback payload (v1)
fn gateway_callback_schema_v1() -> serde_json::Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["token", "conversation_id"],
        "additionalProperties": false,
        "properties": {
            "token": {
                "type": "string",
                "minLength": 1,
                "maxLength": 128,
                "description": "Checkout token issued at payment initialization"
            },
            "conversation_id": {
                "type": "string",
                "pattern": "^LSN-[0-9]{8}-[A-Z0-9]{6}$",
                "description": "Order code the payment was initialized with"
            },
            "status": {
                "type": "string",
                "maxLength": 20,
                "description": "Gateway-reported status hint; the result is re-fetched server side"
            }
        }
    })
}

/// Validates a callback payload, collecting every violation.
pub fn validate_gateway_callback(payload: &serde_json::Value) -> Result<(), Vec<String>> {
    let result = SCHEMAS.gateway_callback_v1.validate(payload);
    match result {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors.map(|e| e.to_string()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_callback_passes() {
        let payload = json!({
            "token": "tok_abc123",
            "conversation_id": "LSN-20250314-K7Q2XN",
            "status": "success"
        });
        assert!(validate_gateway_callback(&payload).is_ok());
    }

    #[test]
    fn test_missing_token_fails() {
        let payload = json!({ "conversation_id": "LSN-20250314-K7Q2XN" });
        assert!(validate_gateway_callback(&payload).is_err());
    }

    #[test]
    fn test_malformed_order_code_fails() {
        let payload = json!({
            "token": "tok_abc123",
            "conversation_id": "not-an-order-code"
        });
        assert!(validate_gateway_callback(&payload).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let payload = json!({
            "token": "tok_abc123",
            "conversation_id": "LSN-20250314-K7Q2XN",
            "amount": "1000"
        });
        assert!(validate_gateway_callback(&payload).is_err());
    }
}
