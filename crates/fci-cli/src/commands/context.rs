//! Context command implementation

use anyhow::Result;
use serde_json::Value;

use fci_core::RunContext;

const REDACTED: &str = "[redacted]";

/// Render the run context as pretty JSON with the secret redacted
pub fn context_json(context: &RunContext) -> Result<String> {
    let mut value = serde_json::to_value(context)?;
    if let Value::Object(map) = &mut value {
        map.insert("secret_key".to_string(), Value::from(REDACTED));
        map.insert("topic".to_string(), Value::from(context.topic().as_str()));
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Execute the context command
pub fn context_command(context: &RunContext) -> Result<()> {
    println!("{}", context_json(context)?);
    Ok(())
}
