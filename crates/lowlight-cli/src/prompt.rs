use std::io::{self, Write};

use anyhow::Result;

/// Ask for a line of input, offering `default` when one is known.
pub fn line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", label, default),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), default) {
        (true, Some(default)) => Ok(default.to_string()),
        _ => Ok(input.to_string()),
    }
}

pub fn password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

/// Use the given value or prompt for it
pub fn or_line(value: Option<String>, label: &str, default: Option<&str>) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => line(label, default),
    }
}

pub fn or_password(value: Option<String>) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => password(),
    }
}
