//! Typed cmdlet descriptors rendered into PowerShell command lines.

use serde_json::Value;

use super::error::{Result, ShellError};

/// A single cmdlet invocation with its named arguments.
///
/// Arguments keep insertion order so the rendered command is stable.
/// A value that cannot be rendered is recorded on the cmdlet and reported
/// when the pipeline is built.
#[derive(Debug, Clone)]
pub struct Cmdlet {
    name: String,
    args: Vec<(String, Value)>,
    error: Option<String>,
}

impl Cmdlet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            error: None,
        }
    }

    /// Add a named argument. `Value::Null` renders as a bare switch.
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        let key = if key.starts_with('-') {
            key.to_string()
        } else {
            format!("-{}", key)
        };
        let value = value.into();

        if format_value(&value).is_none() {
            if self.error.is_none() {
                self.error = Some(key.clone());
            }
        } else if self.error.as_deref() == Some(key.as_str()) {
            self.error = self
                .args
                .iter()
                .filter(|(k, _)| *k != key)
                .find(|(_, v)| format_value(v).is_none())
                .map(|(k, _)| k.clone());
        }

        match self.args.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.args.push((key, value)),
        }
        self
    }

    /// Add a bare switch such as `-AsJson`.
    pub fn switch(self, key: &str) -> Self {
        self.arg(key, Value::Null)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the full command line.
    pub fn build(&self) -> Result<String> {
        if let Some(key) = &self.error {
            return Err(ShellError::UnsupportedValue(key.clone()));
        }

        let mut command = self.name.clone();
        for (key, value) in &self.args {
            command.push(' ');
            command.push_str(key);
            if value.is_null() {
                continue;
            }
            let rendered =
                format_value(value).ok_or_else(|| ShellError::UnsupportedValue(key.clone()))?;
            command.push(' ');
            command.push_str(&rendered);
        }
        Ok(command)
    }
}

/// Chain cmdlets into a single pipeline joined with `|`.
pub fn build_pipeline(cmdlets: &[Cmdlet]) -> Result<String> {
    if cmdlets.is_empty() {
        return Err(ShellError::MissingCmdlet);
    }

    let commands = cmdlets
        .iter()
        .map(|c| {
            c.build().map_err(|e| ShellError::Build {
                name: c.name.clone(),
                source: Box::new(e),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(commands.join(" | "))
}

fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Array(items) => items
            .iter()
            .map(format_scalar)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        other => format_scalar(other),
    }
}

fn format_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(quote(s)),
        Value::Bool(true) => Some("$true".to_string()),
        Value::Bool(false) => Some("$false".to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| f.to_string())
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Single-quoted literal. PowerShell also treats the typographic single
/// quotes as quote characters, so each of them is doubled as well.
fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            quoted.push(c);
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_switch_and_string() {
        let c = Cmdlet::new("Get-ChildItem")
            .switch("Recurse")
            .arg("Path", "C:\\Windows");
        assert_eq!(c.build().unwrap(), "Get-ChildItem -Recurse -Path 'C:\\Windows'");
    }

    #[test]
    fn test_string_quoting() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("has space"), "'has space'");
        assert_eq!(quote("say \"hi\""), "'say \"hi\"'");
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(quote("it\u{2019}s"), "'it\u{2019}\u{2019}s'");
    }

    #[test]
    fn test_expressions_stay_literal() {
        let pipeline = build_pipeline(&[Cmdlet::new("Get-PVDisks")
            .arg("NextToken", "$(Remove-Item${IFS}C:\\pv)")
            .switch("AsJson")])
        .unwrap();
        assert_eq!(pipeline, "Get-PVDisks -NextToken '$(Remove-Item${IFS}C:\\pv)' -AsJson");

        let pipeline = build_pipeline(&[
            Cmdlet::new("Get-PVDisk").arg("Name", "x'; Remove-Item C:\\pv; '"),
        ])
        .unwrap();
        assert_eq!(pipeline, "Get-PVDisk -Name 'x''; Remove-Item C:\\pv; '''");
    }

    #[test]
    fn test_scalar_and_list_values() {
        let c = Cmdlet::new("Get-Foo")
            .arg("-Int", 1)
            .arg("F64", 1.2)
            .arg("Bool", true)
            .arg("Off", false)
            .arg("MultiString", json!(["a", "b", "c"]))
            .arg("MultiFloat", json!([1.2, 2.0, 3]));
        assert_eq!(
            c.build().unwrap(),
            "Get-Foo -Int 1 -F64 1.2 -Bool $true -Off $false -MultiString 'a','b','c' -MultiFloat 1.2,2,3"
        );
    }

    #[test]
    fn test_repeated_key_replaces_value() {
        let c = Cmdlet::new("Get-PVDisk").arg("Name", "a").arg("-Name", "b");
        assert_eq!(c.build().unwrap(), "Get-PVDisk -Name 'b'");
    }

    #[test]
    fn test_unsupported_value_is_deferred() {
        let c = Cmdlet::new("Set-Foo").arg("Map", json!({"a": 1}));
        assert!(matches!(c.build(), Err(ShellError::UnsupportedValue(k)) if k == "-Map"));

        let err = build_pipeline(&[Cmdlet::new("Get-Foo"), c]).unwrap_err();
        assert_eq!(err.to_string(), "Set-Foo: unsupported value for argument '-Map'");
    }

    #[test]
    fn test_replacing_unsupported_value_clears_error() {
        let c = Cmdlet::new("Set-Foo")
            .arg("Map", json!({"a": 1}))
            .arg("Map", "fixed");
        assert_eq!(c.build().unwrap(), "Set-Foo -Map 'fixed'");

        // a second bad argument is still reported
        let c = Cmdlet::new("Set-Foo")
            .arg("Map", json!({"a": 1}))
            .arg("List", json!([[1]]))
            .arg("Map", "fixed");
        assert!(matches!(c.build(), Err(ShellError::UnsupportedValue(k)) if k == "-List"));

        let c = Cmdlet::new("Set-Foo")
            .arg("Map", "ok")
            .arg("Map", json!({"a": 1}));
        assert!(matches!(c.build(), Err(ShellError::UnsupportedValue(k)) if k == "-Map"));
    }

    #[test]
    fn test_pipeline() {
        assert!(matches!(build_pipeline(&[]), Err(ShellError::MissingCmdlet)));

        let pipeline = build_pipeline(&[
            Cmdlet::new("Get-VM"),
            Cmdlet::new("ConvertTo-Json").arg("Depth", 3),
        ])
        .unwrap();
        assert_eq!(pipeline, "Get-VM | ConvertTo-Json -Depth 3");
    }
}
